//! Tabular export of experiment results
//!
//! Row builders are pure; writers take any `io::Write` so callers choose
//! between files and in-memory buffers.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::metrics::MetricSummary;
use crate::monte_carlo::ExperimentResult;
use crate::params::ParameterSpec;
use crate::shock::ShockPlan;
use crate::state::SystemState;
use crate::sweep::SweepResult;
use crate::trial::TrialResult;
use crate::SimError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialRow {
    pub trial: usize,
    pub seed: u64,
    pub model: &'static str,
    pub mint_coefficient: f64,
    pub burn_coefficient: f64,
    pub demand_elasticity: f64,
    pub liquidity_depth: f64,
    pub price_friction_gamma: f64,
    pub shock_target: Option<&'static str>,
    pub shock_magnitude: Option<f64>,
    pub shock_step: Option<u64>,
    pub peg_deviation_integral: f64,
    pub time_to_collapse: Option<u64>,
    pub max_drawdown: f64,
    pub min_price: f64,
    pub terminal_price: f64,
    pub peak_reflexivity: f64,
    pub peak_arbitrage: f64,
    pub collapsed: bool,
    pub recovered: bool,
    pub failed: bool,
    pub failure_step: Option<u64>,
}

impl TrialRow {
    fn new(trial: usize, seed: u64, params: &ParameterSpec, result: &TrialResult) -> Self {
        let metrics = &result.metrics;
        Self {
            trial,
            seed,
            model: params.model.label(),
            mint_coefficient: params.mint_coefficient,
            burn_coefficient: params.burn_coefficient,
            demand_elasticity: params.demand_elasticity,
            liquidity_depth: params.liquidity_depth,
            price_friction_gamma: params.price_friction_gamma,
            shock_target: result.shock.map(|shock| shock.target.variable().name()),
            shock_magnitude: result.shock.map(|shock| shock.magnitude),
            shock_step: result.shock.map(|shock| shock.trigger_step),
            peg_deviation_integral: metrics.peg_deviation_integral,
            time_to_collapse: metrics.time_to_collapse,
            max_drawdown: metrics.max_drawdown,
            min_price: metrics.min_price,
            terminal_price: metrics.terminal_price,
            peak_reflexivity: metrics.peak_reflexivity,
            peak_arbitrage: metrics.peak_arbitrage,
            collapsed: result.collapsed,
            recovered: result.recovered,
            failed: result.is_failed(),
            failure_step: result.failure.as_ref().map(|failure| failure.step),
        }
    }
}

pub fn trial_rows(result: &ExperimentResult) -> Vec<TrialRow> {
    result
        .trials
        .iter()
        .enumerate()
        .map(|(idx, trial)| TrialRow::new(idx, result.trial_seed(idx), result.parameters.spec(), trial))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrajectoryRow {
    pub step: u64,
    pub time: f64,
    pub supply: f64,
    pub price: f64,
    pub collateral: f64,
    pub liquidity: f64,
    pub demand: f64,
    pub collateral_ratio: f64,
}

pub fn trajectory_rows(trajectory: &[SystemState], dt: f64) -> Vec<TrajectoryRow> {
    trajectory
        .iter()
        .map(|state| TrajectoryRow {
            step: state.t,
            time: state.t as f64 * dt,
            supply: state.supply,
            price: state.price,
            collateral: state.collateral,
            liquidity: state.liquidity,
            demand: state.demand,
            collateral_ratio: state.collateral_ratio(),
        })
        .collect()
}

/// Batch-level numbers without the per-trial trajectories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSummary {
    pub parameters: ParameterSpec,
    pub base_seed: u64,
    pub n_steps: usize,
    pub n_trials: usize,
    pub shock_plan: ShockPlan,
    pub completed_trials: usize,
    pub failed_trials: usize,
    pub collapsed_trials: usize,
    pub recovered_trials: usize,
    pub collapse_probability: Option<f64>,
    pub recovery_probability: Option<f64>,
    pub peg_deviation: Option<MetricSummary>,
    pub max_drawdown: Option<MetricSummary>,
    pub time_to_collapse: Option<MetricSummary>,
}

impl From<&ExperimentResult> for ExperimentSummary {
    fn from(result: &ExperimentResult) -> Self {
        Self {
            parameters: result.parameters.spec().clone(),
            base_seed: result.base_seed,
            n_steps: result.n_steps,
            n_trials: result.n_trials(),
            shock_plan: result.shock_plan,
            completed_trials: result.completed_trials,
            failed_trials: result.failed_trials,
            collapsed_trials: result.collapsed_trials,
            recovered_trials: result.recovered_trials,
            collapse_probability: result.collapse_probability,
            recovery_probability: result.recovery_probability,
            peg_deviation: result.peg_deviation,
            max_drawdown: result.max_drawdown,
            time_to_collapse: result.time_to_collapse,
        }
    }
}

pub fn write_csv<W: Write, T: Serialize>(writer: W, rows: &[T]) -> Result<(), SimError> {
    let mut writer = csv::Writer::from_writer(writer);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// One column per sweep axis followed by the cell statistics
pub fn write_sweep_csv<W: Write>(writer: W, sweep: &SweepResult) -> Result<(), SimError> {
    let mut writer = csv::Writer::from_writer(writer);

    let mut header: Vec<String> = sweep
        .axes
        .iter()
        .map(|axis| axis.parameter.name().to_string())
        .collect();
    header.extend(
        [
            "base_seed",
            "collapse_probability",
            "recovery_probability",
            "mean_time_to_collapse",
            "mean_max_drawdown",
            "completed_trials",
            "failed_trials",
        ]
        .map(String::from),
    );
    writer.write_record(&header)?;

    for cell in &sweep.cells {
        let mut record: Vec<String> = cell.values.iter().map(|(_, value)| fmt_f64(*value)).collect();
        record.push(cell.base_seed.to_string());
        record.push(fmt_option_f64(cell.collapse_probability));
        record.push(fmt_option_f64(cell.recovery_probability));
        record.push(fmt_option_f64(cell.mean_time_to_collapse));
        record.push(fmt_option_f64(cell.mean_max_drawdown));
        record.push(cell.completed_trials.to_string());
        record.push(cell.failed_trials.to_string());
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

pub fn write_summary_json<W: Write, T: Serialize>(mut writer: W, summary: &T) -> Result<(), SimError> {
    serde_json::to_writer_pretty(&mut writer, summary)?;
    writer.write_all(b"\n")?;
    Ok(())
}

fn fmt_f64(value: f64) -> String {
    format!("{value:.10}")
}

fn fmt_option_f64(value: Option<f64>) -> String {
    value.map(fmt_f64).unwrap_or_default()
}

/// Fresh `<root>/<UTC timestamp>` directory; suffixed when the name is taken
pub fn create_timestamped_output_dir(root: &Path) -> Result<PathBuf, SimError> {
    fs::create_dir_all(root)?;

    let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let mut output_dir = root.join(&timestamp);
    let mut counter = 1_u32;

    while output_dir.exists() {
        output_dir = root.join(format!("{timestamp}-{counter:02}"));
        counter += 1;
    }

    fs::create_dir_all(&output_dir)?;
    Ok(output_dir)
}

/// Write `trials.csv`, `summary.json`, and the first trial's trajectory
pub fn write_experiment(dir: &Path, result: &ExperimentResult) -> Result<Vec<PathBuf>, SimError> {
    let trials_path = dir.join("trials.csv");
    write_csv(fs::File::create(&trials_path)?, &trial_rows(result))?;

    let summary_path = dir.join("summary.json");
    write_summary_json(
        fs::File::create(&summary_path)?,
        &ExperimentSummary::from(result),
    )?;

    let mut written = vec![trials_path, summary_path];
    if let Some(first) = result.trials.first() {
        let trajectory_path = dir.join("trajectory_trial_000.csv");
        write_csv(
            fs::File::create(&trajectory_path)?,
            &trajectory_rows(&first.trajectory, result.parameters.dt),
        )?;
        written.push(trajectory_path);
    }
    Ok(written)
}

pub fn write_sweep(dir: &Path, sweep: &SweepResult) -> Result<Vec<PathBuf>, SimError> {
    let cells_path = dir.join("sweep.csv");
    write_sweep_csv(fs::File::create(&cells_path)?, sweep)?;

    let summary_path = dir.join("sweep.json");
    write_summary_json(fs::File::create(&summary_path)?, sweep)?;
    Ok(vec![cells_path, summary_path])
}
