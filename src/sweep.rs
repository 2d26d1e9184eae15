//! Parameter-grid stress sweeps
//!
//! Runs the Monte Carlo runner at every point of a cartesian grid of
//! parameter values and keeps one summary cell per point.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::monte_carlo::run_monte_carlo;
use crate::params::{ParameterSpec, SystemParameters};
use crate::shock::ShockPlan;
use crate::SimError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepParameter {
    MintCoefficient,
    BurnCoefficient,
    DemandElasticity,
    LiquidityDepth,
    PriceFrictionGamma,
}

impl SweepParameter {
    pub fn name(&self) -> &'static str {
        match self {
            SweepParameter::MintCoefficient => "mint_coefficient",
            SweepParameter::BurnCoefficient => "burn_coefficient",
            SweepParameter::DemandElasticity => "demand_elasticity",
            SweepParameter::LiquidityDepth => "liquidity_depth",
            SweepParameter::PriceFrictionGamma => "price_friction_gamma",
        }
    }

    pub fn apply(&self, spec: &mut ParameterSpec, value: f64) {
        match self {
            SweepParameter::MintCoefficient => spec.mint_coefficient = value,
            SweepParameter::BurnCoefficient => spec.burn_coefficient = value,
            SweepParameter::DemandElasticity => spec.demand_elasticity = value,
            SweepParameter::LiquidityDepth => spec.liquidity_depth = value,
            SweepParameter::PriceFrictionGamma => spec.price_friction_gamma = value,
        }
    }

    pub fn value(&self, spec: &ParameterSpec) -> f64 {
        match self {
            SweepParameter::MintCoefficient => spec.mint_coefficient,
            SweepParameter::BurnCoefficient => spec.burn_coefficient,
            SweepParameter::DemandElasticity => spec.demand_elasticity,
            SweepParameter::LiquidityDepth => spec.liquidity_depth,
            SweepParameter::PriceFrictionGamma => spec.price_friction_gamma,
        }
    }
}

impl fmt::Display for SweepParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SweepParameter {
    type Err = SimError;

    fn from_str(raw: &str) -> Result<Self, SimError> {
        match raw.trim().to_lowercase().replace('-', "_").as_str() {
            "mint_coefficient" | "alpha" => Ok(SweepParameter::MintCoefficient),
            "burn_coefficient" | "beta" => Ok(SweepParameter::BurnCoefficient),
            "demand_elasticity" | "epsilon" | "elasticity" => Ok(SweepParameter::DemandElasticity),
            "liquidity_depth" => Ok(SweepParameter::LiquidityDepth),
            "price_friction_gamma" | "gamma" => Ok(SweepParameter::PriceFrictionGamma),
            other => Err(SimError::Configuration(format!(
                "unknown sweep parameter '{other}'"
            ))),
        }
    }
}

/// Linearly spaced values of one parameter, endpoints included
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepAxis {
    pub parameter: SweepParameter,
    pub min: f64,
    pub max: f64,
    pub points: usize,
}

impl SweepAxis {
    pub fn new(parameter: SweepParameter, min: f64, max: f64, points: usize) -> Self {
        Self {
            parameter,
            min,
            max,
            points,
        }
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if self.points == 0 {
            return Err(SimError::Configuration(format!(
                "sweep axis {} needs at least one point",
                self.parameter
            )));
        }
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(SimError::Configuration(format!(
                "sweep axis {} bounds must be finite",
                self.parameter
            )));
        }
        if self.max < self.min {
            return Err(SimError::Configuration(format!(
                "sweep axis {} has max {} below min {}",
                self.parameter, self.max, self.min
            )));
        }
        Ok(())
    }

    pub fn grid(&self) -> Vec<f64> {
        if self.points == 1 {
            return vec![self.min];
        }

        let span = self.max - self.min;
        let denom = (self.points - 1) as f64;

        (0..self.points)
            .map(|idx| self.min + span * idx as f64 / denom)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepCell {
    /// One `(parameter, value)` per axis, in axis order
    pub values: Vec<(SweepParameter, f64)>,
    pub base_seed: u64,
    pub collapse_probability: Option<f64>,
    pub recovery_probability: Option<f64>,
    pub mean_time_to_collapse: Option<f64>,
    pub mean_max_drawdown: Option<f64>,
    pub completed_trials: usize,
    pub failed_trials: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    pub axes: Vec<SweepAxis>,
    pub n_trials: usize,
    pub n_steps: usize,
    pub cells: Vec<SweepCell>,
}

/// Cartesian product of the axis grids; the last axis varies fastest
fn grid_points(axes: &[SweepAxis]) -> Vec<Vec<(SweepParameter, f64)>> {
    let mut points: Vec<Vec<(SweepParameter, f64)>> = vec![Vec::new()];
    for axis in axes {
        let grid = axis.grid();
        points = points
            .into_iter()
            .flat_map(|prefix| {
                grid.iter().map(move |&value| {
                    let mut point = prefix.clone();
                    point.push((axis.parameter, value));
                    point
                })
            })
            .collect();
    }
    points
}

/// Run a Monte Carlo batch at every grid point derived from `base`.
///
/// Every cell reuses the base seed of `base`, so cells differ only through
/// the swept parameters. A grid point with invalid parameters fails the sweep.
pub fn run_parameter_sweep(
    base: &SystemParameters,
    axes: &[SweepAxis],
    n_trials: usize,
    n_steps: usize,
    shock_plan: &ShockPlan,
) -> Result<SweepResult, SimError> {
    if axes.is_empty() {
        return Err(SimError::Configuration(
            "parameter sweep needs at least one axis".to_string(),
        ));
    }
    for axis in axes {
        axis.validate()?;
    }
    shock_plan.validate(n_steps)?;

    let base_seed = base.random_seed.unwrap_or_else(rand::random);
    let points = grid_points(axes);
    info!(
        cells = points.len(),
        n_trials,
        n_steps,
        base_seed,
        "starting parameter sweep"
    );

    let mut cells = Vec::with_capacity(points.len());
    for values in points {
        let params = base.with(|spec| {
            spec.random_seed = Some(base_seed);
            for &(parameter, value) in &values {
                parameter.apply(spec, value);
            }
        })?;
        let experiment = run_monte_carlo(&params, n_trials, n_steps, shock_plan)?;
        cells.push(SweepCell {
            values,
            base_seed,
            collapse_probability: experiment.collapse_probability,
            recovery_probability: experiment.recovery_probability,
            mean_time_to_collapse: experiment.time_to_collapse.map(|s| s.mean),
            mean_max_drawdown: experiment.max_drawdown.map(|s| s.mean),
            completed_trials: experiment.completed_trials,
            failed_trials: experiment.failed_trials,
        });
    }

    info!(cells = cells.len(), "parameter sweep finished");
    Ok(SweepResult {
        axes: axes.to_vec(),
        n_trials,
        n_steps,
        cells,
    })
}
