//! Monte Carlo runner
//!
//! Repeats trials under per-trial seeded randomness and aggregates collapse
//! statistics. Trial `i` draws only from a generator seeded by
//! [`trial_seed`]`(base_seed, i)`, so a sweep is reproducible whatever order
//! or thread its trials run on. Trials run on the rayon pool; aggregation
//! happens afterwards on the calling thread.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::metrics::MetricSummary;
use crate::params::SystemParameters;
use crate::shock::ShockPlan;
use crate::trial::{run_trial, TrialResult};
use crate::SimError;

pub const DEFAULT_TRIALS: usize = 30;
pub const DEFAULT_STEPS: usize = 1000;

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// Seed for trial `trial_index` of a sweep with `base_seed`.
///
/// SplitMix64 finalizer over the base seed mixed with the trial index, so
/// neighbouring trials get unrelated streams.
pub fn trial_seed(base_seed: u64, trial_index: usize) -> u64 {
    let mut z = base_seed ^ (trial_index as u64).wrapping_add(1).wrapping_mul(GOLDEN_GAMMA);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

pub fn trial_rng(base_seed: u64, trial_index: usize) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(trial_seed(base_seed, trial_index))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub parameters: SystemParameters,
    pub base_seed: u64,
    pub n_steps: usize,
    pub shock_plan: ShockPlan,
    /// Indexed by trial; `trials[i]` ran with `trial_seed(base_seed, i)`
    pub trials: Vec<TrialResult>,
    pub completed_trials: usize,
    /// Diverged trials, excluded from every probability below
    pub failed_trials: usize,
    pub collapsed_trials: usize,
    pub recovered_trials: usize,
    /// collapsed / completed; `None` when no trial completed
    pub collapse_probability: Option<f64>,
    /// recovered / collapsed; `None` when no trial collapsed
    pub recovery_probability: Option<f64>,
    pub peg_deviation: Option<MetricSummary>,
    pub max_drawdown: Option<MetricSummary>,
    /// Over collapsed trials only
    pub time_to_collapse: Option<MetricSummary>,
}

impl ExperimentResult {
    fn aggregate(
        parameters: &SystemParameters,
        base_seed: u64,
        n_steps: usize,
        shock_plan: &ShockPlan,
        trials: Vec<TrialResult>,
    ) -> Self {
        let mut failed_trials = 0;
        let mut collapsed_trials = 0;
        let mut recovered_trials = 0;
        let mut peg_deviation = Vec::with_capacity(trials.len());
        let mut max_drawdown = Vec::with_capacity(trials.len());
        let mut time_to_collapse = Vec::new();

        for trial in &trials {
            if trial.is_failed() {
                failed_trials += 1;
                continue;
            }
            peg_deviation.push(trial.metrics.peg_deviation_integral);
            max_drawdown.push(trial.metrics.max_drawdown);
            if let Some(t) = trial.time_to_collapse {
                collapsed_trials += 1;
                time_to_collapse.push(t as f64);
                if trial.recovered {
                    recovered_trials += 1;
                }
            }
        }

        let completed_trials = trials.len() - failed_trials;
        Self {
            parameters: parameters.clone(),
            base_seed,
            n_steps,
            shock_plan: *shock_plan,
            trials,
            completed_trials,
            failed_trials,
            collapsed_trials,
            recovered_trials,
            collapse_probability: ratio(collapsed_trials, completed_trials),
            recovery_probability: ratio(recovered_trials, collapsed_trials),
            peg_deviation: MetricSummary::from_samples(&peg_deviation),
            max_drawdown: MetricSummary::from_samples(&max_drawdown),
            time_to_collapse: MetricSummary::from_samples(&time_to_collapse),
        }
    }

    pub fn n_trials(&self) -> usize {
        self.trials.len()
    }

    pub fn trial_seed(&self, trial_index: usize) -> u64 {
        trial_seed(self.base_seed, trial_index)
    }
}

fn ratio(numerator: usize, denominator: usize) -> Option<f64> {
    if denominator == 0 {
        None
    } else {
        Some(numerator as f64 / denominator as f64)
    }
}

/// Run `n_trials` trials of `n_steps` steps in parallel and aggregate them
pub fn run_monte_carlo(
    params: &SystemParameters,
    n_trials: usize,
    n_steps: usize,
    shock_plan: &ShockPlan,
) -> Result<ExperimentResult, SimError> {
    run_batch(params, n_trials, n_steps, shock_plan, true)
}

/// Same as [`run_monte_carlo`] on the calling thread only
pub fn run_monte_carlo_sequential(
    params: &SystemParameters,
    n_trials: usize,
    n_steps: usize,
    shock_plan: &ShockPlan,
) -> Result<ExperimentResult, SimError> {
    run_batch(params, n_trials, n_steps, shock_plan, false)
}

fn run_batch(
    params: &SystemParameters,
    n_trials: usize,
    n_steps: usize,
    shock_plan: &ShockPlan,
    parallel: bool,
) -> Result<ExperimentResult, SimError> {
    if n_trials == 0 {
        return Err(SimError::Configuration(
            "n_trials must be greater than zero".to_string(),
        ));
    }
    shock_plan.validate(n_steps)?;

    let base_seed = params.random_seed.unwrap_or_else(rand::random);
    info!(
        n_trials,
        n_steps,
        base_seed,
        model = params.model.label(),
        shock = shock_plan.label(),
        "starting monte carlo batch"
    );

    let run_one = |trial_index: usize| -> Result<TrialResult, SimError> {
        let mut rng = trial_rng(base_seed, trial_index);
        let shock = shock_plan.realize(&mut rng)?;
        run_trial(params, n_steps, shock.as_ref())
    };

    let trials: Vec<TrialResult> = if parallel {
        (0..n_trials)
            .into_par_iter()
            .map(run_one)
            .collect::<Result<_, _>>()?
    } else {
        (0..n_trials).map(run_one).collect::<Result<_, _>>()?
    };

    let result = ExperimentResult::aggregate(params, base_seed, n_steps, shock_plan, trials);
    info!(
        completed = result.completed_trials,
        failed = result.failed_trials,
        collapsed = result.collapsed_trials,
        collapse_probability = ?result.collapse_probability,
        recovery_probability = ?result.recovery_probability,
        "monte carlo batch finished"
    );
    Ok(result)
}
