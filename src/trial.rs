//! Single-trial runner
//!
//! Drives the transition rule for a fixed number of steps, injecting an
//! optional shock, and tracks the Running -> Collapsed -> Completed state
//! machine. The run never stops early on collapse so that recovery can be
//! observed; it stops early only when the numbers diverge, in which case the
//! trial is returned as failed instead of aborting its caller.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dynamics;
use crate::metrics::{compute_metrics_with, CollapseMonitor, TrialMetrics};
use crate::params::SystemParameters;
use crate::shock::ShockSpec;
use crate::state::SystemState;
use crate::SimError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum TrialPhase {
    /// Price has stayed at or above the collapse threshold
    Running,
    /// Price crossed below the collapse threshold at `first_step`
    Collapsed { first_step: u64 },
    /// All steps ran
    Completed { collapsed_at: Option<u64> },
}

/// Why a trial stopped before `n_steps`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialFailure {
    pub step: u64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    /// States at t = 0..=n_steps (shorter if the trial failed)
    pub trajectory: Vec<SystemState>,
    /// Shock the trial actually ran with
    pub shock: Option<ShockSpec>,
    pub collapsed: bool,
    pub time_to_collapse: Option<u64>,
    pub recovered: bool,
    pub metrics: TrialMetrics,
    pub phase: TrialPhase,
    pub failure: Option<TrialFailure>,
}

impl TrialResult {
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    pub fn prices(&self) -> Vec<f64> {
        self.trajectory.iter().map(|state| state.price).collect()
    }

    pub fn final_state(&self) -> Option<&SystemState> {
        self.trajectory.last()
    }
}

/// Run one trial of `n_steps` transitions.
///
/// A shock whose trigger step lies outside `[0, n_steps)` is rejected before
/// any stepping. Numerical divergence inside the run is reported through
/// [`TrialResult::failure`], not as an `Err`.
pub fn run_trial(
    params: &SystemParameters,
    n_steps: usize,
    shock: Option<&ShockSpec>,
) -> Result<TrialResult, SimError> {
    if let Some(shock) = shock {
        shock.validate(n_steps)?;
    }

    let rule = dynamics::transition(params.model);
    let mut trajectory = Vec::with_capacity(n_steps + 1);
    let mut monitor = CollapseMonitor::new(params.thresholds);
    let mut state = SystemState::initial(params);
    if monitor.observe(&state) {
        debug!(step = 0, price = state.price, "trial starts below collapse threshold");
    }
    trajectory.push(state);

    let mut failure = None;
    for _ in 0..n_steps {
        let input = match shock {
            Some(shock) if shock.applies_at(state.t) => {
                debug!(
                    step = state.t,
                    variable = %shock.target,
                    magnitude = shock.magnitude,
                    "applying shock"
                );
                shock.apply(&state)
            }
            _ => state,
        };

        match rule.step(&input, params) {
            Ok(next) => {
                if monitor.observe(&next) {
                    debug!(step = next.t, price = next.price, "trial collapsed");
                }
                trajectory.push(next);
                state = next;
            }
            Err(SimError::NumericalDivergence { step, reason }) => {
                warn!(step, model = rule.name(), %reason, "trial diverged, marking failed");
                failure = Some(TrialFailure { step, reason });
                break;
            }
            Err(other) => return Err(other),
        }
    }

    let metrics = compute_metrics_with(&trajectory, &params.thresholds);
    let phase = if failure.is_some() {
        monitor.phase()
    } else {
        TrialPhase::Completed {
            collapsed_at: monitor.first_collapse(),
        }
    };

    Ok(TrialResult {
        trajectory,
        shock: shock.copied(),
        collapsed: metrics.collapsed(),
        time_to_collapse: metrics.time_to_collapse,
        recovered: metrics.recovered,
        metrics,
        phase,
        failure,
    })
}
