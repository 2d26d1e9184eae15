//! stablesim - algorithmic stablecoin stress simulator
//!
//! Models a stablecoin as a five-variable discrete-time system
//! (supply, price, collateral, liquidity, demand), injects one-time shocks,
//! and repeats seeded trials to locate collapse regions in parameter space.
//!
//! The results are qualitative: the model exposes bifurcation behaviour and
//! is not calibrated against any real market.

pub mod config;
pub mod dynamics;
pub mod market;
pub mod metrics;
pub mod monte_carlo;
pub mod params;
pub mod report;
pub mod shock;
pub mod state;
pub mod sweep;
pub mod trial;

use thiserror::Error;

// Re-export main types
pub use config::ExperimentConfig;
pub use dynamics::{step, transition, PegTransition, ReflexiveTransition, TransitionRule};
pub use metrics::{compute_metrics, compute_metrics_with, MetricSummary, TrialMetrics};
pub use monte_carlo::{run_monte_carlo, run_monte_carlo_sequential, trial_seed, ExperimentResult};
pub use params::{DynamicsModel, ParameterSpec, SystemParameters, Thresholds};
pub use shock::{MagnitudeDistribution, ShockDistribution, ShockPlan, ShockSpec, ShockTarget};
pub use state::{StateVariable, SystemState};
pub use sweep::{run_parameter_sweep, SweepAxis, SweepCell, SweepParameter, SweepResult};
pub use trial::{run_trial, TrialFailure, TrialPhase, TrialResult};

#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("numerical divergence at step {step}: {reason}")]
    NumericalDivergence { step: u64, reason: String },
    #[error("invalid shock: {0}")]
    ShockApplication(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
