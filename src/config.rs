//! JSON experiment configuration

use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_with::{serde_as, DefaultOnNull};

use crate::monte_carlo::{DEFAULT_STEPS, DEFAULT_TRIALS};
use crate::params::{ParameterSpec, SystemParameters};
use crate::shock::ShockPlan;
use crate::sweep::SweepAxis;
use crate::SimError;

/// Experiment description as read from a JSON file
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub parameters: ParameterSpec,
    #[serde(deserialize_with = "steps_or_default")]
    pub n_steps: usize,
    #[serde(deserialize_with = "trials_or_default")]
    pub n_trials: usize,
    #[serde_as(as = "DefaultOnNull")]
    pub shock: ShockPlan,
    #[serde(default)]
    pub sweep_axes: Vec<SweepAxis>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            parameters: ParameterSpec::default(),
            n_steps: DEFAULT_STEPS,
            n_trials: DEFAULT_TRIALS,
            shock: ShockPlan::None,
            sweep_axes: Vec::new(),
        }
    }
}

// `null` maps to the experiment defaults, not to `usize::default()`
fn steps_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    Ok(Option::<usize>::deserialize(deserializer)?.unwrap_or(DEFAULT_STEPS))
}

fn trials_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    Ok(Option::<usize>::deserialize(deserializer)?.unwrap_or(DEFAULT_TRIALS))
}

impl ExperimentConfig {
    pub fn load(path: &Path) -> Result<Self, SimError> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SimError> {
        self.parameters.validate()?;

        if self.n_trials == 0 {
            return Err(SimError::Configuration(
                "n_trials must be greater than zero".to_string(),
            ));
        }

        self.shock.validate(self.n_steps)?;

        for axis in &self.sweep_axes {
            axis.validate()?;
        }

        Ok(())
    }

    pub fn system_parameters(&self) -> Result<SystemParameters, SimError> {
        SystemParameters::new(self.parameters.clone())
    }
}
