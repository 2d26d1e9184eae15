//! One-time exogenous shocks
//!
//! A [`ShockSpec`] multiplies collateral or liquidity by `(1 + magnitude)`
//! at exactly one step. A [`ShockPlan`] says how each Monte Carlo trial gets
//! its shock: none, a fixed one, or one drawn from the trial's own generator.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::state::{StateVariable, SystemState};
use crate::SimError;

/// State variables a shock may target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShockTarget {
    Collateral,
    Liquidity,
}

impl ShockTarget {
    pub fn variable(&self) -> StateVariable {
        match self {
            ShockTarget::Collateral => StateVariable::Collateral,
            ShockTarget::Liquidity => StateVariable::Liquidity,
        }
    }
}

impl fmt::Display for ShockTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.variable().name())
    }
}

impl TryFrom<StateVariable> for ShockTarget {
    type Error = SimError;

    fn try_from(variable: StateVariable) -> Result<Self, SimError> {
        match variable {
            StateVariable::Collateral => Ok(ShockTarget::Collateral),
            StateVariable::Liquidity => Ok(ShockTarget::Liquidity),
            other => Err(SimError::ShockApplication(format!(
                "{} cannot be shocked; supported targets are collateral and liquidity",
                other.name()
            ))),
        }
    }
}

impl FromStr for ShockTarget {
    type Err = SimError;

    fn from_str(raw: &str) -> Result<Self, SimError> {
        match raw.trim().to_lowercase().as_str() {
            "collateral" => Ok(ShockTarget::Collateral),
            "liquidity" => Ok(ShockTarget::Liquidity),
            other => Err(SimError::ShockApplication(format!(
                "unsupported shock target '{other}'"
            ))),
        }
    }
}

/// A single shock: `target *= 1 + magnitude` when `t == trigger_step`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShockSpec {
    pub target: ShockTarget,
    /// Fractional change, in (-1, +inf); -0.3 removes 30%
    pub magnitude: f64,
    pub trigger_step: u64,
}

impl ShockSpec {
    pub fn new(target: ShockTarget, magnitude: f64, trigger_step: u64) -> Self {
        Self {
            target,
            magnitude,
            trigger_step,
        }
    }

    pub fn collateral(magnitude: f64, trigger_step: u64) -> Self {
        Self::new(ShockTarget::Collateral, magnitude, trigger_step)
    }

    pub fn liquidity(magnitude: f64, trigger_step: u64) -> Self {
        Self::new(ShockTarget::Liquidity, magnitude, trigger_step)
    }

    /// Check that the shock can fire inside a run of `n_steps` steps
    pub fn validate(&self, n_steps: usize) -> Result<(), SimError> {
        validate_magnitude(self.magnitude)?;
        if self.trigger_step >= n_steps as u64 {
            return Err(SimError::ShockApplication(format!(
                "trigger step {} is outside [0, {n_steps})",
                self.trigger_step
            )));
        }
        Ok(())
    }

    pub fn applies_at(&self, t: u64) -> bool {
        t == self.trigger_step
    }

    /// Shocked copy of `state` at the trigger step, `state` unchanged otherwise
    pub fn apply(&self, state: &SystemState) -> SystemState {
        if !self.applies_at(state.t) {
            return *state;
        }
        let variable = self.target.variable();
        state.with(variable, state.get(variable) * (1.0 + self.magnitude))
    }
}

pub fn apply(state: &SystemState, shock: &ShockSpec) -> SystemState {
    shock.apply(state)
}

fn validate_magnitude(magnitude: f64) -> Result<(), SimError> {
    if magnitude.is_finite() && magnitude > -1.0 {
        return Ok(());
    }
    Err(SimError::ShockApplication(format!(
        "magnitude must be finite and greater than -1, got {magnitude}"
    )))
}

/// How a shock magnitude is drawn
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "distribution", rename_all = "snake_case")]
pub enum MagnitudeDistribution {
    /// Uniform on `[low, high)`; a point mass when `low == high`
    Uniform { low: f64, high: f64 },
    /// Normal draw clamped into `[low, high]`
    TruncatedNormal {
        mean: f64,
        std_dev: f64,
        low: f64,
        high: f64,
    },
}

impl MagnitudeDistribution {
    fn bounds(&self) -> (f64, f64) {
        match *self {
            MagnitudeDistribution::Uniform { low, high } => (low, high),
            MagnitudeDistribution::TruncatedNormal { low, high, .. } => (low, high),
        }
    }

    pub fn validate(&self) -> Result<(), SimError> {
        let (low, high) = self.bounds();
        validate_magnitude(low)?;
        validate_magnitude(high)?;
        if low > high {
            return Err(SimError::ShockApplication(format!(
                "magnitude range is empty: low {low} > high {high}"
            )));
        }
        if let MagnitudeDistribution::TruncatedNormal { mean, std_dev, .. } = *self {
            if !mean.is_finite() || !std_dev.is_finite() || std_dev < 0.0 {
                return Err(SimError::ShockApplication(format!(
                    "normal magnitude needs finite mean and non-negative std_dev, got {mean} and {std_dev}"
                )));
            }
        }
        Ok(())
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64, SimError> {
        match *self {
            MagnitudeDistribution::Uniform { low, high } => {
                if low == high {
                    Ok(low)
                } else {
                    Ok(rng.gen_range(low..high))
                }
            }
            MagnitudeDistribution::TruncatedNormal {
                mean,
                std_dev,
                low,
                high,
            } => {
                let normal = Normal::new(mean, std_dev)
                    .map_err(|err| SimError::ShockApplication(err.to_string()))?;
                Ok(normal.sample(rng).clamp(low, high))
            }
        }
    }
}

/// Randomized shock drawn once per trial
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShockDistribution {
    pub target: ShockTarget,
    pub magnitude: MagnitudeDistribution,
    /// First eligible trigger step (inclusive)
    pub trigger_start: u64,
    /// Last eligible trigger step (exclusive)
    pub trigger_end: u64,
}

impl ShockDistribution {
    /// Collateral drop of 20-50% somewhere in steps [50, 150)
    pub fn collateral_stress() -> Self {
        Self {
            target: ShockTarget::Collateral,
            magnitude: MagnitudeDistribution::Uniform {
                low: -0.5,
                high: -0.2,
            },
            trigger_start: 50,
            trigger_end: 150,
        }
    }

    pub fn validate(&self, n_steps: usize) -> Result<(), SimError> {
        self.magnitude.validate()?;
        if self.trigger_start >= self.trigger_end {
            return Err(SimError::ShockApplication(format!(
                "trigger window [{}, {}) is empty",
                self.trigger_start, self.trigger_end
            )));
        }
        if self.trigger_end > n_steps as u64 {
            return Err(SimError::ShockApplication(format!(
                "trigger window [{}, {}) reaches past [0, {n_steps})",
                self.trigger_start, self.trigger_end
            )));
        }
        Ok(())
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<ShockSpec, SimError> {
        let magnitude = self.magnitude.sample(rng)?;
        let trigger_step = rng.gen_range(self.trigger_start..self.trigger_end);
        Ok(ShockSpec::new(self.target, magnitude, trigger_step))
    }
}

/// Shock assignment for a batch of trials
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShockPlan {
    #[default]
    None,
    Fixed(ShockSpec),
    Sampled(ShockDistribution),
}

impl ShockPlan {
    pub fn validate(&self, n_steps: usize) -> Result<(), SimError> {
        match self {
            ShockPlan::None => Ok(()),
            ShockPlan::Fixed(spec) => spec.validate(n_steps),
            ShockPlan::Sampled(distribution) => distribution.validate(n_steps),
        }
    }

    /// Shock for one trial; sampled plans draw only from `rng`
    pub fn realize<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Option<ShockSpec>, SimError> {
        match self {
            ShockPlan::None => Ok(None),
            ShockPlan::Fixed(spec) => Ok(Some(*spec)),
            ShockPlan::Sampled(distribution) => distribution.sample(rng).map(Some),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ShockPlan::None => "none",
            ShockPlan::Fixed(_) => "fixed",
            ShockPlan::Sampled(_) => "sampled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn state(t: u64) -> SystemState {
        SystemState::new(t, 1e6, 1.0, 1.5e6, 1e6, 1e6)
    }

    #[test]
    fn shock_applies_only_at_trigger_step() {
        let shock = ShockSpec::collateral(-0.3, 5);
        assert_eq!(shock.apply(&state(4)), state(4));
        assert_eq!(shock.apply(&state(6)), state(6));

        let shocked = shock.apply(&state(5));
        assert!((shocked.collateral - 1.05e6).abs() < 1e-6);
        assert_eq!(shocked.liquidity, 1e6);
    }

    #[test]
    fn liquidity_shock_targets_liquidity() {
        let shocked = apply(&state(0), &ShockSpec::liquidity(-0.9, 0));
        assert!((shocked.liquidity - 1e5).abs() < 1e-6);
        assert_eq!(shocked.collateral, 1.5e6);
    }

    #[test]
    fn trigger_outside_run_is_rejected() {
        assert!(ShockSpec::collateral(-0.3, 99).validate(100).is_ok());
        let err = ShockSpec::collateral(-0.3, 100).validate(100).unwrap_err();
        assert!(matches!(err, SimError::ShockApplication(_)));
    }

    #[test]
    fn magnitude_at_or_below_minus_one_is_rejected() {
        assert!(ShockSpec::collateral(-1.0, 0).validate(10).is_err());
        assert!(ShockSpec::collateral(f64::NAN, 0).validate(10).is_err());
        assert!(ShockSpec::collateral(0.5, 0).validate(10).is_ok());
    }

    #[test]
    fn unsupported_target_is_rejected() {
        assert!("price".parse::<ShockTarget>().is_err());
        assert!(ShockTarget::try_from(StateVariable::Supply).is_err());
        assert_eq!("Liquidity".parse::<ShockTarget>().unwrap(), ShockTarget::Liquidity);
    }

    #[test]
    fn sampled_shock_stays_in_window() {
        let distribution = ShockDistribution::collateral_stress();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..200 {
            let shock = distribution.sample(&mut rng).unwrap();
            assert!(shock.magnitude >= -0.5 && shock.magnitude < -0.2);
            assert!((50..150).contains(&shock.trigger_step));
        }
    }

    #[test]
    fn truncated_normal_is_clamped() {
        let magnitude = MagnitudeDistribution::TruncatedNormal {
            mean: -0.4,
            std_dev: 0.5,
            low: -0.8,
            high: 0.0,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..200 {
            let m = magnitude.sample(&mut rng).unwrap();
            assert!((-0.8..=0.0).contains(&m));
        }
    }

    #[test]
    fn sampled_window_must_fit_run() {
        let distribution = ShockDistribution::collateral_stress();
        assert!(distribution.validate(150).is_ok());
        assert!(distribution.validate(149).is_err());
    }

    #[test]
    fn plan_round_trips_through_json() {
        let plan = ShockPlan::Fixed(ShockSpec::collateral(-0.3, 100));
        let json = serde_json::to_string(&plan).unwrap();
        assert!(json.contains("\"kind\":\"fixed\""));
        let back: ShockPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, plan);
    }
}
