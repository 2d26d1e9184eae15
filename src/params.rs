//! System parameters
//!
//! Coefficients, initial conditions, and thresholds for one experiment.
//! A [`ParameterSpec`] is the raw, editable record; a [`SystemParameters`]
//! is a validated, read-only view of one.

use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::SimError;

/// Price below which a trial is considered collapsed.
pub const DEFAULT_COLLAPSE_THRESHOLD: f64 = 0.5;
/// Price above which a collapsed trial is considered recovered.
pub const DEFAULT_RECOVERY_THRESHOLD: f64 = 0.95;

/// Which transition rule drives the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamicsModel {
    /// Mint/burn peg mechanism with liquidity-damped price discovery.
    #[default]
    Peg,
    /// Peg mechanism plus collateral reflexivity, liquidity flight, and panic demand.
    Reflexive,
}

impl DynamicsModel {
    pub fn label(&self) -> &'static str {
        match self {
            DynamicsModel::Peg => "peg",
            DynamicsModel::Reflexive => "reflexive",
        }
    }
}

/// Collapse and recovery price levels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub collapse: f64,
    pub recovery: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            collapse: DEFAULT_COLLAPSE_THRESHOLD,
            recovery: DEFAULT_RECOVERY_THRESHOLD,
        }
    }
}

/// Raw parameter record, as read from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSpec {
    /// Mint rate per unit of positive peg deviation (alpha)
    pub mint_coefficient: f64,
    /// Burn rate per unit of negative peg deviation (beta)
    pub burn_coefficient: f64,
    /// Demand response to peg deviation (epsilon)
    pub demand_elasticity: f64,
    /// Reference liquidity depth (L_depth)
    pub liquidity_depth: f64,
    /// Price friction gain (gamma)
    pub price_friction_gamma: f64,
    pub initial_supply: f64,
    pub initial_price: f64,
    pub initial_collateral: f64,
    pub initial_liquidity: f64,
    pub initial_demand: f64,
    /// Base seed for Monte Carlo trials; drawn from entropy when absent
    pub random_seed: Option<u64>,
    pub thresholds: Thresholds,
    /// Wall-clock length of one step, used only for exported time axes
    pub dt: f64,
    pub model: DynamicsModel,
}

impl Default for ParameterSpec {
    fn default() -> Self {
        Self {
            mint_coefficient: 0.1,
            burn_coefficient: 0.1,
            demand_elasticity: 0.5,
            liquidity_depth: 1e6,
            price_friction_gamma: 0.01,
            initial_supply: 1e6,
            initial_price: 1.0,
            initial_collateral: 1.5e6,
            initial_liquidity: 1e6,
            initial_demand: 1e6,
            random_seed: Some(42),
            thresholds: Thresholds::default(),
            dt: 0.1,
            model: DynamicsModel::Peg,
        }
    }
}

impl ParameterSpec {
    pub fn validate(&self) -> Result<(), SimError> {
        non_negative("mint_coefficient", self.mint_coefficient)?;
        non_negative("burn_coefficient", self.burn_coefficient)?;
        non_negative("demand_elasticity", self.demand_elasticity)?;
        non_negative("price_friction_gamma", self.price_friction_gamma)?;
        positive("liquidity_depth", self.liquidity_depth)?;

        positive("initial_supply", self.initial_supply)?;
        positive("initial_price", self.initial_price)?;
        positive("initial_collateral", self.initial_collateral)?;
        positive("initial_liquidity", self.initial_liquidity)?;
        positive("initial_demand", self.initial_demand)?;

        positive("thresholds.collapse", self.thresholds.collapse)?;
        positive("thresholds.recovery", self.thresholds.recovery)?;
        if self.thresholds.collapse >= self.thresholds.recovery {
            return Err(SimError::Configuration(format!(
                "collapse threshold ({}) must be below recovery threshold ({})",
                self.thresholds.collapse, self.thresholds.recovery
            )));
        }

        positive("dt", self.dt)?;
        Ok(())
    }
}

fn non_negative(name: &str, value: f64) -> Result<(), SimError> {
    if value.is_finite() && value >= 0.0 {
        return Ok(());
    }
    Err(SimError::Configuration(format!(
        "{name} must be finite and non-negative, got {value}"
    )))
}

fn positive(name: &str, value: f64) -> Result<(), SimError> {
    if value.is_finite() && value > 0.0 {
        return Ok(());
    }
    Err(SimError::Configuration(format!(
        "{name} must be finite and strictly positive, got {value}"
    )))
}

/// Validated, immutable parameter bundle.
///
/// The only constructor is [`SystemParameters::new`], so holding one is proof
/// that every coefficient and initial value passed validation. Fields are
/// read through `Deref` to [`ParameterSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ParameterSpec", into = "ParameterSpec")]
pub struct SystemParameters {
    spec: ParameterSpec,
}

impl SystemParameters {
    pub fn new(spec: ParameterSpec) -> Result<Self, SimError> {
        spec.validate()?;
        Ok(Self { spec })
    }

    /// Reference parameters (always valid)
    pub fn reference() -> Self {
        Self {
            spec: ParameterSpec::default(),
        }
    }

    /// Derive a new validated bundle from this one; `self` is left untouched.
    pub fn with<F>(&self, edit: F) -> Result<Self, SimError>
    where
        F: FnOnce(&mut ParameterSpec),
    {
        let mut spec = self.spec.clone();
        edit(&mut spec);
        Self::new(spec)
    }

    pub fn spec(&self) -> &ParameterSpec {
        &self.spec
    }

    pub fn into_spec(self) -> ParameterSpec {
        self.spec
    }
}

impl Default for SystemParameters {
    fn default() -> Self {
        Self::reference()
    }
}

impl Deref for SystemParameters {
    type Target = ParameterSpec;

    fn deref(&self) -> &ParameterSpec {
        &self.spec
    }
}

impl TryFrom<ParameterSpec> for SystemParameters {
    type Error = SimError;

    fn try_from(spec: ParameterSpec) -> Result<Self, SimError> {
        Self::new(spec)
    }
}

impl From<SystemParameters> for ParameterSpec {
    fn from(params: SystemParameters) -> Self {
        params.spec
    }
}
