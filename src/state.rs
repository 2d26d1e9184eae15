//! System state representation
//!
//! The state consists of a step index and five real-valued components:
//! - supply (S): circulating stablecoin supply
//! - price (P): market price, peg at 1.0
//! - collateral (C): backing collateral value
//! - liquidity (L): market liquidity available to absorb flows
//! - demand (D): aggregate demand for the coin

use serde::{Deserialize, Serialize};

use crate::params::SystemParameters;

/// State of the system at one step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    /// Step index
    pub t: u64,
    pub supply: f64,
    pub price: f64,
    pub collateral: f64,
    pub liquidity: f64,
    pub demand: f64,
}

/// Names one state component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateVariable {
    Supply,
    Price,
    Collateral,
    Liquidity,
    Demand,
}

impl StateVariable {
    pub fn name(&self) -> &'static str {
        match self {
            StateVariable::Supply => "supply",
            StateVariable::Price => "price",
            StateVariable::Collateral => "collateral",
            StateVariable::Liquidity => "liquidity",
            StateVariable::Demand => "demand",
        }
    }
}

impl SystemState {
    pub fn new(t: u64, supply: f64, price: f64, collateral: f64, liquidity: f64, demand: f64) -> Self {
        Self {
            t,
            supply,
            price,
            collateral,
            liquidity,
            demand,
        }
    }

    /// State at t = 0 built from the initial values in `params`
    pub fn initial(params: &SystemParameters) -> Self {
        Self {
            t: 0,
            supply: params.initial_supply,
            price: params.initial_price,
            collateral: params.initial_collateral,
            liquidity: params.initial_liquidity,
            demand: params.initial_demand,
        }
    }

    pub fn get(&self, variable: StateVariable) -> f64 {
        match variable {
            StateVariable::Supply => self.supply,
            StateVariable::Price => self.price,
            StateVariable::Collateral => self.collateral,
            StateVariable::Liquidity => self.liquidity,
            StateVariable::Demand => self.demand,
        }
    }

    /// Copy of this state with one component replaced
    pub fn with(&self, variable: StateVariable, value: f64) -> Self {
        let mut next = *self;
        match variable {
            StateVariable::Supply => next.supply = value,
            StateVariable::Price => next.price = value,
            StateVariable::Collateral => next.collateral = value,
            StateVariable::Liquidity => next.liquidity = value,
            StateVariable::Demand => next.demand = value,
        }
        next
    }

    /// First non-finite component, if any
    pub fn non_finite_component(&self) -> Option<StateVariable> {
        [
            StateVariable::Supply,
            StateVariable::Price,
            StateVariable::Collateral,
            StateVariable::Liquidity,
            StateVariable::Demand,
        ]
        .into_iter()
        .find(|&variable| !self.get(variable).is_finite())
    }

    /// Collateral per unit of supply
    pub fn collateral_ratio(&self) -> f64 {
        if self.supply > 0.0 {
            self.collateral / self.supply
        } else {
            1.0
        }
    }

    pub fn peg_deviation(&self) -> f64 {
        self.price - 1.0
    }
}
