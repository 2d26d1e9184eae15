//! State transition rules
//!
//! A transition maps `(state, params)` to the next state. Every output is
//! computed from the same input state (synchronous update), so the price at
//! `t + 1` is formed from supply and demand at `t`, not from their updates.

use crate::params::{DynamicsModel, SystemParameters};
use crate::state::SystemState;
use crate::SimError;

/// Largest mint per step, as a fraction of current liquidity
pub const MINT_CAP_LIQUIDITY_FRACTION: f64 = 0.1;
/// Largest burn per step, as a fraction of current supply
pub const BURN_CAP_SUPPLY_FRACTION: f64 = 0.5;
/// Liquidity floor, as a fraction of liquidity depth
pub const LIQUIDITY_FLOOR_FRACTION: f64 = 0.1;
/// Demand floor, as a fraction of initial demand
pub const DEMAND_FLOOR_FRACTION: f64 = 0.1;
/// Per-step liquidity growth at perfect stability
pub const LIQUIDITY_GROWTH_RATE: f64 = 0.01;

pub trait TransitionRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn step(&self, state: &SystemState, params: &SystemParameters) -> Result<SystemState, SimError>;
}

/// Mint/burn peg mechanism with liquidity-damped price discovery
#[derive(Debug, Clone, Copy, Default)]
pub struct PegTransition;

/// Peg mechanism coupled to collateral solvency, liquidity flight, and panic demand
#[derive(Debug, Clone, Copy, Default)]
pub struct ReflexiveTransition;

/// Transition rule for `model`
pub fn transition(model: DynamicsModel) -> &'static dyn TransitionRule {
    match model {
        DynamicsModel::Peg => &PegTransition,
        DynamicsModel::Reflexive => &ReflexiveTransition,
    }
}

/// Advance one step with the transition rule selected by `params.model`
pub fn step(state: &SystemState, params: &SystemParameters) -> Result<SystemState, SimError> {
    transition(params.model).step(state, params)
}

/// Supply change for one step.
///
/// Above peg the mint is `alpha * (P - 1) * S`, capped at a tenth of
/// liquidity. At or below peg the burn is `beta * |P - 1| * S`, scaled by
/// `burn_effectiveness` and capped at half of supply, so supply stays
/// positive.
pub fn supply_delta(state: &SystemState, params: &SystemParameters, burn_effectiveness: f64) -> f64 {
    let deviation = state.peg_deviation();
    if state.price > 1.0 {
        (params.mint_coefficient * deviation * state.supply)
            .min(MINT_CAP_LIQUIDITY_FRACTION * state.liquidity)
    } else {
        let burn = params.burn_coefficient * deviation.abs() * state.supply * burn_effectiveness;
        -burn.min(BURN_CAP_SUPPLY_FRACTION * state.supply)
    }
}

/// Friction term in (0, 1): grows toward 1 as liquidity outgrows its depth
pub fn friction(liquidity: f64, liquidity_depth: f64) -> f64 {
    1.0 / (1.0 + liquidity_depth / liquidity)
}

/// Demand/supply clearing price with friction markup
pub fn clearing_price(state: &SystemState, params: &SystemParameters) -> f64 {
    let friction = friction(state.liquidity, params.liquidity_depth);
    (state.demand / state.supply) * (1.0 + params.price_friction_gamma * friction)
}

pub fn liquidity_floor(params: &SystemParameters) -> f64 {
    LIQUIDITY_FLOOR_FRACTION * params.liquidity_depth
}

pub fn demand_floor(params: &SystemParameters) -> f64 {
    DEMAND_FLOOR_FRACTION * params.initial_demand
}

fn check_inputs(state: &SystemState) -> Result<(), SimError> {
    if let Some(variable) = state.non_finite_component() {
        return Err(SimError::NumericalDivergence {
            step: state.t,
            reason: format!("input {} is not finite", variable.name()),
        });
    }
    if state.supply <= 0.0 {
        return Err(SimError::NumericalDivergence {
            step: state.t,
            reason: format!("supply must be positive to form a price, got {}", state.supply),
        });
    }
    if state.liquidity <= 0.0 {
        return Err(SimError::NumericalDivergence {
            step: state.t,
            reason: format!(
                "liquidity must be positive to form friction, got {}",
                state.liquidity
            ),
        });
    }
    Ok(())
}

fn check_outputs(next: SystemState) -> Result<SystemState, SimError> {
    match next.non_finite_component() {
        Some(variable) => Err(SimError::NumericalDivergence {
            step: next.t,
            reason: format!("{} became non-finite", variable.name()),
        }),
        None => Ok(next),
    }
}

impl TransitionRule for PegTransition {
    fn name(&self) -> &'static str {
        "peg"
    }

    fn step(&self, state: &SystemState, params: &SystemParameters) -> Result<SystemState, SimError> {
        check_inputs(state)?;

        let deviation = state.peg_deviation();
        let supply = state.supply + supply_delta(state, params, 1.0);
        let price = clearing_price(state, params);

        let stability = 1.0 - deviation.abs();
        let liquidity = (state.liquidity + LIQUIDITY_GROWTH_RATE * stability * state.liquidity)
            .max(liquidity_floor(params));

        let demand = (state.demand - params.demand_elasticity * deviation * state.demand)
            .max(demand_floor(params));

        check_outputs(SystemState {
            t: state.t + 1,
            supply,
            price,
            collateral: state.collateral,
            liquidity,
            demand,
        })
    }
}

impl ReflexiveTransition {
    fn burn_effectiveness(state: &SystemState, params: &SystemParameters) -> f64 {
        let ratio = state.collateral_ratio();
        let mut effectiveness = if ratio < 1.0 {
            (ratio * ratio).max(0.01)
        } else {
            1.0
        };

        // falling knife: nobody buys coins to burn them
        if state.price < 0.8 {
            effectiveness *= (state.price / 0.8).powi(2);
        }

        effectiveness * (state.liquidity / params.initial_liquidity).min(1.0)
    }

    fn price(state: &SystemState, params: &SystemParameters) -> f64 {
        let ratio = state.collateral_ratio();
        let mut price = clearing_price(state, params);

        if ratio < 1.0 {
            let awareness = (1.0 - ratio).powf(1.5);
            price = price * (1.0 - awareness) + ratio * awareness;
        }

        let liquidity_ratio = state.liquidity / params.initial_liquidity;
        if liquidity_ratio < 0.5 {
            price *= (liquidity_ratio / 0.5).powi(2);
        }

        price.max(0.0)
    }

    fn collateral(state: &SystemState) -> f64 {
        if state.price < 0.9 {
            let severity = (0.9 - state.price) / 0.9;
            (state.collateral * (1.0 - 0.2 * severity)).max(0.0)
        } else {
            state.collateral
        }
    }

    fn liquidity(state: &SystemState, params: &SystemParameters) -> f64 {
        let deviation = state.peg_deviation().abs();
        let ratio = state.collateral_ratio();
        let liquidity_ratio = state.liquidity / params.initial_liquidity;

        let mut flow = LIQUIDITY_GROWTH_RATE * (1.0 - deviation);
        if deviation > 0.05 {
            flow -= 0.15 * deviation;
        }
        if ratio < 1.0 {
            flow -= 0.2 * (1.0 - ratio);
        }
        if liquidity_ratio < 0.5 {
            flow -= 0.25 * (0.5 - liquidity_ratio);
        }

        (state.liquidity * (1.0 + flow)).max(liquidity_floor(params))
    }

    fn demand(state: &SystemState, params: &SystemParameters) -> f64 {
        let ratio = state.collateral_ratio();
        let liquidity_ratio = state.liquidity / params.initial_liquidity;
        let mut panic = 0.0;

        if ratio < 1.0 {
            panic -= 0.5 * (1.0 - ratio).powf(1.5);
            if ratio < 0.7 {
                panic -= 0.3;
            }
        }
        if state.price < 0.9 {
            panic -= 0.4 * ((0.9 - state.price) / 0.9).powf(1.5);
            if state.price < 0.7 {
                panic -= 0.25;
            }
        }
        if liquidity_ratio < 0.3 {
            panic -= 0.5 * (0.3 - liquidity_ratio) / 0.3;
        }

        let change = -params.demand_elasticity * state.peg_deviation() + panic;
        (state.demand * (1.0 + change)).max(demand_floor(params))
    }
}

impl TransitionRule for ReflexiveTransition {
    fn name(&self) -> &'static str {
        "reflexive"
    }

    fn step(&self, state: &SystemState, params: &SystemParameters) -> Result<SystemState, SimError> {
        check_inputs(state)?;

        let effectiveness = Self::burn_effectiveness(state, params);
        check_outputs(SystemState {
            t: state.t + 1,
            supply: state.supply + supply_delta(state, params, effectiveness),
            price: Self::price(state, params),
            collateral: Self::collateral(state),
            liquidity: Self::liquidity(state, params),
            demand: Self::demand(state, params),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterSpec;

    fn params() -> SystemParameters {
        SystemParameters::reference()
    }

    fn state(price: f64) -> SystemState {
        SystemState::new(0, 1e6, price, 1.5e6, 1e6, 1e6)
    }

    #[test]
    fn supply_increases_above_peg() {
        let next = step(&state(1.1), &params()).unwrap();
        assert!(next.supply > 1e6);
        assert_eq!(next.t, 1);
    }

    #[test]
    fn supply_decreases_below_peg() {
        let next = step(&state(0.95), &params()).unwrap();
        assert!(next.supply < 1e6);
    }

    #[test]
    fn mint_is_capped_by_liquidity() {
        let mut s = state(5.0);
        s.liquidity = 1e5;
        let delta = supply_delta(&s, &params(), 1.0);
        assert_eq!(delta, 0.1 * 1e5);
    }

    #[test]
    fn burn_is_capped_at_half_supply() {
        let p = params().with(|s| s.burn_coefficient = 10.0).unwrap();
        let delta = supply_delta(&state(0.1), &p, 1.0);
        assert_eq!(delta, -0.5 * 1e6);
    }

    #[test]
    fn price_uses_pre_update_supply_and_demand() {
        let p = params().with(|s| s.price_friction_gamma = 0.0).unwrap();
        let s = SystemState::new(0, 2e6, 1.5, 1.5e6, 1e6, 1e6);
        let next = step(&s, &p).unwrap();
        // 1e6 / 2e6, even though both supply and demand moved this step
        assert_eq!(next.price, 0.5);
        assert!(next.supply != 2e6);
        assert!(next.demand != 1e6);
    }

    #[test]
    fn friction_markup_applies() {
        let s = state(1.0);
        let next = step(&s, &params()).unwrap();
        // friction is 1/2 when liquidity equals depth
        assert!((next.price - (1.0 + 0.01 * 0.5)).abs() < 1e-12);
    }

    #[test]
    fn liquidity_and_demand_respect_floors() {
        let p = params().with(|s| s.demand_elasticity = 5.0).unwrap();
        let s = SystemState::new(0, 1e6, 3.5, 1.5e6, 1e5, 2e5);
        let next = step(&s, &p).unwrap();
        assert_eq!(next.liquidity, 0.1 * p.liquidity_depth);
        assert_eq!(next.demand, 0.1 * p.initial_demand);
    }

    #[test]
    fn peg_transition_passes_collateral_through() {
        let s = SystemState::new(4, 1e6, 0.3, 7.0, 1e6, 1e6);
        let next = step(&s, &params()).unwrap();
        assert_eq!(next.collateral, 7.0);
    }

    #[test]
    fn peg_is_a_fixed_point_without_friction() {
        let p = params().with(|s| s.price_friction_gamma = 0.0).unwrap();
        let next = step(&state(1.0), &p).unwrap();
        assert_eq!(next.price, 1.0);
        assert_eq!(next.supply, 1e6);
        assert_eq!(next.demand, 1e6);
    }

    #[test]
    fn non_positive_supply_is_reported() {
        let s = SystemState::new(12, 0.0, 1.0, 1.0, 1.0, 1.0);
        match step(&s, &params()) {
            Err(SimError::NumericalDivergence { step, .. }) => assert_eq!(step, 12),
            other => panic!("expected divergence, got {other:?}"),
        }
    }

    #[test]
    fn non_finite_input_is_reported() {
        let s = SystemState::new(0, 1e6, f64::INFINITY, 1.0, 1e6, 1e6);
        assert!(matches!(
            step(&s, &params()),
            Err(SimError::NumericalDivergence { .. })
        ));
    }

    #[test]
    fn transition_selects_model() {
        assert_eq!(transition(DynamicsModel::Peg).name(), "peg");
        assert_eq!(transition(DynamicsModel::Reflexive).name(), "reflexive");
    }

    #[test]
    fn step_dispatches_on_model() {
        let s = SystemState::new(0, 1e6, 0.7, 1e6, 1e6, 1e6);
        let peg = params();
        let reflexive = reflexive();
        assert_eq!(step(&s, &peg).unwrap(), PegTransition.step(&s, &peg).unwrap());
        assert_eq!(
            step(&s, &reflexive).unwrap(),
            ReflexiveTransition.step(&s, &reflexive).unwrap()
        );
        // reflexive collateral crashes on depeg, peg passes it through
        assert_eq!(step(&s, &peg).unwrap().collateral, 1e6);
        assert!(step(&s, &reflexive).unwrap().collateral < 1e6);
    }

    fn reflexive() -> SystemParameters {
        SystemParameters::new(ParameterSpec {
            model: DynamicsModel::Reflexive,
            ..ParameterSpec::default()
        })
        .unwrap()
    }

    #[test]
    fn reflexive_burn_fails_when_undercollateralized() {
        let p = reflexive();
        let healthy = SystemState::new(0, 1e6, 0.7, 1.5e6, 1e6, 1e6);
        let stressed = SystemState::new(0, 1e6, 0.7, 0.5e6, 1e6, 1e6);
        let healthy_burn = 1e6 - step(&healthy, &p).unwrap().supply;
        let stressed_burn = 1e6 - step(&stressed, &p).unwrap().supply;
        assert!(stressed_burn < healthy_burn * 0.5);
    }

    #[test]
    fn reflexive_price_is_pulled_toward_collateral_ratio() {
        let p = reflexive();
        let s = SystemState::new(0, 1e6, 1.0, 0.5e6, 1e6, 1e6);
        assert!(step(&s, &p).unwrap().price < 0.85);
    }

    #[test]
    fn reflexive_collateral_crashes_on_depeg() {
        let p = reflexive();
        let s = SystemState::new(0, 1e6, 0.7, 1e6, 1e6, 1e6);
        assert!(step(&s, &p).unwrap().collateral < 1e6);

        let pegged = SystemState::new(0, 1e6, 1.0, 1e6, 1e6, 1e6);
        assert_eq!(step(&pegged, &p).unwrap().collateral, 1e6);
    }

    #[test]
    fn reflexive_liquidity_flees_instability() {
        let p = reflexive();
        let s = SystemState::new(0, 1e6, 0.8, 0.8e6, 1e6, 1e6);
        assert!(step(&s, &p).unwrap().liquidity < 1e6);
    }

    #[test]
    fn reflexive_demand_panics_at_low_collateral_ratio() {
        let p = reflexive();
        let s = SystemState::new(0, 1e6, 0.9, 0.6e6, 1e6, 1e6);
        assert!(step(&s, &p).unwrap().demand < 1e6 * 0.8);
    }
}
