//! Market diagnostics derived from a state or a price history

use crate::state::SystemState;

/// Profit available to peg arbitrageurs at `state`.
///
/// Arbitrage size is limited by a tenth of supply and a fifth of liquidity.
pub fn arbitrage_opportunity(state: &SystemState) -> f64 {
    let max_arbitrage = (0.1 * state.supply).min(0.2 * state.liquidity);
    state.peg_deviation().abs() * max_arbitrage
}

/// Strength of reflexive feedback in [0, 1].
///
/// High when price is both moving and away from peg. Needs at least two
/// prior prices; returns 0 otherwise.
pub fn reflexivity_coefficient(price: f64, history: &[f64]) -> f64 {
    if history.len() < 2 {
        return 0.0;
    }
    let trend = history.last().map_or(0.0, |previous| price - previous);
    (trend.abs() * (price - 1.0).abs() * 10.0).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_arbitrage_at_peg() {
        let state = SystemState::new(0, 1e6, 1.0, 1.5e6, 1e6, 1e6);
        assert_eq!(arbitrage_opportunity(&state), 0.0);
    }

    #[test]
    fn arbitrage_limited_by_liquidity() {
        let state = SystemState::new(0, 1e6, 0.8, 1.5e6, 1e5, 1e6);
        // min(1e5, 2e4) * 0.2
        assert!((arbitrage_opportunity(&state) - 4e3).abs() < 1e-9);
    }

    #[test]
    fn reflexivity_needs_history() {
        assert_eq!(reflexivity_coefficient(0.5, &[]), 0.0);
        assert_eq!(reflexivity_coefficient(0.5, &[1.0]), 0.0);
    }

    #[test]
    fn reflexivity_is_bounded() {
        let r = reflexivity_coefficient(0.9, &[1.0, 0.95]);
        assert!((r - 0.05).abs() < 1e-12);
        assert_eq!(reflexivity_coefficient(0.1, &[1.0, 0.9]), 1.0);
    }
}
