//! Stability metrics
//!
//! Reduces a trajectory to scalar metrics. Every function here is a pure
//! function of its inputs, so recomputing on a stored trajectory gives the
//! same numbers.
//!
//! `peg_deviation_integral` uses the rectangle rule with unit step over every
//! recorded sample, `sum_t |P(t) - 1|` for `t = 0..=n_steps`. The step length
//! `dt` is deliberately left out so runs of different `dt` stay comparable.

use serde::{Deserialize, Serialize};

use crate::market::{arbitrage_opportunity, reflexivity_coefficient};
use crate::params::Thresholds;
use crate::state::SystemState;
use crate::trial::TrialPhase;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialMetrics {
    pub peg_deviation_integral: f64,
    /// First step with price below the collapse threshold
    pub time_to_collapse: Option<u64>,
    /// max over t of `1 - P(t)`; negative when price never went below peg
    pub max_drawdown: f64,
    /// Price rose above the recovery threshold after the first collapse
    pub recovered: bool,
    pub min_price: f64,
    pub terminal_price: f64,
    pub peak_reflexivity: f64,
    /// Largest peg arbitrage profit available at any recorded state
    pub peak_arbitrage: f64,
}

impl TrialMetrics {
    pub fn collapsed(&self) -> bool {
        self.time_to_collapse.is_some()
    }
}

/// Online Running -> Collapsed tracker.
///
/// Collapse is sticky: once flagged, later prices only decide recovery.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollapseMonitor {
    thresholds: Thresholds,
    first_collapse: Option<u64>,
    recovered: bool,
}

impl CollapseMonitor {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            first_collapse: None,
            recovered: false,
        }
    }

    /// Feed the next state; returns true on the step that first collapses
    pub fn observe(&mut self, state: &SystemState) -> bool {
        match self.first_collapse {
            None if state.price < self.thresholds.collapse => {
                self.first_collapse = Some(state.t);
                true
            }
            Some(_) if state.price > self.thresholds.recovery => {
                self.recovered = true;
                false
            }
            _ => false,
        }
    }

    pub fn phase(&self) -> TrialPhase {
        match self.first_collapse {
            None => TrialPhase::Running,
            Some(first_step) => TrialPhase::Collapsed { first_step },
        }
    }

    pub fn first_collapse(&self) -> Option<u64> {
        self.first_collapse
    }

    pub fn recovered(&self) -> bool {
        self.recovered
    }
}

/// Metrics with the default collapse (0.5) and recovery (0.95) thresholds
pub fn compute_metrics(trajectory: &[SystemState]) -> TrialMetrics {
    compute_metrics_with(trajectory, &Thresholds::default())
}

pub fn compute_metrics_with(trajectory: &[SystemState], thresholds: &Thresholds) -> TrialMetrics {
    let mut monitor = CollapseMonitor::new(*thresholds);
    let mut peg_deviation_integral = 0.0;
    let mut max_drawdown = f64::NEG_INFINITY;
    let mut min_price = f64::INFINITY;
    let mut peak_reflexivity = 0.0_f64;
    let mut peak_arbitrage = 0.0_f64;
    let prices: Vec<f64> = trajectory.iter().map(|state| state.price).collect();

    for (idx, state) in trajectory.iter().enumerate() {
        monitor.observe(state);
        peg_deviation_integral += (state.price - 1.0).abs();
        max_drawdown = max_drawdown.max(1.0 - state.price);
        min_price = min_price.min(state.price);
        peak_reflexivity = peak_reflexivity.max(reflexivity_coefficient(state.price, &prices[..idx]));
        peak_arbitrage = peak_arbitrage.max(arbitrage_opportunity(state));
    }

    if trajectory.is_empty() {
        max_drawdown = f64::NAN;
        min_price = f64::NAN;
    }

    TrialMetrics {
        peg_deviation_integral,
        time_to_collapse: monitor.first_collapse(),
        max_drawdown,
        recovered: monitor.recovered(),
        min_price,
        terminal_price: trajectory.last().map_or(f64::NAN, |state| state.price),
        peak_reflexivity,
        peak_arbitrage,
    }
}

/// Distribution summary of one metric across trials
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub median: f64,
    pub max: f64,
}

impl MetricSummary {
    /// `None` when there are no finite samples
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        let median = if count % 2 == 1 {
            sorted[count / 2]
        } else {
            0.5 * (sorted[count / 2 - 1] + sorted[count / 2])
        };

        Some(Self {
            count,
            mean,
            std_dev: variance.sqrt(),
            min: sorted[0],
            median,
            max: sorted[count - 1],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trajectory(prices: &[f64]) -> Vec<SystemState> {
        prices
            .iter()
            .enumerate()
            .map(|(t, &p)| SystemState::new(t as u64, 1e6, p, 1.5e6, 1e6, 1e6))
            .collect()
    }

    #[test]
    fn stable_trajectory_has_no_collapse() {
        let m = compute_metrics(&trajectory(&[1.0, 1.0, 1.0]));
        assert_eq!(m.peg_deviation_integral, 0.0);
        assert_eq!(m.time_to_collapse, None);
        assert_eq!(m.max_drawdown, 0.0);
        assert_eq!(m.peak_arbitrage, 0.0);
        assert!(!m.recovered);
    }

    #[test]
    fn integral_is_unit_step_sum() {
        let m = compute_metrics(&trajectory(&[1.0, 0.5, 1.25]));
        assert!((m.peg_deviation_integral - 0.75).abs() < 1e-12);
    }

    #[test]
    fn time_to_collapse_is_first_crossing() {
        let m = compute_metrics(&trajectory(&[1.0, 0.6, 0.4, 0.3, 0.45]));
        assert_eq!(m.time_to_collapse, Some(2));
        assert!((m.max_drawdown - 0.7).abs() < 1e-12);
        assert_eq!(m.min_price, 0.3);
        assert_eq!(m.terminal_price, 0.45);
    }

    #[test]
    fn peak_arbitrage_tracks_widest_depeg() {
        // cap is min(0.1 * 1e6, 0.2 * 1e6) = 1e5 at every sample
        let m = compute_metrics(&trajectory(&[1.0, 1.2, 0.6, 0.3, 0.45]));
        assert!((m.peak_arbitrage - 0.7 * 1e5).abs() < 1e-6);
    }

    #[test]
    fn drawdown_can_be_negative() {
        let m = compute_metrics(&trajectory(&[1.1, 1.2, 1.05]));
        assert!((m.max_drawdown - (-0.05)).abs() < 1e-12);
    }

    #[test]
    fn recovery_requires_prior_collapse() {
        let m = compute_metrics(&trajectory(&[0.97, 0.4, 0.8, 0.96]));
        assert_eq!(m.time_to_collapse, Some(1));
        assert!(m.recovered);

        let m = compute_metrics(&trajectory(&[0.97, 0.99, 0.96]));
        assert!(!m.recovered);
    }

    #[test]
    fn custom_thresholds_are_honoured() {
        let thresholds = Thresholds {
            collapse: 0.8,
            recovery: 0.9,
        };
        let m = compute_metrics_with(&trajectory(&[1.0, 0.7, 0.92]), &thresholds);
        assert_eq!(m.time_to_collapse, Some(1));
        assert!(m.recovered);
    }

    #[test]
    fn recomputing_is_idempotent() {
        let path = trajectory(&[1.0, 0.7, 0.3, 1.2, 0.99]);
        assert_eq!(compute_metrics(&path), compute_metrics(&path));
    }

    #[test]
    fn monitor_reports_transition_once() {
        let mut monitor = CollapseMonitor::new(Thresholds::default());
        let path = trajectory(&[1.0, 0.4, 0.3]);
        let flags: Vec<bool> = path.iter().map(|s| monitor.observe(s)).collect();
        assert_eq!(flags, vec![false, true, false]);
        assert_eq!(monitor.phase(), TrialPhase::Collapsed { first_step: 1 });
    }

    #[test]
    fn empty_trajectory_has_undefined_extrema() {
        let m = compute_metrics(&[]);
        assert_eq!(m.peg_deviation_integral, 0.0);
        assert!(m.max_drawdown.is_nan());
        assert!(m.terminal_price.is_nan());
    }

    #[test]
    fn summary_statistics() {
        let s = MetricSummary::from_samples(&[4.0, 1.0, 3.0, 2.0, f64::NAN]).unwrap();
        assert_eq!(s.count, 4);
        assert_eq!(s.mean, 2.5);
        assert_eq!(s.median, 2.5);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 4.0);
        assert!((s.std_dev - 1.25_f64.sqrt()).abs() < 1e-12);
        assert!(MetricSummary::from_samples(&[]).is_none());
    }
}
