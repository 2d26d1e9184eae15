use stablesim::{
    compute_metrics, run_monte_carlo, run_trial, DynamicsModel, ParameterSpec, ShockDistribution,
    ShockPlan, ShockSpec, SimError, SystemParameters,
};

fn params_with_elasticity(elasticity: f64) -> SystemParameters {
    SystemParameters::reference()
        .with(|spec| spec.demand_elasticity = elasticity)
        .unwrap()
}

fn reflexive(elasticity: f64) -> SystemParameters {
    SystemParameters::new(ParameterSpec {
        model: DynamicsModel::Reflexive,
        demand_elasticity: elasticity,
        ..ParameterSpec::default()
    })
    .unwrap()
}

#[test]
fn stable_baseline_stays_near_peg() {
    let result = run_trial(&SystemParameters::reference(), 1000, None).unwrap();
    assert_eq!(result.trajectory.len(), 1001);
    assert!(!result.collapsed);
    for state in &result.trajectory {
        assert!(
            (state.price - 1.0).abs() <= 0.01,
            "price {} at step {} left the band",
            state.price,
            state.t
        );
    }
}

#[test]
fn high_elasticity_with_collateral_shock_collapses() {
    let plan = ShockPlan::Fixed(ShockSpec::collateral(-0.3, 100));
    let result = run_monte_carlo(&params_with_elasticity(3.0), 30, 1000, &plan).unwrap();
    assert_eq!(result.failed_trials, 0);
    assert_eq!(result.collapse_probability, Some(1.0));
    assert!(result.time_to_collapse.is_some());
}

#[test]
fn shock_trigger_past_the_run_is_rejected() {
    let shock = ShockSpec::collateral(-0.3, 1000);
    let err = run_trial(&SystemParameters::reference(), 1000, Some(&shock)).unwrap_err();
    assert!(matches!(err, SimError::ShockApplication(_)));

    let err = run_monte_carlo(
        &SystemParameters::reference(),
        5,
        1000,
        &ShockPlan::Fixed(shock),
    )
    .unwrap_err();
    assert!(matches!(err, SimError::ShockApplication(_)));
}

#[test]
fn elasticity_separates_stable_and_collapsing_regimes() {
    for magnitude in [-0.3, -0.5, -0.7] {
        let plan = ShockPlan::Fixed(ShockSpec::collateral(magnitude, 100));
        let probability = |elasticity: f64| {
            run_monte_carlo(&params_with_elasticity(elasticity), 30, 1000, &plan)
                .unwrap()
                .collapse_probability
        };
        assert_eq!(probability(0.5), Some(0.0), "magnitude {magnitude}");
        // collapse sets in once epsilon + alpha exceeds 1
        assert_eq!(probability(1.0), Some(1.0), "magnitude {magnitude}");
        assert_eq!(probability(2.0), Some(1.0), "magnitude {magnitude}");
        assert_eq!(probability(3.0), Some(1.0), "magnitude {magnitude}");
        assert_eq!(probability(5.0), Some(1.0), "magnitude {magnitude}");
    }
}

#[test]
fn liquidity_crisis_is_absorbed_at_low_elasticity() {
    let shock = ShockSpec::liquidity(-0.9, 100);
    let result = run_trial(&SystemParameters::reference(), 1000, Some(&shock)).unwrap();
    assert!(!result.collapsed);
    assert!(result.metrics.min_price > 0.99);
}

#[test]
fn same_seed_gives_bit_identical_trajectories() {
    let plan = ShockPlan::Sampled(ShockDistribution::collateral_stress());
    let params = params_with_elasticity(1.0);
    let first = run_monte_carlo(&params, 10, 500, &plan).unwrap();
    let second = run_monte_carlo(&params, 10, 500, &plan).unwrap();
    for (a, b) in first.trials.iter().zip(&second.trials) {
        assert_eq!(a.shock, b.shock);
        assert_eq!(a.trajectory.len(), b.trajectory.len());
        for (x, y) in a.trajectory.iter().zip(&b.trajectory) {
            assert_eq!(x.price.to_bits(), y.price.to_bits());
            assert_eq!(x.supply.to_bits(), y.supply.to_bits());
        }
    }
}

#[test]
fn different_seeds_draw_different_shocks() {
    let plan = ShockPlan::Sampled(ShockDistribution::collateral_stress());
    let a = run_monte_carlo(&SystemParameters::reference(), 4, 200, &plan).unwrap();
    let reseeded = SystemParameters::reference()
        .with(|spec| spec.random_seed = Some(7))
        .unwrap();
    let b = run_monte_carlo(&reseeded, 4, 200, &plan).unwrap();
    let shocks = |r: &stablesim::ExperimentResult| -> Vec<_> {
        r.trials.iter().map(|t| t.shock).collect()
    };
    assert_ne!(shocks(&a), shocks(&b));
}

#[test]
fn metrics_are_idempotent_on_stored_trajectories() {
    let shock = ShockSpec::collateral(-0.5, 100);
    let result = run_trial(&params_with_elasticity(3.0), 1000, Some(&shock)).unwrap();
    let recomputed = compute_metrics(&result.trajectory);
    assert_eq!(recomputed, result.metrics);
    assert_eq!(compute_metrics(&result.trajectory), recomputed);
}

#[test]
fn collapse_is_flagged_on_first_crossing_and_stays_flagged() {
    let result = run_trial(&params_with_elasticity(3.0), 1000, None).unwrap();
    let first = result.time_to_collapse.unwrap() as usize;
    assert!(result.trajectory[first].price < 0.5);
    assert!(result.trajectory[..first].iter().all(|s| s.price >= 0.5));
    assert!(result.collapsed);
}

#[test]
fn reflexive_model_spirals_after_deep_collateral_loss() {
    let calm = run_trial(&reflexive(0.5), 1000, None).unwrap();
    assert!(!calm.collapsed);

    let shock = ShockSpec::collateral(-0.7, 100);
    let shocked = run_trial(&reflexive(0.5), 1000, Some(&shock)).unwrap();
    assert!(shocked.collapsed);
    assert!(!shocked.recovered);
    assert!(shocked.time_to_collapse.unwrap() > 100);
}

#[test]
fn diverged_trials_are_kept_out_of_probabilities() {
    let result = run_monte_carlo(&reflexive(5.0), 4, 1000, &ShockPlan::None).unwrap();
    assert_eq!(result.failed_trials, 4);
    assert_eq!(result.collapse_probability, None);
    assert_eq!(result.recovery_probability, None);
    assert!(result.trials.iter().all(|t| t.is_failed()));
}
