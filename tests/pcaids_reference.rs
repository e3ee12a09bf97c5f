use approx::assert_relative_eq;
use merger_sim::calibration::Calibration;
use merger_sim::firms::FirmRegistry;
use merger_sim::formulation::EquilibriumSystem;
use merger_sim::sweep::{arange, linspace};
use merger_sim::{
    EfficiencyConvention, ErrorKind, MergerError, MergerSimulation, SimulationOptions,
    SweepStrategy,
};
use nalgebra::DVector;

/// Three firms with shares {0.2, 0.3, 0.5}; firm1 and firm2 merge.
fn reference_simulation() -> MergerSimulation {
    let registry =
        FirmRegistry::new(vec!["firm1", "firm2", "firm3"], &["firm1", "firm2"]).unwrap();
    let calibration = Calibration::builder(&registry)
        .shares([("firm1", 0.2), ("firm2", 0.3), ("firm3", 0.5)])
        .reference_elasticity("firm1", -3.0)
        .market_elasticity(-1.0)
        .calibrate()
        .unwrap();
    MergerSimulation::new(registry, calibration).unwrap()
}

/// Four firms with a non-unit market elasticity; the first and third merge.
fn four_firm_simulation() -> MergerSimulation {
    let registry = FirmRegistry::builder()
        .firm("a")
        .firm("b")
        .firm("c")
        .firm("d")
        .merging_firm("a")
        .merging_firm("c")
        .build()
        .unwrap();
    let calibration = Calibration::builder(&registry)
        .shares([("a", 0.1), ("b", 0.25), ("c", 0.3), ("d", 0.2)])
        .reference_elasticity("c", -2.5)
        .market_elasticity(-0.8)
        .calibrate()
        .unwrap();
    MergerSimulation::new(registry, calibration).unwrap()
}

#[test]
fn merger_equilibrium_matches_reference_solution() {
    let simulation = reference_simulation();
    let solution = simulation
        .solve_merger(&SimulationOptions::default())
        .unwrap();

    let expected_margins = DVector::from_vec(vec![0.413_990_82, 0.425_425_51, 0.466_117_87]);
    assert_relative_eq!(solution.margins(), &expected_margins, epsilon = 1e-6);
    let expected_prices = DVector::from_vec(vec![0.137_638_61, 0.107_538_97, 0.040_595_89]);
    assert_relative_eq!(solution.price_changes(), &expected_prices, epsilon = 1e-6);
    assert!(solution.summary().residual_norm < 1e-10);
}

#[test]
fn four_firm_merger_converges_and_satisfies_every_residual() {
    let simulation = four_firm_simulation();
    let options = SimulationOptions::default();
    let solution = simulation.solve_merger(&options).unwrap();

    let expected_prices = DVector::from_vec(vec![0.114_539, 0.015_543, 0.050_914, 0.015_043]);
    assert_relative_eq!(solution.price_changes(), &expected_prices, epsilon = 1e-5);

    let system = EquilibriumSystem::new(
        simulation.calibration(),
        simulation.registry().partition(),
        DVector::zeros(4),
        options.efficiency,
    )
    .unwrap();
    let x = system.layout().pack(solution.state()).unwrap();
    assert!(system.residuals(&x).amax() < 1e-10);
}

#[test]
fn square_system_for_every_partition_size() {
    let shares = [0.1, 0.15, 0.2, 0.25, 0.12];
    for n in 3..=5 {
        for k in 2..n {
            let firms: Vec<String> = (0..n).map(|i| format!("f{i}")).collect();
            let merging: Vec<String> = firms[..k].to_vec();
            let registry = FirmRegistry::new(firms.clone(), &merging[..]).unwrap();
            let calibration = Calibration::builder(&registry)
                .shares(firms.iter().cloned().zip(shares.iter().copied()))
                .reference_elasticity("f0", -3.0)
                .market_elasticity(-1.0)
                .calibrate()
                .unwrap();
            let system = EquilibriumSystem::new(
                &calibration,
                registry.partition(),
                DVector::zeros(n),
                EfficiencyConvention::default(),
            )
            .unwrap();
            let expected = 3 * n + (n - k) + k * k;
            assert_eq!(system.unknown_count(), expected);
            assert_eq!(system.equation_count(), expected);
            assert_eq!(system.residuals(&system.baseline_guess().unwrap()).len(), expected);
        }
    }
}

#[test]
fn pre_merger_market_is_a_fixed_point() {
    for simulation in [reference_simulation(), four_firm_simulation()] {
        let solution = simulation
            .solve_pre_merger(&SimulationOptions::default())
            .unwrap();
        let n = simulation.registry().firm_count();
        assert_relative_eq!(
            solution.price_changes(),
            &DVector::zeros(n),
            epsilon = 1e-10
        );
        assert_relative_eq!(
            solution.shares(),
            simulation.calibration().shares(),
            epsilon = 1e-10
        );
        assert_relative_eq!(
            solution.margins(),
            simulation.calibration().margins(),
            epsilon = 1e-10
        );
    }
}

#[test]
fn merging_prices_rise_without_gains_and_fall_as_gains_grow() {
    let simulation = reference_simulation();
    let gains = linspace(0.0, 0.74, 38);
    let result = simulation
        .sweep(&gains, &SimulationOptions::default())
        .unwrap();
    assert_eq!(result.failures().count(), 0);

    let trajectories = result.trajectories(simulation.registry());
    for trajectory in trajectories.iter().filter(|t| t.merging) {
        let prices = &trajectory.price_changes;
        assert!(prices[0] > 0.0, "{} price change at zero gain", trajectory.firm);
        assert!(prices[prices.len() - 1] < prices[0]);
        for window in prices.windows(2) {
            assert!(window[1] <= window[0] + 1e-12);
        }
    }
}

#[test]
fn cost_multiplier_convention_reverses_the_gain_direction() {
    let simulation = reference_simulation();
    let multiplier = SimulationOptions::default()
        .with_efficiency_convention(EfficiencyConvention::CostMultiplier);
    let raised = simulation.solve_with_gain(0.5, &multiplier).unwrap();
    assert_relative_eq!(raised.price_changes()[0], 0.516_877_5, epsilon = 1e-6);

    // A cost multiplier of 2 is a divisor gain of -0.5.
    let divided = simulation
        .solve_with_gain(-0.5, &SimulationOptions::default())
        .unwrap();
    let doubled = simulation.solve_with_gain(1.0, &multiplier).unwrap();
    assert_relative_eq!(
        divided.price_changes(),
        doubled.price_changes(),
        epsilon = 1e-8
    );
}

#[test]
fn sweep_returns_one_point_per_gain_in_order() {
    let simulation = reference_simulation();
    let gains = arange(-0.74, 0.75, 0.01);
    let result = simulation
        .sweep(&gains, &SimulationOptions::default())
        .unwrap();
    assert_eq!(result.len(), gains.len());
    for (point, gain) in result.points().iter().zip(&gains) {
        assert_eq!(point.gain(), *gain);
    }
    assert_eq!(result.failures().count(), 0);
}

#[test]
fn unsolvable_gain_fails_in_isolation() {
    let simulation = reference_simulation();
    let options = SimulationOptions::default();
    let clean_gains = [-0.2, 0.0, 0.2, 0.4];
    let poisoned_gains = [-1.0, -0.2, 0.0, 0.2, 0.4];

    let clean = simulation.sweep(&clean_gains, &options).unwrap();
    let poisoned = simulation.sweep(&poisoned_gains, &options).unwrap();
    assert_eq!(poisoned.len(), 5);

    let failures: Vec<_> = poisoned.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, -1.0);
    assert!(matches!(failures[0].1, MergerError::DidNotConverge { .. }));
    assert_eq!(failures[0].1.kind(), ErrorKind::Convergence);

    for (a, b) in clean.points().iter().zip(&poisoned.points()[1..]) {
        assert_eq!(a.gain(), b.gain());
        let (a, b) = (a.solution().unwrap(), b.solution().unwrap());
        assert_relative_eq!(a.shares(), b.shares(), epsilon = 1e-9);
        assert_relative_eq!(a.margins(), b.margins(), epsilon = 1e-9);
        assert_relative_eq!(a.price_changes(), b.price_changes(), epsilon = 1e-9);
    }
}

#[test]
fn parallel_sweep_matches_sequential_sweep() {
    let simulation = reference_simulation();
    let gains = linspace(-0.5, 0.5, 21);
    let sequential = simulation
        .sweep(&gains, &SimulationOptions::default())
        .unwrap();
    let parallel = simulation
        .sweep(
            &gains,
            &SimulationOptions::default().with_sweep_strategy(SweepStrategy::ParallelBaseline),
        )
        .unwrap();
    for (a, b) in sequential.points().iter().zip(parallel.points()) {
        assert_eq!(a.gain(), b.gain());
        assert_relative_eq!(
            a.solution().unwrap().shares(),
            b.solution().unwrap().shares(),
            epsilon = 1e-8
        );
    }
}

#[test]
fn outcome_tables_serialize_for_reporting() {
    let simulation = reference_simulation();
    let solution = simulation
        .solve_merger(&SimulationOptions::default())
        .unwrap();
    let table = solution.firm_outcomes(simulation.registry());
    let json = serde_json::to_value(&table).unwrap();
    assert_eq!(json[2]["firm"], "firm3");
    assert_eq!(json[0]["merging"], true);
    assert!(json[1]["price_change"].as_f64().unwrap() > 0.0);
}
