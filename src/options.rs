//! Configuration for equilibrium solves and comparative-statics sweeps.
//!
//! Every struct deserializes with `#[serde(default)]`, so a configuration file
//! only needs to name the settings it overrides.

use serde::{Deserialize, Serialize};

use crate::formulation::EfficiencyConvention;
use crate::retry::RetryPolicy;
use crate::solving::SolverOptions;

/// Choice of initial guess for successive sweep points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStrategy {
    /// Start each point from the previous converged solution, evaluating gains in ascending order.
    #[default]
    WarmStart,
    /// Start every point from the pre-merger state, sequentially.
    FixedBaseline,
    /// Start every point from the pre-merger state and solve points on the rayon pool.
    ParallelBaseline,
}

/// Controls the comparative-statics sweep.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepOptions {
    /// Initial-guess strategy across points.
    pub strategy: SweepStrategy,
}

/// Aggregated configuration used by [`MergerSimulation`](crate::MergerSimulation).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationOptions {
    /// Newton solver settings.
    pub solver: SolverOptions,
    /// Sweep settings.
    pub sweep: SweepOptions,
    /// How efficiency gains translate into marginal cost.
    pub efficiency: EfficiencyConvention,
    /// Retry behaviour for failed solves.
    pub retry: RetryPolicy,
}

impl SimulationOptions {
    /// Override the solver settings while preserving other defaults.
    pub fn with_solver(mut self, solver: SolverOptions) -> Self {
        self.solver = solver;
        self
    }

    /// Select the sweep's initial-guess strategy.
    pub fn with_sweep_strategy(mut self, strategy: SweepStrategy) -> Self {
        self.sweep.strategy = strategy;
        self
    }

    /// Select how efficiency gains map to marginal cost.
    pub fn with_efficiency_convention(mut self, convention: EfficiencyConvention) -> Self {
        self.efficiency = convention;
        self
    }

    /// Enable an explicit retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
