//! High-level wrapper tying a firm registry to its calibration.

use std::collections::HashMap;

use nalgebra::DVector;

use crate::calibration::Calibration;
use crate::equilibrium::{solve_equilibrium, EquilibriumSolution};
use crate::error::{MergerError, Result};
use crate::firms::{FirmRegistry, MergerPartition};
use crate::layout::EquilibriumState;
use crate::options::SimulationOptions;
use crate::sweep::{sweep, SweepResult};

/// A calibrated market with a proposed merger.
#[derive(Clone, Debug)]
pub struct MergerSimulation {
    registry: FirmRegistry,
    calibration: Calibration,
}

impl MergerSimulation {
    /// Pairs a registry with a calibration of the same firms.
    pub fn new(registry: FirmRegistry, calibration: Calibration) -> Result<Self> {
        if registry.firm_count() != calibration.firm_count() {
            return Err(MergerError::dimension_mismatch(
                "calibrated firms",
                registry.firm_count(),
                calibration.firm_count(),
            ));
        }
        Ok(Self {
            registry,
            calibration,
        })
    }

    /// Accessor for the firm registry.
    pub fn registry(&self) -> &FirmRegistry {
        &self.registry
    }

    /// Accessor for the calibration.
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Post-merger equilibrium without efficiency gains.
    pub fn solve_merger(&self, options: &SimulationOptions) -> Result<EquilibriumSolution> {
        self.solve_with_gain(0.0, options)
    }

    /// Post-merger equilibrium with the same gain for every merging firm.
    pub fn solve_with_gain(
        &self,
        gain: f64,
        options: &SimulationOptions,
    ) -> Result<EquilibriumSolution> {
        let partition = self.registry.partition();
        let gains = DVector::from_fn(self.registry.firm_count(), |f, _| {
            if partition.is_merging(f) {
                gain
            } else {
                0.0
            }
        });
        self.solve_with_gain_vector(gains, None, options)
    }

    /// Post-merger equilibrium with firm-specific gains; unnamed firms get zero.
    pub fn solve_with_gains(
        &self,
        gains: &HashMap<String, f64>,
        options: &SimulationOptions,
    ) -> Result<EquilibriumSolution> {
        let mut vector = DVector::zeros(self.registry.firm_count());
        for (firm, &gain) in gains {
            vector[self.registry.require(firm)?] = gain;
        }
        self.solve_with_gain_vector(vector, None, options)
    }

    /// Post-merger equilibrium for a registry-ordered gain vector and optional starting point.
    pub fn solve_with_gain_vector(
        &self,
        gains: DVector<f64>,
        initial_guess: Option<&EquilibriumState>,
        options: &SimulationOptions,
    ) -> Result<EquilibriumSolution> {
        solve_equilibrium(
            &self.calibration,
            self.registry.partition(),
            gains,
            initial_guess,
            options,
        )
    }

    /// Equilibrium with every firm pricing on its own. Reproduces the calibrated baseline.
    pub fn solve_pre_merger(&self, options: &SimulationOptions) -> Result<EquilibriumSolution> {
        let n = self.registry.firm_count();
        solve_equilibrium(
            &self.calibration,
            &MergerPartition::independent(n),
            DVector::zeros(n),
            None,
            options,
        )
    }

    /// Comparative statics over `gains`.
    pub fn sweep(&self, gains: &[f64], options: &SimulationOptions) -> Result<SweepResult> {
        sweep(
            &self.calibration,
            self.registry.partition(),
            gains,
            options,
        )
    }
}
