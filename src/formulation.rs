//! Residual equations whose root is the post-merger PCAIDS equilibrium.
//!
//! Unknowns follow [`UnknownLayout`]. For every firm the system carries a
//! demand-share equation and a margin-from-cost equation. Non-merging firms add
//! a single-product first-order condition and an own-elasticity consistency
//! equation. Merging firms add the joint-profit first-order condition and one
//! cross-elasticity consistency equation per ordered merging pair.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;
use crate::error::{MergerError, Result};
use crate::firms::MergerPartition;
use crate::layout::UnknownLayout;

/// How an efficiency gain `γ` changes a merging firm's marginal cost.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EfficiencyConvention {
    /// Marginal cost becomes `c / (1 + γ)`: positive gains cut cost, `γ = -1` is undefined.
    #[default]
    CostDivisor,
    /// Marginal cost becomes `c · (1 + γ)`: `γ` is a proportional cost change.
    CostMultiplier,
}

impl EfficiencyConvention {
    /// Post-merger over pre-merger marginal cost for gain `gain`.
    pub fn cost_ratio(self, gain: f64) -> f64 {
        match self {
            Self::CostDivisor => 1.0 / (1.0 + gain),
            Self::CostMultiplier => 1.0 + gain,
        }
    }
}

/// The formulated system for one calibration, partition, and gain vector.
///
/// Holds borrowed, immutable inputs only; evaluating the residuals has no side effects.
#[derive(Clone, Debug)]
pub struct EquilibriumSystem<'a> {
    calibration: &'a Calibration,
    partition: &'a MergerPartition,
    gains: DVector<f64>,
    convention: EfficiencyConvention,
    layout: UnknownLayout,
}

impl<'a> EquilibriumSystem<'a> {
    /// Validates the inputs and checks that the system is square.
    pub fn new(
        calibration: &'a Calibration,
        partition: &'a MergerPartition,
        gains: DVector<f64>,
        convention: EfficiencyConvention,
    ) -> Result<Self> {
        let n = partition.firm_count();
        if calibration.firm_count() != n {
            return Err(MergerError::dimension_mismatch(
                "calibrated firms",
                n,
                calibration.firm_count(),
            ));
        }
        if gains.len() != n {
            return Err(MergerError::dimension_mismatch(
                "efficiency gains",
                n,
                gains.len(),
            ));
        }
        for &index in partition.non_merging() {
            if gains[index] != 0.0 {
                return Err(MergerError::GainOnNonMergingFirm {
                    index,
                    gain: gains[index],
                });
            }
        }

        let system = Self {
            calibration,
            partition,
            gains,
            convention,
            layout: UnknownLayout::new(partition),
        };
        let (unknowns, equations) = (system.unknown_count(), system.equation_count());
        if unknowns != equations {
            return Err(MergerError::NonSquareSystem {
                unknowns,
                equations,
            });
        }
        Ok(system)
    }

    /// Layout shared with the solver for packing and unpacking.
    pub fn layout(&self) -> &UnknownLayout {
        &self.layout
    }

    /// Per-firm efficiency gains this system was built with.
    pub fn gains(&self) -> &DVector<f64> {
        &self.gains
    }

    /// Number of unknowns in the flat vector.
    pub fn unknown_count(&self) -> usize {
        self.layout.len()
    }

    /// Number of residual equations, counted block by block.
    pub fn equation_count(&self) -> usize {
        let n = self.partition.firm_count();
        let non_merging = self.partition.non_merging().len();
        let merging = self.partition.merging().len();
        let demand = n;
        let margin = n;
        let single_product = 2 * non_merging;
        let joint_profit = merging;
        let cross = merging * merging;
        demand + margin + single_product + joint_profit + cross
    }

    /// Starting point at the pre-merger state.
    pub fn baseline_guess(&self) -> Result<DVector<f64>> {
        self.layout.baseline_guess(self.calibration, self.partition)
    }

    /// Evaluates every residual at `x`. Non-finite entries signal an infeasible point.
    pub fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
        let layout = &self.layout;
        let c = self.calibration.coefficients();
        let baseline_shares = self.calibration.shares();
        let baseline_margins = self.calibration.margins();
        let market_term = self.calibration.market_elasticity() + 1.0;
        let n = self.partition.firm_count();

        let share = |f: usize| x[layout.share(f)];
        let margin = |f: usize| x[layout.margin(f)];
        let price_change = |f: usize| x[layout.price_change(f)];

        let log_prices: Vec<f64> = (0..n).map(|g| price_change(g).ln_1p()).collect();

        let mut residuals = Vec::with_capacity(self.equation_count());
        for f in 0..n {
            let reallocation: f64 = (0..n).map(|g| c[(f, g)] * log_prices[g]).sum();
            residuals.push(share(f) - (baseline_shares[f] + reallocation));

            let cost_ratio = self.convention.cost_ratio(self.gains[f]);
            residuals.push(
                margin(f)
                    - (1.0 - cost_ratio / (1.0 + price_change(f)) * (1.0 - baseline_margins[f])),
            );
        }

        for (position, &f) in self.partition.non_merging().iter().enumerate() {
            let own = x[layout.own_elasticity(position)];
            residuals.push(margin(f) + 1.0 / own);
            residuals.push(own - (-1.0 + c[(f, f)] / share(f) + share(f) * market_term));
        }

        let merging = self.partition.merging();
        for (a, &f) in merging.iter().enumerate() {
            let diversion: f64 = merging
                .iter()
                .enumerate()
                .map(|(b, &h)| x[layout.cross_elasticity(b, a)] * share(h) * margin(h))
                .sum();
            residuals.push(share(f) + diversion);

            for (b, &g) in merging.iter().enumerate() {
                let own = if f == g { -1.0 } else { 0.0 };
                let implied = own + c[(f, g)] / share(f) + share(g) * market_term;
                residuals.push(x[layout.cross_elasticity(a, b)] - implied);
            }
        }

        DVector::from_vec(residuals)
    }
}
