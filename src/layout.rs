//! Packing of the structured post-merger state into the flat vector seen by the root finder.
//!
//! The flat order is fixed: post-merger shares (all firms), margins (all
//! firms), price changes (all firms), own-elasticities of non-merging firms,
//! then the merging × merging cross-elasticity block in row-major order.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;
use crate::error::{MergerError, Result};
use crate::firms::MergerPartition;

/// Post-merger values of every unknown, in structured form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EquilibriumState {
    /// Market shares, registry order.
    pub shares: DVector<f64>,
    /// Price-cost margins, registry order.
    pub margins: DVector<f64>,
    /// Fractional price changes relative to baseline, registry order.
    pub price_changes: DVector<f64>,
    /// Own-elasticities of the non-merging firms, in partition order.
    pub own_elasticities: DVector<f64>,
    /// Elasticities among merging firms; `(a, b)` indexes the partition's merging list.
    pub cross_elasticities: DMatrix<f64>,
}

/// Offsets of each block inside the flat unknown vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnknownLayout {
    firms: usize,
    non_merging: usize,
    merging: usize,
}

impl UnknownLayout {
    /// Layout for the given partition.
    pub fn new(partition: &MergerPartition) -> Self {
        Self {
            firms: partition.firm_count(),
            non_merging: partition.non_merging().len(),
            merging: partition.merging().len(),
        }
    }

    /// Length of the flat vector, `3n + (n - k) + k²`.
    pub fn len(&self) -> usize {
        3 * self.firms + self.non_merging + self.merging * self.merging
    }

    /// Always `false` for a registry with at least one firm.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot of firm `firm`'s post-merger share.
    pub fn share(&self, firm: usize) -> usize {
        firm
    }

    /// Slot of firm `firm`'s post-merger margin.
    pub fn margin(&self, firm: usize) -> usize {
        self.firms + firm
    }

    /// Slot of firm `firm`'s price change.
    pub fn price_change(&self, firm: usize) -> usize {
        2 * self.firms + firm
    }

    /// Slot of the `position`-th non-merging firm's own-elasticity.
    pub fn own_elasticity(&self, position: usize) -> usize {
        3 * self.firms + position
    }

    /// Slot of the cross-elasticity between the `row`-th and `column`-th merging firms.
    pub fn cross_elasticity(&self, row: usize, column: usize) -> usize {
        3 * self.firms + self.non_merging + row * self.merging + column
    }

    /// Flattens `state`, checking every block against the layout.
    pub fn pack(&self, state: &EquilibriumState) -> Result<DVector<f64>> {
        let checks = [
            ("post-merger shares", self.firms, state.shares.len()),
            ("post-merger margins", self.firms, state.margins.len()),
            ("price changes", self.firms, state.price_changes.len()),
            (
                "non-merging own-elasticities",
                self.non_merging,
                state.own_elasticities.len(),
            ),
            (
                "merging cross-elasticity rows",
                self.merging,
                state.cross_elasticities.nrows(),
            ),
            (
                "merging cross-elasticity columns",
                self.merging,
                state.cross_elasticities.ncols(),
            ),
        ];
        for (context, expected, found) in checks {
            if expected != found {
                return Err(MergerError::dimension_mismatch(context, expected, found));
            }
        }

        let mut x = DVector::zeros(self.len());
        for f in 0..self.firms {
            x[self.share(f)] = state.shares[f];
            x[self.margin(f)] = state.margins[f];
            x[self.price_change(f)] = state.price_changes[f];
        }
        for position in 0..self.non_merging {
            x[self.own_elasticity(position)] = state.own_elasticities[position];
        }
        for a in 0..self.merging {
            for b in 0..self.merging {
                x[self.cross_elasticity(a, b)] = state.cross_elasticities[(a, b)];
            }
        }
        Ok(x)
    }

    /// Rebuilds the structured state from a flat vector of length [`len`](Self::len).
    pub fn unpack(&self, x: &DVector<f64>) -> Result<EquilibriumState> {
        if x.len() != self.len() {
            return Err(MergerError::dimension_mismatch(
                "unknown vector",
                self.len(),
                x.len(),
            ));
        }
        let n = self.firms;
        Ok(EquilibriumState {
            shares: DVector::from_fn(n, |f, _| x[self.share(f)]),
            margins: DVector::from_fn(n, |f, _| x[self.margin(f)]),
            price_changes: DVector::from_fn(n, |f, _| x[self.price_change(f)]),
            own_elasticities: DVector::from_fn(self.non_merging, |p, _| {
                x[self.own_elasticity(p)]
            }),
            cross_elasticities: DMatrix::from_fn(self.merging, self.merging, |a, b| {
                x[self.cross_elasticity(a, b)]
            }),
        })
    }

    /// The pre-merger state expressed in this layout: no price change, baseline everything else.
    pub fn baseline_guess(
        &self,
        calibration: &Calibration,
        partition: &MergerPartition,
    ) -> Result<DVector<f64>> {
        if calibration.firm_count() != self.firms {
            return Err(MergerError::dimension_mismatch(
                "calibrated firms",
                self.firms,
                calibration.firm_count(),
            ));
        }
        let merging = partition.merging();
        let state = EquilibriumState {
            shares: calibration.shares().clone(),
            margins: calibration.margins().clone(),
            price_changes: DVector::zeros(self.firms),
            own_elasticities: DVector::from_iterator(
                self.non_merging,
                partition
                    .non_merging()
                    .iter()
                    .map(|&f| calibration.own_elasticity(f)),
            ),
            cross_elasticities: DMatrix::from_fn(self.merging, self.merging, |a, b| {
                calibration.elasticities()[(merging[a], merging[b])]
            }),
        };
        self.pack(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_matches_square_system_formula() {
        for n in 3..7 {
            for k in 2..n {
                let flags: Vec<bool> = (0..n).map(|i| i < k).collect();
                let partition = MergerPartition::from_flags(&flags).unwrap();
                let layout = UnknownLayout::new(&partition);
                assert_eq!(layout.len(), 3 * n + (n - k) + k * k);
            }
        }
    }

    #[test]
    fn unpack_inverts_pack() {
        let partition = MergerPartition::from_flags(&[true, false, true, false]).unwrap();
        let layout = UnknownLayout::new(&partition);
        let x = DVector::from_fn(layout.len(), |i, _| i as f64 * 0.5 - 3.0);

        let state = layout.unpack(&x).unwrap();
        assert_eq!(state.shares.len(), 4);
        assert_eq!(state.own_elasticities.len(), 2);
        assert_eq!(state.cross_elasticities.shape(), (2, 2));
        assert_eq!(state.cross_elasticities[(1, 0)], x[layout.cross_elasticity(1, 0)]);
        assert_eq!(layout.pack(&state).unwrap(), x);
    }

    #[test]
    fn pack_rejects_misshapen_blocks() {
        let partition = MergerPartition::from_flags(&[true, true, false]).unwrap();
        let layout = UnknownLayout::new(&partition);
        let mut state = layout.unpack(&DVector::zeros(layout.len())).unwrap();
        state.own_elasticities = DVector::zeros(2);
        assert!(matches!(
            layout.pack(&state),
            Err(MergerError::DimensionMismatch { .. })
        ));
    }
}
