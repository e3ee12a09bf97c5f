//! Closed-form PCAIDS calibration of the demand coefficients from shares and two elasticities.

use std::collections::HashMap;

use log::info;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{MergerError, Result};
use crate::firms::FirmRegistry;

/// Baseline market structure implied by the calibration inputs.
///
/// The coefficient matrix is fixed once calibrated: it encodes the curvature of
/// demand and does not move with efficiency gains. All fields are laid out in
/// registry order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    coefficients: DMatrix<f64>,
    shares: DVector<f64>,
    elasticities: DMatrix<f64>,
    margins: DVector<f64>,
    market_elasticity: f64,
}

impl Calibration {
    /// Starts a name-keyed calibration builder for `registry`.
    pub fn builder(registry: &FirmRegistry) -> CalibrationBuilder<'_> {
        CalibrationBuilder::new(registry)
    }

    /// Number of calibrated firms.
    pub fn firm_count(&self) -> usize {
        self.shares.len()
    }

    /// Structural coefficient matrix `c[f, g]`.
    pub fn coefficients(&self) -> &DMatrix<f64> {
        &self.coefficients
    }

    /// Baseline market shares.
    pub fn shares(&self) -> &DVector<f64> {
        &self.shares
    }

    /// Baseline elasticity matrix; entry `(f, g)` is the response of `f`'s quantity to `g`'s price.
    pub fn elasticities(&self) -> &DMatrix<f64> {
        &self.elasticities
    }

    /// Baseline own-elasticity of firm `index`.
    pub fn own_elasticity(&self, index: usize) -> f64 {
        self.elasticities[(index, index)]
    }

    /// Baseline price-cost margins, `-1 / own-elasticity`.
    pub fn margins(&self) -> &DVector<f64> {
        &self.margins
    }

    /// Aggregate market elasticity.
    pub fn market_elasticity(&self) -> f64 {
        self.market_elasticity
    }
}

/// Calibrates the PCAIDS coefficients.
///
/// `shares` are baseline shares in registry order, `reference` is the index of
/// the firm whose own-elasticity was observed.
pub fn calibrate(
    registry: &FirmRegistry,
    shares: &DVector<f64>,
    reference: usize,
    reference_elasticity: f64,
    market_elasticity: f64,
) -> Result<Calibration> {
    let n = registry.firm_count();
    if shares.len() != n {
        return Err(MergerError::dimension_mismatch(
            "baseline shares",
            n,
            shares.len(),
        ));
    }
    if reference >= n {
        return Err(MergerError::dimension_mismatch(
            "reference firm index",
            n,
            reference,
        ));
    }
    for (index, &share) in shares.iter().enumerate() {
        if !(share > 0.0 && share < 1.0) {
            return Err(MergerError::ShareOutOfRange {
                firm: registry.name(index).to_string(),
                share,
            });
        }
    }
    for (context, value) in [
        ("reference own-elasticity", reference_elasticity),
        ("market elasticity", market_elasticity),
    ] {
        if !value.is_finite() {
            return Err(MergerError::NonFiniteInput { context, value });
        }
    }

    let curvature = |share: f64| share * (1.0 - share);
    let market_term = market_elasticity + 1.0;

    let s_ref = shares[reference];
    let reference_coefficient = s_ref * (reference_elasticity + 1.0 - s_ref * market_term);

    let mut coefficients = DMatrix::zeros(n, n);
    for f in 0..n {
        let diagonal = curvature(shares[f]) / curvature(s_ref) * reference_coefficient;
        if !(diagonal < 0.0) {
            return Err(MergerError::NonNegativeCoefficient {
                firm: registry.name(f).to_string(),
                coefficient: diagonal,
            });
        }
        coefficients[(f, f)] = diagonal;
    }
    for f in 0..n {
        for g in 0..n {
            if f != g {
                coefficients[(f, g)] = -shares[f] / (1.0 - shares[g]) * coefficients[(g, g)];
            }
        }
    }

    let elasticities = DMatrix::from_fn(n, n, |f, g| {
        let own = if f == g { -1.0 } else { 0.0 };
        own + coefficients[(f, g)] / shares[f] + shares[g] * market_term
    });
    for f in 0..n {
        for g in 0..n {
            if !elasticities[(f, g)].is_finite() {
                return Err(MergerError::NonFiniteCalibration {
                    quantity: "elasticity",
                    row: f,
                    column: g,
                });
            }
        }
    }

    let margins = DVector::from_fn(n, |f, _| -1.0 / elasticities[(f, f)]);
    if let Some(f) = margins.iter().position(|m| !m.is_finite()) {
        return Err(MergerError::NonFiniteCalibration {
            quantity: "margin",
            row: f,
            column: f,
        });
    }

    info!(
        "calibrated {n} firms against `{}` (own elasticity {reference_elasticity}, \
         market elasticity {market_elasticity})",
        registry.name(reference)
    );

    Ok(Calibration {
        coefficients,
        shares: shares.clone(),
        elasticities,
        margins,
        market_elasticity,
    })
}

/// Name-keyed front end to [`calibrate`].
#[derive(Debug)]
pub struct CalibrationBuilder<'a> {
    registry: &'a FirmRegistry,
    shares: HashMap<String, f64>,
    reference: Option<(String, f64)>,
    market_elasticity: Option<f64>,
}

impl<'a> CalibrationBuilder<'a> {
    /// Start an empty calibration for `registry`.
    pub fn new(registry: &'a FirmRegistry) -> Self {
        Self {
            registry,
            shares: HashMap::new(),
            reference: None,
            market_elasticity: None,
        }
    }

    /// Sets the baseline share of `firm`.
    pub fn share<S: Into<String>>(mut self, firm: S, share: f64) -> Self {
        self.shares.insert(firm.into(), share);
        self
    }

    /// Sets baseline shares for several firms at once.
    pub fn shares<I, S>(mut self, shares: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        self.shares
            .extend(shares.into_iter().map(|(firm, share)| (firm.into(), share)));
        self
    }

    /// Sets the directly observed own-elasticity of the reference firm.
    pub fn reference_elasticity<S: Into<String>>(mut self, firm: S, elasticity: f64) -> Self {
        self.reference = Some((firm.into(), elasticity));
        self
    }

    /// Sets the aggregate market elasticity.
    pub fn market_elasticity(mut self, elasticity: f64) -> Self {
        self.market_elasticity = Some(elasticity);
        self
    }

    /// Validates the inputs and runs the calibration.
    pub fn calibrate(self) -> Result<Calibration> {
        for firm in self.shares.keys() {
            self.registry.require(firm)?;
        }
        let shares = self
            .registry
            .firms()
            .iter()
            .map(|firm| {
                self.shares.get(firm).copied().ok_or_else(|| {
                    MergerError::missing_component("a baseline share for every firm")
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let (reference_firm, reference_elasticity) = self
            .reference
            .ok_or_else(|| MergerError::missing_component("reference own-elasticity"))?;
        let reference = self.registry.require(&reference_firm)?;
        let market_elasticity = self
            .market_elasticity
            .ok_or_else(|| MergerError::missing_component("market elasticity"))?;

        calibrate(
            self.registry,
            &DVector::from_vec(shares),
            reference,
            reference_elasticity,
            market_elasticity,
        )
    }
}
