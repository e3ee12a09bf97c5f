use std::fmt;

use thiserror::Error;

/// Unified error type for `merger_sim` operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MergerError {
    /// Raised when provided vectors or matrices have incompatible dimensions.
    #[error("dimension mismatch in {context}: expected {expected} but found {found}")]
    DimensionMismatch {
        /// Human-readable context describing the operation.
        context: &'static str,
        /// The required dimension, usually implied by the firm registry.
        expected: usize,
        /// The dimension that was actually supplied.
        found: usize,
    },

    /// Raised when the same firm identifier is registered twice.
    #[error("firm `{firm}` is registered more than once")]
    DuplicateFirm { firm: String },

    /// Raised when an identifier does not name a registered firm.
    #[error("firm `{firm}` is not part of the registry")]
    UnknownFirm { firm: String },

    /// Raised when the merging set cannot describe a merger.
    #[error("a merger needs at least two merging firms, found {found}")]
    TooFewMergingFirms { found: usize },

    /// Raised when every registered firm is merging.
    #[error("all {total} firms are merging; at least one non-merging firm is required")]
    NoNonMergingFirms { total: usize },

    /// Raised when a required component has not been provided to a builder.
    #[error("{component} must be provided before calibrating")]
    MissingComponent { component: &'static str },

    /// Raised when the formulated system has a different number of equations and unknowns.
    #[error("equilibrium system is not square: {unknowns} unknowns but {equations} equations")]
    NonSquareSystem { unknowns: usize, equations: usize },

    /// Raised when an efficiency gain is attached to a firm outside the merger.
    #[error("non-merging firm at index {index} must have zero efficiency gain, found {gain}")]
    GainOnNonMergingFirm { index: usize, gain: f64 },

    /// Raised when a sweep gain value cannot be ordered.
    #[error("efficiency gain at position {position} is not finite: {gain}")]
    NonFiniteGain { position: usize, gain: f64 },

    /// Raised when a baseline share lies outside the open unit interval.
    #[error("baseline share of firm `{firm}` must lie in (0, 1), found {share}")]
    ShareOutOfRange { firm: String, share: f64 },

    /// Raised when an elasticity supplied to the calibration is NaN or infinite.
    #[error("{context} must be finite, found {value}")]
    NonFiniteInput { context: &'static str, value: f64 },

    /// Raised when a calibrated diagonal coefficient would imply upward-sloping demand.
    #[error("diagonal coefficient of firm `{firm}` must be negative, found {coefficient}")]
    NonNegativeCoefficient { firm: String, coefficient: f64 },

    /// Raised when a derived elasticity or margin is NaN or infinite.
    #[error("calibrated {quantity} for ({row}, {column}) is not finite")]
    NonFiniteCalibration {
        quantity: &'static str,
        row: usize,
        column: usize,
    },

    /// Raised when the root finder fails to meet the residual tolerance.
    #[error(
        "equilibrium solve did not converge after {iterations} iterations ({reason}); \
         best max residual {residual_norm}"
    )]
    DidNotConverge {
        /// Number of Newton iterations performed before termination.
        iterations: usize,
        /// Maximum absolute residual at the last accepted iterate.
        residual_norm: f64,
        /// Why the solver stopped.
        reason: ConvergenceFailure,
    },
}

/// Coarse classification of [`MergerError`] used by callers that only care about recoverability.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed firm partition, inputs, or equation system. Fatal, never retried.
    Configuration,
    /// Baseline inputs produce an ill-posed calibration. Fatal for that calibration.
    Calibration,
    /// A single solve failed. Recoverable at the sweep level.
    Convergence,
}

/// Reason attached to [`MergerError::DidNotConverge`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvergenceFailure {
    /// The iteration cap was reached.
    IterationLimit,
    /// The Newton step shrank below the step tolerance before the residuals vanished.
    Stagnation,
    /// The residual function returned NaN or an infinity.
    NonFiniteResidual,
    /// The finite-difference Jacobian could not be factorised.
    SingularJacobian,
    /// Backtracking could not find a step that reduces the residual norm.
    LineSearch,
}

impl fmt::Display for ConvergenceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::IterationLimit => "iteration limit reached",
            Self::Stagnation => "step stagnated",
            Self::NonFiniteResidual => "non-finite residual",
            Self::SingularJacobian => "singular jacobian",
            Self::LineSearch => "line search failed",
        };
        f.write_str(text)
    }
}

impl MergerError {
    /// Helper to format a [`DimensionMismatch`](MergerError::DimensionMismatch) error.
    pub fn dimension_mismatch(context: &'static str, expected: usize, found: usize) -> Self {
        Self::DimensionMismatch {
            context,
            expected,
            found,
        }
    }

    /// Helper for bubbling up missing component errors from builders.
    pub fn missing_component(component: &'static str) -> Self {
        Self::MissingComponent { component }
    }

    /// Helper to raise a convergence failure.
    pub fn did_not_converge(
        iterations: usize,
        residual_norm: f64,
        reason: ConvergenceFailure,
    ) -> Self {
        Self::DidNotConverge {
            iterations,
            residual_norm,
            reason,
        }
    }

    /// Classifies the error by recoverability.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DimensionMismatch { .. }
            | Self::DuplicateFirm { .. }
            | Self::UnknownFirm { .. }
            | Self::TooFewMergingFirms { .. }
            | Self::NoNonMergingFirms { .. }
            | Self::MissingComponent { .. }
            | Self::NonSquareSystem { .. }
            | Self::GainOnNonMergingFirm { .. }
            | Self::NonFiniteGain { .. } => ErrorKind::Configuration,
            Self::ShareOutOfRange { .. }
            | Self::NonFiniteInput { .. }
            | Self::NonNegativeCoefficient { .. }
            | Self::NonFiniteCalibration { .. } => ErrorKind::Calibration,
            Self::DidNotConverge { .. } => ErrorKind::Convergence,
        }
    }

    /// Returns `true` when a sweep may record the error and continue.
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::Convergence
    }
}

/// Type alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, MergerError>;
