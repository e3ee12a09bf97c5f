//! Damped Newton root finder, its configuration, and diagnostics.

use finitediff::FiniteDiff;
use log::{debug, trace};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{ConvergenceFailure, MergerError, Result};

/// Armijo constant for the backtracking line search.
const SUFFICIENT_DECREASE: f64 = 1e-4;

/// Step `finitediff` uses for its forward differences; reused for backward columns.
const DIFFERENCE_STEP: f64 = 1.490_116_119_384_765_6e-8;

/// Configuration for the Newton iterations that solve the equilibrium system.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Maximum number of Newton iterations before aborting.
    pub max_iterations: usize,
    /// Supremum-norm tolerance on the residuals.
    pub residual_tolerance: f64,
    /// Supremum norm of the accepted step below which the solve is declared stagnant.
    pub step_tolerance: f64,
    /// Smallest line-search step fraction tried before giving up.
    pub min_step_fraction: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            residual_tolerance: 1e-10,
            step_tolerance: 1e-14,
            min_step_fraction: 1e-10,
        }
    }
}

impl SolverOptions {
    /// Override the iteration cap. Zero only checks the initial guess.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Override the max-abs residual tolerance.
    pub fn with_residual_tolerance(mut self, tolerance: f64) -> Self {
        self.residual_tolerance = tolerance;
        self
    }

    /// Override the step size below which an unconverged solve counts as stagnant.
    pub fn with_step_tolerance(mut self, tolerance: f64) -> Self {
        self.step_tolerance = tolerance;
        self
    }

    /// Override the smallest line-search fraction tried before giving up.
    pub fn with_min_step_fraction(mut self, fraction: f64) -> Self {
        self.min_step_fraction = fraction;
        self
    }
}

/// Diagnostics returned alongside a converged root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolveSummary {
    /// Number of Newton iterations performed.
    pub iterations: usize,
    /// Maximum absolute residual at the returned point.
    pub residual_norm: f64,
    /// Number of residual-function evaluations, Jacobian columns included.
    pub evaluations: usize,
}

fn all_finite(v: &DVector<f64>) -> bool {
    v.iter().all(|value| value.is_finite())
}

/// Forward-difference Jacobian at `x`, with residuals `r` already known there.
///
/// Columns whose forward point leaves the domain are redone with a backward
/// step. Also returns the number of residual evaluations spent, or `None` when
/// neither direction gives finite residuals.
fn finite_difference_jacobian<F>(
    residual: &F,
    x: &DVector<f64>,
    r: &DVector<f64>,
) -> Option<(DMatrix<f64>, usize)>
where
    F: Fn(&DVector<f64>) -> DVector<f64>,
{
    let n = x.len();
    let columns = x
        .iter()
        .copied()
        .collect::<Vec<f64>>()
        .forward_jacobian(&|v: &Vec<f64>| -> Vec<f64> {
            residual(&DVector::from_column_slice(v)).iter().copied().collect()
        });
    let mut evaluations = n + 1;

    let mut jacobian = DMatrix::zeros(r.len(), n);
    for (j, column) in columns.into_iter().enumerate() {
        let column = DVector::from_vec(column);
        if all_finite(&column) {
            jacobian.set_column(j, &column);
            continue;
        }
        let mut behind = x.clone();
        behind[j] -= DIFFERENCE_STEP;
        let shifted = residual(&behind);
        evaluations += 1;
        if !all_finite(&shifted) {
            return None;
        }
        jacobian.set_column(j, &((r - shifted) / DIFFERENCE_STEP));
    }
    Some((jacobian, evaluations))
}

/// Finds `x` with `residual(x) ≈ 0`, starting from `initial`.
///
/// Only converged points are returned; every other outcome is a
/// [`MergerError::DidNotConverge`]. The residual function must be pure.
pub fn solve_root<F>(
    residual: F,
    initial: DVector<f64>,
    options: &SolverOptions,
) -> Result<(DVector<f64>, SolveSummary)>
where
    F: Fn(&DVector<f64>) -> DVector<f64>,
{
    let mut x = initial;
    let mut r = residual(&x);
    let mut evaluations = 1usize;
    if r.len() != x.len() {
        return Err(MergerError::NonSquareSystem {
            unknowns: x.len(),
            equations: r.len(),
        });
    }
    if !all_finite(&x) || !all_finite(&r) {
        return Err(MergerError::did_not_converge(
            0,
            f64::INFINITY,
            ConvergenceFailure::NonFiniteResidual,
        ));
    }

    let mut iteration = 0usize;

    loop {
        let residual_norm = r.amax();
        if residual_norm < options.residual_tolerance {
            debug!("newton converged in {iteration} iterations (max residual {residual_norm:e})");
            return Ok((
                x,
                SolveSummary {
                    iterations: iteration,
                    residual_norm,
                    evaluations,
                },
            ));
        }
        if iteration >= options.max_iterations {
            return Err(MergerError::did_not_converge(
                iteration,
                residual_norm,
                ConvergenceFailure::IterationLimit,
            ));
        }
        let fail = |reason| MergerError::did_not_converge(iteration, residual_norm, reason);

        let (jacobian, used) = finite_difference_jacobian(&residual, &x, &r)
            .ok_or_else(|| fail(ConvergenceFailure::NonFiniteResidual))?;
        evaluations += used;

        let step = jacobian
            .lu()
            .solve(&(-&r))
            .filter(all_finite)
            .ok_or_else(|| fail(ConvergenceFailure::SingularJacobian))?;

        let norm = r.norm();
        let mut fraction = 1.0;
        let (candidate, candidate_residual) = loop {
            if fraction < options.min_step_fraction {
                return Err(fail(ConvergenceFailure::LineSearch));
            }
            let candidate = &x + &step * fraction;
            let candidate_residual = residual(&candidate);
            evaluations += 1;
            if all_finite(&candidate_residual)
                && candidate_residual.norm() <= (1.0 - SUFFICIENT_DECREASE * fraction) * norm
            {
                break (candidate, candidate_residual);
            }
            fraction *= 0.5;
        };

        let movement = (&step * fraction).amax();
        iteration += 1;
        trace!(
            "newton iteration {iteration}: step fraction {fraction}, max residual {:e}",
            candidate_residual.amax()
        );

        x = candidate;
        r = candidate_residual;
        if movement < options.step_tolerance && r.amax() >= options.residual_tolerance {
            return Err(MergerError::did_not_converge(
                iteration,
                r.amax(),
                ConvergenceFailure::Stagnation,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    /// Circle of radius two intersected with the diagonal.
    fn circle(x: &DVector<f64>) -> DVector<f64> {
        DVector::from_vec(vec![x[0] * x[0] + x[1] * x[1] - 4.0, x[0] - x[1]])
    }

    #[test]
    fn finds_circle_diagonal_intersection() {
        let (root, summary) = solve_root(
            circle,
            DVector::from_vec(vec![1.0, 0.5]),
            &SolverOptions::default(),
        )
        .unwrap();
        assert_relative_eq!(root[0], 2.0_f64.sqrt(), epsilon = 1e-9);
        assert_relative_eq!(root[1], 2.0_f64.sqrt(), epsilon = 1e-9);
        assert!(summary.residual_norm < 1e-10);
        assert!(summary.iterations > 0);
    }

    #[test]
    fn converged_start_takes_no_iterations() {
        let start = DVector::from_vec(vec![2.0_f64.sqrt(), 2.0_f64.sqrt()]);
        let options = SolverOptions::default().with_residual_tolerance(1e-8);
        let (root, summary) = solve_root(circle, start.clone(), &options).unwrap();
        assert_eq!(summary.iterations, 0);
        assert_eq!(root, start);
    }

    #[test]
    fn reports_systems_without_a_root() {
        let no_root = |x: &DVector<f64>| DVector::from_vec(vec![x[0] * x[0] + 1.0]);
        let result = solve_root(no_root, DVector::from_vec(vec![0.7]), &SolverOptions::default());
        assert!(matches!(result, Err(MergerError::DidNotConverge { .. })));
    }

    #[test]
    fn respects_iteration_cap() {
        let options = SolverOptions::default().with_max_iterations(1);
        let result = solve_root(circle, DVector::from_vec(vec![10.0, -3.0]), &options);
        assert!(matches!(
            result,
            Err(MergerError::DidNotConverge {
                reason: ConvergenceFailure::IterationLimit,
                iterations: 1,
                ..
            })
        ));
    }

    #[test]
    fn non_finite_start_fails_immediately() {
        let log_system = |x: &DVector<f64>| DVector::from_vec(vec![x[0].ln()]);
        let result = solve_root(
            log_system,
            DVector::from_vec(vec![-1.0]),
            &SolverOptions::default(),
        );
        assert!(matches!(
            result,
            Err(MergerError::DidNotConverge {
                iterations: 0,
                reason: ConvergenceFailure::NonFiniteResidual,
                ..
            })
        ));
    }

    #[test]
    fn zero_iteration_cap_only_checks_the_guess() {
        let options = SolverOptions::default().with_max_iterations(0);
        let start = DVector::from_vec(vec![2.0_f64.sqrt(), 2.0_f64.sqrt()]);
        let loose = options.clone().with_residual_tolerance(1e-8);
        let (_, summary) = solve_root(circle, start, &loose).unwrap();
        assert_eq!(summary.iterations, 0);

        let result = solve_root(circle, DVector::from_vec(vec![1.0, 0.5]), &options);
        assert!(matches!(
            result,
            Err(MergerError::DidNotConverge {
                reason: ConvergenceFailure::IterationLimit,
                iterations: 0,
                ..
            })
        ));
    }

    #[test]
    fn small_steps_far_from_a_root_are_stagnation() {
        let options = SolverOptions::default().with_step_tolerance(1e3);
        let result = solve_root(circle, DVector::from_vec(vec![1.0, 0.5]), &options);
        assert!(matches!(
            result,
            Err(MergerError::DidNotConverge {
                reason: ConvergenceFailure::Stagnation,
                iterations: 1,
                ..
            })
        ));
    }

    #[test]
    fn steps_backwards_at_the_domain_edge() {
        // Defined only for x < 1e-8, closer to the start than the difference step.
        let edge = 1e-8;
        let log_system = |x: &DVector<f64>| DVector::from_vec(vec![(edge - x[0]).ln()]);
        let (root, summary) = solve_root(
            log_system,
            DVector::from_vec(vec![0.0]),
            &SolverOptions::default(),
        )
        .unwrap();
        assert_relative_eq!(root[0], edge - 1.0, epsilon = 1e-9);
        assert!(summary.iterations > 1);
    }
}
