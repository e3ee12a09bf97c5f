//! Explicit retry strategies for solves that fail from their first initial guess.

use nalgebra::DVector;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

/// What to do when a solve fails to converge from its initial guess.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Report the failure as is.
    #[default]
    Never,
    /// Retry once from the pre-merger state when the first guess was something else.
    BaselineReset,
    /// Retry from multiplicatively perturbed copies of the initial guess, or of
    /// the pre-merger state when the initial guess is outside the residual domain.
    Perturbed {
        /// Number of perturbed attempts after the first failure.
        attempts: usize,
        /// Standard deviation of the relative perturbation.
        scale: f64,
        /// Seed for the perturbation stream so retries are reproducible.
        seed: u64,
    },
}

/// Deterministic stream of perturbed initial guesses around a base point.
#[derive(Debug)]
pub struct Perturbations {
    base: DVector<f64>,
    scale: f64,
    rng: SmallRng,
}

impl Perturbations {
    /// Stream of guesses around `base`, relative spread `scale`, seeded by `seed`.
    pub fn new(base: DVector<f64>, scale: f64, seed: u64) -> Self {
        Self {
            base,
            scale,
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl Iterator for Perturbations {
    type Item = DVector<f64>;

    /// Each entry is scaled by `1 + scale · z` with `z` standard normal, so zero entries stay put.
    fn next(&mut self) -> Option<Self::Item> {
        let scale = self.scale;
        let rng = &mut self.rng;
        Some(self.base.map(|value| {
            let z: f64 = StandardNormal.sample(&mut *rng);
            value * (1.0 + scale * z)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perturbations_are_reproducible_and_keep_zeros() {
        let base = DVector::from_vec(vec![0.2, 0.0, -3.0]);
        let first: Vec<_> = Perturbations::new(base.clone(), 0.05, 11).take(3).collect();
        let second: Vec<_> = Perturbations::new(base.clone(), 0.05, 11).take(3).collect();
        assert_eq!(first, second);
        for guess in &first {
            assert_eq!(guess[1], 0.0);
            assert_ne!(guess[0], base[0]);
            assert!(guess[2] < 0.0);
        }
    }

    #[test]
    fn policy_parses_from_json() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"perturbed":{"attempts":3,"scale":0.01,"seed":7}}"#).unwrap();
        assert_eq!(
            policy,
            RetryPolicy::Perturbed {
                attempts: 3,
                scale: 0.01,
                seed: 7
            }
        );
        let never: RetryPolicy = serde_json::from_str(r#""never""#).unwrap();
        assert_eq!(never, RetryPolicy::Never);
    }
}
