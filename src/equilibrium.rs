//! One post-merger equilibrium solve: formulate, solve, apply the retry policy, unpack.

use log::{debug, warn};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;
use crate::error::{MergerError, Result};
use crate::firms::{FirmRegistry, MergerPartition};
use crate::formulation::EquilibriumSystem;
use crate::layout::EquilibriumState;
use crate::options::SimulationOptions;
use crate::retry::{Perturbations, RetryPolicy};
use crate::solving::{solve_root, SolveSummary};

/// Converged post-merger equilibrium for one vector of efficiency gains.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EquilibriumSolution {
    state: EquilibriumState,
    efficiency_gains: DVector<f64>,
    merging: Vec<usize>,
    non_merging: Vec<usize>,
    summary: SolveSummary,
}

impl EquilibriumSolution {
    /// The solved unknowns in structured form.
    pub fn state(&self) -> &EquilibriumState {
        &self.state
    }

    /// Post-merger market shares, registry order.
    pub fn shares(&self) -> &DVector<f64> {
        &self.state.shares
    }

    /// Post-merger margins, registry order.
    pub fn margins(&self) -> &DVector<f64> {
        &self.state.margins
    }

    /// Price changes relative to baseline, registry order.
    pub fn price_changes(&self) -> &DVector<f64> {
        &self.state.price_changes
    }

    /// Post-merger own-elasticity of firm `firm` (registry index), `None` if out of range.
    pub fn own_elasticity(&self, firm: usize) -> Option<f64> {
        (firm < self.state.shares.len()).then(|| self.own_elasticity_of(firm))
    }

    fn own_elasticity_of(&self, firm: usize) -> f64 {
        match self.merging.binary_search(&firm) {
            Ok(a) => self.state.cross_elasticities[(a, a)],
            Err(_) => {
                let position = self.non_merging.partition_point(|&i| i < firm);
                self.state.own_elasticities[position]
            }
        }
    }

    /// Post-merger elasticity between two merging firms, `None` if either is not merging.
    pub fn cross_elasticity(&self, firm: usize, other: usize) -> Option<f64> {
        let a = self.merging.binary_search(&firm).ok()?;
        let b = self.merging.binary_search(&other).ok()?;
        Some(self.state.cross_elasticities[(a, b)])
    }

    /// Efficiency gains the solution was computed for.
    pub fn efficiency_gains(&self) -> &DVector<f64> {
        &self.efficiency_gains
    }

    /// Solver diagnostics.
    pub fn summary(&self) -> &SolveSummary {
        &self.summary
    }

    /// Per-firm table for reporting layers.
    pub fn firm_outcomes(&self, registry: &FirmRegistry) -> Vec<FirmOutcome> {
        (0..self.state.shares.len())
            .map(|f| FirmOutcome {
                firm: registry.name(f).to_string(),
                merging: self.merging.binary_search(&f).is_ok(),
                efficiency_gain: self.efficiency_gains[f],
                share: self.state.shares[f],
                margin: self.state.margins[f],
                price_change: self.state.price_changes[f],
                own_elasticity: self.own_elasticity_of(f),
            })
            .collect()
    }
}

/// One row of [`EquilibriumSolution::firm_outcomes`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FirmOutcome {
    /// Firm identifier.
    pub firm: String,
    /// Whether the firm is party to the merger.
    pub merging: bool,
    /// Efficiency gain applied to the firm; zero for outsiders.
    pub efficiency_gain: f64,
    /// Post-merger market share.
    pub share: f64,
    /// Post-merger price-cost margin.
    pub margin: f64,
    /// Price change relative to baseline.
    pub price_change: f64,
    /// Post-merger own-elasticity.
    pub own_elasticity: f64,
}

/// Solves the post-merger equilibrium for per-firm `gains`.
///
/// Starts from `initial_guess` when given, otherwise from the pre-merger
/// state. Failures are retried only as `options.retry` dictates.
pub fn solve_equilibrium(
    calibration: &Calibration,
    partition: &MergerPartition,
    gains: DVector<f64>,
    initial_guess: Option<&EquilibriumState>,
    options: &SimulationOptions,
) -> Result<EquilibriumSolution> {
    let system = EquilibriumSystem::new(calibration, partition, gains, options.efficiency)?;
    let layout = system.layout();
    let baseline = system.baseline_guess()?;
    let first = match initial_guess {
        Some(state) => layout.pack(state)?,
        None => baseline.clone(),
    };

    let attempt =
        |guess: DVector<f64>| solve_root(|x| system.residuals(x), guess, &options.solver);

    let (root, summary) = match attempt(first.clone()) {
        Ok(found) => found,
        Err(err) if err.is_recoverable() => {
            let in_domain = system.residuals(&first).iter().all(|r| r.is_finite());
            retry(&attempt, err, first, in_domain, baseline, &options.retry)?
        }
        Err(err) => return Err(err),
    };

    debug!(
        "equilibrium solved for gains {:?} in {} iterations",
        system.gains().as_slice(),
        summary.iterations
    );

    Ok(EquilibriumSolution {
        state: layout.unpack(&root)?,
        efficiency_gains: system.gains().clone(),
        merging: partition.merging().to_vec(),
        non_merging: partition.non_merging().to_vec(),
        summary,
    })
}

/// Applies `policy` after the solve from `first` failed with `failure`.
///
/// Perturbed retries are centred on `first` unless it lies outside the
/// residual domain, in which case they are centred on the pre-merger state.
fn retry<A>(
    attempt: &A,
    failure: MergerError,
    first: DVector<f64>,
    first_in_domain: bool,
    baseline: DVector<f64>,
    policy: &RetryPolicy,
) -> Result<(DVector<f64>, SolveSummary)>
where
    A: Fn(DVector<f64>) -> Result<(DVector<f64>, SolveSummary)>,
{
    match policy {
        RetryPolicy::Never => Err(failure),
        RetryPolicy::BaselineReset => {
            if first == baseline {
                return Err(failure);
            }
            warn!("{failure}; retrying from the pre-merger state");
            attempt(baseline)
        }
        RetryPolicy::Perturbed {
            attempts,
            scale,
            seed,
        } => {
            let centre = if first_in_domain { first } else { baseline };
            let mut last = failure;
            for (index, guess) in Perturbations::new(centre, *scale, *seed)
                .take(*attempts)
                .enumerate()
            {
                warn!("{last}; perturbed retry {} of {attempts}", index + 1);
                match attempt(guess) {
                    Ok(found) => return Ok(found),
                    Err(err) if err.is_recoverable() => last = err,
                    Err(err) => return Err(err),
                }
            }
            Err(last)
        }
    }
}
