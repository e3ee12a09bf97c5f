//! Comparative statics: re-solving the merger equilibrium across efficiency gains.

use log::{debug, info, warn};
use nalgebra::DVector;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;
use crate::equilibrium::{solve_equilibrium, EquilibriumSolution};
use crate::error::{MergerError, Result};
use crate::firms::{FirmRegistry, MergerPartition};
use crate::formulation::EquilibriumSystem;
use crate::layout::EquilibriumState;
use crate::options::{SimulationOptions, SweepStrategy};

/// Outcome of the sweep at one gain value.
#[derive(Clone, Debug)]
pub struct SweepPoint {
    gain: f64,
    outcome: Result<EquilibriumSolution>,
}

impl SweepPoint {
    /// Efficiency gain applied to every merging firm.
    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// The solution, or the convergence error recorded for this point.
    pub fn outcome(&self) -> &Result<EquilibriumSolution> {
        &self.outcome
    }

    /// The solution, if this point converged.
    pub fn solution(&self) -> Option<&EquilibriumSolution> {
        self.outcome.as_ref().ok()
    }

    /// Whether the solve at this gain converged.
    pub fn is_converged(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Ordered sweep outcomes, one per input gain, in input order.
#[derive(Clone, Debug)]
pub struct SweepResult {
    points: Vec<SweepPoint>,
}

impl SweepResult {
    /// Every point, in the order the gains were given.
    pub fn points(&self) -> &[SweepPoint] {
        &self.points
    }

    /// Number of points, converged or not.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the sweep was run over no gains.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Converged points with their gain values.
    pub fn converged(&self) -> impl Iterator<Item = (f64, &EquilibriumSolution)> {
        self.points
            .iter()
            .filter_map(|point| point.solution().map(|solution| (point.gain, solution)))
    }

    /// Failed points with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (f64, &MergerError)> {
        self.points
            .iter()
            .filter_map(|point| point.outcome.as_ref().err().map(|err| (point.gain, err)))
    }

    /// Per-firm series of share, margin, and price change over the converged points.
    pub fn trajectories(&self, registry: &FirmRegistry) -> Vec<FirmTrajectory> {
        let partition = registry.partition();
        (0..registry.firm_count())
            .map(|f| {
                let mut trajectory = FirmTrajectory {
                    firm: registry.name(f).to_string(),
                    merging: partition.is_merging(f),
                    gains: Vec::new(),
                    shares: Vec::new(),
                    margins: Vec::new(),
                    price_changes: Vec::new(),
                };
                for (gain, solution) in self.converged() {
                    trajectory.gains.push(gain);
                    trajectory.shares.push(solution.shares()[f]);
                    trajectory.margins.push(solution.margins()[f]);
                    trajectory.price_changes.push(solution.price_changes()[f]);
                }
                trajectory
            })
            .collect()
    }
}

/// Comparative-statics series for a single firm.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FirmTrajectory {
    /// Firm identifier.
    pub firm: String,
    /// Whether the firm is party to the merger.
    pub merging: bool,
    /// Gains of the converged points, ascending.
    pub gains: Vec<f64>,
    /// Post-merger share at each gain.
    pub shares: Vec<f64>,
    /// Post-merger margin at each gain.
    pub margins: Vec<f64>,
    /// Price change at each gain.
    pub price_changes: Vec<f64>,
}

/// Solves the merger equilibrium for each gain, applying the gain uniformly to merging firms.
///
/// Points are evaluated in ascending gain order and reported in input order.
/// A point that fails to converge is recorded and the sweep moves on;
/// configuration problems abort the whole sweep.
pub fn sweep(
    calibration: &Calibration,
    partition: &MergerPartition,
    gains: &[f64],
    options: &SimulationOptions,
) -> Result<SweepResult> {
    if let Some(position) = gains.iter().position(|gain| !gain.is_finite()) {
        return Err(MergerError::NonFiniteGain {
            position,
            gain: gains[position],
        });
    }
    let n = partition.firm_count();
    EquilibriumSystem::new(calibration, partition, DVector::zeros(n), options.efficiency)?;

    let uniform = |gain: f64| {
        DVector::from_fn(n, |f, _| if partition.is_merging(f) { gain } else { 0.0 })
    };
    let solve_point = |gain: f64, guess: Option<&EquilibriumState>| {
        let outcome = solve_equilibrium(calibration, partition, uniform(gain), guess, options);
        match &outcome {
            Ok(solution) => debug!(
                "sweep point {gain}: converged in {} iterations",
                solution.summary().iterations
            ),
            Err(err) => warn!("sweep point {gain}: {err}"),
        }
        SweepPoint { gain, outcome }
    };

    let points = match options.sweep.strategy {
        SweepStrategy::ParallelBaseline => gains
            .par_iter()
            .map(|&gain| solve_point(gain, None))
            .collect(),
        strategy => {
            let mut order: Vec<usize> = (0..gains.len()).collect();
            order.sort_by(|&a, &b| gains[a].total_cmp(&gains[b]));

            let mut slots: Vec<Option<SweepPoint>> = (0..gains.len()).map(|_| None).collect();
            let mut warm: Option<EquilibriumState> = None;
            for index in order {
                let point = solve_point(gains[index], warm.as_ref());
                if strategy == SweepStrategy::WarmStart {
                    if let Some(solution) = point.solution() {
                        warm = Some(solution.state().clone());
                    }
                }
                slots[index] = Some(point);
            }
            slots.into_iter().flatten().collect()
        }
    };

    let result = SweepResult { points };
    info!(
        "sweep over {} gains finished: {} converged, {} failed",
        result.len(),
        result.converged().count(),
        result.failures().count()
    );
    Ok(result)
}

/// `count` evenly spaced values from `start` to `end` inclusive.
pub fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (count - 1) as f64;
            (0..count).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Values `start, start + step, ...` strictly below `stop`; empty unless `step > 0`.
pub fn arange(start: f64, stop: f64, step: f64) -> Vec<f64> {
    if !(step > 0.0) || !(stop > start) {
        return Vec::new();
    }
    let count = ((stop - start) / step).ceil() as usize;
    (0..count).map(|i| start + step * i as f64).collect()
}
