//! PCAIDS merger simulation for differentiated-products oligopolies.
//!
//! Given baseline market shares, one observed own-elasticity, and the market
//! elasticity, this crate calibrates a proportionally-calibrated AIDS demand
//! system and solves for the post-merger equilibrium: merging firms maximise
//! joint profit, everyone else keeps pricing on their own. It offers tools to
//!
//! - register firms and the merger partition (`firms` module),
//! - calibrate the demand coefficients in closed form (`calibration` module),
//! - formulate and solve the nonlinear equilibrium system (`formulation`,
//!   `layout`, and `solving` modules),
//! - trace comparative statics over merger efficiency gains (`sweep` module).
//!
//! Every solve is a pure function of an immutable calibration, the partition,
//! and a gain vector; a solve either converges as a whole or reports a
//! convergence error. Sweeps record failed points and carry on.
//!
//! # Quick start
//!
//! ```no_run
//! use merger_sim::calibration::Calibration;
//! use merger_sim::firms::FirmRegistry;
//! use merger_sim::sweep::linspace;
//! use merger_sim::{MergerSimulation, SimulationOptions};
//!
//! let registry = FirmRegistry::new(vec!["firm1", "firm2", "firm3"], &["firm1", "firm2"])
//!     .expect("valid merger");
//! let calibration = Calibration::builder(&registry)
//!     .shares([("firm1", 0.2), ("firm2", 0.3), ("firm3", 0.5)])
//!     .reference_elasticity("firm1", -3.0)
//!     .market_elasticity(-1.0)
//!     .calibrate()
//!     .expect("well-posed calibration");
//!
//! let simulation = MergerSimulation::new(registry, calibration).expect("matching firms");
//! let options = SimulationOptions::default();
//!
//! let merger = simulation.solve_merger(&options).expect("converged");
//! println!("Price changes: {:?}", merger.price_changes());
//!
//! let sweep = simulation.sweep(&linspace(-0.5, 0.5, 101), &options).expect("valid gains");
//! for trajectory in sweep.trajectories(simulation.registry()) {
//!     println!("{}: {:?}", trajectory.firm, trajectory.price_changes);
//! }
//! ```

pub mod calibration;
pub mod equilibrium;
pub mod error;
pub mod firms;
pub mod formulation;
pub mod layout;
pub mod options;
pub mod retry;
pub mod simulation;
pub mod solving;
pub mod sweep;

pub use calibration::{calibrate, Calibration};
pub use equilibrium::{solve_equilibrium, EquilibriumSolution, FirmOutcome};
pub use error::{ConvergenceFailure, ErrorKind, MergerError, Result};
pub use firms::{FirmRegistry, MergerPartition};
pub use formulation::{EfficiencyConvention, EquilibriumSystem};
pub use layout::{EquilibriumState, UnknownLayout};
pub use options::{SimulationOptions, SweepOptions, SweepStrategy};
pub use retry::RetryPolicy;
pub use simulation::MergerSimulation;
pub use solving::{SolveSummary, SolverOptions};
pub use sweep::{sweep, FirmTrajectory, SweepPoint, SweepResult};
