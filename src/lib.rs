//! Storage subsystem of a linear energy-system optimisation model.
//!
//! Declares storage decision variables, generates the storage constraint
//! block and its cost terms, and hands the assembled problem to an LP solver.

pub mod config;
pub mod domain;
pub mod error;
pub mod optimizer;
pub mod telemetry;

pub use error::{Location, ModelError, SolverError};
