//! Solver backends
//!
//! The model layer only sees [`SolverAdapter`]. The good_lp backend lives in
//! [`milp`]; tests substitute a mock.

pub mod milp;

pub use milp::*;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{AssembledProblem, SolveOutcome};
use crate::error::SolverError;

/// External LP solver.
///
/// Infeasible and unbounded problems are outcomes, not errors. Errors are
/// reserved for backend failures and timeouts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SolverAdapter: Send + Sync {
    async fn solve(&self, problem: Arc<AssembledProblem>, timeout: Duration) -> Result<SolveOutcome, SolverError>;
}
