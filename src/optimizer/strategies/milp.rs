//! LP backend on top of good_lp
//!
//! The assembled problem is translated row by row: `Between` relations turn
//! into two rows (one when the upper bound is infinite), variable bounds map
//! to good_lp variable definitions. The solve runs on the blocking pool under
//! a tokio timeout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::SolverAdapter;
use crate::error::SolverError;
use crate::optimizer::{AssembledProblem, SolveOutcome};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverType {
    /// Pure Rust simplex, always available with `optimization`
    #[default]
    Minilp,
    /// HiGHS, requires the `highs` feature
    Highs,
}

pub struct GoodLpSolver {
    solver_type: SolverType,
}

impl Default for GoodLpSolver {
    fn default() -> Self {
        Self::new(SolverType::Minilp)
    }
}

impl GoodLpSolver {
    pub fn new(solver_type: SolverType) -> Self {
        Self { solver_type }
    }
}

#[async_trait]
impl SolverAdapter for GoodLpSolver {
    async fn solve(&self, problem: Arc<AssembledProblem>, timeout: Duration) -> Result<SolveOutcome, SolverError> {
        if problem.constraints.is_empty() {
            return Err(SolverError::EmptyProblem);
        }
        let solver_type = self.solver_type;
        let build_id = problem.id;
        tracing::debug!(
            %build_id,
            backend = ?solver_type,
            variables = problem.variables.len(),
            rows = problem.constraints.len(),
            "starting LP solve"
        );

        let task = tokio::task::spawn_blocking(move || lp::solve_blocking(&problem, solver_type));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(SolverError::Backend(format!("solver task failed: {}", join))),
            Err(_) => {
                tracing::warn!(%build_id, ?timeout, "LP solve timed out");
                Err(SolverError::Timeout(timeout))
            }
        }
    }
}

#[cfg(feature = "optimization")]
mod lp {
    use good_lp::constraint::{eq, geq, leq};
    use good_lp::{
        variable, Expression, ProblemVariables, ResolutionError, Solution as _, SolverModel, Variable,
    };

    use super::SolverType;
    use crate::error::SolverError;
    use crate::optimizer::{AssembledProblem, LinearExpr, Relation, SolveOutcome, Solution};

    pub(super) fn solve_blocking(problem: &AssembledProblem, solver_type: SolverType) -> Result<SolveOutcome, SolverError> {
        let mut vars = ProblemVariables::new();
        let columns: Vec<Variable> = problem
            .variables
            .decls()
            .iter()
            .map(|decl| {
                let mut def = variable();
                if decl.bounds.lower.is_finite() {
                    def = def.min(decl.bounds.lower);
                }
                if decl.bounds.upper.is_finite() {
                    def = def.max(decl.bounds.upper);
                }
                vars.add(def)
            })
            .collect();

        let objective = expression(&problem.objective, &columns);
        let rows = rows(problem, &columns);

        let result = match solver_type {
            SolverType::Minilp => run(vars.minimise(objective).using(good_lp::solvers::minilp::minilp), rows, &columns),
            #[cfg(feature = "highs")]
            SolverType::Highs => run(vars.minimise(objective).using(good_lp::solvers::highs::highs), rows, &columns),
            #[cfg(not(feature = "highs"))]
            SolverType::Highs => return Err(SolverError::Unavailable),
        };

        match result {
            Ok(values) => {
                let mut solution = Solution::new(values, 0.0);
                solution.objective = problem.objective.evaluate(&solution);
                Ok(SolveOutcome::Solved(solution))
            }
            Err(ResolutionError::Infeasible) => Ok(SolveOutcome::Infeasible),
            Err(ResolutionError::Unbounded) => Ok(SolveOutcome::Unbounded),
            Err(other) => Err(SolverError::Backend(other.to_string())),
        }
    }

    fn run<M>(mut model: M, rows: Vec<good_lp::Constraint>, columns: &[Variable]) -> Result<Vec<f64>, ResolutionError>
    where
        M: SolverModel<Error = ResolutionError>,
    {
        for row in rows {
            model = model.with(row);
        }
        let solution = model.solve()?;
        Ok(columns.iter().map(|&v| solution.value(v)).collect())
    }

    fn expression(expr: &LinearExpr, columns: &[Variable]) -> Expression {
        let mut out = Expression::with_capacity(expr.terms.len());
        for &(handle, coefficient) in &expr.terms {
            out += coefficient * columns[handle.index()];
        }
        out += expr.constant;
        out
    }

    fn rows(problem: &AssembledProblem, columns: &[Variable]) -> Vec<good_lp::Constraint> {
        let mut rows = Vec::with_capacity(problem.constraints.len());
        for constraint in &problem.constraints {
            let lhs = expression(&constraint.expr, columns);
            match constraint.relation {
                Relation::Eq(rhs) => rows.push(eq(lhs, rhs)),
                Relation::Le(rhs) => rows.push(leq(lhs, rhs)),
                Relation::Ge(rhs) => rows.push(geq(lhs, rhs)),
                Relation::Between { lower, upper } => {
                    if upper.is_finite() {
                        rows.push(leq(lhs.clone(), upper));
                    }
                    if lower.is_finite() {
                        rows.push(geq(lhs, lower));
                    }
                }
            }
        }
        rows
    }
}

#[cfg(not(feature = "optimization"))]
mod lp {
    use super::SolverType;
    use crate::error::SolverError;
    use crate::optimizer::{AssembledProblem, SolveOutcome};

    pub(super) fn solve_blocking(_problem: &AssembledProblem, _solver_type: SolverType) -> Result<SolveOutcome, SolverError> {
        Err(SolverError::Unavailable)
    }
}
