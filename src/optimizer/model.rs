//! Build and solve entry points
//!
//! ParameterStore → IndexSets → DecisionVariableRegistry →
//! StorageConstraintModule → ModelAssembler → SolverAdapter

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{
    AssembledProblem, ConstraintSink, CostModule, DecisionVariableRegistry, ModelAssembler, SolveOutcome, Solution,
    SolverAdapter, StorageConstraintModule, VariableKind,
};
use crate::domain::{IndexSets, ParameterStore, StoragePair, TimestepSequence};
use crate::error::{ModelError, SolverError};

const LARGE_HORIZON_STEPS: usize = 8761;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Generate per-pair batches on the rayon pool
    pub parallel: bool,
    /// `(offset, length)` window into the horizon
    pub window: Option<(usize, usize)>,
}

/// Builds the storage block and returns the assembler, so sibling
/// subsystems can still add their constraints before [`ModelAssembler::assemble`].
///
/// Every validation happens before the first constraint exists. An error
/// means nothing was assembled.
pub fn build_assembler(
    params: &ParameterStore,
    timesteps: TimestepSequence,
    options: BuildOptions,
) -> Result<ModelAssembler, ModelError> {
    params.validate()?;

    let timesteps = match options.window {
        Some((offset, length)) => timesteps.window(offset, length)?,
        None => timesteps,
    };
    if timesteps.len() > LARGE_HORIZON_STEPS {
        warn!(steps = timesteps.len(), "horizon longer than one hourly year");
    }

    let sets = IndexSets::from_store(params, timesteps);
    let mut vars = DecisionVariableRegistry::new();
    vars.declare_storage(&sets)?;

    let module = StorageConstraintModule::new(&sets, params, &vars)?;
    let constraints = if options.parallel {
        let sink = ConstraintSink::new();
        module.generate_into(&sink)?;
        sink.into_sorted()
    } else {
        module.generate()?
    };
    let objective = CostModule::new(&sets, params, &vars).objective()?;

    info!(
        pairs = sets.pairs().len(),
        timesteps = sets.timesteps().len(),
        constraints = constraints.len(),
        parallel = options.parallel,
        "built storage block"
    );

    let mut assembler = ModelAssembler::new(vars);
    assembler.add_storage(constraints);
    assembler.add_objective(objective);
    Ok(assembler)
}

/// Builds and assembles a storage-only problem
pub fn build(
    params: &ParameterStore,
    timesteps: TimestepSequence,
    options: BuildOptions,
) -> Result<AssembledProblem, ModelError> {
    Ok(build_assembler(params, timesteps, options)?.assemble())
}

/// Hands the problem to the solver exactly once. Consuming the problem
/// keeps it from being solved twice or altered after a timeout.
pub async fn solve(
    problem: AssembledProblem,
    solver: &dyn SolverAdapter,
    timeout: Duration,
) -> Result<(Arc<AssembledProblem>, SolveOutcome), SolverError> {
    if problem.constraints.is_empty() {
        return Err(SolverError::EmptyProblem);
    }
    let problem = Arc::new(problem);
    let outcome = solver.solve(Arc::clone(&problem), timeout).await?;
    match &outcome {
        SolveOutcome::Solved(solution) => {
            info!(build_id = %problem.id, objective = solution.objective, "problem solved")
        }
        SolveOutcome::Infeasible => warn!(build_id = %problem.id, "problem infeasible"),
        SolveOutcome::Unbounded => warn!(build_id = %problem.id, "problem unbounded"),
    }
    Ok((problem, outcome))
}

/// Design and boundary values of one storage pair in a solution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageResult {
    pub pair: StoragePair,
    pub power: f64,
    pub capacity: f64,
    pub new_power: f64,
    pub new_capacity: f64,
    pub initial_content: f64,
    pub final_content: f64,
}

impl StorageResult {
    pub fn final_soc(&self) -> Option<f64> {
        (self.capacity > 0.0).then(|| self.final_content / self.capacity)
    }

    /// One result per pair, in pair order
    pub fn collect(problem: &AssembledProblem, solution: &Solution) -> Vec<StorageResult> {
        let decls = problem.variables.decls();
        let first = decls.iter().find_map(|d| d.index.timestep);
        let last = decls.iter().rev().find_map(|d| d.index.timestep);

        let mut pairs: Vec<&StoragePair> = decls.iter().map(|d| &d.index.pair).collect();
        pairs.sort();
        pairs.dedup();

        let read = |kind, pair: &StoragePair, t| {
            problem
                .handle(kind, pair, t)
                .map(|h| solution.value(h))
                .unwrap_or(0.0)
        };

        pairs
            .into_iter()
            .map(|pair| StorageResult {
                pair: pair.clone(),
                power: read(VariableKind::Power, pair, None),
                capacity: read(VariableKind::Capacity, pair, None),
                new_power: read(VariableKind::PowerNew, pair, None),
                new_capacity: read(VariableKind::CapacityNew, pair, None),
                initial_content: read(VariableKind::Content, pair, first),
                final_content: read(VariableKind::Content, pair, last),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StorageParameters;
    use crate::optimizer::{ConstraintKind, MockSolverAdapter};

    fn store() -> ParameterStore {
        ParameterStore::new(1.0)
            .unwrap()
            .with_storage(StoragePair::new("A", "Battery"), StorageParameters::fixed(10.0, 100.0, 0.5))
            .unwrap()
    }

    #[test]
    fn test_build_is_idempotent() {
        let first = build(&store(), TimestepSequence::hourly(5), BuildOptions::default()).unwrap();
        let second = build(&store(), TimestepSequence::hourly(5), BuildOptions::default()).unwrap();
        assert!(first.same_structure(&second));
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_parallel_build_matches_sequential() {
        let parallel = BuildOptions {
            parallel: true,
            window: None,
        };
        let a = build(&store(), TimestepSequence::hourly(5), BuildOptions::default()).unwrap();
        let b = build(&store(), TimestepSequence::hourly(5), parallel).unwrap();
        assert!(a.same_structure(&b));
    }

    #[test]
    fn test_window_is_applied() {
        let options = BuildOptions {
            parallel: false,
            window: Some((2, 3)),
        };
        let problem = build(&store(), TimestepSequence::hourly(10), options).unwrap();
        assert_eq!(problem.summary().get(ConstraintKind::State.tag()), Some(&3));
    }

    #[test]
    fn test_invalid_parameters_abort_build() {
        let mut params = StorageParameters::fixed(10.0, 100.0, 0.5);
        params.eff_in = 0.0;
        let store = ParameterStore::new(1.0)
            .unwrap()
            .with_storage(StoragePair::new("A", "Battery"), params)
            .unwrap();
        let err = build(&store, TimestepSequence::hourly(2), BuildOptions::default()).unwrap_err();
        assert!(matches!(err, ModelError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_solve_calls_solver_once_and_propagates_infeasible() {
        let problem = build(&store(), TimestepSequence::hourly(2), BuildOptions::default()).unwrap();
        let mut solver = MockSolverAdapter::new();
        solver
            .expect_solve()
            .times(1)
            .returning(|_, _| Ok(SolveOutcome::Infeasible));

        let (_, outcome) = solve(problem, &solver, Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome, SolveOutcome::Infeasible);
    }

    #[tokio::test]
    async fn test_solver_timeout_surfaces_unchanged() {
        let problem = build(&store(), TimestepSequence::hourly(2), BuildOptions::default()).unwrap();
        let mut solver = MockSolverAdapter::new();
        solver
            .expect_solve()
            .times(1)
            .returning(|_, timeout| Err(SolverError::Timeout(timeout)));

        let err = solve(problem, &solver, Duration::from_millis(5)).await.unwrap_err();
        assert_eq!(err, SolverError::Timeout(Duration::from_millis(5)));
    }

    #[tokio::test]
    async fn test_empty_problem_is_not_solved() {
        let problem = ModelAssembler::new(DecisionVariableRegistry::new()).assemble();
        let mut solver = MockSolverAdapter::new();
        solver.expect_solve().times(0);
        let err = solve(problem, &solver, Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err, SolverError::EmptyProblem);
    }

    #[test]
    fn test_collect_results() {
        let problem = build(&store(), TimestepSequence::hourly(2), BuildOptions::default()).unwrap();
        let pair = StoragePair::new("A", "Battery");
        let mut solution = Solution::new(vec![0.0; problem.variables.len()], 0.0);
        solution.set(problem.handle(VariableKind::Capacity, &pair, None).unwrap(), 100.0);
        solution.set(
            problem
                .handle(VariableKind::Content, &pair, Some(crate::domain::Timestep(2)))
                .unwrap(),
            60.0,
        );

        let results = StorageResult::collect(&problem, &solution);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].capacity, 100.0);
        assert_eq!(results[0].final_soc(), Some(0.6));
    }
}
