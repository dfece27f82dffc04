use itertools::Itertools;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{Constraint, DecisionVariableRegistry, LinearExpr, VarIndex, VariableHandle, VariableKind};
use crate::domain::{StoragePair, Timestep};

/// Collects constraint batches from concurrent generators.
///
/// Appends are serialised by one lock; draining sorts by (pair, timestep,
/// rule) so the arrival order of batches never shows in the result.
#[derive(Debug, Default)]
pub struct ConstraintSink {
    inner: Mutex<Vec<Constraint>>,
}

impl ConstraintSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, batch: Vec<Constraint>) {
        self.inner.lock().extend(batch);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn into_sorted(self) -> Vec<Constraint> {
        let mut constraints = self.inner.into_inner();
        constraints.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        constraints
    }
}

/// Merges storage constraints with those of sibling subsystems into one
/// problem.
pub struct ModelAssembler {
    variables: DecisionVariableRegistry,
    storage: Vec<Constraint>,
    external: Vec<Constraint>,
    objective: LinearExpr,
}

impl ModelAssembler {
    pub fn new(variables: DecisionVariableRegistry) -> Self {
        Self {
            variables,
            storage: Vec::new(),
            external: Vec::new(),
            objective: LinearExpr::new(),
        }
    }

    pub fn variables(&self) -> &DecisionVariableRegistry {
        &self.variables
    }

    pub fn add_storage(&mut self, constraints: Vec<Constraint>) {
        self.storage.extend(constraints);
    }

    /// Adds a constraint owned by another subsystem (demand balance, fixed
    /// flows, ...). External constraints keep their insertion order and
    /// follow the storage block.
    pub fn add_external(&mut self, constraint: Constraint) {
        self.external.push(constraint);
    }

    pub fn add_objective(&mut self, expr: LinearExpr) {
        self.objective.extend(expr);
    }

    pub fn assemble(self) -> AssembledProblem {
        let mut constraints = self.storage;
        constraints.extend(self.external);
        let problem = AssembledProblem {
            id: Uuid::new_v4(),
            variables: self.variables,
            constraints,
            objective: self.objective,
        };
        tracing::info!(
            build_id = %problem.id,
            variables = problem.variables.len(),
            constraints = problem.constraints.len(),
            "assembled optimisation problem"
        );
        problem
    }
}

/// Immutable minimisation problem handed to a solver
#[derive(Debug, Clone)]
pub struct AssembledProblem {
    pub id: Uuid,
    pub variables: DecisionVariableRegistry,
    pub constraints: Vec<Constraint>,
    pub objective: LinearExpr,
}

impl AssembledProblem {
    /// Constraint counts per rule tag, in tag order
    pub fn summary(&self) -> BTreeMap<&'static str, usize> {
        self.constraints.iter().map(Constraint::tag).counts().into_iter().collect()
    }

    /// Diagnostic label of row `row`, e.g. `storage_state[Node_1,Battery,3]`
    pub fn row_label(&self, row: usize) -> Option<String> {
        self.constraints.get(row).map(ToString::to_string)
    }

    pub fn handle(&self, kind: VariableKind, pair: &StoragePair, timestep: Option<Timestep>) -> Option<VariableHandle> {
        let index = match timestep {
            Some(t) => VarIndex::at(pair, t),
            None => VarIndex::pair(pair),
        };
        self.variables.handle(kind, &index)
    }

    /// Structural equality: same variables, same rows in the same order,
    /// same objective. The build id is ignored.
    pub fn same_structure(&self, other: &AssembledProblem) -> bool {
        self.variables.decls() == other.variables.decls()
            && self.constraints == other.constraints
            && self.objective == other.objective
    }
}
