use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{EnumIter, IntoStaticStr};

use crate::domain::{StoragePair, Timestep};

// ============================================================================
// Variables
// ============================================================================

/// Families of decision variables owned by the storage subsystem
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumIter, IntoStaticStr,
)]
pub enum VariableKind {
    /// `ε_con[v,s,t]`, stored energy
    #[strum(serialize = "e_sto_con")]
    Content,
    /// `ε_in[v,s,t]`, charging power
    #[strum(serialize = "e_sto_in")]
    Input,
    /// `ε_out[v,s,t]`, discharging power
    #[strum(serialize = "e_sto_out")]
    Output,
    /// `κ_p[v,s]`, total power
    #[strum(serialize = "cap_sto_p")]
    Power,
    /// `κ_c[v,s]`, total capacity
    #[strum(serialize = "cap_sto_c")]
    Capacity,
    /// `κ̂_p[v,s]`, newly built power
    #[strum(serialize = "cap_sto_p_new")]
    PowerNew,
    /// `κ̂_c[v,s]`, newly built capacity
    #[strum(serialize = "cap_sto_c_new")]
    CapacityNew,
}

impl VariableKind {
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn is_time_indexed(self) -> bool {
        matches!(self, VariableKind::Content | VariableKind::Input | VariableKind::Output)
    }
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Index of one variable: a pair and, for time-indexed families, a step
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarIndex {
    pub pair: StoragePair,
    pub timestep: Option<Timestep>,
}

impl VarIndex {
    pub fn pair(pair: &StoragePair) -> Self {
        Self {
            pair: pair.clone(),
            timestep: None,
        }
    }

    pub fn at(pair: &StoragePair, timestep: Timestep) -> Self {
        Self {
            pair: pair.clone(),
            timestep: Some(timestep),
        }
    }
}

impl fmt::Display for VarIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timestep {
            Some(t) => write!(f, "[{},{}]", self.pair, t),
            None => write!(f, "[{}]", self.pair),
        }
    }
}

/// Stable handle of a declared variable, usable as a map key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariableHandle(pub(crate) usize);

impl VariableHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariableBounds {
    pub lower: f64,
    pub upper: f64,
}

impl Default for VariableBounds {
    fn default() -> Self {
        Self::non_negative()
    }
}

impl VariableBounds {
    pub fn non_negative() -> Self {
        Self {
            lower: 0.0,
            upper: f64::INFINITY,
        }
    }

    pub fn with_upper(mut self, upper: f64) -> Self {
        self.upper = upper;
        self
    }

    pub fn with_lower(mut self, lower: f64) -> Self {
        self.lower = lower;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDecl {
    pub kind: VariableKind,
    pub index: VarIndex,
    pub bounds: VariableBounds,
}

// ============================================================================
// Expressions and constraints
// ============================================================================

/// `Σ coef·var + constant`. Terms keep insertion order so two builds of the
/// same data produce identical encodings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearExpr {
    pub terms: Vec<(VariableHandle, f64)>,
    pub constant: f64,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn term(mut self, var: VariableHandle, coefficient: f64) -> Self {
        self.add_term(var, coefficient);
        self
    }

    pub fn add_term(&mut self, var: VariableHandle, coefficient: f64) {
        if coefficient != 0.0 {
            self.terms.push((var, coefficient));
        }
    }

    pub fn extend(&mut self, other: LinearExpr) {
        self.terms.extend(other.terms);
        self.constant += other.constant;
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.constant == 0.0
    }

    pub fn coefficient(&self, var: VariableHandle) -> f64 {
        self.terms.iter().filter(|(v, _)| *v == var).map(|(_, c)| c).sum()
    }

    pub fn evaluate(&self, solution: &Solution) -> f64 {
        self.terms
            .iter()
            .map(|(var, coefficient)| coefficient * solution.value(*var))
            .sum::<f64>()
            + self.constant
    }
}

/// Right-hand side of a constraint `expr ⋈ rhs`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Relation {
    Eq(f64),
    Le(f64),
    Ge(f64),
    /// `lower ≤ expr ≤ upper`; `upper` may be `+inf`
    Between { lower: f64, upper: f64 },
}

impl Relation {
    /// Amount by which `value` violates the relation (0 when satisfied)
    pub fn violation(&self, value: f64) -> f64 {
        match *self {
            Relation::Eq(rhs) => (value - rhs).abs(),
            Relation::Le(rhs) => (value - rhs).max(0.0),
            Relation::Ge(rhs) => (rhs - value).max(0.0),
            Relation::Between { lower, upper } => (lower - value).max(value - upper).max(0.0),
        }
    }
}

/// Rule that produced a constraint. Declaration order is the order rules
/// appear within one (pair, timestep) group.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumIter, IntoStaticStr,
)]
pub enum ConstraintKind {
    #[strum(serialize = "storage_power")]
    PowerDecomposition,
    #[strum(serialize = "storage_capacity")]
    CapacityDecomposition,
    #[strum(serialize = "storage_power_bounds")]
    PowerBounds,
    #[strum(serialize = "storage_capacity_bounds")]
    CapacityBounds,
    #[strum(serialize = "storage_energy_power_ratio")]
    EnergyPowerRatio,
    #[strum(serialize = "storage_initial")]
    InitialState,
    #[strum(serialize = "storage_state")]
    State,
    #[strum(serialize = "storage_input_by_power")]
    InputByPower,
    #[strum(serialize = "storage_output_by_power")]
    OutputByPower,
    #[strum(serialize = "storage_content_by_capacity")]
    ContentByCapacity,
    #[strum(serialize = "storage_final")]
    FinalState,
    /// Supplied by a sibling subsystem through the assembler
    #[strum(serialize = "external")]
    External,
}

impl ConstraintKind {
    pub fn tag(self) -> &'static str {
        self.into()
    }

    /// Whether the rule is generated once per timestep
    pub fn is_time_indexed(self) -> bool {
        matches!(
            self,
            ConstraintKind::InitialState
                | ConstraintKind::State
                | ConstraintKind::InputByPower
                | ConstraintKind::OutputByPower
                | ConstraintKind::ContentByCapacity
                | ConstraintKind::FinalState
        )
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Timestep together with its position in the horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepRef {
    pub position: usize,
    pub label: Timestep,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintScope {
    Storage {
        pair: StoragePair,
        step: Option<StepRef>,
    },
    External {
        label: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub scope: ConstraintScope,
    pub expr: LinearExpr,
    pub relation: Relation,
}

impl Constraint {
    pub fn storage(
        kind: ConstraintKind,
        pair: &StoragePair,
        step: Option<StepRef>,
        expr: LinearExpr,
        relation: Relation,
    ) -> Self {
        Self {
            kind,
            scope: ConstraintScope::Storage {
                pair: pair.clone(),
                step,
            },
            expr,
            relation,
        }
    }

    pub fn external(label: impl Into<String>, expr: LinearExpr, relation: Relation) -> Self {
        Self {
            kind: ConstraintKind::External,
            scope: ConstraintScope::External { label: label.into() },
            expr,
            relation,
        }
    }

    pub fn tag(&self) -> &'static str {
        self.kind.tag()
    }

    pub fn pair(&self) -> Option<&StoragePair> {
        match &self.scope {
            ConstraintScope::Storage { pair, .. } => Some(pair),
            ConstraintScope::External { .. } => None,
        }
    }

    pub fn timestep(&self) -> Option<Timestep> {
        match &self.scope {
            ConstraintScope::Storage { step, .. } => step.map(|s| s.label),
            ConstraintScope::External { .. } => None,
        }
    }

    /// Ordering key for storage constraints: pair, then position in the
    /// horizon (pair-level rules first), then rule.
    pub fn sort_key(&self) -> (Option<&StoragePair>, Option<usize>, ConstraintKind) {
        match &self.scope {
            ConstraintScope::Storage { pair, step } => (Some(pair), step.map(|s| s.position), self.kind),
            ConstraintScope::External { .. } => (None, None, self.kind),
        }
    }

    pub fn residual(&self, solution: &Solution) -> f64 {
        self.relation.violation(self.expr.evaluate(solution))
    }

    pub fn is_satisfied(&self, solution: &Solution, tolerance: f64) -> bool {
        self.residual(solution) <= tolerance
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            ConstraintScope::Storage { pair, step: Some(step) } => {
                write!(f, "{}[{},{}]", self.tag(), pair, step.label)
            }
            ConstraintScope::Storage { pair, step: None } => write!(f, "{}[{}]", self.tag(), pair),
            ConstraintScope::External { label } => write!(f, "{}[{}]", self.tag(), label),
        }
    }
}

// ============================================================================
// Solutions
// ============================================================================

/// Variable assignment returned by a solver, indexed by handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    values: Vec<f64>,
    pub objective: f64,
}

impl Solution {
    pub fn new(values: Vec<f64>, objective: f64) -> Self {
        Self { values, objective }
    }

    /// Value of a variable; handles outside the assignment read as 0
    pub fn value(&self, var: VariableHandle) -> f64 {
        self.values.get(var.0).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, var: VariableHandle, value: f64) {
        if var.0 >= self.values.len() {
            self.values.resize(var.0 + 1, 0.0);
        }
        self.values[var.0] = value;
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// Result of a completed solve
#[derive(Debug, Clone, PartialEq)]
pub enum SolveOutcome {
    Solved(Solution),
    Infeasible,
    Unbounded,
}

impl SolveOutcome {
    pub fn solution(&self) -> Option<&Solution> {
        match self {
            SolveOutcome::Solved(solution) => Some(solution),
            _ => None,
        }
    }
}
