//! Storage constraint generation
//!
//! For every valid `(site, storage)` pair this module emits:
//! - `storage_power` / `storage_capacity`: total = installed + new build
//! - `storage_power_bounds` / `storage_capacity_bounds`: design limits
//! - `storage_energy_power_ratio`: only for pairs with a fixed E/P ratio
//! - `storage_initial` at `t_1` (equality) and `storage_final` at `t_N` (`>=`)
//! - `storage_state` on `T_m`, linking content at `t` to content at the
//!   preceding step of the sequence
//! - `storage_input_by_power`, `storage_output_by_power`,
//!   `storage_content_by_capacity` on all of `T`
//!
//! Input and output are bounded by the power rating independently, not by
//! their sum.

use rayon::prelude::*;
use tracing::debug;

use super::{
    Constraint, ConstraintKind, ConstraintSink, DecisionVariableRegistry, LinearExpr, Relation, StepRef,
    VariableKind,
};
use crate::domain::{IndexSets, ParameterStore, StorageParameters, StoragePair, Timestep};
use crate::error::{Location, ModelError};

/// Generates the storage rules over immutable inputs.
///
/// Construction validates every pair up front, so a generator that exists
/// can only fail on a request for an index outside the model.
pub struct StorageConstraintModule<'a> {
    sets: &'a IndexSets,
    params: &'a ParameterStore,
    vars: &'a DecisionVariableRegistry,
}

impl<'a> StorageConstraintModule<'a> {
    pub fn new(
        sets: &'a IndexSets,
        params: &'a ParameterStore,
        vars: &'a DecisionVariableRegistry,
    ) -> Result<Self, ModelError> {
        for pair in sets.pairs() {
            params.get(pair)?.check(pair)?;
        }
        Ok(Self { sets, params, vars })
    }

    /// Builds the constraint of one rule at one index.
    ///
    /// Pair-level rules take `timestep = None`. Returns `Ok(None)` when the
    /// rule does not apply to the pair (no E/P ratio configured).
    pub fn constraint(
        &self,
        kind: ConstraintKind,
        pair: &StoragePair,
        timestep: Option<Timestep>,
    ) -> Result<Option<Constraint>, ModelError> {
        self.sets.require_pair(pair)?;
        let params = self.params.get(pair)?;

        let step = match (kind.is_time_indexed(), timestep) {
            (true, Some(t)) => Some(StepRef {
                position: self.sets.require_timestep(t)?,
                label: t,
            }),
            (false, None) => None,
            (true, None) => {
                return Err(ModelError::configuration(
                    Location::Pair(pair.clone()),
                    format!("{} requires a timestep", kind),
                ))
            }
            (false, Some(t)) => {
                return Err(ModelError::configuration(
                    Location::Timestep(t),
                    format!("{} is not indexed by timestep", kind),
                ))
            }
        };

        match (kind, step) {
            (ConstraintKind::PowerDecomposition, None) => self.power_decomposition(pair, params).map(Some),
            (ConstraintKind::CapacityDecomposition, None) => self.capacity_decomposition(pair, params).map(Some),
            (ConstraintKind::PowerBounds, None) => self.power_bounds(pair, params).map(Some),
            (ConstraintKind::CapacityBounds, None) => self.capacity_bounds(pair, params).map(Some),
            (ConstraintKind::EnergyPowerRatio, None) => self.energy_power_ratio(pair, params),
            (ConstraintKind::InitialState, Some(step)) => {
                if step.position != 0 {
                    return Err(self.misplaced(kind, step, "first"));
                }
                self.initial_state(pair, params, step).map(Some)
            }
            (ConstraintKind::FinalState, Some(step)) => {
                if step.position + 1 != self.sets.timesteps().len() {
                    return Err(self.misplaced(kind, step, "last"));
                }
                self.final_state(pair, params, step).map(Some)
            }
            (ConstraintKind::State, Some(step)) => match self.sets.timesteps().previous(step.label) {
                Some(prev) => self.state(pair, params, step, prev).map(Some),
                None => Err(ModelError::configuration(
                    Location::Timestep(step.label),
                    "storage_state is only defined for timesteps after the first",
                )),
            },
            (ConstraintKind::InputByPower, Some(step)) => self.input_by_power(pair, step).map(Some),
            (ConstraintKind::OutputByPower, Some(step)) => self.output_by_power(pair, step).map(Some),
            (ConstraintKind::ContentByCapacity, Some(step)) => self.content_by_capacity(pair, step).map(Some),
            (ConstraintKind::External, _) => Err(ModelError::configuration(
                Location::Pair(pair.clone()),
                "external constraints are not generated by the storage module",
            )),
            (kind, _) => Err(ModelError::configuration(
                Location::Pair(pair.clone()),
                format!("{} cannot be built at this index", kind),
            )),
        }
    }

    /// All constraints of one pair, already in (timestep, rule) order
    pub fn pair_constraints(&self, pair: &StoragePair) -> Result<Vec<Constraint>, ModelError> {
        self.sets.require_pair(pair)?;
        let params = self.params.get(pair)?;
        let timesteps = self.sets.timesteps();
        let last = timesteps.len() - 1;

        let mut out = Vec::with_capacity(5 + timesteps.len() * 4 + 1);
        out.push(self.power_decomposition(pair, params)?);
        out.push(self.capacity_decomposition(pair, params)?);
        out.push(self.power_bounds(pair, params)?);
        out.push(self.capacity_bounds(pair, params)?);
        if let Some(ratio) = self.energy_power_ratio(pair, params)? {
            out.push(ratio);
        }

        let mut prev: Option<Timestep> = None;
        for (position, label) in timesteps.iter().enumerate() {
            let step = StepRef { position, label };
            match prev {
                None => out.push(self.initial_state(pair, params, step)?),
                Some(prev) => out.push(self.state(pair, params, step, prev)?),
            }
            out.push(self.input_by_power(pair, step)?);
            out.push(self.output_by_power(pair, step)?);
            out.push(self.content_by_capacity(pair, step)?);
            if position == last {
                out.push(self.final_state(pair, params, step)?);
            }
            prev = Some(label);
        }

        debug!(pair = %pair, constraints = out.len(), "generated storage constraints");
        Ok(out)
    }

    /// Every storage constraint of the model, sequentially, sorted by site,
    /// storage, timestep.
    pub fn generate(&self) -> Result<Vec<Constraint>, ModelError> {
        let mut all = Vec::new();
        for pair in self.sets.pairs() {
            all.extend(self.pair_constraints(pair)?);
        }
        Ok(all)
    }

    /// Generates pairs concurrently into `sink`. The sink restores the
    /// deterministic order when drained.
    pub fn generate_into(&self, sink: &ConstraintSink) -> Result<(), ModelError> {
        let pairs: Vec<&StoragePair> = self.sets.pairs().iter().collect();
        pairs.par_iter().try_for_each(|pair| {
            let batch = self.pair_constraints(pair)?;
            sink.append(batch);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Rules
    // ------------------------------------------------------------------

    /// `ε_con[t] − (1−d)·ε_con[t−1] − Δt·e_in·ε_in[t] + (Δt/e_out)·ε_out[t] = 0`
    fn state(
        &self,
        pair: &StoragePair,
        params: &StorageParameters,
        step: StepRef,
        prev: Timestep,
    ) -> Result<Constraint, ModelError> {
        let dt = self.params.dt_hours();
        let expr = LinearExpr::new()
            .term(self.vars.at(VariableKind::Content, pair, step.label)?, 1.0)
            .term(
                self.vars.at(VariableKind::Content, pair, prev)?,
                -(1.0 - params.self_discharge),
            )
            .term(self.vars.at(VariableKind::Input, pair, step.label)?, -dt * params.eff_in)
            .term(self.vars.at(VariableKind::Output, pair, step.label)?, dt / params.eff_out);
        Ok(Constraint::storage(ConstraintKind::State, pair, Some(step), expr, Relation::Eq(0.0)))
    }

    /// `κ_p − κ̂_p = K_p`
    fn power_decomposition(&self, pair: &StoragePair, params: &StorageParameters) -> Result<Constraint, ModelError> {
        let expr = LinearExpr::new()
            .term(self.vars.design(VariableKind::Power, pair)?, 1.0)
            .term(self.vars.design(VariableKind::PowerNew, pair)?, -1.0);
        Ok(Constraint::storage(
            ConstraintKind::PowerDecomposition,
            pair,
            None,
            expr,
            Relation::Eq(params.inst_cap_p),
        ))
    }

    /// `κ_c − κ̂_c = K_c`
    fn capacity_decomposition(&self, pair: &StoragePair, params: &StorageParameters) -> Result<Constraint, ModelError> {
        let expr = LinearExpr::new()
            .term(self.vars.design(VariableKind::Capacity, pair)?, 1.0)
            .term(self.vars.design(VariableKind::CapacityNew, pair)?, -1.0);
        Ok(Constraint::storage(
            ConstraintKind::CapacityDecomposition,
            pair,
            None,
            expr,
            Relation::Eq(params.inst_cap_c),
        ))
    }

    fn input_by_power(&self, pair: &StoragePair, step: StepRef) -> Result<Constraint, ModelError> {
        self.bounded_by(ConstraintKind::InputByPower, VariableKind::Input, VariableKind::Power, pair, step)
    }

    fn output_by_power(&self, pair: &StoragePair, step: StepRef) -> Result<Constraint, ModelError> {
        self.bounded_by(ConstraintKind::OutputByPower, VariableKind::Output, VariableKind::Power, pair, step)
    }

    fn content_by_capacity(&self, pair: &StoragePair, step: StepRef) -> Result<Constraint, ModelError> {
        self.bounded_by(
            ConstraintKind::ContentByCapacity,
            VariableKind::Content,
            VariableKind::Capacity,
            pair,
            step,
        )
    }

    /// `flow[t] − design ≤ 0`
    fn bounded_by(
        &self,
        kind: ConstraintKind,
        flow: VariableKind,
        design: VariableKind,
        pair: &StoragePair,
        step: StepRef,
    ) -> Result<Constraint, ModelError> {
        let expr = LinearExpr::new()
            .term(self.vars.at(flow, pair, step.label)?, 1.0)
            .term(self.vars.design(design, pair)?, -1.0);
        Ok(Constraint::storage(kind, pair, Some(step), expr, Relation::Le(0.0)))
    }

    fn power_bounds(&self, pair: &StoragePair, params: &StorageParameters) -> Result<Constraint, ModelError> {
        let expr = LinearExpr::new().term(self.vars.design(VariableKind::Power, pair)?, 1.0);
        Ok(Constraint::storage(
            ConstraintKind::PowerBounds,
            pair,
            None,
            expr,
            Relation::Between {
                lower: params.cap_lo_p,
                upper: params.cap_up_p,
            },
        ))
    }

    fn capacity_bounds(&self, pair: &StoragePair, params: &StorageParameters) -> Result<Constraint, ModelError> {
        let expr = LinearExpr::new().term(self.vars.design(VariableKind::Capacity, pair)?, 1.0);
        Ok(Constraint::storage(
            ConstraintKind::CapacityBounds,
            pair,
            None,
            expr,
            Relation::Between {
                lower: params.cap_lo_c,
                upper: params.cap_up_c,
            },
        ))
    }

    /// `κ_c − ratio·κ_p = 0`
    fn energy_power_ratio(
        &self,
        pair: &StoragePair,
        params: &StorageParameters,
    ) -> Result<Option<Constraint>, ModelError> {
        let Some(ratio) = params.ep_ratio else {
            return Ok(None);
        };
        let expr = LinearExpr::new()
            .term(self.vars.design(VariableKind::Capacity, pair)?, 1.0)
            .term(self.vars.design(VariableKind::Power, pair)?, -ratio);
        Ok(Some(Constraint::storage(
            ConstraintKind::EnergyPowerRatio,
            pair,
            None,
            expr,
            Relation::Eq(0.0),
        )))
    }

    /// `ε_con[t_1] − I·κ_c = 0`
    fn initial_state(
        &self,
        pair: &StoragePair,
        params: &StorageParameters,
        step: StepRef,
    ) -> Result<Constraint, ModelError> {
        let expr = self.soc_expr(pair, params, step)?;
        Ok(Constraint::storage(ConstraintKind::InitialState, pair, Some(step), expr, Relation::Eq(0.0)))
    }

    /// `ε_con[t_N] − I·κ_c ≥ 0`: the horizon may end fuller than it started,
    /// never emptier.
    fn final_state(
        &self,
        pair: &StoragePair,
        params: &StorageParameters,
        step: StepRef,
    ) -> Result<Constraint, ModelError> {
        let expr = self.soc_expr(pair, params, step)?;
        Ok(Constraint::storage(ConstraintKind::FinalState, pair, Some(step), expr, Relation::Ge(0.0)))
    }

    fn soc_expr(&self, pair: &StoragePair, params: &StorageParameters, step: StepRef) -> Result<LinearExpr, ModelError> {
        Ok(LinearExpr::new()
            .term(self.vars.at(VariableKind::Content, pair, step.label)?, 1.0)
            .term(self.vars.design(VariableKind::Capacity, pair)?, -params.init_soc))
    }

    fn misplaced(&self, kind: ConstraintKind, step: StepRef, expected: &str) -> ModelError {
        ModelError::configuration(
            Location::Timestep(step.label),
            format!("{} only applies to the {} timestep", kind, expected),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{StorageCosts, TimestepSequence};
    use crate::optimizer::Solution;

    fn lossy() -> StorageParameters {
        StorageParameters {
            self_discharge: 0.1,
            eff_in: 0.8,
            eff_out: 0.5,
            inst_cap_p: 10.0,
            inst_cap_c: 100.0,
            cap_lo_p: 0.0,
            cap_up_p: 20.0,
            cap_lo_c: 0.0,
            cap_up_c: f64::INFINITY,
            init_soc: 0.5,
            ep_ratio: None,
            costs: StorageCosts::default(),
        }
    }

    struct Fixture {
        store: ParameterStore,
        sets: IndexSets,
        vars: DecisionVariableRegistry,
    }

    fn fixture(dt: f64, params: StorageParameters, horizon: &[u32]) -> Fixture {
        let store = ParameterStore::new(dt)
            .unwrap()
            .with_storage(StoragePair::new("A", "Battery"), params)
            .unwrap();
        let timesteps = TimestepSequence::new(horizon.iter().copied().map(Timestep)).unwrap();
        let sets = IndexSets::from_store(&store, timesteps);
        let mut vars = DecisionVariableRegistry::new();
        vars.declare_storage(&sets).unwrap();
        Fixture { store, sets, vars }
    }

    #[test]
    fn test_state_rule_coefficients() {
        let f = fixture(0.5, lossy(), &[0, 1, 2]);
        let module = StorageConstraintModule::new(&f.sets, &f.store, &f.vars).unwrap();
        let pair = StoragePair::new("A", "Battery");

        let c = module
            .constraint(ConstraintKind::State, &pair, Some(Timestep(2)))
            .unwrap()
            .unwrap();
        let con_t = f.vars.at(VariableKind::Content, &pair, Timestep(2)).unwrap();
        let con_prev = f.vars.at(VariableKind::Content, &pair, Timestep(1)).unwrap();
        let input = f.vars.at(VariableKind::Input, &pair, Timestep(2)).unwrap();
        let output = f.vars.at(VariableKind::Output, &pair, Timestep(2)).unwrap();

        assert_eq!(c.expr.coefficient(con_t), 1.0);
        assert!((c.expr.coefficient(con_prev) + 0.9).abs() < 1e-12);
        assert!((c.expr.coefficient(input) + 0.4).abs() < 1e-12);
        assert!((c.expr.coefficient(output) - 1.0).abs() < 1e-12);
        assert_eq!(c.relation, Relation::Eq(0.0));
    }

    #[test]
    fn test_state_rule_uses_positional_previous() {
        let f = fixture(1.0, lossy(), &[0, 24, 168]);
        let module = StorageConstraintModule::new(&f.sets, &f.store, &f.vars).unwrap();
        let pair = StoragePair::new("A", "Battery");

        let c = module
            .constraint(ConstraintKind::State, &pair, Some(Timestep(168)))
            .unwrap()
            .unwrap();
        let con_prev = f.vars.at(VariableKind::Content, &pair, Timestep(24)).unwrap();
        assert!(c.expr.coefficient(con_prev) < 0.0);
    }

    #[test]
    fn test_state_rule_rejected_at_first_step() {
        let f = fixture(1.0, lossy(), &[0, 1]);
        let module = StorageConstraintModule::new(&f.sets, &f.store, &f.vars).unwrap();
        let pair = StoragePair::new("A", "Battery");
        assert!(module.constraint(ConstraintKind::State, &pair, Some(Timestep(0))).is_err());
        assert!(module.constraint(ConstraintKind::FinalState, &pair, Some(Timestep(0))).is_err());
        assert!(module.constraint(ConstraintKind::InitialState, &pair, Some(Timestep(1))).is_err());
        assert!(module.constraint(ConstraintKind::PowerBounds, &pair, Some(Timestep(1))).is_err());
        assert!(module.constraint(ConstraintKind::InputByPower, &pair, None).is_err());
    }

    #[test]
    fn test_pair_constraint_counts() {
        let f = fixture(1.0, lossy(), &[0, 1, 2, 3]);
        let module = StorageConstraintModule::new(&f.sets, &f.store, &f.vars).unwrap();
        let all = module.generate().unwrap();

        let count = |kind| all.iter().filter(|c| c.kind == kind).count();
        assert_eq!(count(ConstraintKind::State), 3);
        assert_eq!(count(ConstraintKind::InputByPower), 4);
        assert_eq!(count(ConstraintKind::OutputByPower), 4);
        assert_eq!(count(ConstraintKind::ContentByCapacity), 4);
        assert_eq!(count(ConstraintKind::InitialState), 1);
        assert_eq!(count(ConstraintKind::FinalState), 1);
        assert_eq!(count(ConstraintKind::EnergyPowerRatio), 0);
        assert_eq!(all.len(), 4 + 3 + 4 * 3 + 2);
    }

    #[test]
    fn test_generated_constraints_are_sorted() {
        let f = fixture(1.0, lossy(), &[0, 1, 2]);
        let module = StorageConstraintModule::new(&f.sets, &f.store, &f.vars).unwrap();
        let all = module.generate().unwrap();
        let keys: Vec<_> = all.iter().map(|c| c.sort_key()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_single_step_horizon_has_both_boundary_rules() {
        let f = fixture(1.0, lossy(), &[7]);
        let module = StorageConstraintModule::new(&f.sets, &f.store, &f.vars).unwrap();
        let all = module.generate().unwrap();
        assert!(all.iter().any(|c| c.kind == ConstraintKind::InitialState));
        assert!(all.iter().any(|c| c.kind == ConstraintKind::FinalState));
        assert!(all.iter().all(|c| c.kind != ConstraintKind::State));
    }

    #[test]
    fn test_energy_power_ratio_only_when_configured() {
        let mut params = lossy();
        params.ep_ratio = Some(4.0);
        let f = fixture(1.0, params, &[0, 1]);
        let module = StorageConstraintModule::new(&f.sets, &f.store, &f.vars).unwrap();
        let pair = StoragePair::new("A", "Battery");
        let c = module
            .constraint(ConstraintKind::EnergyPowerRatio, &pair, None)
            .unwrap()
            .unwrap();
        let power = f.vars.design(VariableKind::Power, &pair).unwrap();
        assert_eq!(c.expr.coefficient(power), -4.0);
    }

    #[test]
    fn test_final_rule_allows_accumulation() {
        let f = fixture(1.0, StorageParameters::fixed(10.0, 100.0, 0.5), &[0, 1]);
        let module = StorageConstraintModule::new(&f.sets, &f.store, &f.vars).unwrap();
        let pair = StoragePair::new("A", "Battery");
        let c = module
            .constraint(ConstraintKind::FinalState, &pair, Some(Timestep(1)))
            .unwrap()
            .unwrap();

        let mut solution = Solution::new(vec![0.0; f.vars.len()], 0.0);
        solution.set(f.vars.design(VariableKind::Capacity, &pair).unwrap(), 100.0);
        let content = f.vars.at(VariableKind::Content, &pair, Timestep(1)).unwrap();

        solution.set(content, 80.0);
        assert!(c.is_satisfied(&solution, 1e-9));
        solution.set(content, 40.0);
        assert!(!c.is_satisfied(&solution, 1e-9));
    }

    #[test]
    fn test_unknown_pair_is_configuration_error() {
        let f = fixture(1.0, lossy(), &[0, 1]);
        let module = StorageConstraintModule::new(&f.sets, &f.store, &f.vars).unwrap();
        let missing = StoragePair::new("Z", "Battery");
        let err = module
            .constraint(ConstraintKind::PowerDecomposition, &missing, None)
            .unwrap_err();
        assert_eq!(err.pair(), Some(&missing));
    }

    #[test]
    fn test_parallel_generation_matches_sequential() {
        let mut store = ParameterStore::new(1.0).unwrap();
        for site in ["A", "B", "C", "D"] {
            for storage in ["Battery", "Hydro"] {
                store.insert(StoragePair::new(site, storage), lossy()).unwrap();
            }
        }
        let sets = IndexSets::from_store(&store, TimestepSequence::hourly(6));
        let mut vars = DecisionVariableRegistry::new();
        vars.declare_storage(&sets).unwrap();
        let module = StorageConstraintModule::new(&sets, &store, &vars).unwrap();

        let sequential = module.generate().unwrap();
        let sink = ConstraintSink::new();
        module.generate_into(&sink).unwrap();
        assert_eq!(sink.into_sorted(), sequential);
    }
}
