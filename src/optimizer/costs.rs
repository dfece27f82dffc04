//! Storage contribution to the objective function

use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

use super::{DecisionVariableRegistry, LinearExpr, VariableKind};
use crate::domain::{IndexSets, ParameterStore};
use crate::error::ModelError;

const HOURS_PER_YEAR: f64 = 8760.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum CostKind {
    Invest,
    Fixed,
    Variable,
}

/// Annuity factor for `depreciation` years at interest `wacc`
pub fn annuity_factor(depreciation: f64, wacc: f64) -> f64 {
    if wacc == 0.0 {
        return 1.0 / depreciation;
    }
    let growth = (1.0 + wacc).powf(depreciation);
    growth * wacc / (growth - 1.0)
}

/// Scales the modelled horizon to one year
pub fn annual_weight(modelled_steps: usize, dt_hours: f64) -> f64 {
    if modelled_steps == 0 {
        return 0.0;
    }
    HOURS_PER_YEAR / (modelled_steps as f64 * dt_hours)
}

pub struct CostModule<'a> {
    sets: &'a IndexSets,
    params: &'a ParameterStore,
    vars: &'a DecisionVariableRegistry,
}

impl<'a> CostModule<'a> {
    pub fn new(sets: &'a IndexSets, params: &'a ParameterStore, vars: &'a DecisionVariableRegistry) -> Self {
        Self { sets, params, vars }
    }

    pub fn cost(&self, kind: CostKind) -> Result<LinearExpr, ModelError> {
        let mut expr = LinearExpr::new();
        for pair in self.sets.pairs() {
            let p = self.params.get(pair)?;
            let costs = &p.costs;
            match kind {
                CostKind::Invest => {
                    if !costs.has_investment() {
                        continue;
                    }
                    let af = costs
                        .depreciation
                        .map(|years| annuity_factor(years, costs.wacc))
                        .unwrap_or(0.0);
                    expr.add_term(self.vars.design(VariableKind::PowerNew, pair)?, costs.inv_cost_p * af);
                    expr.add_term(self.vars.design(VariableKind::CapacityNew, pair)?, costs.inv_cost_c * af);
                }
                CostKind::Fixed => {
                    expr.add_term(self.vars.design(VariableKind::Power, pair)?, costs.fix_cost_p);
                    expr.add_term(self.vars.design(VariableKind::Capacity, pair)?, costs.fix_cost_c);
                }
                CostKind::Variable => {
                    let timesteps = self.sets.timesteps();
                    let weight = annual_weight(timesteps.len() - 1, self.params.dt_hours());
                    for t in timesteps.modelled() {
                        expr.add_term(self.vars.at(VariableKind::Content, pair, t)?, weight * costs.var_cost_c);
                        expr.add_term(self.vars.at(VariableKind::Input, pair, t)?, weight * costs.var_cost_p);
                        expr.add_term(self.vars.at(VariableKind::Output, pair, t)?, weight * costs.var_cost_p);
                    }
                }
            }
        }
        Ok(expr)
    }

    /// Sum of all cost types
    pub fn objective(&self) -> Result<LinearExpr, ModelError> {
        let mut total = LinearExpr::new();
        for kind in CostKind::iter() {
            let part = self.cost(kind)?;
            tracing::debug!(cost = <&'static str>::from(kind), terms = part.terms.len(), "storage cost terms");
            total.extend(part);
        }
        Ok(total)
    }
}
