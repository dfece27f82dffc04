use std::collections::HashMap;

use super::{VarIndex, VariableBounds, VariableDecl, VariableHandle, VariableKind};
use crate::domain::{IndexSets, StoragePair, Timestep};
use crate::error::{Location, ModelError};

/// Owns every decision variable of one build.
///
/// Handles are dense and assigned in declaration order, so declaring the
/// same sets twice yields the same handles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionVariableRegistry {
    decls: Vec<VariableDecl>,
    lookup: HashMap<(VariableKind, VarIndex), VariableHandle>,
}

impl DecisionVariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares one variable. The same (kind, index) may only be declared once.
    pub fn declare(
        &mut self,
        kind: VariableKind,
        index: VarIndex,
        bounds: VariableBounds,
    ) -> Result<VariableHandle, ModelError> {
        let key = (kind, index);
        if self.lookup.contains_key(&key) {
            let (kind, index) = key;
            return Err(ModelError::DuplicateDeclaration { kind, index });
        }
        let handle = VariableHandle(self.decls.len());
        self.decls.push(VariableDecl {
            kind,
            index: key.1.clone(),
            bounds,
        });
        self.lookup.insert(key, handle);
        Ok(handle)
    }

    /// Declares a family over an index set, in iteration order
    pub fn declare_family(
        &mut self,
        kind: VariableKind,
        indices: impl IntoIterator<Item = VarIndex>,
        bounds: VariableBounds,
    ) -> Result<Vec<VariableHandle>, ModelError> {
        indices
            .into_iter()
            .map(|index| self.declare(kind, index, bounds))
            .collect()
    }

    /// Declares the seven storage families over the given sets.
    ///
    /// Time-indexed families go over `T × pairs`, design variables over the
    /// pairs alone. All are non-negative.
    pub fn declare_storage(&mut self, sets: &IndexSets) -> Result<(), ModelError> {
        let timesteps = sets.timesteps();
        for kind in [VariableKind::Content, VariableKind::Input, VariableKind::Output] {
            let indices = sets
                .pairs()
                .iter()
                .flat_map(|pair| timesteps.iter().map(move |t| VarIndex::at(pair, t)));
            self.declare_family(kind, indices, VariableBounds::non_negative())?;
        }
        for kind in [
            VariableKind::Power,
            VariableKind::Capacity,
            VariableKind::PowerNew,
            VariableKind::CapacityNew,
        ] {
            self.declare_family(kind, sets.pairs().iter().map(VarIndex::pair), VariableBounds::non_negative())?;
        }
        tracing::debug!(variables = self.decls.len(), "declared storage variables");
        Ok(())
    }

    pub fn handle(&self, kind: VariableKind, index: &VarIndex) -> Option<VariableHandle> {
        self.lookup.get(&(kind, index.clone())).copied()
    }

    /// Handle of a pair-level variable, or a configuration error naming the pair
    pub fn design(&self, kind: VariableKind, pair: &StoragePair) -> Result<VariableHandle, ModelError> {
        self.handle(kind, &VarIndex::pair(pair)).ok_or_else(|| {
            ModelError::configuration(
                Location::Pair(pair.clone()),
                format!("variable {} is not declared for this pair", kind),
            )
        })
    }

    /// Handle of a time-indexed variable
    pub fn at(&self, kind: VariableKind, pair: &StoragePair, t: Timestep) -> Result<VariableHandle, ModelError> {
        self.handle(kind, &VarIndex::at(pair, t)).ok_or_else(|| {
            ModelError::configuration(
                Location::Pair(pair.clone()),
                format!("variable {} is not declared at timestep {}", kind, t),
            )
        })
    }

    pub fn decl(&self, handle: VariableHandle) -> Option<&VariableDecl> {
        self.decls.get(handle.0)
    }

    pub fn decls(&self) -> &[VariableDecl] {
        &self.decls
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}
