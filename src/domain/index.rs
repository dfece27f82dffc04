use std::collections::{BTreeSet, HashMap};

use super::{ParameterStore, SiteId, StorageId, StoragePair, Timestep};
use crate::error::{Location, ModelError};

/// Ordered, duplicate-free horizon `T = [t_1 .. t_N]`.
///
/// "Previous" is purely positional. Labels may jump (representative
/// periods), so no arithmetic is ever done on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestepSequence {
    steps: Vec<Timestep>,
    positions: HashMap<Timestep, usize>,
}

impl TimestepSequence {
    pub fn new(steps: impl IntoIterator<Item = Timestep>) -> Result<Self, ModelError> {
        let steps: Vec<Timestep> = steps.into_iter().collect();
        if steps.is_empty() {
            return Err(ModelError::configuration(Location::Horizon, "at least one timestep is required"));
        }

        let mut positions = HashMap::with_capacity(steps.len());
        for (position, step) in steps.iter().enumerate() {
            if positions.insert(*step, position).is_some() {
                return Err(ModelError::configuration(
                    Location::Timestep(*step),
                    "timestep appears more than once in the sequence",
                ));
            }
        }

        Ok(Self { steps, positions })
    }

    /// Contiguous labels `0..=length`, the common hourly case
    pub fn hourly(length: u32) -> Self {
        let steps: Vec<Timestep> = (0..=length).map(Timestep).collect();
        let positions = steps.iter().enumerate().map(|(p, t)| (*t, p)).collect();
        Self { steps, positions }
    }

    /// Selects `length + 1` steps starting at position `offset`. The first
    /// selected step only carries the initial state.
    pub fn window(&self, offset: usize, length: usize) -> Result<Self, ModelError> {
        let end = offset
            .checked_add(length)
            .and_then(|last| last.checked_add(1))
            .filter(|end| *end <= self.steps.len())
            .ok_or_else(|| {
                ModelError::configuration(
                    Location::Horizon,
                    format!(
                        "window offset {} length {} exceeds sequence of {} steps",
                        offset,
                        length,
                        self.steps.len()
                    ),
                )
            })?;
        Self::new(self.steps[offset..end].iter().copied())
    }

    pub fn first(&self) -> Timestep {
        self.steps[0]
    }

    pub fn last(&self) -> Timestep {
        self.steps[self.steps.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false: construction rejects empty sequences
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn position(&self, step: Timestep) -> Option<usize> {
        self.positions.get(&step).copied()
    }

    pub fn contains(&self, step: Timestep) -> bool {
        self.positions.contains_key(&step)
    }

    /// Immediately preceding element; `None` for `t_1` or unknown labels
    pub fn previous(&self, step: Timestep) -> Option<Timestep> {
        match self.position(step)? {
            0 => None,
            p => Some(self.steps[p - 1]),
        }
    }

    /// All of `T` in order
    pub fn iter(&self) -> impl ExactSizeIterator<Item = Timestep> + '_ {
        self.steps.iter().copied()
    }

    /// `T_m`: every step but the first
    pub fn modelled(&self) -> impl ExactSizeIterator<Item = Timestep> + '_ {
        self.steps[1..].iter().copied()
    }

    pub fn as_slice(&self) -> &[Timestep] {
        &self.steps
    }
}

/// The sets V, S, T, T_m and the valid (site, storage) pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSets {
    sites: BTreeSet<SiteId>,
    storages: BTreeSet<StorageId>,
    pairs: BTreeSet<StoragePair>,
    timesteps: TimestepSequence,
}

impl IndexSets {
    /// Derives the pair set from the parameter table: a pair is valid
    /// exactly when it has parameters.
    pub fn from_store(store: &ParameterStore, timesteps: TimestepSequence) -> Self {
        let pairs: BTreeSet<StoragePair> = store.pairs().cloned().collect();
        let sites = pairs.iter().map(|p| p.site.clone()).collect();
        let storages = pairs.iter().map(|p| p.storage.clone()).collect();
        Self {
            sites,
            storages,
            pairs,
            timesteps,
        }
    }

    pub fn sites(&self) -> &BTreeSet<SiteId> {
        &self.sites
    }

    pub fn storages(&self) -> &BTreeSet<StorageId> {
        &self.storages
    }

    pub fn pairs(&self) -> &BTreeSet<StoragePair> {
        &self.pairs
    }

    pub fn timesteps(&self) -> &TimestepSequence {
        &self.timesteps
    }

    pub fn contains_pair(&self, pair: &StoragePair) -> bool {
        self.pairs.contains(pair)
    }

    pub fn require_pair(&self, pair: &StoragePair) -> Result<(), ModelError> {
        if self.contains_pair(pair) {
            Ok(())
        } else {
            Err(ModelError::missing_pair(pair))
        }
    }

    pub fn require_timestep(&self, step: Timestep) -> Result<usize, ModelError> {
        self.timesteps.position(step).ok_or_else(|| {
            ModelError::configuration(Location::Timestep(step), "timestep is not part of the horizon")
        })
    }
}
