use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Opaque site identifier (a location holding storages)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(pub String);

impl SiteId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque storage technology identifier (e.g. "Battery", "Pumped hydro")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageId(pub String);

impl StorageId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The `(site, storage)` key identifying one storage unit.
///
/// Ordering is lexicographic by site, then storage. Every generated
/// constraint set is emitted in this order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoragePair {
    pub site: SiteId,
    pub storage: StorageId,
}

impl StoragePair {
    pub fn new(site: impl Into<String>, storage: impl Into<String>) -> Self {
        Self {
            site: SiteId::new(site),
            storage: StorageId::new(storage),
        }
    }
}

impl fmt::Display for StoragePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.site, self.storage)
    }
}

// ============================================================================
// Time
// ============================================================================

/// Label of one modelled period.
///
/// Labels carry no arithmetic meaning: the horizon may be a set of
/// non-contiguous representative periods, so "previous" is always resolved
/// through [`crate::domain::TimestepSequence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestep(pub u32);

impl fmt::Display for Timestep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Timestep {
    fn from(label: u32) -> Self {
        Self(label)
    }
}
