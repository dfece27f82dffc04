use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::domain::{StoragePair, Timestep};
use crate::optimizer::{VarIndex, VariableKind};

/// Where in the input a configuration problem was found
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    /// A whole storage pair (missing, not declared, ...)
    Pair(StoragePair),
    /// One parameter of a storage pair
    Parameter {
        pair: StoragePair,
        name: &'static str,
    },
    /// A timestep of the horizon
    Timestep(Timestep),
    /// The timestep sequence as a whole
    Horizon,
    /// A global model parameter
    Global(&'static str),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Pair(pair) => write!(f, "storage ({})", pair),
            Location::Parameter { pair, name } => write!(f, "storage ({}) parameter '{}'", pair, name),
            Location::Timestep(t) => write!(f, "timestep {}", t),
            Location::Horizon => write!(f, "timestep sequence"),
            Location::Global(name) => write!(f, "global parameter '{}'", name),
        }
    }
}

/// Build-time errors. Any of these aborts the build; no partial model is
/// handed to the assembler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("Configuration error at {location}: {reason}")]
    Configuration { location: Location, reason: String },

    #[error("Duplicate declaration of variable {kind}{index}")]
    DuplicateDeclaration { kind: VariableKind, index: VarIndex },
}

impl ModelError {
    pub fn configuration(location: Location, reason: impl Into<String>) -> Self {
        ModelError::Configuration {
            location,
            reason: reason.into(),
        }
    }

    pub fn parameter(pair: &StoragePair, name: &'static str, reason: impl Into<String>) -> Self {
        Self::configuration(
            Location::Parameter {
                pair: pair.clone(),
                name,
            },
            reason,
        )
    }

    pub fn missing_pair(pair: &StoragePair) -> Self {
        Self::configuration(
            Location::Pair(pair.clone()),
            "no parameters supplied for this storage pair",
        )
    }

    /// Returns the offending storage pair, if the error names one
    pub fn pair(&self) -> Option<&StoragePair> {
        match self {
            ModelError::Configuration {
                location: Location::Pair(pair) | Location::Parameter { pair, .. },
                ..
            } => Some(pair),
            ModelError::DuplicateDeclaration { index, .. } => Some(&index.pair),
            _ => None,
        }
    }
}

/// Failures of the external solve step. Infeasibility is not one of them:
/// see [`crate::optimizer::SolveOutcome`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("Solver backend failed: {0}")]
    Backend(String),

    #[error("Solver did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Assembled problem has no constraints")]
    EmptyProblem,

    #[error("Solver support not compiled in (enable the 'optimization' feature)")]
    Unavailable,
}
