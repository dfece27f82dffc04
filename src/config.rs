use anyhow::Result;
use figment::{providers::{Env, Format, Toml}, Figment};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Location, ModelError};
use crate::optimizer::{BuildOptions, SolverType};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    pub input: InputConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub timestep_offset: usize,
    /// Window length; `None` models the whole horizon
    pub timestep_length: Option<usize>,
    #[serde(default)]
    pub parallel: bool,
}

impl ModelConfig {
    /// An offset without a window length is rejected rather than ignored
    pub fn build_options(&self) -> Result<BuildOptions, ModelError> {
        let window = match (self.timestep_offset, self.timestep_length) {
            (offset, Some(length)) => Some((offset, length)),
            (0, None) => None,
            (offset, None) => {
                return Err(ModelError::configuration(
                    Location::Global("timestep_offset"),
                    format!("offset {} given without model.timestep_length", offset),
                ))
            }
        };
        Ok(BuildOptions {
            parallel: self.parallel,
            window,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolverConfig {
    pub timeout_seconds: u64,
    #[serde(default)]
    pub backend: SolverType,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 60,
            backend: SolverType::default(),
        }
    }
}

impl SolverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    pub parameters_path: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file("config/default.toml"))
                .merge(Env::prefixed("STORAGE_LP__").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        Ok(figment.extract()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let figment = Figment::new().merge(Toml::string(
            r#"
            [input]
            parameters_path = "data/two_node.toml"
            "#,
        ));
        let cfg = Config::from_figment(figment).unwrap();
        assert_eq!(cfg.solver.timeout(), Duration::from_secs(60));
        assert_eq!(cfg.solver.backend, SolverType::Minilp);
        assert_eq!(cfg.model.build_options().unwrap(), BuildOptions::default());
    }

    #[test]
    fn test_window_from_model_section() {
        let figment = Figment::new().merge(Toml::string(
            r#"
            [model]
            timestep_offset = 24
            timestep_length = 48
            parallel = true

            [solver]
            timeout_seconds = 5
            backend = "highs"

            [input]
            parameters_path = "p.json"
            "#,
        ));
        let cfg = Config::from_figment(figment).unwrap();
        let options = cfg.model.build_options().unwrap();
        assert_eq!(options.window, Some((24, 48)));
        assert!(options.parallel);
        assert_eq!(cfg.solver.backend, SolverType::Highs);
    }

    #[test]
    fn test_offset_without_length_is_rejected() {
        let figment = Figment::new().merge(Toml::string(
            r#"
            [model]
            timestep_offset = 100

            [input]
            parameters_path = "data/two_node.toml"
            "#,
        ));
        let cfg = Config::from_figment(figment).unwrap();
        let err = cfg.model.build_options().unwrap_err();
        assert!(err.to_string().contains("timestep_offset"));
    }

    #[test]
    fn test_missing_input_section_fails() {
        assert!(Config::from_figment(Figment::new()).is_err());
    }
}
