use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use validator::Validate;

use super::{StoragePair, TimestepSequence};
use crate::error::{Location, ModelError};

fn unbounded() -> f64 {
    f64::INFINITY
}

/// Economic data of one storage pair. Missing entries cost nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StorageCosts {
    /// Investment cost per unit of new power
    #[validate(range(min = 0.0))]
    pub inv_cost_p: f64,
    /// Investment cost per unit of new capacity
    #[validate(range(min = 0.0))]
    pub inv_cost_c: f64,
    /// Annual fixed cost per unit of total power
    #[validate(range(min = 0.0))]
    pub fix_cost_p: f64,
    /// Annual fixed cost per unit of total capacity
    #[validate(range(min = 0.0))]
    pub fix_cost_c: f64,
    /// Variable cost per unit of energy charged or discharged
    #[validate(range(min = 0.0))]
    pub var_cost_p: f64,
    /// Variable cost per unit of energy held, per step
    #[validate(range(min = 0.0))]
    pub var_cost_c: f64,
    /// Weighted average cost of capital (fraction)
    #[validate(range(min = 0.0))]
    pub wacc: f64,
    /// Depreciation period in years; required when investment costs are set
    #[validate(range(min = 1.0))]
    pub depreciation: Option<f64>,
}

impl StorageCosts {
    pub fn has_investment(&self) -> bool {
        self.inv_cost_p > 0.0 || self.inv_cost_c > 0.0
    }
}

/// Technical parameters of one storage pair.
///
/// `cap_up_*` default to unbounded; everything else without a default must be
/// supplied by the input table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct StorageParameters {
    /// Self-discharge rate `d`, fraction of content lost per step
    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0))]
    pub self_discharge: f64,
    /// Charge efficiency `e_in`
    #[validate(range(min = 0.0, max = 1.0))]
    pub eff_in: f64,
    /// Discharge efficiency `e_out`
    #[validate(range(min = 0.0, max = 1.0))]
    pub eff_out: f64,
    /// Installed power `K_p`
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub inst_cap_p: f64,
    /// Installed capacity `K_c`
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub inst_cap_c: f64,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub cap_lo_p: f64,
    #[serde(default = "unbounded")]
    pub cap_up_p: f64,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub cap_lo_c: f64,
    #[serde(default = "unbounded")]
    pub cap_up_c: f64,
    /// Initial and minimum final state-of-charge fraction `I`
    #[validate(range(min = 0.0, max = 1.0))]
    pub init_soc: f64,
    /// Fixed energy-to-power ratio, if the technology has one
    #[serde(default)]
    pub ep_ratio: Option<f64>,
    #[serde(default)]
    #[validate(nested)]
    pub costs: StorageCosts,
}

impl StorageParameters {
    /// Lossless storage with the given installed power and capacity, no new
    /// build allowed.
    pub fn fixed(inst_cap_p: f64, inst_cap_c: f64, init_soc: f64) -> Self {
        Self {
            self_discharge: 0.0,
            eff_in: 1.0,
            eff_out: 1.0,
            inst_cap_p,
            inst_cap_c,
            cap_lo_p: inst_cap_p,
            cap_up_p: inst_cap_p,
            cap_lo_c: inst_cap_c,
            cap_up_c: inst_cap_c,
            init_soc,
            ep_ratio: None,
            costs: StorageCosts::default(),
        }
    }

    /// Checks everything the storage rules rely on.
    ///
    /// Explicit checks run first so the common mistakes (zero efficiency,
    /// inverted bounds) are reported against the exact parameter.
    pub fn check(&self, pair: &StoragePair) -> Result<(), ModelError> {
        let finite = [
            ("self_discharge", self.self_discharge),
            ("eff_in", self.eff_in),
            ("eff_out", self.eff_out),
            ("inst_cap_p", self.inst_cap_p),
            ("inst_cap_c", self.inst_cap_c),
            ("cap_lo_p", self.cap_lo_p),
            ("cap_lo_c", self.cap_lo_c),
            ("init_soc", self.init_soc),
        ];
        for (name, value) in finite {
            if !value.is_finite() {
                return Err(ModelError::parameter(pair, name, format!("must be finite, got {}", value)));
            }
        }
        for (name, value) in [("cap_up_p", self.cap_up_p), ("cap_up_c", self.cap_up_c)] {
            if value.is_nan() || value == f64::NEG_INFINITY {
                return Err(ModelError::parameter(pair, name, format!("must be a number or +inf, got {}", value)));
            }
        }

        // e_in/e_out enter the state rule as factor and divisor
        if self.eff_in <= 0.0 {
            return Err(ModelError::parameter(pair, "eff_in", format!("must be > 0, got {}", self.eff_in)));
        }
        if self.eff_out <= 0.0 {
            return Err(ModelError::parameter(
                pair,
                "eff_out",
                format!("must be > 0 (divisor in storage state rule), got {}", self.eff_out),
            ));
        }

        if self.cap_lo_p > self.cap_up_p {
            return Err(ModelError::parameter(
                pair,
                "cap_lo_p",
                format!("lower power bound {} exceeds upper bound {}", self.cap_lo_p, self.cap_up_p),
            ));
        }
        if self.cap_lo_c > self.cap_up_c {
            return Err(ModelError::parameter(
                pair,
                "cap_lo_c",
                format!("lower capacity bound {} exceeds upper bound {}", self.cap_lo_c, self.cap_up_c),
            ));
        }

        if let Some(ratio) = self.ep_ratio {
            if !ratio.is_finite() || ratio <= 0.0 {
                return Err(ModelError::parameter(pair, "ep_ratio", format!("must be positive, got {}", ratio)));
            }
        }

        if self.costs.has_investment() && self.costs.depreciation.is_none() {
            return Err(ModelError::parameter(
                pair,
                "depreciation",
                "required when investment costs are given",
            ));
        }

        self.validate()
            .map_err(|errors| ModelError::configuration(Location::Pair(pair.clone()), errors.to_string()))
    }
}

/// Immutable snapshot of all storage parameters for one build.
///
/// Generation (also concurrent generation) only ever reads from this.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterStore {
    dt_hours: f64,
    storages: BTreeMap<StoragePair, StorageParameters>,
}

impl ParameterStore {
    pub fn new(dt_hours: f64) -> Result<Self, ModelError> {
        if !dt_hours.is_finite() || dt_hours <= 0.0 {
            return Err(ModelError::configuration(
                Location::Global("dt_hours"),
                format!("timestep duration must be positive, got {}", dt_hours),
            ));
        }
        Ok(Self {
            dt_hours,
            storages: BTreeMap::new(),
        })
    }

    /// Adds the parameters of one pair. A pair may only be supplied once.
    pub fn insert(&mut self, pair: StoragePair, parameters: StorageParameters) -> Result<(), ModelError> {
        if self.storages.contains_key(&pair) {
            return Err(ModelError::configuration(
                Location::Pair(pair),
                "parameters supplied more than once",
            ));
        }
        self.storages.insert(pair, parameters);
        Ok(())
    }

    pub fn with_storage(mut self, pair: StoragePair, parameters: StorageParameters) -> Result<Self, ModelError> {
        self.insert(pair, parameters)?;
        Ok(self)
    }

    pub fn dt_hours(&self) -> f64 {
        self.dt_hours
    }

    /// Looks up a pair; a pair without parameters is a configuration error
    pub fn get(&self, pair: &StoragePair) -> Result<&StorageParameters, ModelError> {
        self.storages.get(pair).ok_or_else(|| ModelError::missing_pair(pair))
    }

    pub fn contains(&self, pair: &StoragePair) -> bool {
        self.storages.contains_key(pair)
    }

    /// Pairs in site, then storage order
    pub fn pairs(&self) -> impl Iterator<Item = &StoragePair> {
        self.storages.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StoragePair, &StorageParameters)> {
        self.storages.iter()
    }

    pub fn len(&self) -> usize {
        self.storages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storages.is_empty()
    }

    /// Validates every pair, stopping at the first problem
    pub fn validate(&self) -> Result<(), ModelError> {
        for (pair, parameters) in &self.storages {
            parameters.check(pair)?;
        }
        Ok(())
    }
}

// ============================================================================
// Input document
// ============================================================================

/// One row of the storage table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageRecord {
    pub site: String,
    pub storage: String,
    #[serde(flatten)]
    pub parameters: StorageParameters,
}

/// Parameter file as read from disk (TOML or JSON)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDocument {
    pub dt_hours: f64,
    pub timesteps: Vec<u32>,
    #[serde(default, rename = "storage")]
    pub storages: Vec<StorageRecord>,
}

impl ParameterDocument {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(input)?)
    }

    pub fn from_json_str(input: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(input)?)
    }

    /// Reads a parameter file; the format follows the file extension
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading parameter file {}", path.display()))?;
        let document = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&raw),
            _ => Self::from_toml_str(&raw),
        };
        document.with_context(|| format!("parsing parameter file {}", path.display()))
    }

    /// Splits the document into the parameter snapshot and the horizon
    pub fn into_parts(self) -> Result<(ParameterStore, TimestepSequence), ModelError> {
        let mut store = ParameterStore::new(self.dt_hours)?;
        for record in self.storages {
            store.insert(StoragePair::new(record.site, record.storage), record.parameters)?;
        }
        let timesteps = TimestepSequence::new(self.timesteps.into_iter().map(Into::into))?;
        Ok((store, timesteps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn battery() -> StorageParameters {
        StorageParameters {
            self_discharge: 0.01,
            eff_in: 0.95,
            eff_out: 0.95,
            inst_cap_p: 10.0,
            inst_cap_c: 100.0,
            cap_lo_p: 0.0,
            cap_up_p: 50.0,
            cap_lo_c: 0.0,
            cap_up_c: 500.0,
            init_soc: 0.5,
            ep_ratio: None,
            costs: StorageCosts::default(),
        }
    }

    #[test]
    fn test_valid_parameters_pass() {
        let pair = StoragePair::new("A", "Battery");
        assert!(battery().check(&pair).is_ok());
    }

    #[test]
    fn test_zero_output_efficiency_rejected() {
        let pair = StoragePair::new("A", "Battery");
        let mut params = battery();
        params.eff_out = 0.0;
        let err = params.check(&pair).unwrap_err();
        assert!(matches!(
            err,
            ModelError::Configuration { location: Location::Parameter { name: "eff_out", .. }, .. }
        ));
    }

    #[test]
    fn test_init_soc_out_of_range_rejected_by_validator() {
        let pair = StoragePair::new("A", "Battery");
        let mut params = battery();
        params.init_soc = 1.5;
        let err = params.check(&pair).unwrap_err();
        assert_eq!(err.pair(), Some(&pair));
    }

    #[test]
    fn test_nan_rejected() {
        let pair = StoragePair::new("A", "Battery");
        let mut params = battery();
        params.self_discharge = f64::NAN;
        assert!(params.check(&pair).is_err());
    }

    #[test]
    fn test_investment_requires_depreciation() {
        let pair = StoragePair::new("A", "Battery");
        let mut params = battery();
        params.costs.inv_cost_c = 100.0;
        assert!(params.check(&pair).is_err());
        params.costs.depreciation = Some(20.0);
        assert!(params.check(&pair).is_ok());
    }

    #[test]
    fn test_duplicate_pair_rejected() {
        let pair = StoragePair::new("A", "Battery");
        let mut store = ParameterStore::new(1.0).unwrap();
        store.insert(pair.clone(), battery()).unwrap();
        assert!(store.insert(pair, battery()).is_err());
    }

    #[test]
    fn test_non_positive_dt_rejected() {
        assert!(ParameterStore::new(0.0).is_err());
        assert!(ParameterStore::new(f64::NAN).is_err());
    }

    #[test]
    fn test_document_from_toml_defaults_upper_bounds() {
        let doc = ParameterDocument::from_toml_str(
            r#"
            dt_hours = 1.0
            timesteps = [0, 1, 2]

            [[storage]]
            site = "Node_1"
            storage = "Battery"
            eff_in = 0.9
            eff_out = 0.9
            inst_cap_p = 5.0
            inst_cap_c = 20.0
            init_soc = 0.5

            [storage.costs]
            inv_cost_c = 150.0
            depreciation = 10.0
            wacc = 0.07
            "#,
        )
        .unwrap();

        let (store, timesteps) = doc.into_parts().unwrap();
        let params = store.get(&StoragePair::new("Node_1", "Battery")).unwrap();
        assert_eq!(params.cap_up_p, f64::INFINITY);
        assert_eq!(params.costs.inv_cost_c, 150.0);
        assert_eq!(timesteps.len(), 3);
        assert!(store.validate().is_ok());
    }

    #[test]
    fn test_document_from_json() {
        let doc = ParameterDocument::from_json_str(
            r#"{
                "dt_hours": 0.5,
                "timesteps": [10, 20],
                "storage": [
                    {"site": "S", "storage": "H2", "eff_in": 0.7, "eff_out": 0.6, "init_soc": 0.0}
                ]
            }"#,
        )
        .unwrap();
        let (store, _) = doc.into_parts().unwrap();
        assert_eq!(store.dt_hours(), 0.5);
        assert_eq!(store.len(), 1);
    }
}
