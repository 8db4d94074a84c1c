use std::path::PathBuf;

use anyhow::Context;
use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::{Table, Value};

use crate::mem::PoolLimits;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub log_level: u64,
    /// Cycle budget; the run stops here even if traffic is still in flight.
    pub timeout: u64,
    pub stats_json: Option<PathBuf>,
}

pub trait Config: DeserializeOwned + Default {
    const SECTION: &'static str;

    fn from_section(section: Option<&Value>) -> anyhow::Result<Self> {
        match section {
            Some(value) => value
                .clone()
                .try_into()
                .with_context(|| format!("cannot deserialize [{}] config", Self::SECTION)),
            None => {
                warn!("config section [{}] not found, using defaults", Self::SECTION);
                Ok(Self::default())
            }
        }
    }

    fn from_table(table: &Table) -> anyhow::Result<Self> {
        Self::from_section(table.get(Self::SECTION))
    }
}

impl Config for SimConfig {
    const SECTION: &'static str = "sim";
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            log_level: 0,
            timeout: 1_000_000,
            stats_json: None,
        }
    }
}

impl Config for PoolLimits {
    const SECTION: &'static str = "pool";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let table: Table = toml::from_str("").unwrap();
        let sim = SimConfig::from_table(&table).unwrap();
        assert_eq!(sim.timeout, 1_000_000);
        assert!(sim.stats_json.is_none());
        assert_eq!(PoolLimits::from_table(&table).unwrap(), PoolLimits::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let table: Table = toml::from_str(
            r#"
            [sim]
            timeout = 500
            [pool]
            max_slabs = 2
            "#,
        )
        .unwrap();
        let sim = SimConfig::from_table(&table).unwrap();
        assert_eq!(sim.timeout, 500);
        assert_eq!(sim.log_level, 0);
        assert_eq!(PoolLimits::from_table(&table).unwrap().max_slabs, Some(2));
    }

    #[test]
    fn bad_types_are_reported() {
        let table: Table = toml::from_str("[sim]\ntimeout = \"soon\"\n").unwrap();
        let err = SimConfig::from_table(&table).unwrap_err();
        assert!(err.to_string().contains("[sim]"));
    }
}
