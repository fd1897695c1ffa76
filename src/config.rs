//! Engine configuration.
//!
//! One serde-deserializable struct aggregating the per-area knobs. With the
//! `config-file` feature the whole thing loads from a TOML file; defaults
//! are usable as-is for in-memory compilation.

use crate::cache::CacheConfig;
use crate::classify::ClassifierConfig;
use crate::specificity::TieBreakPolicy;
use crate::table::TableConfig;
use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Specificity tie-break policy. `Strict` reports every tie.
    pub tie_break_policy: TieBreakPolicy,
    /// Classifier cost thresholds.
    pub classifier: ClassifierConfig,
    /// Table-generation limits.
    pub table: TableConfig,
    /// On-disk cache configuration; `None` keeps the session in memory.
    pub cache: Option<CacheConfig>,
    /// Whether the session attaches a dispatch profiler.
    pub profiling: bool,
}

#[cfg(feature = "config-file")]
impl EngineConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Loads a configuration from a TOML file.
    pub fn load(path: &std::path::Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text).map_err(std::io::Error::other)
    }
}
