//! On-disk shape of query engine configuration.
//!
//! A query set configures the three engines a surface simulation usually
//! runs side by side. Each member falls back to [`QueryConfig::default`]
//! when omitted, and within a member every field falls back individually.

use serde::{Deserialize, Serialize};
use wavequery_core::config::{ConfigError, QueryConfig};
use wavequery_core::engine::QueryKind;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySetConfig {
    pub displacement: QueryConfig,
    pub flow: QueryConfig,
    pub depth: QueryConfig,
}

impl QuerySetConfig {
    pub fn config_for(&self, kind: QueryKind) -> &QueryConfig {
        match kind {
            QueryKind::Displacement => &self.displacement,
            QueryKind::Flow => &self.flow,
            QueryKind::Depth => &self.depth,
        }
    }

    /// Validate every member, reporting the first failure with its kind.
    pub fn validate(&self) -> Result<(), (QueryKind, ConfigError)> {
        for kind in [QueryKind::Displacement, QueryKind::Flow, QueryKind::Depth] {
            self.config_for(kind).validate().map_err(|e| (kind, e))?;
        }
        Ok(())
    }
}
