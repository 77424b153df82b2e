//! Reads query configuration files.
//!
//! Provides format detection (RON/JSON/TOML), file discovery, and the
//! deserialize-then-validate entry points used by hosts at startup.

use crate::schema::QuerySetConfig;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use wavequery_core::config::{ConfigError, QueryConfig};
use wavequery_core::engine::QueryKind;

/// Base name of the query set file looked up by [`load_query_set`].
pub const QUERY_SET_BASE_NAME: &str = "queries";

// ===========================================================================
// Errors
// ===========================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// The file parsed but describes an unusable engine.
    #[error("invalid {kind} configuration in {file}: {source}")]
    Invalid {
        file: PathBuf,
        kind: QueryKind,
        source: ConfigError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, ConfigLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(ConfigLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Look for `{base_name}.ron`, `.toml` or `.json` in `dir`.
///
/// Returns `Ok(None)` if no file is found, or `Err(ConflictingFormats)` if
/// more than one format exists for the same base name.
pub fn find_config_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, ConfigLoadError> {
    let mut found: Option<PathBuf> = None;
    for ext in ["ron", "toml", "json"] {
        let candidate = dir.join(format!("{base_name}.{ext}"));
        if candidate.exists() {
            if let Some(existing) = found {
                return Err(ConfigLoadError::ConflictingFormats {
                    a: existing,
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }
    Ok(found)
}

// ===========================================================================
// Deserialization
// ===========================================================================

/// Read a file and deserialize it according to its extension.
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;

    let parse_error = |detail: String| ConfigLoadError::Parse {
        file: path.to_path_buf(),
        detail,
    };
    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_error(e.to_string())),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_error(e.to_string())),
        Format::Toml => toml::from_str(&content).map_err(|e| parse_error(e.to_string())),
    }
}

/// Load and validate a single engine configuration.
///
/// The file is validated as a displacement configuration; the rules are
/// the same for every kind.
pub fn load_query_config(path: &Path) -> Result<QueryConfig, ConfigLoadError> {
    let config: QueryConfig = deserialize_file(path)?;
    config
        .validate()
        .map_err(|source| ConfigLoadError::Invalid {
            file: path.to_path_buf(),
            kind: QueryKind::Displacement,
            source,
        })?;
    log::debug!("loaded query config from {}", path.display());
    Ok(config)
}

/// Load the query set in `dir`, or the defaults if the directory has none.
pub fn load_query_set(dir: &Path) -> Result<QuerySetConfig, ConfigLoadError> {
    let Some(path) = find_config_file(dir, QUERY_SET_BASE_NAME)? else {
        log::debug!(
            "no {QUERY_SET_BASE_NAME} file in {}, using defaults",
            dir.display()
        );
        return Ok(QuerySetConfig::default());
    };
    let set: QuerySetConfig = deserialize_file(&path)?;
    set.validate()
        .map_err(|(kind, source)| ConfigLoadError::Invalid {
            file: path.clone(),
            kind,
            source,
        })?;
    log::debug!("loaded query set from {}", path.display());
    Ok(set)
}

// ===========================================================================
// Tests
// ===========================================================================
