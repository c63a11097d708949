//! Host settings file.
//!
//! # Responsibility
//! - Load and save the JSON settings that select the catalog backend.
//!
//! # Invariants
//! - A missing `knowledge_base` entry selects the `memory` backend.
//! - Saving writes the whole document; partial updates are not supported.

use crate::backend::BackendConfig;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};

/// Settings document, e.g.
/// `{"knowledge_base": {"type": "sqlite", "path": "causes.db"}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogSettings {
    #[serde(default)]
    pub knowledge_base: BackendConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug)]
pub enum SettingsError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl Display for SettingsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to access settings `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "invalid settings `{}`: {source}", path.display())
            }
        }
    }
}

impl Error for SettingsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
        }
    }
}

pub fn load_settings(path: impl AsRef<Path>) -> Result<CatalogSettings, SettingsError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn save_settings(
    path: impl AsRef<Path>,
    settings: &CatalogSettings,
) -> Result<(), SettingsError> {
    let path = path.as_ref();
    let bytes = serde_json::to_vec_pretty(settings).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, bytes).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::{load_settings, save_settings, CatalogSettings, SettingsError};
    use crate::backend::BackendConfig;

    #[test]
    fn empty_document_defaults_to_memory_backend() {
        let settings: CatalogSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.knowledge_base, BackendConfig::memory());
    }

    #[test]
    fn save_then_load_preserves_backend_options() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = CatalogSettings {
            knowledge_base: BackendConfig::new("sqlite").with_option("cache_ttl_secs", 10),
            log_level: Some("debug".to_string()),
            log_dir: None,
        };

        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path).unwrap(), settings);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"knowledgebase": {"type": "memory"}}"#).unwrap();

        assert!(matches!(
            load_settings(&path),
            Err(SettingsError::Parse { .. })
        ));
    }
}
