//! Backend configuration values and the descriptor-based factory.
//!
//! # Responsibility
//! - Carry backend options as an opaque, comparable value.
//! - Map `type` tags to compiled-in backend constructors.
//!
//! # Invariants
//! - Descriptor type ids are unique and match `[a-z0-9_-]+`.
//! - Building never mutates an existing backend instance.

use crate::backend::{json_file, memory, sqlite, KbError, KbResult, KnowledgeBase};
use log::{error, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::Arc;

/// Type-tagged backend configuration.
///
/// Serialized flat, e.g. `{"type": "sqlite", "path": "causes.db"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(rename = "type")]
    pub type_id: String,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl BackendConfig {
    pub fn new(type_id: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            options: Map::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn memory() -> Self {
        Self::new(memory::TYPE_ID)
    }

    pub fn json_file(path: impl AsRef<Path>) -> Self {
        Self::new(json_file::TYPE_ID).with_option("path", path.as_ref().display().to_string())
    }

    /// `None` selects a private in-memory database.
    pub fn sqlite(path: Option<&Path>) -> Self {
        let config = Self::new(sqlite::TYPE_ID);
        match path {
            Some(path) => config.with_option("path", path.display().to_string()),
            None => config,
        }
    }

    /// Decodes the options into a backend-specific struct.
    pub fn parse_options<T: DeserializeOwned>(&self, backend: &'static str) -> KbResult<T> {
        serde_json::from_value(Value::Object(self.options.clone()))
            .map_err(|err| KbError::invalid_config(backend, err))
    }

    /// Builds a normalized config from typed options, filling in defaults.
    pub fn from_options<T: Serialize>(type_id: &'static str, options: &T) -> Self {
        let options = match serde_json::to_value(options) {
            Ok(Value::Object(map)) => map
                .into_iter()
                .filter(|(_, value)| !value.is_null())
                .collect(),
            _ => Map::new(),
        };
        Self {
            type_id: type_id.to_string(),
            options,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::memory()
    }
}

/// Constructor signature every backend descriptor exposes.
pub type BuildFn = fn(&BackendConfig) -> KbResult<Arc<dyn KnowledgeBase>>;

/// Advertises one backend implementation to the factory.
#[derive(Clone, Copy)]
pub struct BackendDescriptor {
    pub type_id: &'static str,
    pub display_name: &'static str,
    pub build: BuildFn,
}

impl std::fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("type_id", &self.type_id)
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// Descriptor registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactoryError {
    InvalidTypeId(String),
    DuplicateTypeId(String),
}

impl Display for FactoryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTypeId(value) => write!(f, "backend type id is invalid: {value}"),
            Self::DuplicateTypeId(value) => {
                write!(f, "backend type id already registered: {value}")
            }
        }
    }
}

impl Error for FactoryError {}

/// Registry of backend descriptors keyed by type id.
#[derive(Debug, Default)]
pub struct BackendFactory {
    descriptors: BTreeMap<&'static str, BackendDescriptor>,
}

impl BackendFactory {
    /// Empty factory; see [`BackendFactory::with_builtin`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory with `memory`, `json_file` and `sqlite` registered.
    pub fn with_builtin() -> Self {
        let mut factory = Self::new();
        for descriptor in [
            memory::descriptor(),
            json_file::descriptor(),
            sqlite::descriptor(),
        ] {
            let registered = factory.register(descriptor);
            debug_assert!(
                registered.is_ok(),
                "built-in backend {} failed to register: {registered:?}",
                descriptor.type_id
            );
        }
        factory
    }

    pub fn register(&mut self, descriptor: BackendDescriptor) -> Result<(), FactoryError> {
        if !is_valid_type_id(descriptor.type_id) {
            return Err(FactoryError::InvalidTypeId(descriptor.type_id.to_string()));
        }
        if self.descriptors.contains_key(descriptor.type_id) {
            return Err(FactoryError::DuplicateTypeId(descriptor.type_id.to_string()));
        }
        self.descriptors.insert(descriptor.type_id, descriptor);
        Ok(())
    }

    /// Registered descriptors sorted by type id.
    pub fn descriptors(&self) -> Vec<BackendDescriptor> {
        self.descriptors.values().copied().collect()
    }

    pub fn get(&self, type_id: &str) -> Option<&BackendDescriptor> {
        self.descriptors.get(type_id.trim())
    }

    /// Constructs a fresh backend instance for `config`.
    pub fn build(&self, config: &BackendConfig) -> KbResult<Arc<dyn KnowledgeBase>> {
        let type_id = config.type_id.trim();
        let descriptor = self
            .get(type_id)
            .ok_or_else(|| KbError::UnknownBackendType(type_id.to_string()))?;

        match (descriptor.build)(config) {
            Ok(backend) => {
                info!("event=backend_build module=backend status=ok type={type_id}");
                Ok(backend)
            }
            Err(err) => {
                error!(
                    "event=backend_build module=backend status=error type={type_id} error={err}"
                );
                Err(err)
            }
        }
    }
}

fn is_valid_type_id(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}
