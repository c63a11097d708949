//! Core catalog of known build-failure causes.
//!
//! Storage is pluggable: every backend implements [`KnowledgeBase`], is
//! built from a type-tagged [`BackendConfig`], and can be swapped at runtime
//! through [`CatalogRegistry::reconfigure`], which migrates the catalog into
//! the new backend before switching.

pub mod backend;
pub mod db;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod registry;
pub mod service;
pub mod settings;

pub use backend::{
    BackendConfig, BackendDescriptor, BackendFactory, FactoryError, KbError, KbResult,
    KnowledgeBase,
};
pub use logging::{init_logging, logging_status, LogLevel, LoggingError};
pub use migrate::{migrate, CopyStage, MigrationError, MigrationReport, RecordCopyFailure};
pub use model::cause::{
    CauseId, CauseName, CauseRecord, CauseValidationError, Indication, IndicationKind,
};
pub use registry::{
    BackendState, CatalogRegistry, ManagedBackend, ReconfigureOutcome, RegistryError,
};
pub use service::cause_service::CauseService;
pub use settings::{load_settings, save_settings, CatalogSettings, SettingsError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
