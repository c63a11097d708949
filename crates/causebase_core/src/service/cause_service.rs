//! Cause editing use-cases.
//!
//! # Responsibility
//! - Give editors fresh reads and direct writes against the active backend.
//! - Keep the registry working list in step after each write.
//!
//! # Invariants
//! - Writes never go through the cached working list.
//! - Writes go through `CatalogRegistry::write`, so a concurrent backend
//!   switch either migrates them or receives them.
//! - `update` only touches causes that already exist.

use crate::backend::KbError;
use crate::model::cause::{CauseId, CauseName, CauseRecord};
use crate::registry::{CatalogRegistry, RegistryError};
use log::{info, warn};

/// Editor-facing facade over the registry's active backend.
pub struct CauseService<'a> {
    registry: &'a CatalogRegistry,
}

impl<'a> CauseService<'a> {
    pub fn new(registry: &'a CatalogRegistry) -> Self {
        Self { registry }
    }

    pub fn list_names(&self) -> Result<Vec<CauseName>, RegistryError> {
        Ok(self.registry.backend()?.list_for_edit()?)
    }

    pub fn get(&self, id: &CauseId) -> Result<CauseRecord, RegistryError> {
        Ok(self.registry.backend()?.get(id)?)
    }

    pub fn categories(&self) -> Result<Vec<String>, RegistryError> {
        Ok(self.registry.backend()?.categories()?)
    }

    /// Stores a new cause and returns it with its assigned id.
    pub fn add(&self, record: &CauseRecord) -> Result<CauseRecord, RegistryError> {
        let stored = self.registry.write(|kb| kb.add(record))?;
        if let Some(id) = &stored.id {
            info!("event=cause_add module=service status=ok id={id}");
        }
        self.refresh();
        Ok(stored)
    }

    /// Saves changes to an existing cause.
    ///
    /// Returns `NotFound` for ids the backend does not hold; use `add` for
    /// new causes.
    pub fn update(&self, record: &CauseRecord) -> Result<CauseRecord, RegistryError> {
        let id = record.require_id().map_err(KbError::from)?;
        let stored = self.registry.write(|kb| {
            kb.get(id)?;
            kb.save(record)
        })?;
        info!("event=cause_update module=service status=ok id={id}");
        self.refresh();
        Ok(stored)
    }

    pub fn remove(&self, id: &CauseId) -> Result<CauseRecord, RegistryError> {
        let removed = self.registry.write(|kb| kb.remove(id))?;
        info!("event=cause_remove module=service status=ok id={id}");
        self.refresh();
        Ok(removed)
    }

    fn refresh(&self) {
        if let Err(err) = self.registry.refresh_causes() {
            warn!("event=cause_refresh module=service status=error error={err}");
        }
    }
}
