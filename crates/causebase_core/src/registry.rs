//! Process-wide catalog registry.
//!
//! # Responsibility
//! - Own the single active backend and its lifecycle state.
//! - Hold the cached working list handed to scanners.
//! - Switch backends with migration and rollback semantics.
//!
//! # Invariants
//! - Readers only clone an `Arc` under a lock; they never see a partially
//!   migrated backend or a partially replaced working list.
//! - A failed reconfiguration leaves the previous backend active.
//! - Reconfigurations are serialized; reads never wait on a migration.
//! - Writes hold the write gate shared and reconfiguration holds it
//!   exclusively from migration to swap, so no acknowledged write is left
//!   behind in a superseded backend.
//! - Only an `Active` backend accepts writes.

use crate::backend::{BackendConfig, BackendFactory, KbError, KbResult, KnowledgeBase};
use crate::migrate::{migrate, MigrationError, MigrationReport};
use crate::model::cause::{CauseId, CauseName, CauseRecord};
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

type WriteGate = Arc<RwLock<()>>;

/// Lifecycle of one backend instance inside the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    /// Built but not yet installed.
    Unconfigured,
    /// Serving reads and writes.
    Active,
    /// Replaced by another instance. Terminal.
    Superseded,
}

/// A backend instance plus its lifecycle state.
///
/// Implements [`KnowledgeBase`] itself: reads pass straight through, writes
/// wait for any running reconfiguration and fail once the instance is no
/// longer `Active`.
pub struct ManagedBackend {
    backend: Arc<dyn KnowledgeBase>,
    state: Mutex<BackendState>,
    gate: WriteGate,
}

impl ManagedBackend {
    fn new(backend: Arc<dyn KnowledgeBase>, gate: WriteGate) -> Self {
        Self {
            backend,
            state: Mutex::new(BackendState::Unconfigured),
            gate,
        }
    }

    pub fn state(&self) -> BackendState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves `from -> to`; returns false when the current state is not `from`.
    fn transition(&self, from: BackendState, to: BackendState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    /// Runs `op` on the wrapped backend if it is still `Active`.
    ///
    /// The caller must hold the write gate.
    fn write_active<T>(
        &self,
        op: impl FnOnce(&dyn KnowledgeBase) -> KbResult<T>,
    ) -> KbResult<T> {
        let state = self.state();
        if state != BackendState::Active {
            warn!(
                "event=backend_write module=registry status=rejected type={} state={state:?}",
                self.backend.type_id()
            );
            return Err(KbError::unavailable(
                self.backend.type_id(),
                format!("backend is {state:?} and no longer accepts writes"),
            ));
        }
        op(self.backend.as_ref())
    }

    fn gated_write<T>(&self, op: impl FnOnce(&dyn KnowledgeBase) -> KbResult<T>) -> KbResult<T> {
        let _gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        self.write_active(op)
    }
}

impl KnowledgeBase for ManagedBackend {
    fn type_id(&self) -> &'static str {
        self.backend.type_id()
    }

    fn config(&self) -> BackendConfig {
        self.backend.config()
    }

    fn list_for_scan(&self) -> KbResult<Vec<CauseRecord>> {
        self.backend.list_for_scan()
    }

    fn list_for_edit(&self) -> KbResult<Vec<CauseName>> {
        self.backend.list_for_edit()
    }

    fn get(&self, id: &CauseId) -> KbResult<CauseRecord> {
        self.backend.get(id)
    }

    fn add(&self, record: &CauseRecord) -> KbResult<CauseRecord> {
        self.gated_write(|kb| kb.add(record))
    }

    fn save(&self, record: &CauseRecord) -> KbResult<CauseRecord> {
        self.gated_write(|kb| kb.save(record))
    }

    fn remove(&self, id: &CauseId) -> KbResult<CauseRecord> {
        self.gated_write(|kb| kb.remove(id))
    }

    fn categories(&self) -> KbResult<Vec<String>> {
        self.backend.categories()
    }

    fn equivalent_config(&self, other: &dyn KnowledgeBase) -> bool {
        self.backend.equivalent_config(other)
    }
}

/// What a successful reconfiguration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconfigureOutcome {
    /// New config addresses the same storage; installed without migration.
    Replaced,
    /// Data was copied into the new backend before installing it.
    Migrated(MigrationReport),
}

#[derive(Debug)]
pub enum RegistryError {
    NotStarted,
    AlreadyStarted,
    Backend(KbError),
    Migration(MigrationError),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "catalog registry has not been started"),
            Self::AlreadyStarted => write!(f, "catalog registry is already started"),
            Self::Backend(err) => write!(f, "{err}"),
            Self::Migration(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NotStarted | Self::AlreadyStarted => None,
            Self::Backend(err) => Some(err),
            Self::Migration(err) => Some(err),
        }
    }
}

impl From<KbError> for RegistryError {
    fn from(value: KbError) -> Self {
        Self::Backend(value)
    }
}

impl From<MigrationError> for RegistryError {
    fn from(value: MigrationError) -> Self {
        Self::Migration(value)
    }
}

/// Holder of the active backend and the scanner working list.
///
/// Construct one per process and pass it to collaborators.
pub struct CatalogRegistry {
    factory: BackendFactory,
    initial_config: BackendConfig,
    active: RwLock<Option<Arc<ManagedBackend>>>,
    causes: RwLock<Arc<Vec<CauseRecord>>>,
    reconfigure_lock: Mutex<()>,
    write_gate: WriteGate,
}

impl CatalogRegistry {
    /// Creates an unstarted registry; call [`CatalogRegistry::start`] next.
    pub fn new(factory: BackendFactory, config: BackendConfig) -> Self {
        Self {
            factory,
            initial_config: config,
            active: RwLock::new(None),
            causes: RwLock::new(Arc::new(Vec::new())),
            reconfigure_lock: Mutex::new(()),
            write_gate: Arc::new(RwLock::new(())),
        }
    }

    pub fn factory(&self) -> &BackendFactory {
        &self.factory
    }

    /// Builds the configured backend and loads the working list from it.
    pub fn start(&self) -> Result<(), RegistryError> {
        let _guard = self
            .reconfigure_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.read_active().is_some() {
            return Err(RegistryError::AlreadyStarted);
        }

        let started_at = Instant::now();
        let type_id = self.initial_config.type_id.as_str();
        let managed = Arc::new(ManagedBackend::new(
            self.factory.build(&self.initial_config)?,
            Arc::clone(&self.write_gate),
        ));
        let records = managed.list_for_scan().map_err(|err| {
            error!("event=registry_start module=registry status=error type={type_id} error={err}");
            err
        })?;
        let count = records.len();

        managed.transition(BackendState::Unconfigured, BackendState::Active);
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Some(managed);
        self.set_causes(records);

        info!(
            "event=registry_start module=registry status=ok type={type_id} causes={count} duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Switches to the backend described by `config`.
    ///
    /// Non-equivalent configurations migrate every cause into the new
    /// backend first. Writes wait from the start of migration until the
    /// swap, then land in whichever backend is active. Any failure before
    /// the swap leaves the current backend active and is returned as-is.
    pub fn reconfigure(&self, config: &BackendConfig) -> Result<ReconfigureOutcome, RegistryError> {
        let _guard = self
            .reconfigure_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let current = self.active()?;
        let from = current.type_id();
        let to = config.type_id.as_str();
        info!("event=registry_reconfigure module=registry status=start from={from} to={to}");

        let candidate = self.factory.build(config).map_err(|err| {
            error!(
                "event=registry_reconfigure module=registry status=error stage=build from={from} to={to} error={err}"
            );
            RegistryError::Backend(err)
        })?;

        let outcome = {
            let _writes = self.write_gate.write().unwrap_or_else(PoisonError::into_inner);

            let outcome = if candidate.equivalent_config(current.backend.as_ref()) {
                ReconfigureOutcome::Replaced
            } else {
                let report = migrate(current.backend.as_ref(), candidate.as_ref())
                    .map_err(|err| {
                        error!(
                            "event=registry_reconfigure module=registry status=error stage=migrate from={from} to={to} error={err}"
                        );
                        RegistryError::Migration(err)
                    })?;
                ReconfigureOutcome::Migrated(report)
            };

            let next = Arc::new(ManagedBackend::new(candidate, Arc::clone(&self.write_gate)));
            let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
            next.transition(BackendState::Unconfigured, BackendState::Active);
            *active = Some(next);
            current.transition(BackendState::Active, BackendState::Superseded);
            outcome
        };

        if let Err(err) = self.refresh_causes() {
            warn!(
                "event=registry_reconfigure module=registry status=degraded stage=refresh error={err}"
            );
        }

        let migrated = match &outcome {
            ReconfigureOutcome::Replaced => 0,
            ReconfigureOutcome::Migrated(report) => report.copied.len(),
        };
        info!(
            "event=registry_reconfigure module=registry status=ok from={from} to={to} migrated={migrated}"
        );
        Ok(outcome)
    }

    /// Runs one write against whichever backend is active once any running
    /// reconfiguration has finished.
    ///
    /// `op` may combine several calls (read-then-write) that must all hit the
    /// same backend.
    pub fn write<T>(
        &self,
        op: impl FnOnce(&dyn KnowledgeBase) -> KbResult<T>,
    ) -> Result<T, RegistryError> {
        let _gate = self.write_gate.read().unwrap_or_else(PoisonError::into_inner);
        Ok(self.active()?.write_active(op)?)
    }

    /// Handle of the active backend.
    pub fn active(&self) -> Result<Arc<ManagedBackend>, RegistryError> {
        self.read_active().ok_or(RegistryError::NotStarted)
    }

    /// The active backend, for editors.
    ///
    /// The handle stops accepting writes once a reconfiguration supersedes it.
    pub fn backend(&self) -> Result<Arc<dyn KnowledgeBase>, RegistryError> {
        let active: Arc<dyn KnowledgeBase> = self.active()?;
        Ok(active)
    }

    pub fn config(&self) -> Result<BackendConfig, RegistryError> {
        Ok(self.active()?.config())
    }

    /// Snapshot of the working list.
    pub fn get_causes(&self) -> Arc<Vec<CauseRecord>> {
        Arc::clone(&self.causes.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replaces the working list with a copy of `causes`.
    pub fn set_causes(&self, causes: impl IntoIterator<Item = CauseRecord>) {
        let next = Arc::new(causes.into_iter().collect::<Vec<_>>());
        *self.causes.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Reloads the working list from the active backend.
    ///
    /// On failure the previous list is kept.
    pub fn refresh_causes(&self) -> Result<usize, RegistryError> {
        let backend = self.backend()?;
        let records = backend.list_for_scan().map_err(|err| {
            warn!(
                "event=registry_refresh module=registry status=error type={} error={err}",
                backend.type_id()
            );
            RegistryError::Backend(err)
        })?;
        let count = records.len();
        self.set_causes(records);
        Ok(count)
    }

    fn read_active(&self) -> Option<Arc<ManagedBackend>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
