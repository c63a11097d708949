//! Bulk copy of a catalog from one backend into another.
//!
//! # Responsibility
//! - Copy every cause of a source backend into a destination backend.
//! - Report per-record failures without aborting the remaining copies.
//!
//! # Invariants
//! - Source ids are preserved; the destination upserts them via `save`.
//! - Re-running against an unchanged source yields the same destination
//!   content.
//! - The source backend is only read.

use crate::backend::{KbError, KnowledgeBase};
use crate::model::cause::CauseId;
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Which half of a record copy failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStage {
    Read,
    Write,
}

impl CopyStage {
    fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

/// One record that could not be copied.
#[derive(Debug)]
pub struct RecordCopyFailure {
    pub id: CauseId,
    pub stage: CopyStage,
    pub error: KbError,
}

/// Successful migration summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub copied: Vec<CauseId>,
}

/// Migration did not copy the whole catalog.
#[derive(Debug)]
pub enum MigrationError {
    /// The source id listing could not be read; nothing was copied.
    SourceUnavailable(KbError),
    /// Some records failed; `copied` lists the ones that made it.
    Incomplete {
        copied: Vec<CauseId>,
        failures: Vec<RecordCopyFailure>,
    },
}

impl MigrationError {
    pub fn failures(&self) -> &[RecordCopyFailure] {
        match self {
            Self::SourceUnavailable(_) => &[],
            Self::Incomplete { failures, .. } => failures,
        }
    }
}

impl Display for MigrationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SourceUnavailable(err) => {
                write!(f, "migration source could not be listed: {err}")
            }
            Self::Incomplete { copied, failures } => {
                write!(
                    f,
                    "migration incomplete: {} copied, {} failed",
                    copied.len(),
                    failures.len()
                )?;
                if let Some(first) = failures.first() {
                    write!(
                        f,
                        " (first: {} during {}: {})",
                        first.id,
                        first.stage.as_str(),
                        first.error
                    )?;
                }
                Ok(())
            }
        }
    }
}

impl Error for MigrationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::SourceUnavailable(err) => Some(err),
            Self::Incomplete { failures, .. } => failures
                .first()
                .map(|failure| &failure.error as &(dyn Error + 'static)),
        }
    }
}

/// Copies every cause from `source` into `destination`.
///
/// Records are independent, so copy order is unspecified. A failed record
/// is reported and the rest are still attempted; the caller decides what an
/// incomplete migration means.
pub fn migrate(
    source: &dyn KnowledgeBase,
    destination: &dyn KnowledgeBase,
) -> Result<MigrationReport, MigrationError> {
    let started_at = Instant::now();
    info!(
        "event=migration module=migrate status=start from={} to={}",
        source.type_id(),
        destination.type_id()
    );

    let names = source.list_for_edit().map_err(|err| {
        warn!("event=migration module=migrate status=error stage=list error={err}");
        MigrationError::SourceUnavailable(err)
    })?;

    let mut copied = Vec::with_capacity(names.len());
    let mut failures = Vec::new();
    for name in names {
        let record = match source.get(&name.id) {
            Ok(record) => record,
            Err(error) => {
                warn!(
                    "event=migration_record module=migrate status=error stage=read id={} error={error}",
                    name.id
                );
                failures.push(RecordCopyFailure {
                    id: name.id,
                    stage: CopyStage::Read,
                    error,
                });
                continue;
            }
        };

        match destination.save(&record) {
            Ok(_) => copied.push(name.id),
            Err(error) => {
                warn!(
                    "event=migration_record module=migrate status=error stage=write id={} error={error}",
                    name.id
                );
                failures.push(RecordCopyFailure {
                    id: name.id,
                    stage: CopyStage::Write,
                    error,
                });
            }
        }
    }

    let status = if failures.is_empty() { "ok" } else { "error" };
    info!(
        "event=migration module=migrate status={status} copied={} failed={} duration_ms={}",
        copied.len(),
        failures.len(),
        started_at.elapsed().as_millis()
    );

    if failures.is_empty() {
        Ok(MigrationReport { copied })
    } else {
        Err(MigrationError::Incomplete { copied, failures })
    }
}
