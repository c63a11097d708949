//! Cause record domain model.
//!
//! # Responsibility
//! - Define the canonical record describing one known failure cause.
//! - Validate records before they reach any backend.
//!
//! # Invariants
//! - `id` is `None` until a backend assigns one, and stable afterwards.
//! - `name` is never blank.
//! - Every indication pattern compiles as a regular expression.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Opaque backend-assigned identifier of a cause.
///
/// The string form is backend-specific (decimal counters, UUIDs, ...). Only
/// non-blank values without surrounding whitespace are accepted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CauseId(String);

impl CauseId {
    pub fn new(value: impl Into<String>) -> Result<Self, CauseValidationError> {
        let value = value.into();
        if value.trim().is_empty() || value.trim() != value {
            return Err(CauseValidationError::InvalidId(value));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CauseId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CauseId {
    type Error = CauseValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for CauseId {
    type Error = CauseValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CauseId> for String {
    fn from(value: CauseId) -> Self {
        value.0
    }
}

/// Which part of a build log an indication is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicationKind {
    /// Pattern is applied line by line.
    BuildLog,
    /// Pattern is applied to the whole log; `.` also matches newlines.
    MultilineBuildLog,
}

/// One matching rule used by the scanner to recognize a cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indication {
    pub kind: IndicationKind,
    pub pattern: String,
}

impl Indication {
    pub fn build_log(pattern: impl Into<String>) -> Self {
        Self {
            kind: IndicationKind::BuildLog,
            pattern: pattern.into(),
        }
    }

    pub fn multiline(pattern: impl Into<String>) -> Self {
        Self {
            kind: IndicationKind::MultilineBuildLog,
            pattern: pattern.into(),
        }
    }

    /// Compiles the pattern with the flags implied by `kind`.
    pub fn compile(&self) -> Result<Regex, regex::Error> {
        match self.kind {
            IndicationKind::BuildLog => Regex::new(&self.pattern),
            IndicationKind::MultilineBuildLog => RegexBuilder::new(&self.pattern)
                .multi_line(true)
                .dot_matches_new_line(true)
                .build(),
        }
    }
}

/// Validation failures for cause records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CauseValidationError {
    InvalidId(String),
    MissingId,
    EmptyName,
    BlankCategory,
    EmptyPattern { index: usize },
    InvalidPattern { index: usize, message: String },
}

impl Display for CauseValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidId(value) => write!(f, "cause id is invalid: `{value}`"),
            Self::MissingId => write!(f, "cause id is required for this operation"),
            Self::EmptyName => write!(f, "cause name cannot be empty"),
            Self::BlankCategory => write!(f, "cause categories cannot contain blank entries"),
            Self::EmptyPattern { index } => {
                write!(f, "indication #{index} has an empty pattern")
            }
            Self::InvalidPattern { index, message } => {
                write!(f, "indication #{index} has an invalid pattern: {message}")
            }
        }
    }
}

impl Error for CauseValidationError {}

/// Canonical record for one known failure cause.
///
/// Equality compares every field; use [`CauseRecord::same_identity`] when
/// only the identity matters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CauseRecordWire")]
pub struct CauseRecord {
    /// Assigned by the backend on first save.
    pub id: Option<CauseId>,
    pub name: String,
    pub description: String,
    pub comment: String,
    pub categories: Vec<String>,
    pub indications: Vec<Indication>,
    /// Unix epoch milliseconds of the last scanner hit.
    pub last_occurred: Option<i64>,
}

impl CauseRecord {
    /// Creates an unsaved record with empty metadata.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: String::new(),
            comment: String::new(),
            categories: Vec::new(),
            indications: Vec::new(),
            last_occurred: None,
        }
    }

    /// Creates a record carrying an identity issued elsewhere.
    ///
    /// Used by import and migration paths.
    pub fn with_id(
        id: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, CauseValidationError> {
        let mut record = Self::new(name);
        record.id = Some(CauseId::new(id)?);
        Ok(record)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }

    pub fn with_indication(mut self, indication: Indication) -> Self {
        self.indications.push(indication);
        self
    }

    /// Checks record-level invariants.
    ///
    /// The id is not required here; `save` paths check it separately.
    pub fn validate(&self) -> Result<(), CauseValidationError> {
        if self.name.trim().is_empty() {
            return Err(CauseValidationError::EmptyName);
        }
        if self.categories.iter().any(|c| c.trim().is_empty()) {
            return Err(CauseValidationError::BlankCategory);
        }
        for (index, indication) in self.indications.iter().enumerate() {
            if indication.pattern.is_empty() {
                return Err(CauseValidationError::EmptyPattern { index });
            }
            if let Err(err) = indication.compile() {
                return Err(CauseValidationError::InvalidPattern {
                    index,
                    message: err.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Returns the id or `MissingId`.
    pub fn require_id(&self) -> Result<&CauseId, CauseValidationError> {
        self.id.as_ref().ok_or(CauseValidationError::MissingId)
    }

    /// True when both records carry the same assigned id.
    pub fn same_identity(&self, other: &CauseRecord) -> bool {
        matches!((&self.id, &other.id), (Some(a), Some(b)) if a == b)
    }

    /// Copy of this record with the id cleared.
    pub fn without_id(&self) -> CauseRecord {
        CauseRecord {
            id: None,
            ..self.clone()
        }
    }

    /// Identity projection used by edit listings.
    pub fn to_name(&self) -> Option<CauseName> {
        self.id.as_ref().map(|id| CauseName {
            id: id.clone(),
            name: self.name.clone(),
        })
    }
}

/// Lightweight `(id, name)` pair returned by edit listings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CauseName {
    pub id: CauseId,
    pub name: String,
}

#[derive(Deserialize)]
struct CauseRecordWire {
    #[serde(default)]
    id: Option<CauseId>,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    comment: String,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    indications: Vec<Indication>,
    #[serde(default)]
    last_occurred: Option<i64>,
}

impl TryFrom<CauseRecordWire> for CauseRecord {
    type Error = CauseValidationError;

    fn try_from(wire: CauseRecordWire) -> Result<Self, Self::Error> {
        let record = CauseRecord {
            id: wire.id,
            name: wire.name,
            description: wire.description,
            comment: wire.comment,
            categories: wire.categories,
            indications: wire.indications,
            last_occurred: wire.last_occurred,
        };
        record.validate()?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::{CauseId, CauseRecord, CauseValidationError, Indication};

    #[test]
    fn cause_id_rejects_blank_and_padded_values() {
        assert!(CauseId::new("").is_err());
        assert!(CauseId::new("   ").is_err());
        assert!(CauseId::new(" 7").is_err());
        assert_eq!(CauseId::new("7").unwrap().as_str(), "7");
    }

    #[test]
    fn multiline_indication_matches_across_lines() {
        let regex = Indication::multiline("^BUILD.*FAILED$").compile().unwrap();
        assert!(regex.is_match("BUILD step 1\nstep 2 FAILED"));

        let single = Indication::build_log("^BUILD.*FAILED$").compile().unwrap();
        assert!(!single.is_match("BUILD step 1\nstep 2 FAILED"));
    }

    #[test]
    fn validate_reports_first_broken_pattern_index() {
        let record = CauseRecord::new("OOM")
            .with_indication(Indication::build_log("OutOfMemoryError"))
            .with_indication(Indication::build_log("(unclosed"));

        match record.validate() {
            Err(CauseValidationError::InvalidPattern { index, .. }) => assert_eq!(index, 1),
            other => panic!("unexpected validation result: {other:?}"),
        }
    }

    #[test]
    fn same_identity_requires_assigned_ids() {
        let a = CauseRecord::new("a");
        let b = CauseRecord::new("a");
        assert!(!a.same_identity(&b));

        let c = CauseRecord::with_id("1", "first").unwrap();
        let d = CauseRecord::with_id("1", "renamed").unwrap();
        assert!(c.same_identity(&d));
        assert_ne!(c, d);
    }
}
