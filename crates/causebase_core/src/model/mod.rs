//! Domain model for the failure-cause catalog.
//!
//! # Responsibility
//! - Define the record shape shared by every backend.
//! - Keep validation next to the data it protects.
//!
//! # Invariants
//! - Records are validated before persistence and after deserialization.

pub mod cause;
