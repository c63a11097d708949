//! Use-case services over the catalog registry.
//!
//! # Responsibility
//! - Orchestrate backend calls into editor-level operations.
//! - Keep front ends decoupled from backend selection.

pub mod cause_service;
