//! # duodep-core
//!
//! Core types and utilities shared across all duodep crates.
//!
//! This crate provides:
//! - Platform identifiers and selector expansion
//! - PEP 440 style versions and combinable version constraints
//! - Dependency entries, canonical records and the document model
//! - DuoError enum for unified error handling
//!
//! ## Architecture
//!
//! The crate is organized into modules:
//! - `types`: Core data types (Platform, Version, VersionConstraint, etc.)
//! - `error`: Error types and result aliases
//! - `utils`: Path helpers for document references

pub mod error;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use error::{DuoError, DuoResult};
pub use types::{
    CanonicalDependency, Document, EntryName, Manager, Origin, Platform, PlatformSet, RawEntry,
    Requirement, Side, Version, VersionConstraint,
};
