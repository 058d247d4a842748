//! Core data types for duodep.
//!
//! This module provides the fundamental types shared by every crate:
//! - Platforms, platform sets and selector expansion
//! - PEP 440 style versions and structured version constraints
//! - Dependency entries, canonical records and input documents

pub mod constraint;
pub mod dependency;
pub mod document;
pub mod platform;
pub mod source;
pub mod version;

// Re-export all public types
pub use constraint::{
    Bound, ConstraintConflict, ConstraintKind, Dialect, SpecialKind, SpecialPin,
    VersionConstraint, VersionRange,
};
pub use dependency::{
    looks_like_path, CanonicalDependency, EntryName, Manager, Origin, RawEntry, Requirement, Side,
};
pub use document::Document;
pub use platform::{expand, expand_all, Platform, PlatformSet, Selector};
pub use source::{DocumentSource, LocalPackage, LocalPackageKind, LocatedReference};
pub use version::{PreKind, PreRelease, Version, VersionError};
