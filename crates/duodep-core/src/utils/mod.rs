//! Utility functions and helpers.
//!
//! Common functionality used across multiple duodep crates.

pub mod path;

// Re-export commonly used utilities
pub use path::{is_archive, normalize_path, split_path_and_extras};
