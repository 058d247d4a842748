//! Duodep benchmarking suite
//!
//! Benchmarks for parsing requirement files and version specs, flattening
//! include graphs and merging dependencies across platforms.

pub mod common;

pub use common::*;
