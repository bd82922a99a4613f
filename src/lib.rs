//! Batch stock screener.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod analysis;
pub mod config;
pub mod data;
pub mod indicators;
pub mod screening;
pub mod types;
