//! # berth-common
//!
//! Shared data model, error definitions, settings, and constants used
//! across the berth workspace.
//!
//! This crate is the leaf of the dependency graph: it depends on no other
//! internal crate and defines the service descriptions the synthesis
//! engine consumes.

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
