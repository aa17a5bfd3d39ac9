//! # berth-compose
//!
//! Synthesis engine turning service descriptions into a validated compose
//! configuration.
//!
//! Handles:
//! - **Provider**: Shared infrastructure kinds, versions, and wiring.
//! - **Namer**: Canonical names that deduplicate shared containers.
//! - **Graph**: Dependency graph, cycle detection, and start order.
//! - **Ports**: Host-port claims, reserved ports, and free-port probing.
//! - **Assembler**: Services, volumes, and edges from descriptions.
//! - **Domain**: Hostname routing and the reverse-proxy service.
//! - **TLS**: Self-signed certificates and their renewal policy.
//! - **Synthesize**: The end-to-end entry point.

pub mod assembler;
pub mod companion;
pub mod diagnostics;
pub mod document;
pub mod domain;
pub mod graph;
pub mod namer;
pub mod output;
pub mod ports;
pub mod provider;
pub mod proxy;
pub mod service;
pub mod synthesize;
pub mod tls;

pub use synthesize::{Synthesis, Synthesizer, synthesize};
