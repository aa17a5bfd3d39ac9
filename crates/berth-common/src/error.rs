//! Unified error types for the berth workspace.
//!
//! Modules with their own failure vocabulary (such as the port registry)
//! define a local enum and convert into [`BerthError`] at the boundary.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum BerthError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// An infrastructure requirement names a provider that does not exist
    /// for its field.
    #[error("unknown {field} provider \"{kind}\"")]
    UnknownProvider {
        /// Requirement field (`database`, `cache`, ...).
        field: String,
        /// Provider kind as written.
        kind: String,
    },

    /// An infrastructure requirement asks for a version the provider does
    /// not ship.
    #[error("unsupported {kind} version \"{version}\" (supported: {supported})")]
    UnsupportedVersion {
        /// Provider kind.
        kind: String,
        /// Requested version.
        version: String,
        /// Comma-separated list of supported versions.
        supported: String,
    },

    /// A service name is empty or contains characters that are not safe in
    /// a container or DNS name.
    #[error("invalid service name \"{name}\": {reason}")]
    InvalidName {
        /// Offending name.
        name: String,
        /// Why the name was rejected.
        reason: String,
    },

    /// One or more validation checks failed. All problems found in the run
    /// are reported together.
    #[error("validation failed:\n  - {}", problems.join("\n  - "))]
    Validation {
        /// Every problem found, in discovery order.
        problems: Vec<String>,
    },

    /// Generating or storing a TLS certificate failed.
    #[error("certificate for {domain} failed: {message}")]
    Certificate {
        /// Domain the certificate was for.
        domain: String,
        /// Description of the failure.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_yaml::Error,
    },
}

impl BerthError {
    /// Shorthand for a [`BerthError::Config`] error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, BerthError>;
