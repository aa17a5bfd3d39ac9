//! Warnings and errors collected during a synthesis run.
//!
//! Validation problems are gathered rather than returned one at a time, so
//! a user sees every port conflict and cycle in a single pass.

use std::fmt;

use berth_common::error::BerthError;
use serde::Serialize;

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Output is still produced.
    Warning,
    /// Output is withheld.
    Error,
}

/// A single finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Severity.
    pub severity: Severity,
    /// Service the finding is about, if any.
    pub service: Option<String>,
    /// Human-readable description.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        match &self.service {
            Some(service) => write!(f, "{level} [{service}]: {}", self.message),
            None => write!(f, "{level}: {}", self.message),
        }
    }
}

/// Ordered collection of diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a warning.
    pub fn warn(&mut self, service: Option<&str>, message: impl Into<String>) {
        self.push(Severity::Warning, service, message.into());
    }

    /// Records an error.
    pub fn error(&mut self, service: Option<&str>, message: impl Into<String>) {
        self.push(Severity::Error, service, message.into());
    }

    fn push(&mut self, severity: Severity, service: Option<&str>, message: String) {
        self.entries.push(Diagnostic {
            severity,
            service: service.map(str::to_string),
            message,
        });
    }

    /// All entries, in the order they were recorded.
    #[must_use]
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// Warnings only.
    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(|d| d.severity == Severity::Warning)
    }

    /// Errors only.
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(|d| d.severity == Severity::Error)
    }

    /// Whether any error was recorded.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Converts the recorded errors into a single validation error.
    ///
    /// Returns `None` if there are no errors.
    #[must_use]
    pub fn to_error(&self) -> Option<BerthError> {
        let problems: Vec<String> = self.errors().map(ToString::to_string).collect();
        (!problems.is_empty()).then_some(BerthError::Validation { problems })
    }
}
