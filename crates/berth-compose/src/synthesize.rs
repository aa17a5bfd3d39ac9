//! Synthesis entry point.
//!
//! Stages, in order:
//! 1. structural validation and assembly (fail fast)
//! 2. domain planning and the proxy service
//! 3. batch validation of needs, hostnames, ports, and cycles
//! 4. certificates, only once validation has passed
//! 5. proxy configuration and the compose document

use std::collections::BTreeMap;

use berth_common::config::{BerthConfig, OutputLayout};
use berth_common::error::Result;
use berth_common::types::ServiceDescription;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::assembler::{Assembler, Assembly};
use crate::diagnostics::Diagnostics;
use crate::document::ComposeDocument;
use crate::domain::{DomainBinding, DomainRouter};
use crate::ports::PortError;
use crate::provider::ProviderRegistry;
use crate::proxy;
use crate::tls::{Certificate, CertificateManager, CertificateStore};

/// Result of a successful synthesis run.
#[derive(Debug, Clone, Serialize)]
pub struct Synthesis {
    /// Orchestration document.
    pub document: ComposeDocument,
    /// Reverse-proxy configuration, present only when routing is active.
    pub proxy_config: Option<String>,
    /// Certificates in use, the catch-all first.
    pub certificates: Vec<Certificate>,
    /// Effective hostname routes.
    pub bindings: Vec<DomainBinding>,
    /// Services ordered so each follows its dependencies.
    pub start_order: Vec<String>,
    /// Warnings collected along the way.
    pub diagnostics: Diagnostics,
}

impl Synthesis {
    /// Renders the orchestration document as YAML with its header.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn compose_yaml(&self) -> Result<String> {
        self.document.render()
    }
}

/// Runs synthesis against a certificate store.
#[derive(Debug)]
pub struct Synthesizer<'a, S: CertificateStore> {
    config: &'a BerthConfig,
    layout: &'a OutputLayout,
    registry: ProviderRegistry,
    store: S,
    now: Option<DateTime<Utc>>,
}

impl<'a, S: CertificateStore> Synthesizer<'a, S> {
    /// Creates a synthesizer evaluating certificates against the wall clock.
    pub fn new(config: &'a BerthConfig, layout: &'a OutputLayout, store: S) -> Self {
        Self {
            config,
            layout,
            registry: ProviderRegistry::new(),
            store,
            now: None,
        }
    }

    /// Evaluates certificate validity at `now` instead of the wall clock.
    #[must_use]
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    /// The certificate store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Synthesizes the stack for `descriptions`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for structurally invalid input, or a
    /// [`BerthError::Validation`](berth_common::error::BerthError::Validation)
    /// listing every port conflict, cycle, unknown dependency, and hostname
    /// collision found.
    pub fn synthesize(&mut self, descriptions: &[ServiceDescription], project: &str) -> Result<Synthesis> {
        tracing::info!(project, services = descriptions.len(), "synthesizing");

        let mut assembly =
            Assembler::new(self.config, self.layout, &self.registry, project).assemble(descriptions)?;

        let router = DomainRouter::new(self.config, self.layout);
        let bindings = router.plan(descriptions, &mut assembly);
        router.attach_proxy(&mut assembly, &bindings);

        let start_order = validate(&mut assembly)?;

        let mut diagnostics = assembly.diagnostics().clone();
        let (certificates, by_host, default_cert) = self.certificates(&bindings, &mut diagnostics);
        let bindings: Vec<DomainBinding> = bindings
            .into_iter()
            .map(|b| DomainBinding {
                tls: b.tls && by_host.contains_key(&b.hostname),
                ..b
            })
            .collect();
        let proxy_config = (!bindings.is_empty())
            .then(|| proxy::render_proxy_config(&bindings, &by_host, default_cert.as_ref()));

        let document = ComposeDocument::build(
            project,
            self.config,
            assembly.services(),
            assembly.named_volumes(),
        );
        tracing::info!(
            project,
            services = document.services.len(),
            routes = bindings.len(),
            certificates = certificates.len(),
            warnings = diagnostics.warnings().count(),
            "synthesis complete"
        );
        Ok(Synthesis {
            document,
            proxy_config,
            certificates,
            bindings,
            start_order,
            diagnostics,
        })
    }

    /// Ensures certificates for TLS bindings.
    ///
    /// A failure for one domain is a warning; that domain is served over
    /// plain HTTP.
    fn certificates(
        &mut self,
        bindings: &[DomainBinding],
        diagnostics: &mut Diagnostics,
    ) -> (Vec<Certificate>, BTreeMap<String, Certificate>, Option<Certificate>) {
        let mut all = Vec::new();
        let mut by_host = BTreeMap::new();
        if !bindings.iter().any(|b| b.tls) {
            return (all, by_host, None);
        }
        let now = self.now.unwrap_or_else(Utc::now);
        let mut manager = CertificateManager::new(&mut self.store, self.config, now);

        if let Err(err) = manager.ensure_shared_files() {
            tracing::warn!(error = %err, "shared TLS files not written");
            diagnostics.warn(None, err.to_string());
        }
        let default_cert = match manager.ensure_default() {
            Ok(cert) => {
                all.push(cert.clone());
                Some(cert)
            }
            Err(err) => {
                tracing::warn!(error = %err, "catch-all certificate unavailable");
                diagnostics.warn(None, err.to_string());
                None
            }
        };
        for binding in bindings.iter().filter(|b| b.tls) {
            match manager.ensure(&binding.hostname) {
                Ok(cert) => {
                    all.push(cert.clone());
                    let _ = by_host.insert(binding.hostname.clone(), cert);
                }
                Err(err) => {
                    tracing::warn!(hostname = %binding.hostname, error = %err, "serving over plain HTTP");
                    diagnostics.warn(
                        Some(&binding.service),
                        format!("{err}; {} is served over plain HTTP", binding.hostname),
                    );
                }
            }
        }
        (all, by_host, default_cert)
    }
}

/// Batch validation over the fully wired assembly.
///
/// Returns the start order when nothing failed.
fn validate(assembly: &mut Assembly) -> Result<Vec<String>> {
    let conflicts = assembly.ports().check_conflicts();
    for conflict in &conflicts {
        let (service, message) = match conflict {
            PortError::Conflict { port, requested_by, .. } => {
                let hint = assembly
                    .ports()
                    .suggest_port(*port)
                    .map_or_else(|| "no free port found".to_string(), |p| format!("try {p}"));
                (requested_by.clone(), format!("{conflict} ({hint})"))
            }
            PortError::OutOfRange { service, .. } => (service.clone(), conflict.to_string()),
        };
        assembly.diagnostics_mut().error(Some(&service), message);
    }
    for cycle in assembly.graph().check_cycles() {
        assembly.diagnostics_mut().error(None, cycle.to_string());
    }
    if let Some(err) = assembly.diagnostics().to_error() {
        tracing::warn!(problems = assembly.diagnostics().errors().count(), "validation failed");
        return Err(err);
    }
    assembly.graph().start_order()
}

/// Synthesizes `descriptions` with the built-in providers.
///
/// # Errors
///
/// See [`Synthesizer::synthesize`].
pub fn synthesize<S: CertificateStore>(
    descriptions: &[ServiceDescription],
    project: &str,
    config: &BerthConfig,
    layout: &OutputLayout,
    store: S,
) -> Result<Synthesis> {
    Synthesizer::new(config, layout, store).synthesize(descriptions, project)
}
