//! Compose assembler: turns descriptions into the service, volume, and
//! dependency model.
//!
//! Structural problems (bad names, missing image, unknown providers) abort
//! immediately. Everything found after that is collected into
//! [`Diagnostics`] so all problems surface in one pass.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use berth_common::config::{BerthConfig, OutputLayout};
use berth_common::error::{BerthError, Result};
use berth_common::types::{PortMapping, ServiceDescription, VolumeSpec};

use crate::companion::{self, Companion};
use crate::diagnostics::Diagnostics;
use crate::domain;
use crate::graph::DependencyGraph;
use crate::namer::ServiceNamer;
use crate::ports::PortRegistry;
use crate::provider::{InfraRequirement, ProviderRegistry};
use crate::service::{ServiceSource, SynthesizedService};

/// Mutable state of one synthesis run.
///
/// Everything here, the namer included, is created per run and dropped with
/// it.
#[derive(Debug, Default)]
pub struct Assembly {
    services: BTreeMap<String, SynthesizedService>,
    graph: DependencyGraph,
    ports: PortRegistry,
    named_volumes: BTreeSet<String>,
    namer: ServiceNamer,
    diagnostics: Diagnostics,
}

impl Assembly {
    /// Creates an empty assembly.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every synthesized service, by name.
    #[must_use]
    pub const fn services(&self) -> &BTreeMap<String, SynthesizedService> {
        &self.services
    }

    /// Looks up a synthesized service.
    #[must_use]
    pub fn service(&self, name: &str) -> Option<&SynthesizedService> {
        self.services.get(name)
    }

    /// Dependency graph over synthesized services.
    #[must_use]
    pub const fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Host-port claims.
    #[must_use]
    pub const fn ports(&self) -> &PortRegistry {
        &self.ports
    }

    /// Named volumes to declare at the top level.
    #[must_use]
    pub const fn named_volumes(&self) -> &BTreeSet<String> {
        &self.named_volumes
    }

    /// Findings collected so far.
    #[must_use]
    pub const fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Mutable access to the findings.
    pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diagnostics
    }

    /// Canonical-name registry for this run.
    pub fn namer_mut(&mut self) -> &mut ServiceNamer {
        &mut self.namer
    }

    /// Adds `service`, registering it as a graph node.
    ///
    /// A service that already exists is left untouched.
    pub fn insert_service(&mut self, service: SynthesizedService) {
        if self.services.contains_key(&service.name) {
            tracing::debug!(service = %service.name, "service already synthesized");
            return;
        }
        let _ = self.graph.add_service(&service.name);
        let _ = self.services.insert(service.name.clone(), service);
    }

    /// Mutable access to one service.
    pub fn service_mut(&mut self, name: &str) -> Option<&mut SynthesizedService> {
        self.services.get_mut(name)
    }

    /// Records that `dependent` depends on `dependency`.
    pub fn depend(&mut self, dependent: &str, dependency: &str) {
        self.graph.add_dependency(dependent, dependency);
        if let Some(service) = self.services.get_mut(dependent) {
            service.add_dependency(dependency);
        }
    }

    /// Merges `vars` into `service`'s environment, last write winning.
    pub fn merge_environment(&mut self, service: &str, vars: BTreeMap<String, String>) {
        if let Some(svc) = self.services.get_mut(service) {
            svc.merge_environment(vars);
        }
    }

    /// Declares a named volume.
    pub fn add_named_volume(&mut self, name: &str) {
        let _ = self.named_volumes.insert(name.to_string());
    }

    /// Claims the host side of `mapping` for `service` and publishes it.
    ///
    /// A mapping without a host port publishes an ephemeral port and claims
    /// nothing. Conflicts are left in the port registry for batch reporting;
    /// reserved-port claims become warnings.
    pub fn claim_port(&mut self, service: &str, mapping: &PortMapping) {
        let Some(host) = mapping.host else {
            if let Some(svc) = self.services.get_mut(service) {
                svc.add_port(mapping.to_string());
            }
            return;
        };
        let image = self
            .services
            .get(service)
            .and_then(SynthesizedService::image)
            .map(str::to_string);
        match self.ports.register_port_for_image(host, service, image.as_deref()) {
            Ok(warning) => {
                if let Some(warning) = warning {
                    self.diagnostics.warn(Some(service), warning.to_string());
                }
                if let Some(svc) = self.services.get_mut(service) {
                    svc.add_port(mapping.to_string());
                }
            }
            Err(err) => tracing::debug!(service, error = %err, "host port not granted"),
        }
    }
}

/// Builds an [`Assembly`] from descriptions.
#[derive(Debug)]
pub struct Assembler<'a> {
    config: &'a BerthConfig,
    layout: &'a OutputLayout,
    registry: &'a ProviderRegistry,
    project: &'a str,
}

/// A description that passed structural validation.
struct Checked<'d> {
    description: &'d ServiceDescription,
    requirements: Vec<InfraRequirement>,
    companion: Option<Companion>,
}

impl<'a> Assembler<'a> {
    /// Creates an assembler for `project`.
    #[must_use]
    pub const fn new(
        config: &'a BerthConfig,
        layout: &'a OutputLayout,
        registry: &'a ProviderRegistry,
        project: &'a str,
    ) -> Self {
        Self {
            config,
            layout,
            registry,
            project,
        }
    }

    /// Assembles every description, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for the first structurally invalid
    /// description. Later problems are recorded in the assembly's
    /// diagnostics instead.
    pub fn assemble(&self, descriptions: &[ServiceDescription]) -> Result<Assembly> {
        let checked = self.check(descriptions)?;
        let mut assembly = Assembly::new();

        // Roots enter the graph in declaration order, ahead of any infra node.
        for entry in &checked {
            let _ = assembly.graph.add_service(&entry.description.name);
        }
        for entry in &checked {
            self.assemble_one(&mut assembly, entry)?;
        }
        Self::wire_needs(&mut assembly, &checked);

        tracing::debug!(
            services = assembly.services.len(),
            volumes = assembly.named_volumes.len(),
            edges = assembly.graph.edge_count(),
            "assembled"
        );
        Ok(assembly)
    }

    /// Fail-fast structural validation.
    fn check<'d>(&self, descriptions: &'d [ServiceDescription]) -> Result<Vec<Checked<'d>>> {
        let mut seen = HashSet::new();
        let mut checked = Vec::with_capacity(descriptions.len());
        for description in descriptions {
            validate_name(&description.name)?;
            if !seen.insert(description.name.as_str()) {
                return Err(BerthError::config(format!(
                    "service \"{}\" is declared more than once",
                    description.name
                )));
            }
            match (&description.image, &description.build) {
                (Some(_), Some(_)) => {
                    return Err(BerthError::config(format!(
                        "service \"{}\" sets both image and build",
                        description.name
                    )));
                }
                (None, None) => {
                    return Err(BerthError::config(format!(
                        "service \"{}\" needs an image or a build path",
                        description.name
                    )));
                }
                _ => {}
            }
            let requirements = description
                .requirements()
                .into_iter()
                .map(|(field, raw)| self.registry.parse_requirement(field, raw))
                .collect::<Result<Vec<_>>>()?;
            let companion = description.runtime.as_deref().map(Companion::parse).transpose()?;
            checked.push(Checked {
                description,
                requirements,
                companion,
            });
        }

        let mut reserved: HashSet<String> = checked
            .iter()
            .flat_map(|c| &c.requirements)
            .map(|r| r.provider.canonical_name(&r.version))
            .collect();
        let _ = reserved.insert(self.config.proxy_service.clone());
        for entry in &checked {
            let name = &entry.description.name;
            if reserved.contains(name) {
                return Err(BerthError::config(format!(
                    "service name \"{name}\" is reserved for a generated service"
                )));
            }
            if entry.companion.is_some() {
                let companion = Companion::service_name(name);
                if seen.contains(companion.as_str()) {
                    return Err(BerthError::config(format!(
                        "service \"{companion}\" collides with the runtime companion of \"{name}\""
                    )));
                }
            }
        }
        Ok(checked)
    }

    fn assemble_one(&self, assembly: &mut Assembly, entry: &Checked<'_>) -> Result<()> {
        let description = entry.description;
        let name = description.name.as_str();

        // 1. primary service
        let source = match (&description.image, &description.build) {
            (Some(image), _) => ServiceSource::Image(image.clone()),
            (None, Some(build)) => ServiceSource::Build(self.layout.absolutize(build)),
            (None, None) => return Err(BerthError::config(format!("service \"{name}\" has no source"))),
        };
        let mut service = SynthesizedService::new(name.to_string(), source);
        service.command.clone_from(&description.command);
        service.merge_environment(description.environment.clone());
        if let Some(folder) = &description.source {
            service.add_volume(self.source_mount(folder));
        }
        assembly.insert_service(service);

        // 2. host ports, only without a routable hostname
        if description.has_hostname() {
            if !description.ports.is_empty() || description.port.is_some() {
                tracing::debug!(service = name, "host ports replaced by proxy routing");
            }
        } else {
            for mapping in host_mappings(description) {
                assembly.claim_port(name, &mapping);
            }
        }

        // 3. shared infrastructure
        for requirement in &entry.requirements {
            let _ = requirement
                .provider
                .attach(assembly, name, requirement, self.project)?;
        }

        // 4. companion runtime
        if let Some(companion) = &entry.companion {
            self.attach_companion(assembly, description, companion);
        }

        // 5. volumes
        for volume in &description.volumes {
            let mount = self.classify_volume(assembly, volume);
            if let Some(svc) = assembly.service_mut(name) {
                svc.add_volume(mount);
            }
        }
        Ok(())
    }

    fn source_mount(&self, folder: &str) -> String {
        format!(
            "{}:{}",
            self.layout.absolutize(folder).display(),
            self.config.source_target
        )
    }

    fn classify_volume(&self, assembly: &mut Assembly, volume: &VolumeSpec) -> String {
        match volume {
            VolumeSpec::Named { name, .. } => {
                assembly.add_named_volume(name);
                volume.to_string()
            }
            VolumeSpec::Bind {
                source,
                target,
                read_only,
            } => {
                let mode = if *read_only { ":ro" } else { "" };
                format!("{}:{target}{mode}", self.layout.absolutize(source).display())
            }
        }
    }

    fn attach_companion(&self, assembly: &mut Assembly, description: &ServiceDescription, companion: &Companion) {
        let frontend = description.name.as_str();
        let repository = description.image_repository().unwrap_or_default();
        if !companion::is_web_server(repository) {
            tracing::warn!(service = frontend, "runtime ignored: image is not a web server");
            assembly.diagnostics_mut().warn(
                Some(frontend),
                format!(
                    "runtime is only paired with web server images ({}); ignored",
                    companion::WEB_SERVERS.join(", ")
                ),
            );
            return;
        }
        let Some(primary) = assembly.service(frontend) else {
            return;
        };
        let name = Companion::service_name(frontend);
        let mut runtime = SynthesizedService::new(name.clone(), ServiceSource::Image(companion.image()));
        runtime.environment = primary.environment.clone();
        if let Some(folder) = &description.source {
            runtime.add_volume(self.source_mount(folder));
        }
        let infra = primary.dependencies.clone();
        assembly.insert_service(runtime);
        for dependency in &infra {
            assembly.depend(&name, dependency);
        }
        assembly.depend(frontend, &name);
        assembly.merge_environment(
            frontend,
            BTreeMap::from([(
                "PHP_FPM_HOST".to_string(),
                format!("{name}:{}", companion::FPM_PORT),
            )]),
        );
        tracing::debug!(service = frontend, companion = %name, "companion runtime attached");
    }

    /// Wires explicit `needs`, reporting names that resolve to nothing.
    fn wire_needs(assembly: &mut Assembly, checked: &[Checked<'_>]) {
        for entry in checked {
            let name = entry.description.name.as_str();
            for need in &entry.description.needs {
                let need = need.trim();
                if assembly.services.contains_key(need) {
                    assembly.depend(name, need);
                } else {
                    assembly
                        .diagnostics
                        .error(Some(name), format!("needs unknown service \"{need}\""));
                }
            }
        }
    }
}

/// Host mappings requested by a description without a hostname.
///
/// Explicit mappings win; a bare `port` maps to the internal port the image
/// listens on.
fn host_mappings(description: &ServiceDescription) -> Vec<PortMapping> {
    if !description.ports.is_empty() {
        return description.ports.clone();
    }
    description
        .port
        .map(|port| {
            let container = description
                .image_repository()
                .and_then(domain::well_known_port)
                .map_or(port, u32::from);
            vec![PortMapping::new(port, container)]
        })
        .unwrap_or_default()
}

/// Checks that `name` matches `[A-Za-z0-9][A-Za-z0-9_-]*`.
///
/// # Errors
///
/// Returns [`BerthError::InvalidName`] otherwise.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| BerthError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    let mut chars = name.chars();
    match chars.next() {
        None => return Err(invalid("name is empty")),
        Some(first) if !first.is_ascii_alphanumeric() => {
            return Err(invalid("must start with a letter or digit"));
        }
        Some(_) => {}
    }
    if chars.any(|c| !(c.is_ascii_alphanumeric() || c == '_' || c == '-')) {
        return Err(invalid("only letters, digits, '_' and '-' are allowed"));
    }
    Ok(())
}
