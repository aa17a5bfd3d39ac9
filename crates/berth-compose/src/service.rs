//! In-memory model of a synthesized container.

use std::collections::BTreeMap;
use std::path::PathBuf;

use berth_common::types::image_repository;
use serde::Serialize;

/// Where a container's filesystem comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceSource {
    /// A registry image.
    Image(String),
    /// A build context (absolute path).
    Build(PathBuf),
}

/// Container health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthProbe {
    /// Probe command in compose `test` form.
    pub test: Vec<String>,
    /// Time between probes.
    pub interval: String,
    /// Probe timeout.
    pub timeout: String,
    /// Failures before the container is unhealthy.
    pub retries: u32,
}

impl HealthProbe {
    /// A probe with the defaults used for shared infrastructure.
    #[must_use]
    pub fn new<I, S>(test: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            test: test.into_iter().map(Into::into).collect(),
            interval: "5s".into(),
            timeout: "5s".into(),
            retries: 10,
        }
    }
}

/// A container in the generated stack, built once per name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SynthesizedService {
    /// Service name.
    pub name: String,
    /// Image or build context.
    pub source: ServiceSource,
    /// Command override.
    pub command: Option<Vec<String>>,
    /// Merged environment.
    pub environment: BTreeMap<String, String>,
    /// Host port mappings.
    pub ports: Vec<String>,
    /// Volume mounts in short syntax.
    pub volumes: Vec<String>,
    /// Extra DNS names on the shared network.
    pub network_aliases: Vec<String>,
    /// Direct dependencies, in recording order.
    pub dependencies: Vec<String>,
    /// Health probe.
    pub healthcheck: Option<HealthProbe>,
    /// Restart policy.
    pub restart: Option<String>,
}

impl SynthesizedService {
    /// Creates a service with nothing but a name and source.
    #[must_use]
    pub const fn new(name: String, source: ServiceSource) -> Self {
        Self {
            name,
            source,
            command: None,
            environment: BTreeMap::new(),
            ports: Vec::new(),
            volumes: Vec::new(),
            network_aliases: Vec::new(),
            dependencies: Vec::new(),
            healthcheck: None,
            restart: None,
        }
    }

    /// Image reference, if the service is image-based.
    #[must_use]
    pub fn image(&self) -> Option<&str> {
        match &self.source {
            ServiceSource::Image(image) => Some(image),
            ServiceSource::Build(_) => None,
        }
    }

    /// Repository name of the image, if image-based.
    #[must_use]
    pub fn image_repository(&self) -> Option<&str> {
        self.image().map(image_repository)
    }

    /// Merges `vars`; a later value for an existing key replaces it.
    pub fn merge_environment(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        self.environment.extend(vars);
    }

    /// Records a dependency once.
    pub fn add_dependency(&mut self, name: &str) {
        if !self.dependencies.iter().any(|d| d == name) {
            self.dependencies.push(name.to_string());
        }
    }

    /// Adds a volume mount once.
    pub fn add_volume(&mut self, mount: String) {
        if !self.volumes.contains(&mount) {
            self.volumes.push(mount);
        }
    }

    /// Adds a host port mapping once.
    pub fn add_port(&mut self, mapping: String) {
        if !self.ports.contains(&mapping) {
            self.ports.push(mapping);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> SynthesizedService {
        SynthesizedService::new("app".into(), ServiceSource::Image("nginx:alpine".into()))
    }

    #[test]
    fn environment_is_last_write_wins() {
        let mut svc = service();
        svc.merge_environment([("DB_HOST".to_string(), "old".to_string())]);
        svc.merge_environment([
            ("DB_HOST".to_string(), "postgres-15".to_string()),
            ("DB_PORT".to_string(), "5432".to_string()),
        ]);
        assert_eq!(svc.environment.get("DB_HOST").map(String::as_str), Some("postgres-15"));
        assert_eq!(svc.environment.len(), 2);
    }

    #[test]
    fn dependencies_and_volumes_are_unique() {
        let mut svc = service();
        svc.add_dependency("redis-7");
        svc.add_dependency("redis-7");
        svc.add_volume("data:/data".into());
        svc.add_volume("data:/data".into());
        assert_eq!(svc.dependencies, vec!["redis-7"]);
        assert_eq!(svc.volumes.len(), 1);
    }

    #[test]
    fn build_services_have_no_image() {
        let svc = SynthesizedService::new("api".into(), ServiceSource::Build("/srv/api".into()));
        assert!(svc.image().is_none());
        assert_eq!(service().image_repository(), Some("nginx"));
    }
}
