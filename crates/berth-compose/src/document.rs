//! Serializable orchestration document.
//!
//! Field names follow the compose file format. Maps are ordered so the
//! rendered YAML is byte-stable for unchanged input.

use std::collections::{BTreeMap, BTreeSet};

use berth_common::config::BerthConfig;
use berth_common::constants;
use berth_common::error::Result;
use serde::Serialize;

use crate::service::{HealthProbe, ServiceSource, SynthesizedService};

/// Top-level document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposeDocument {
    /// Project name.
    pub name: String,
    /// Services by name.
    pub services: BTreeMap<String, ComposeService>,
    /// Networks by name.
    pub networks: BTreeMap<String, ComposeNetwork>,
    /// Named volumes.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, ComposeVolume>,
}

/// One service entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposeService {
    /// Image reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Build context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    /// Command override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Restart policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    /// Environment variables.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    /// Published ports.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    /// Volume mounts.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    /// Network membership.
    pub networks: BTreeMap<String, ServiceNetwork>,
    /// Start-up dependencies.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub depends_on: BTreeMap<String, DependsOn>,
    /// Health probe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthProbe>,
}

/// Per-service network attachment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceNetwork {
    /// Extra DNS names.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

/// Long-form `depends_on` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependsOn {
    /// `service_healthy` or `service_started`.
    pub condition: String,
}

/// A bridge network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposeNetwork {
    /// Network driver.
    pub driver: String,
    /// Address management.
    pub ipam: Ipam,
}

/// Network address management.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ipam {
    /// Subnet pools.
    pub config: Vec<IpamPool>,
}

/// A subnet pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpamPool {
    /// CIDR.
    pub subnet: String,
}

/// A named volume with default options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComposeVolume {}

impl ComposeDocument {
    /// Builds the document from synthesized services.
    #[must_use]
    pub fn build(
        project: &str,
        config: &BerthConfig,
        services: &BTreeMap<String, SynthesizedService>,
        named_volumes: &BTreeSet<String>,
    ) -> Self {
        let compose_services = services
            .values()
            .map(|svc| (svc.name.clone(), ComposeService::from_service(svc, services, config)))
            .collect();
        let network = ComposeNetwork {
            driver: "bridge".into(),
            ipam: Ipam {
                config: vec![IpamPool {
                    subnet: config.subnet.clone(),
                }],
            },
        };
        Self {
            name: project.to_string(),
            services: compose_services,
            networks: BTreeMap::from([(config.network_name.clone(), network)]),
            volumes: named_volumes
                .iter()
                .map(|name| (name.clone(), ComposeVolume::default()))
                .collect(),
        }
    }

    /// Renders YAML with the generated-file header.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn render(&self) -> Result<String> {
        let body = serde_yaml::to_string(self)?;
        Ok(format!("{}\n{body}", constants::GENERATED_HEADER))
    }
}

impl ComposeService {
    fn from_service(
        svc: &SynthesizedService,
        all: &BTreeMap<String, SynthesizedService>,
        config: &BerthConfig,
    ) -> Self {
        let (image, build) = match &svc.source {
            ServiceSource::Image(image) => (Some(image.clone()), None),
            ServiceSource::Build(path) => (None, Some(path.display().to_string())),
        };
        let depends_on = svc
            .dependencies
            .iter()
            .map(|dep| {
                let healthy = all.get(dep).is_some_and(|d| d.healthcheck.is_some());
                let condition = if healthy { "service_healthy" } else { "service_started" };
                (
                    dep.clone(),
                    DependsOn {
                        condition: condition.into(),
                    },
                )
            })
            .collect();
        Self {
            image,
            build,
            command: svc.command.clone(),
            restart: svc.restart.clone(),
            environment: svc.environment.clone(),
            ports: svc.ports.clone(),
            volumes: svc.volumes.clone(),
            networks: BTreeMap::from([(
                config.network_name.clone(),
                ServiceNetwork {
                    aliases: svc.network_aliases.clone(),
                },
            )]),
            depends_on,
            healthcheck: svc.healthcheck.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn services() -> BTreeMap<String, SynthesizedService> {
        let mut db = SynthesizedService::new("postgres-15".into(), ServiceSource::Image("postgres:15".into()));
        db.healthcheck = Some(HealthProbe::new(["CMD", "pg_isready"]));
        let mut cache = SynthesizedService::new("memcached-1.6".into(), ServiceSource::Image("memcached:1.6".into()));
        cache.restart = Some("unless-stopped".into());
        let mut app = SynthesizedService::new("app".into(), ServiceSource::Build("/work/app".into()));
        app.add_dependency("postgres-15");
        app.add_dependency("memcached-1.6");
        [db, cache, app].into_iter().map(|s| (s.name.clone(), s)).collect()
    }

    #[test]
    fn depends_on_uses_health_conditions() {
        let doc = ComposeDocument::build("shop", &BerthConfig::default(), &services(), &BTreeSet::new());
        let app = &doc.services["app"];
        assert_eq!(app.depends_on["postgres-15"].condition, "service_healthy");
        assert_eq!(app.depends_on["memcached-1.6"].condition, "service_started");
        assert_eq!(app.build.as_deref(), Some("/work/app"));
    }

    #[test]
    fn rendered_yaml_has_header_network_and_volumes() {
        let volumes = BTreeSet::from(["postgres-15-data".to_string()]);
        let doc = ComposeDocument::build("shop", &BerthConfig::default(), &services(), &volumes);
        let yaml = doc.render().expect("render");
        assert!(yaml.starts_with(constants::GENERATED_HEADER));
        assert!(yaml.contains("subnet: 172.28.0.0/16"), "got:\n{yaml}");
        assert!(yaml.contains("postgres-15-data: {}"), "got:\n{yaml}");
        assert!(yaml.contains("condition: service_healthy"));
        assert!(!yaml.contains("environment"));
    }

    #[test]
    fn volumes_section_is_omitted_when_empty() {
        let doc = ComposeDocument::build("shop", &BerthConfig::default(), &services(), &BTreeSet::new());
        let yaml = doc.render().expect("render");
        assert!(!yaml.contains("\nvolumes:"));
    }

    #[test]
    fn rendering_is_stable() {
        let doc = ComposeDocument::build("shop", &BerthConfig::default(), &services(), &BTreeSet::new());
        assert_eq!(doc.render().expect("first"), doc.render().expect("second"));
    }
}
