//! Service descriptions and the value types they are built from.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{BerthError, Result};

/// Declarative description of one application service.
///
/// Descriptions arrive already structurally parsed; the synthesis engine
/// still checks the invariants it depends on (name syntax, exactly one of
/// `image`/`build`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceDescription {
    /// Unique, identifier-safe service name.
    pub name: String,
    /// Container image reference.
    pub image: Option<String>,
    /// Build context path.
    pub build: Option<String>,
    /// External host port.
    pub port: Option<u32>,
    /// Explicit port mappings.
    pub ports: Vec<PortMapping>,
    /// Hostname or comma-separated hostnames routed through the proxy.
    pub hostname: Option<String>,
    /// Whether the routed hostnames are served over HTTPS.
    pub tls: bool,
    /// Database requirement, `kind[:version]`.
    pub database: Option<String>,
    /// Cache requirement, `kind[:version]`.
    pub cache: Option<String>,
    /// Search engine requirement, `kind[:version]`.
    pub search: Option<String>,
    /// Object storage requirement, `kind[:version]`.
    pub storage: Option<String>,
    /// Mail testing requirement, `kind[:version]`.
    pub mail: Option<String>,
    /// Explicit dependencies on other services.
    pub needs: Vec<String>,
    /// Environment variables.
    pub environment: BTreeMap<String, String>,
    /// Volume mounts.
    pub volumes: Vec<VolumeSpec>,
    /// Source folder mounted into the container.
    pub source: Option<String>,
    /// Application runtime paired with a static web server, `kind[:version]`.
    pub runtime: Option<String>,
    /// Command override.
    pub command: Option<Vec<String>>,
}

impl ServiceDescription {
    /// Creates a description with only a name and an image.
    #[must_use]
    pub fn with_image(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: Some(image.into()),
            ..Self::default()
        }
    }

    /// Literal hostnames, split on commas, with surrounding whitespace removed.
    #[must_use]
    pub fn hostnames(&self) -> Vec<&str> {
        self.hostname
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether at least one routable hostname is declared.
    #[must_use]
    pub fn has_hostname(&self) -> bool {
        !self.hostnames().is_empty()
    }

    /// Populated infrastructure requirement fields, in a fixed field order.
    #[must_use]
    pub fn requirements(&self) -> Vec<(InfraKind, &str)> {
        [
            (InfraKind::Database, self.database.as_deref()),
            (InfraKind::Cache, self.cache.as_deref()),
            (InfraKind::Search, self.search.as_deref()),
            (InfraKind::ObjectStorage, self.storage.as_deref()),
            (InfraKind::Mail, self.mail.as_deref()),
        ]
        .into_iter()
        .filter_map(|(kind, raw)| raw.map(str::trim).filter(|r| !r.is_empty()).map(|r| (kind, r)))
        .collect()
    }

    /// Repository name of the image, without registry, namespace, or tag.
    #[must_use]
    pub fn image_repository(&self) -> Option<&str> {
        self.image.as_deref().map(image_repository)
    }
}

/// Returns the repository name of an image reference.
///
/// `registry.local:5000/library/nginx:1.27` yields `nginx`.
#[must_use]
pub fn image_repository(image: &str) -> &str {
    let last = image.rsplit('/').next().unwrap_or(image);
    last.split(['@', ':']).next().unwrap_or(last)
}

/// Category of shared backing infrastructure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfraKind {
    /// SQL database.
    Database,
    /// Key-value cache.
    Cache,
    /// Search engine.
    Search,
    /// S3-compatible object storage.
    ObjectStorage,
    /// Mail-catching SMTP server.
    Mail,
}

impl fmt::Display for InfraKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = match self {
            Self::Database => "database",
            Self::Cache => "cache",
            Self::Search => "search",
            Self::ObjectStorage => "storage",
            Self::Mail => "mail",
        };
        f.write_str(field)
    }
}

/// A `[ip:][host:]container[/protocol]` port mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PortMappingRepr", into = "String")]
pub struct PortMapping {
    /// Host interface to bind.
    pub host_ip: Option<String>,
    /// Host-side port.
    pub host: Option<u32>,
    /// Container-side port.
    pub container: u32,
    /// Transport protocol (`tcp`/`udp`).
    pub protocol: Option<String>,
}

impl PortMapping {
    /// Maps `host` to `container` over TCP on all interfaces.
    #[must_use]
    pub const fn new(host: u32, container: u32) -> Self {
        Self {
            host_ip: None,
            host: Some(host),
            container,
            protocol: None,
        }
    }

    /// Parses the short compose syntax.
    ///
    /// # Errors
    ///
    /// Returns an error if a component is not a number or the container
    /// port is outside 1-65535.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| BerthError::config(format!("invalid port mapping \"{raw}\": {reason}"));
        let (spec, protocol) = match raw.trim().split_once('/') {
            Some((spec, proto)) => (spec, Some(proto.to_ascii_lowercase())),
            None => (raw.trim(), None),
        };
        let number = |s: &str| s.parse::<u32>().map_err(|_| invalid("not a number"));

        let parts: Vec<&str> = spec.rsplitn(3, ':').collect();
        let (host_ip, host, container) = match parts.as_slice() {
            [container] => (None, None, number(*container)?),
            [container, host] => (None, Some(number(*host)?), number(*container)?),
            [container, host, ip] => (
                Some((*ip).to_string()),
                Some(number(*host)?),
                number(*container)?,
            ),
            _ => return Err(invalid("empty")),
        };
        if container == 0 || container > u32::from(u16::MAX) {
            return Err(invalid("container port out of range"));
        }
        Ok(Self {
            host_ip,
            host,
            container,
            protocol,
        })
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ip) = &self.host_ip {
            write!(f, "{ip}:")?;
        }
        if let Some(host) = self.host {
            write!(f, "{host}:")?;
        }
        write!(f, "{}", self.container)?;
        if let Some(proto) = &self.protocol {
            write!(f, "/{proto}")?;
        }
        Ok(())
    }
}

impl From<PortMapping> for String {
    fn from(mapping: PortMapping) -> Self {
        mapping.to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortMappingRepr {
    Number(u32),
    Text(String),
}

impl TryFrom<PortMappingRepr> for PortMapping {
    type Error = BerthError;

    fn try_from(repr: PortMappingRepr) -> Result<Self> {
        match repr {
            PortMappingRepr::Number(n) => Self::parse(&n.to_string()),
            PortMappingRepr::Text(s) => Self::parse(&s),
        }
    }
}

/// A volume mount, either a named volume or a bind mount.
///
/// Project files may use the explicit tagged form
/// (`{type: named, name: data, target: /data}`) or the compose short
/// syntax, which is classified by [`VolumeSpec::infer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "VolumeRepr", into = "String")]
pub enum VolumeSpec {
    /// A persistent volume managed by the container tool.
    Named {
        /// Volume name.
        name: String,
        /// Container path.
        target: String,
        /// Mount read-only.
        read_only: bool,
    },
    /// A host path mounted into the container.
    Bind {
        /// Host path as written (resolved later against the working directory).
        source: String,
        /// Container path.
        target: String,
        /// Mount read-only.
        read_only: bool,
    },
}

impl VolumeSpec {
    /// Classifies a short-syntax volume string.
    ///
    /// The source (text before the first `:`) is a bind mount when it
    /// contains a path separator or starts with a relative-path marker
    /// (`.` or `~`); any other token is a named volume.
    ///
    /// # Errors
    ///
    /// Returns an error if the target is missing or the mode is not `ro`/`rw`.
    pub fn infer(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| BerthError::config(format!("invalid volume \"{raw}\": {reason}"));
        let mut parts = raw.trim().splitn(3, ':');
        let source = parts.next().unwrap_or_default();
        let target = parts.next().ok_or_else(|| invalid("missing container path"))?;
        let read_only = match parts.next() {
            None | Some("rw") => false,
            Some("ro") => true,
            Some(_) => return Err(invalid("mode must be ro or rw")),
        };
        if source.is_empty() || target.is_empty() {
            return Err(invalid("source and target must be non-empty"));
        }
        if is_path_like(source) {
            Ok(Self::Bind {
                source: source.into(),
                target: target.into(),
                read_only,
            })
        } else {
            Ok(Self::Named {
                name: source.into(),
                target: target.into(),
                read_only,
            })
        }
    }
}

fn is_path_like(source: &str) -> bool {
    source.contains('/') || source.contains('\\') || source.starts_with('.') || source.starts_with('~')
}

impl fmt::Display for VolumeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (source, target, read_only) = match self {
            Self::Named {
                name,
                target,
                read_only,
            } => (name, target, *read_only),
            Self::Bind {
                source,
                target,
                read_only,
            } => (source, target, *read_only),
        };
        write!(f, "{source}:{target}")?;
        if read_only {
            f.write_str(":ro")?;
        }
        Ok(())
    }
}

impl From<VolumeSpec> for String {
    fn from(spec: VolumeSpec) -> Self {
        spec.to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VolumeRepr {
    Text(String),
    Tagged(TaggedVolume),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
enum TaggedVolume {
    Named {
        name: String,
        target: String,
        #[serde(default)]
        read_only: bool,
    },
    Bind {
        source: String,
        target: String,
        #[serde(default)]
        read_only: bool,
    },
}

impl TryFrom<VolumeRepr> for VolumeSpec {
    type Error = BerthError;

    fn try_from(repr: VolumeRepr) -> Result<Self> {
        match repr {
            VolumeRepr::Text(raw) => Self::infer(&raw),
            VolumeRepr::Tagged(TaggedVolume::Named {
                name,
                target,
                read_only,
            }) => Ok(Self::Named {
                name,
                target,
                read_only,
            }),
            VolumeRepr::Tagged(TaggedVolume::Bind {
                source,
                target,
                read_only,
            }) => Ok(Self::Bind {
                source,
                target,
                read_only,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostnames_split_on_commas() {
        let desc = ServiceDescription {
            hostname: Some(" shop.test, admin.shop.test ,".into()),
            ..ServiceDescription::with_image("web", "nginx")
        };
        assert_eq!(desc.hostnames(), vec!["shop.test", "admin.shop.test"]);
        assert!(desc.has_hostname());
    }

    #[test]
    fn blank_hostname_is_not_routable() {
        let desc = ServiceDescription {
            hostname: Some("  ".into()),
            ..ServiceDescription::with_image("web", "nginx")
        };
        assert!(!desc.has_hostname());
    }

    #[test]
    fn requirements_follow_field_order() {
        let desc = ServiceDescription {
            mail: Some("mailpit".into()),
            database: Some("postgres:15".into()),
            cache: Some(String::new()),
            ..ServiceDescription::with_image("app", "php")
        };
        assert_eq!(
            desc.requirements(),
            vec![(InfraKind::Database, "postgres:15"), (InfraKind::Mail, "mailpit")]
        );
    }

    #[test]
    fn image_repository_strips_registry_and_tag() {
        assert_eq!(image_repository("nginx"), "nginx");
        assert_eq!(image_repository("nginx:1.27-alpine"), "nginx");
        assert_eq!(image_repository("registry.local:5000/library/nginx:1.27"), "nginx");
        assert_eq!(image_repository("bitnami/postgresql@sha256:abc"), "postgresql");
    }

    #[test]
    fn port_mapping_forms() {
        assert_eq!(PortMapping::parse("80").expect("parse"), PortMapping {
            host_ip: None,
            host: None,
            container: 80,
            protocol: None,
        });
        assert_eq!(PortMapping::parse("8080:80").expect("parse"), PortMapping::new(8080, 80));
        let full = PortMapping::parse("127.0.0.1:5353:53/UDP").expect("parse");
        assert_eq!(full.host_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(full.host, Some(5353));
        assert_eq!(full.protocol.as_deref(), Some("udp"));
        assert_eq!(full.to_string(), "127.0.0.1:5353:53/udp");
    }

    #[test]
    fn port_mapping_rejects_garbage() {
        assert!(PortMapping::parse("http:80").is_err());
        assert!(PortMapping::parse("8080:0").is_err());
        assert!(PortMapping::parse("8080:70000").is_err());
    }

    #[test]
    fn port_mapping_keeps_out_of_range_host_for_the_registry() {
        let mapping = PortMapping::parse("70000:80").expect("parse");
        assert_eq!(mapping.host, Some(70_000));
    }

    #[test]
    fn volume_inference() {
        assert!(matches!(
            VolumeSpec::infer("pgdata:/var/lib/postgresql/data").expect("infer"),
            VolumeSpec::Named { ref name, .. } if name == "pgdata"
        ));
        assert!(matches!(
            VolumeSpec::infer("./storage:/app/storage").expect("infer"),
            VolumeSpec::Bind { .. }
        ));
        assert!(matches!(
            VolumeSpec::infer("/var/log:/logs:ro").expect("infer"),
            VolumeSpec::Bind { read_only: true, .. }
        ));
        assert!(matches!(
            VolumeSpec::infer("~/.cache:/cache").expect("infer"),
            VolumeSpec::Bind { .. }
        ));
    }

    #[test]
    fn dotted_volume_name_is_classified_as_bind_mount() {
        // A named volume starting with a dot reads as a relative path.
        assert!(matches!(
            VolumeSpec::infer(".data:/data").expect("infer"),
            VolumeSpec::Bind { .. }
        ));
    }

    #[test]
    fn volume_requires_target_and_valid_mode() {
        assert!(VolumeSpec::infer("pgdata").is_err());
        assert!(VolumeSpec::infer("pgdata:/data:rx").is_err());
    }

    #[test]
    fn description_deserializes_from_yaml() {
        let yaml = r"
name: web
image: nginx:alpine
ports: ['8080:80', 9000]
hostname: shop.test
tls: true
database: postgres:15
volumes:
  - ./public:/usr/share/nginx/html:ro
  - {type: named, name: uploads, target: /uploads}
environment:
  APP_ENV: local
";
        let desc: ServiceDescription = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(desc.ports, vec![PortMapping::new(8080, 80), PortMapping::parse("9000").expect("parse")]);
        assert!(desc.tls);
        assert_eq!(desc.volumes.len(), 2);
        assert!(matches!(desc.volumes[1], VolumeSpec::Named { ref name, .. } if name == "uploads"));
        assert_eq!(desc.environment.get("APP_ENV").map(String::as_str), Some("local"));
    }

    #[test]
    fn description_serializes_to_json_short_syntax() {
        let desc = ServiceDescription {
            ports: vec![PortMapping::new(8080, 80)],
            volumes: vec![VolumeSpec::infer("data:/data").expect("infer")],
            ..ServiceDescription::with_image("web", "nginx")
        };
        let json = serde_json::to_value(&desc).expect("serialize");
        assert_eq!(json["ports"][0], "8080:80");
        assert_eq!(json["volumes"][0], "data:/data");
    }
}
