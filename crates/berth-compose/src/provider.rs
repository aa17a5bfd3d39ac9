//! Shared infrastructure providers.
//!
//! One [`Provider`] variant per supported backing service. Static facts
//! (image, versions, ports) live in a lookup table; behaviour that differs
//! per provider (environment, health probes) is an exhaustive `match`, so
//! adding a variant forces every case to be handled.

use std::collections::BTreeMap;

use berth_common::error::{BerthError, Result};
use berth_common::types::{InfraKind, PortMapping};

use crate::assembler::Assembly;
use crate::namer::{self, NameClaim};
use crate::service::{HealthProbe, ServiceSource, SynthesizedService};

/// User created in every shared database.
pub const DEFAULT_USER: &str = "berth";

/// Password for [`DEFAULT_USER`] and root accounts.
pub const DEFAULT_PASSWORD: &str = "secret";

/// Supported shared-infrastructure providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Provider {
    /// PostgreSQL.
    Postgres,
    /// MySQL.
    Mysql,
    /// MariaDB.
    Mariadb,
    /// Redis.
    Redis,
    /// Memcached.
    Memcached,
    /// Meilisearch.
    Meilisearch,
    /// Elasticsearch.
    Elasticsearch,
    /// MinIO (S3-compatible object storage).
    Minio,
    /// Mailpit (SMTP catcher with web UI).
    Mailpit,
}

/// Static facts about a provider.
///
/// Rows of [`PROVIDERS`] are in [`Provider`] declaration order.
#[derive(Debug)]
struct ProviderSpec {
    provider: Provider,
    kind: InfraKind,
    name: &'static str,
    aliases: &'static [&'static str],
    repository: &'static str,
    default_version: &'static str,
    versions: &'static [&'static str],
    singleton: bool,
    port: u16,
    data_path: Option<&'static str>,
    published: &'static [u16],
}

const PROVIDERS: &[ProviderSpec] = &[
    ProviderSpec {
        provider: Provider::Postgres,
        kind: InfraKind::Database,
        name: "postgres",
        aliases: &["postgresql", "pgsql"],
        repository: "postgres",
        default_version: "16",
        versions: &["12", "13", "14", "15", "16", "17"],
        singleton: false,
        port: 5432,
        data_path: Some("/var/lib/postgresql/data"),
        published: &[],
    },
    ProviderSpec {
        provider: Provider::Mysql,
        kind: InfraKind::Database,
        name: "mysql",
        aliases: &[],
        repository: "mysql",
        default_version: "8.0",
        versions: &["5.7", "8.0", "8.4"],
        singleton: false,
        port: 3306,
        data_path: Some("/var/lib/mysql"),
        published: &[],
    },
    ProviderSpec {
        provider: Provider::Mariadb,
        kind: InfraKind::Database,
        name: "mariadb",
        aliases: &[],
        repository: "mariadb",
        default_version: "11",
        versions: &["10.6", "10.11", "11"],
        singleton: false,
        port: 3306,
        data_path: Some("/var/lib/mysql"),
        published: &[],
    },
    ProviderSpec {
        provider: Provider::Redis,
        kind: InfraKind::Cache,
        name: "redis",
        aliases: &[],
        repository: "redis",
        default_version: "7",
        versions: &["6", "7"],
        singleton: false,
        port: 6379,
        data_path: Some("/data"),
        published: &[],
    },
    ProviderSpec {
        provider: Provider::Memcached,
        kind: InfraKind::Cache,
        name: "memcached",
        aliases: &[],
        repository: "memcached",
        default_version: "1.6",
        versions: &["1.6"],
        singleton: false,
        port: 11211,
        data_path: None,
        published: &[],
    },
    ProviderSpec {
        provider: Provider::Meilisearch,
        kind: InfraKind::Search,
        name: "meilisearch",
        aliases: &["meili"],
        repository: "getmeili/meilisearch",
        default_version: "1.11",
        versions: &["1"],
        singleton: false,
        port: 7700,
        data_path: Some("/meili_data"),
        published: &[],
    },
    ProviderSpec {
        provider: Provider::Elasticsearch,
        kind: InfraKind::Search,
        name: "elasticsearch",
        aliases: &["elastic"],
        repository: "elasticsearch",
        default_version: "8.15.0",
        versions: &["7", "8"],
        singleton: false,
        port: 9200,
        data_path: Some("/usr/share/elasticsearch/data"),
        published: &[],
    },
    ProviderSpec {
        provider: Provider::Minio,
        kind: InfraKind::ObjectStorage,
        name: "minio",
        aliases: &["s3"],
        repository: "minio/minio",
        default_version: "latest",
        versions: &[],
        singleton: true,
        port: 9000,
        data_path: Some("/data"),
        published: &[9001],
    },
    ProviderSpec {
        provider: Provider::Mailpit,
        kind: InfraKind::Mail,
        name: "mailpit",
        aliases: &[],
        repository: "axllent/mailpit",
        default_version: "latest",
        versions: &[],
        singleton: true,
        port: 1025,
        data_path: None,
        published: &[8025],
    },
];

/// A parsed `kind[:version]` requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfraRequirement {
    /// Description field the requirement came from.
    pub field: InfraKind,
    /// Resolved provider.
    pub provider: Provider,
    /// Requested version, or the provider default.
    pub version: String,
}

/// Lookup table from requirement strings to providers.
///
/// Constructed by the caller and passed through the synthesis call chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderRegistry {
    _private: (),
}

impl ProviderRegistry {
    /// Registry of every built-in provider.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Every provider serving `field`.
    pub fn providers_for(&self, field: InfraKind) -> impl Iterator<Item = Provider> {
        PROVIDERS
            .iter()
            .filter(move |spec| spec.kind == field)
            .map(|spec| spec.provider)
    }

    /// Resolves a provider name (or alias) within `field`.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::UnknownProvider`] if no provider of that name
    /// serves `field`.
    pub fn lookup(&self, field: InfraKind, kind: &str) -> Result<Provider> {
        let wanted = namer::normalize_kind(kind);
        PROVIDERS
            .iter()
            .find(|spec| {
                spec.kind == field && (spec.name == wanted || spec.aliases.contains(&wanted.as_str()))
            })
            .map(|spec| spec.provider)
            .ok_or_else(|| BerthError::UnknownProvider {
                field: field.to_string(),
                kind: kind.trim().to_string(),
            })
    }

    /// Parses and validates a requirement string.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown provider or an unsupported version.
    pub fn parse_requirement(&self, field: InfraKind, raw: &str) -> Result<InfraRequirement> {
        let (kind, version) = match raw.trim().split_once(':') {
            Some((kind, version)) => (kind, Some(version.trim())),
            None => (raw.trim(), None),
        };
        let provider = self.lookup(field, kind)?;
        let version = version
            .filter(|v| !v.is_empty())
            .unwrap_or(provider.spec().default_version)
            .to_string();
        let requirement = InfraRequirement {
            field,
            provider,
            version,
        };
        provider.validate(&requirement)?;
        Ok(requirement)
    }
}

impl Provider {
    const fn spec(self) -> &'static ProviderSpec {
        &PROVIDERS[self as usize]
    }

    /// Canonical provider name (`postgres`, `redis`, ...).
    #[must_use]
    pub fn name(self) -> &'static str {
        self.spec().name
    }

    /// Whether at most one instance exists per project, regardless of version.
    #[must_use]
    pub fn is_singleton(self) -> bool {
        self.spec().singleton
    }

    /// Port the service listens on inside the network.
    #[must_use]
    pub fn internal_port(self) -> u16 {
        self.spec().port
    }

    /// Canonical container name for `version`.
    #[must_use]
    pub fn canonical_name(self, version: &str) -> String {
        namer::canonical_name(self.name(), version, self.is_singleton())
    }

    /// Name of the persistent volume backing `canonical`, if the provider
    /// stores data.
    #[must_use]
    pub fn volume_name(self, canonical: &str) -> Option<String> {
        self.spec().data_path.map(|_| format!("{canonical}-data"))
    }

    /// Concrete image reference for `version`.
    #[must_use]
    pub fn image(self, version: &str) -> String {
        let spec = self.spec();
        let bare = version.trim();
        let bare = bare
            .strip_prefix(['v', 'V'])
            .filter(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
            .unwrap_or(bare);
        let tag = match self {
            Self::Meilisearch if bare != "latest" => format!("v{bare}"),
            _ => bare.to_string(),
        };
        format!("{}:{tag}", spec.repository)
    }

    /// Rejects versions the provider does not ship.
    ///
    /// A version is accepted if it is `latest`, or if its normalized form or
    /// its major component appears in the supported list. Singleton
    /// providers accept any version.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::UnsupportedVersion`] or, if the requirement was
    /// routed to the wrong provider, [`BerthError::Config`].
    pub fn validate(self, requirement: &InfraRequirement) -> Result<()> {
        let spec = self.spec();
        if requirement.provider != self || requirement.field != spec.kind {
            return Err(BerthError::config(format!(
                "{} cannot serve a {} requirement",
                spec.name, requirement.field
            )));
        }
        if spec.singleton {
            return Ok(());
        }
        let normalized = namer::normalize_version(&requirement.version);
        let major = normalized.split(['.', '-']).next().unwrap_or_default();
        let supported = normalized == "latest"
            || spec
                .versions
                .iter()
                .any(|v| *v == normalized || *v == major || normalized.starts_with(&format!("{v}.")));
        if supported {
            Ok(())
        } else {
            Err(BerthError::UnsupportedVersion {
                kind: spec.name.into(),
                version: requirement.version.clone(),
                supported: spec.versions.join(", "),
            })
        }
    }

    /// Environment of the shared container itself.
    #[must_use]
    pub fn container_environment(self, project: &str) -> BTreeMap<String, String> {
        let db = database_name(project);
        let pairs: Vec<(&str, String)> = match self {
            Self::Postgres => vec![
                ("POSTGRES_DB", db),
                ("POSTGRES_USER", DEFAULT_USER.into()),
                ("POSTGRES_PASSWORD", DEFAULT_PASSWORD.into()),
            ],
            Self::Mysql => vec![
                ("MYSQL_DATABASE", db),
                ("MYSQL_USER", DEFAULT_USER.into()),
                ("MYSQL_PASSWORD", DEFAULT_PASSWORD.into()),
                ("MYSQL_ROOT_PASSWORD", DEFAULT_PASSWORD.into()),
            ],
            Self::Mariadb => vec![
                ("MARIADB_DATABASE", db),
                ("MARIADB_USER", DEFAULT_USER.into()),
                ("MARIADB_PASSWORD", DEFAULT_PASSWORD.into()),
                ("MARIADB_ROOT_PASSWORD", DEFAULT_PASSWORD.into()),
            ],
            Self::Redis | Self::Memcached => Vec::new(),
            Self::Meilisearch => vec![
                ("MEILI_MASTER_KEY", master_key(project)),
                ("MEILI_NO_ANALYTICS", "true".into()),
            ],
            Self::Elasticsearch => vec![
                ("discovery.type", "single-node".into()),
                ("xpack.security.enabled", "false".into()),
                ("ES_JAVA_OPTS", "-Xms512m -Xmx512m".into()),
            ],
            Self::Minio => vec![
                ("MINIO_ROOT_USER", DEFAULT_USER.into()),
                ("MINIO_ROOT_PASSWORD", format!("{DEFAULT_PASSWORD}-{DEFAULT_PASSWORD}")),
            ],
            Self::Mailpit => vec![
                ("MP_SMTP_AUTH_ACCEPT_ANY", "1".into()),
                ("MP_SMTP_AUTH_ALLOW_INSECURE", "1".into()),
            ],
        };
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    /// Environment handed to a service depending on the container `host`.
    #[must_use]
    pub fn environment_for(self, host: &str, project: &str) -> BTreeMap<String, String> {
        let port = self.internal_port();
        let db = database_name(project);
        let pairs: Vec<(&str, String)> = match self {
            Self::Postgres | Self::Mysql | Self::Mariadb => {
                let (connection, scheme) = match self {
                    Self::Postgres => ("pgsql", "postgres"),
                    Self::Mariadb => ("mariadb", "mysql"),
                    _ => ("mysql", "mysql"),
                };
                vec![
                    ("DB_CONNECTION", connection.into()),
                    ("DB_HOST", host.into()),
                    ("DB_PORT", port.to_string()),
                    ("DB_DATABASE", db.clone()),
                    ("DB_USERNAME", DEFAULT_USER.into()),
                    ("DB_PASSWORD", DEFAULT_PASSWORD.into()),
                    (
                        "DATABASE_URL",
                        format!("{scheme}://{DEFAULT_USER}:{DEFAULT_PASSWORD}@{host}:{port}/{db}"),
                    ),
                ]
            }
            Self::Redis => vec![
                ("REDIS_HOST", host.into()),
                ("REDIS_PORT", port.to_string()),
                ("REDIS_URL", format!("redis://{host}:{port}")),
            ],
            Self::Memcached => vec![
                ("MEMCACHED_HOST", host.into()),
                ("MEMCACHED_PORT", port.to_string()),
            ],
            Self::Meilisearch => vec![
                ("MEILISEARCH_HOST", format!("http://{host}:{port}")),
                ("MEILISEARCH_KEY", master_key(project)),
            ],
            Self::Elasticsearch => vec![
                ("ELASTICSEARCH_HOST", host.into()),
                ("ELASTICSEARCH_PORT", port.to_string()),
                ("ELASTICSEARCH_URL", format!("http://{host}:{port}")),
            ],
            Self::Minio => vec![
                ("AWS_ENDPOINT", format!("http://{host}:{port}")),
                ("AWS_ACCESS_KEY_ID", DEFAULT_USER.into()),
                ("AWS_SECRET_ACCESS_KEY", format!("{DEFAULT_PASSWORD}-{DEFAULT_PASSWORD}")),
                ("AWS_DEFAULT_REGION", "us-east-1".into()),
                ("AWS_BUCKET", db.replace('_', "-")),
                ("AWS_USE_PATH_STYLE_ENDPOINT", "true".into()),
            ],
            Self::Mailpit => vec![
                ("MAIL_HOST", host.into()),
                ("MAIL_PORT", port.to_string()),
                ("SMTP_URL", format!("smtp://{host}:{port}")),
            ],
        };
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    /// Health probe of the shared container.
    #[must_use]
    pub fn healthcheck(self, project: &str) -> Option<HealthProbe> {
        let probe = match self {
            Self::Postgres => HealthProbe::new([
                "CMD-SHELL".to_string(),
                format!("pg_isready -U {DEFAULT_USER} -d {}", database_name(project)),
            ]),
            Self::Mysql => HealthProbe::new([
                "CMD-SHELL".to_string(),
                format!("mysqladmin ping -h localhost -uroot -p{DEFAULT_PASSWORD}"),
            ]),
            Self::Mariadb => {
                HealthProbe::new(["CMD", "healthcheck.sh", "--connect", "--innodb_initialized"])
            }
            Self::Redis => HealthProbe::new(["CMD", "redis-cli", "ping"]),
            Self::Memcached => return None,
            Self::Meilisearch => {
                HealthProbe::new(["CMD", "curl", "-f", "http://localhost:7700/health"])
            }
            Self::Elasticsearch => HealthProbe::new([
                "CMD-SHELL",
                "curl -fs http://localhost:9200/_cluster/health || exit 1",
            ]),
            Self::Minio => HealthProbe::new(["CMD", "mc", "ready", "local"]),
            Self::Mailpit => HealthProbe::new(["CMD", "/mailpit", "readyz"]),
        };
        Some(probe)
    }

    /// Command override of the shared container.
    #[must_use]
    pub fn command(self) -> Option<Vec<String>> {
        match self {
            Self::Minio => Some(
                ["server", "/data", "--console-address", ":9001"]
                    .map(String::from)
                    .to_vec(),
            ),
            _ => None,
        }
    }

    /// Builds the shared container for `canonical`.
    fn synthesize(self, canonical: &str, image: String, project: &str) -> SynthesizedService {
        let mut service = SynthesizedService::new(canonical.to_string(), ServiceSource::Image(image));
        service.environment = self.container_environment(project);
        service.healthcheck = self.healthcheck(project);
        service.command = self.command();
        service.restart = Some("unless-stopped".into());
        if let (Some(volume), Some(path)) = (self.volume_name(canonical), self.spec().data_path) {
            service.add_volume(format!("{volume}:{path}"));
        }
        service
    }

    /// Attaches `dependent` to the shared container for `requirement`.
    ///
    /// The first requester of a canonical name creates the container, its
    /// volume, and its published ports. Every requester, first or not, gets
    /// a dependency edge and the provider's environment merged into its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the requirement fails validation.
    pub fn attach(
        self,
        assembly: &mut Assembly,
        dependent: &str,
        requirement: &InfraRequirement,
        project: &str,
    ) -> Result<String> {
        self.validate(requirement)?;
        let canonical = self.canonical_name(&requirement.version);
        let image = self.image(&requirement.version);

        match assembly.namer_mut().claim(&canonical, &image, dependent) {
            NameClaim::Created => {
                tracing::info!(service = %canonical, image = %image, requester = dependent, "creating shared service");
                let service = self.synthesize(&canonical, image, project);
                if let Some(volume) = self.volume_name(&canonical) {
                    assembly.add_named_volume(&volume);
                }
                assembly.insert_service(service);
                for &port in self.spec().published {
                    assembly.claim_port(&canonical, &PortMapping::new(u32::from(port), u32::from(port)));
                }
            }
            NameClaim::Joined { owner, .. } => {
                tracing::debug!(service = %canonical, owner = %owner, requester = dependent, "reusing shared service");
            }
        }

        assembly.depend(dependent, &canonical);
        assembly.merge_environment(dependent, self.environment_for(&canonical, project));
        Ok(canonical)
    }
}

/// Database (and bucket) name derived from the project name.
fn database_name(project: &str) -> String {
    let name: String = project
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if name.is_empty() { "app".into() } else { name }
}

fn master_key(project: &str) -> String {
    format!("{}-master-key", database_name(project).replace('_', "-"))
}
