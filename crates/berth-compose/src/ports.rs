//! Host port validation and allocation.
//!
//! Tracks which service claims each host port, flags conflicts and claims
//! on conventionally reserved ports, and searches for a free port.

use std::collections::BTreeMap;
use std::fmt;

use berth_common::types::image_repository;
use thiserror::Error;

/// Highest valid port number.
pub const MAX_PORT: u32 = 65_535;

/// How far above and below the preferred port [`PortRegistry::suggest_port`]
/// probes before falling back to the common ranges.
pub const NEIGHBOUR_PROBE_DISTANCE: u16 = 100;

/// Ranges searched, in order, once the neighbourhood is exhausted.
pub const COMMON_RANGES: &[(u16, u16)] = &[(3000, 3999), (5000, 5999), (8000, 8999), (9000, 9999)];

/// First port of the final linear scan (unprivileged ports only).
pub const LINEAR_SCAN_START: u16 = 1024;

/// A host port conventionally owned by a well-known service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedPort {
    /// Port number.
    pub port: u16,
    /// Human-readable owner of the port.
    pub reason: &'static str,
    /// Image repositories for which claiming this port is expected.
    pub owners: &'static [&'static str],
}

/// Ports that trigger a warning when claimed by anything but their owner.
pub const RESERVED_PORTS: &[ReservedPort] = &[
    ReservedPort { port: 21, reason: "FTP", owners: &[] },
    ReservedPort { port: 22, reason: "SSH", owners: &[] },
    ReservedPort { port: 25, reason: "SMTP", owners: &[] },
    ReservedPort { port: 53, reason: "DNS", owners: &[] },
    ReservedPort { port: 80, reason: "HTTP", owners: &["nginx", "httpd", "caddy", "traefik"] },
    ReservedPort { port: 443, reason: "HTTPS", owners: &["nginx", "httpd", "caddy", "traefik"] },
    ReservedPort { port: 3306, reason: "MySQL", owners: &["mysql", "mariadb"] },
    ReservedPort { port: 5432, reason: "PostgreSQL", owners: &["postgres", "postgis"] },
    ReservedPort { port: 5672, reason: "RabbitMQ", owners: &["rabbitmq"] },
    ReservedPort { port: 6379, reason: "Redis", owners: &["redis", "valkey"] },
    ReservedPort { port: 9200, reason: "Elasticsearch", owners: &["elasticsearch", "opensearch"] },
    ReservedPort { port: 11211, reason: "Memcached", owners: &["memcached"] },
    ReservedPort { port: 27017, reason: "MongoDB", owners: &["mongo"] },
];

/// Looks up `port` in the reserved table.
#[must_use]
pub fn reserved(port: u16) -> Option<&'static ReservedPort> {
    RESERVED_PORTS.iter().find(|r| r.port == port)
}

/// Failure to register a host port.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    /// The port is not in 1-65535.
    #[error("service \"{service}\" requests port {port}, outside 1-65535")]
    OutOfRange {
        /// Requested port.
        port: u32,
        /// Requesting service.
        service: String,
    },
    /// Another service already claims the port.
    #[error("port {port} is claimed by both \"{claimed_by}\" and \"{requested_by}\"")]
    Conflict {
        /// Contested port.
        port: u16,
        /// Service holding the claim.
        claimed_by: String,
        /// Service that asked second.
        requested_by: String,
    },
}

/// A claim on a reserved port by a service that does not own it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedPortWarning {
    /// Claimed port.
    pub port: u16,
    /// Claiming service.
    pub service: String,
    /// Conventional owner of the port.
    pub reason: &'static str,
}

impl fmt::Display for ReservedPortWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "service \"{}\" claims port {}, conventionally used by {}",
            self.service, self.port, self.reason
        )
    }
}

/// Table of host-port claims for one synthesis run.
#[derive(Debug, Default)]
pub struct PortRegistry {
    claims: BTreeMap<u16, String>,
    errors: Vec<PortError>,
}

impl PortRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `port` for `service`.
    ///
    /// Re-registering a port for the service that already holds it is a
    /// no-op. Failures are also recorded for [`Self::check_conflicts`].
    ///
    /// # Errors
    ///
    /// Returns [`PortError::OutOfRange`] or [`PortError::Conflict`].
    pub fn register_port(
        &mut self,
        port: u32,
        service: &str,
    ) -> Result<Option<ReservedPortWarning>, PortError> {
        self.register_port_for_image(port, service, None)
    }

    /// Claims `port` for `service` running `image`.
    ///
    /// A reserved port claimed by an image listed as its owner does not
    /// produce a warning.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::OutOfRange`] or [`PortError::Conflict`].
    pub fn register_port_for_image(
        &mut self,
        port: u32,
        service: &str,
        image: Option<&str>,
    ) -> Result<Option<ReservedPortWarning>, PortError> {
        let checked = u16::try_from(port).ok().filter(|&p| p != 0);
        let Some(port) = checked else {
            let err = PortError::OutOfRange {
                port,
                service: service.to_string(),
            };
            self.errors.push(err.clone());
            return Err(err);
        };

        match self.claims.get(&port) {
            Some(holder) if holder == service => return Ok(None),
            Some(holder) => {
                let err = PortError::Conflict {
                    port,
                    claimed_by: holder.clone(),
                    requested_by: service.to_string(),
                };
                tracing::debug!(port, holder = %holder, service, "port conflict");
                self.errors.push(err.clone());
                return Err(err);
            }
            None => {}
        }
        let _ = self.claims.insert(port, service.to_string());

        let warning = reserved(port)
            .filter(|r| {
                let repo = image.map(image_repository).unwrap_or_default();
                !r.owners.iter().any(|owner| !repo.is_empty() && repo.starts_with(owner))
            })
            .map(|r| ReservedPortWarning {
                port,
                service: service.to_string(),
                reason: r.reason,
            });
        if let Some(w) = &warning {
            tracing::warn!(port, service, reason = w.reason, "reserved port claimed");
        }
        Ok(warning)
    }

    /// Every failed registration so far, in registration order.
    #[must_use]
    pub fn check_conflicts(&self) -> Vec<PortError> {
        self.errors.clone()
    }

    /// Service holding `port`, if any.
    #[must_use]
    pub fn claimant(&self, port: u16) -> Option<&str> {
        self.claims.get(&port).map(String::as_str)
    }

    /// Suggests a free port near `preferred`.
    ///
    /// See [`Self::suggest_port_with`] for the probe order.
    #[must_use]
    pub fn suggest_port(&self, preferred: u16) -> Option<u16> {
        self.suggest_port_with(preferred, |_| true)
    }

    /// Suggests a free port near `preferred`, also requiring `is_available`.
    ///
    /// Probe order:
    /// 1. `preferred` itself, if unclaimed;
    /// 2. `preferred + k`, then `preferred - k`, for `k` in `1..=100`;
    /// 3. each of [`COMMON_RANGES`] in order, ascending;
    /// 4. a linear scan from [`LINEAR_SCAN_START`] to 65535.
    ///
    /// Candidates after step 1 must also be unreserved. Returns `None` when
    /// nothing is free.
    pub fn suggest_port_with(
        &self,
        preferred: u16,
        mut is_available: impl FnMut(u16) -> bool,
    ) -> Option<u16> {
        if preferred != 0 && !self.claims.contains_key(&preferred) && is_available(preferred) {
            return Some(preferred);
        }
        let mut free = |port: u16| {
            port != 0
                && !self.claims.contains_key(&port)
                && reserved(port).is_none()
                && is_available(port)
        };

        for k in 1..=NEIGHBOUR_PROBE_DISTANCE {
            if let Some(up) = preferred.checked_add(k).filter(|&p| free(p)) {
                return Some(up);
            }
            if let Some(down) = preferred.checked_sub(k).filter(|&p| free(p)) {
                return Some(down);
            }
        }
        for &(start, end) in COMMON_RANGES {
            if let Some(port) = (start..=end).find(|&p| free(p)) {
                return Some(port);
            }
        }
        let found = (LINEAR_SCAN_START..=u16::MAX).find(|&p| free(p));
        if found.is_none() {
            tracing::warn!(preferred, "no free host port found");
        }
        found
    }
}
