//! Hostname routing through the reverse proxy.
//!
//! Routing is active only when some description declares a hostname. Each
//! hostname becomes a [`DomainBinding`]; the proxy service publishes 80 and
//! 443 on behalf of every routed service.

use std::collections::HashMap;

use berth_common::config::{BerthConfig, OutputLayout};
use berth_common::constants;
use berth_common::types::{PortMapping, ServiceDescription};
use serde::Serialize;

use crate::assembler::Assembly;
use crate::service::{ServiceSource, SynthesizedService};

/// Internal port assumed when nothing else is known.
pub const FALLBACK_PORT: u16 = 80;

/// Image repositories with a fixed listening port.
const WELL_KNOWN_PORTS: &[(&str, u16)] = &[
    ("nginx", 80),
    ("httpd", 80),
    ("caddy", 80),
    ("lighttpd", 80),
];

/// Route from an external hostname to a service port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainBinding {
    /// Fully qualified hostname.
    pub hostname: String,
    /// Target service.
    pub service: String,
    /// Port the target listens on inside the network.
    pub port: u16,
    /// Whether the route is served over HTTPS.
    pub tls: bool,
}

/// Listening port of a well-known proxy-fronted image.
#[must_use]
pub fn well_known_port(repository: &str) -> Option<u16> {
    WELL_KNOWN_PORTS
        .iter()
        .find(|(name, _)| repository.starts_with(name))
        .map(|(_, port)| *port)
}

/// Qualifies `raw` with `suffix` when it contains no dot.
#[must_use]
pub fn qualify_hostname(raw: &str, suffix: &str) -> String {
    let host = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    if host.contains('.') || suffix.is_empty() {
        host
    } else {
        format!("{host}.{}", suffix.trim_start_matches('.'))
    }
}

fn is_valid_hostname(host: &str) -> bool {
    let labels = host.strip_prefix("*.").unwrap_or(host);
    !labels.is_empty()
        && labels.split('.').all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        })
}

/// Resolves the port a routed service listens on.
///
/// Precedence: a well-known web image's port, then the container side of
/// the first port mapping, then the description's `port`. Returns `None`
/// when none applies.
#[must_use]
pub fn internal_port(description: &ServiceDescription) -> Option<u16> {
    if let Some(port) = description.image_repository().and_then(well_known_port) {
        return Some(port);
    }
    description
        .ports
        .first()
        .map(|mapping| mapping.container)
        .or(description.port)
        .and_then(|port| u16::try_from(port).ok())
        .filter(|&port| port != 0)
}

/// Plans routing and synthesizes the reverse proxy.
#[derive(Debug)]
pub struct DomainRouter<'a> {
    config: &'a BerthConfig,
    layout: &'a OutputLayout,
}

impl<'a> DomainRouter<'a> {
    /// Creates a router.
    #[must_use]
    pub const fn new(config: &'a BerthConfig, layout: &'a OutputLayout) -> Self {
        Self { config, layout }
    }

    /// Builds one binding per literal hostname, in declaration order.
    ///
    /// Invalid or duplicated hostnames are recorded as errors on the
    /// assembly; an unresolvable internal port falls back to 80 with a
    /// warning.
    pub fn plan(&self, descriptions: &[ServiceDescription], assembly: &mut Assembly) -> Vec<DomainBinding> {
        let mut owners: HashMap<String, String> = HashMap::new();
        let mut bindings = Vec::new();
        for description in descriptions.iter().filter(|d| d.has_hostname()) {
            let name = description.name.as_str();
            let port = internal_port(description).unwrap_or_else(|| {
                assembly.diagnostics_mut().warn(
                    Some(name),
                    format!("no internal port known; routing to port {FALLBACK_PORT}"),
                );
                FALLBACK_PORT
            });
            for raw in description.hostnames() {
                let hostname = qualify_hostname(raw, &self.config.domain_suffix);
                if !is_valid_hostname(&hostname) {
                    assembly
                        .diagnostics_mut()
                        .error(Some(name), format!("invalid hostname \"{raw}\""));
                    continue;
                }
                if let Some(owner) = owners.get(&hostname) {
                    if owner != name {
                        assembly.diagnostics_mut().error(
                            Some(name),
                            format!("hostname \"{hostname}\" is already routed to \"{owner}\""),
                        );
                    }
                    continue;
                }
                let _ = owners.insert(hostname.clone(), name.to_string());
                bindings.push(DomainBinding {
                    hostname,
                    service: name.to_string(),
                    port,
                    tls: description.tls,
                });
            }
        }
        tracing::debug!(bindings = bindings.len(), "routing planned");
        bindings
    }

    /// Adds the proxy service for `bindings`; does nothing without bindings.
    pub fn attach_proxy(&self, assembly: &mut Assembly, bindings: &[DomainBinding]) {
        if bindings.is_empty() {
            return;
        }
        let name = self.config.proxy_service.as_str();
        let mut proxy = SynthesizedService::new(
            name.to_string(),
            ServiceSource::Image(self.config.proxy_image.clone()),
        );
        proxy.add_volume(format!(
            "{}:{}:ro",
            self.layout.proxy_config().display(),
            constants::PROXY_CONFIG_MOUNT
        ));
        if bindings.iter().any(|b| b.tls) {
            proxy.add_volume(format!(
                "{}:{}:ro",
                self.layout.tls_dir().display(),
                constants::PROXY_CERTS_MOUNT
            ));
        }
        for binding in bindings {
            if !proxy.network_aliases.contains(&binding.hostname) {
                proxy.network_aliases.push(binding.hostname.clone());
            }
        }
        proxy.restart = Some("unless-stopped".into());
        assembly.insert_service(proxy);

        assembly.claim_port(name, &PortMapping::new(80, 80));
        assembly.claim_port(name, &PortMapping::new(443, 443));
        for binding in bindings {
            assembly.depend(name, &binding.service);
        }
        tracing::info!(proxy = name, routes = bindings.len(), "reverse proxy attached");
    }
}
