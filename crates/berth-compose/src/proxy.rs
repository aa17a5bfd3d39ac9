//! nginx configuration for the reverse proxy.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

use berth_common::constants;

use crate::domain::DomainBinding;
use crate::tls::Certificate;

/// Renders the proxy configuration.
///
/// `certificates` maps hostnames to their certificate; a TLS binding whose
/// hostname has no entry is served over plain HTTP. `default_certificate`
/// enables the HTTPS catch-all server.
#[must_use]
pub fn render_proxy_config(
    bindings: &[DomainBinding],
    certificates: &BTreeMap<String, Certificate>,
    default_certificate: Option<&Certificate>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", constants::GENERATED_HEADER);
    out.push('\n');

    out.push_str("server {\n");
    out.push_str("    listen 80 default_server;\n");
    out.push_str("    server_name _;\n");
    out.push_str("    return 444;\n");
    out.push_str("}\n");

    if let Some(cert) = default_certificate {
        out.push('\n');
        out.push_str("server {\n");
        out.push_str("    listen 443 ssl default_server;\n");
        out.push_str("    server_name _;\n");
        write_certificate(&mut out, cert);
        out.push_str("    return 444;\n");
        out.push_str("}\n");
    }

    let mut emitted = BTreeSet::new();
    for binding in bindings {
        let upstream = upstream_name(&binding.service, binding.port);
        out.push('\n');
        if emitted.insert(upstream.clone()) {
            let _ = writeln!(out, "upstream {upstream} {{");
            let _ = writeln!(out, "    server {}:{};", binding.service, binding.port);
            out.push_str("}\n\n");
        }

        match certificates.get(&binding.hostname).filter(|_| binding.tls) {
            Some(cert) => {
                out.push_str("server {\n");
                out.push_str("    listen 80;\n");
                let _ = writeln!(out, "    server_name {};", binding.hostname);
                out.push_str("    return 301 https://$host$request_uri;\n");
                out.push_str("}\n\n");

                out.push_str("server {\n");
                out.push_str("    listen 443 ssl;\n");
                out.push_str("    http2 on;\n");
                let _ = writeln!(out, "    server_name {};", binding.hostname);
                write_certificate(&mut out, cert);
                write_location(&mut out, &upstream);
                out.push_str("}\n");
            }
            None => {
                out.push_str("server {\n");
                out.push_str("    listen 80;\n");
                let _ = writeln!(out, "    server_name {};", binding.hostname);
                write_location(&mut out, &upstream);
                out.push_str("}\n");
            }
        }
    }
    out
}

fn write_certificate(out: &mut String, cert: &Certificate) {
    let _ = writeln!(
        out,
        "    ssl_certificate {}/{};",
        constants::PROXY_CERTS_MOUNT,
        cert.cert_file()
    );
    let _ = writeln!(
        out,
        "    ssl_certificate_key {}/{};",
        constants::PROXY_CERTS_MOUNT,
        cert.key_file()
    );
    let _ = writeln!(
        out,
        "    include {}/{};",
        constants::PROXY_CERTS_MOUNT,
        constants::TLS_PARAMS_FILE
    );
}

fn write_location(out: &mut String, upstream: &str) {
    out.push_str("\n    location / {\n");
    let _ = writeln!(out, "        proxy_pass http://{upstream};");
    out.push_str("        proxy_http_version 1.1;\n");
    out.push_str("        proxy_set_header Host $host;\n");
    out.push_str("        proxy_set_header X-Real-IP $remote_addr;\n");
    out.push_str("        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n");
    out.push_str("        proxy_set_header X-Forwarded-Proto $scheme;\n");
    out.push_str("        proxy_set_header Upgrade $http_upgrade;\n");
    out.push_str("        proxy_set_header Connection \"upgrade\";\n");
    out.push_str("    }\n");
}

/// Upstream identifier for a routing target.
///
/// Keyed by service and port, so hostnames routed to the same target share
/// one upstream. Service names never contain characters nginx rejects, and
/// the trailing port keeps distinct targets distinct.
#[must_use]
pub fn upstream_name(service: &str, port: u16) -> String {
    format!("{service}_{port}")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::DateTime;

    use super::*;
    use crate::tls::CertificateStatus;

    fn binding(hostname: &str, tls: bool) -> DomainBinding {
        DomainBinding {
            hostname: hostname.into(),
            service: "web".into(),
            port: 80,
            tls,
        }
    }

    fn certificate(stem: &str) -> Certificate {
        Certificate {
            domain: stem.into(),
            stem: stem.into(),
            cert_path: PathBuf::from(format!("/certs/{stem}.crt")),
            key_path: PathBuf::from(format!("/certs/{stem}.key")),
            not_after: DateTime::from_timestamp(1_800_000_000, 0).expect("timestamp"),
            status: CertificateStatus::Generated,
        }
    }

    #[test]
    fn plain_binding_has_no_tls() {
        let config = render_proxy_config(&[binding("shop.test", false)], &BTreeMap::new(), None);
        assert!(config.starts_with(constants::GENERATED_HEADER));
        assert!(config.contains("upstream web_80 {\n    server web:80;\n}"));
        assert!(config.contains("proxy_pass http://web_80;"));
        assert!(!config.contains("listen 443"));
        assert!(!config.contains("return 301"));
    }

    #[test]
    fn tls_binding_redirects_and_serves_https() {
        let certs = BTreeMap::from([("shop.test".to_string(), certificate("shop.test"))]);
        let default = certificate("default");
        let config = render_proxy_config(&[binding("shop.test", true)], &certs, Some(&default));
        assert!(config.contains("return 301 https://$host$request_uri;"));
        assert!(config.contains("listen 443 ssl;"));
        assert!(config.contains("ssl_certificate /etc/nginx/certs/shop.test.crt;"));
        assert!(config.contains("listen 443 ssl default_server;"));
        assert!(config.contains("include /etc/nginx/certs/ssl-params.conf;"));
    }

    #[test]
    fn tls_without_certificate_falls_back_to_http() {
        let config = render_proxy_config(&[binding("shop.test", true)], &BTreeMap::new(), None);
        assert!(!config.contains("return 301"));
        assert!(config.contains("proxy_pass http://web_80;"));
    }

    fn routed(hostname: &str, service: &str) -> DomainBinding {
        DomainBinding {
            service: service.into(),
            ..binding(hostname, false)
        }
    }

    #[test]
    fn lookalike_hostnames_get_distinct_upstreams() {
        let config = render_proxy_config(
            &[routed("shop-api.test", "a"), routed("shop.api.test", "b")],
            &BTreeMap::new(),
            None,
        );
        assert_eq!(config.matches("upstream a_80 {").count(), 1);
        assert_eq!(config.matches("upstream b_80 {").count(), 1);
        assert!(config.contains("server_name shop-api.test;\n\n    location / {\n        proxy_pass http://a_80;"));
        assert!(config.contains("server_name shop.api.test;\n\n    location / {\n        proxy_pass http://b_80;"));
    }

    #[test]
    fn hostnames_sharing_a_target_share_one_upstream() {
        let config = render_proxy_config(
            &[routed("shop.test", "web"), routed("admin.shop", "web")],
            &BTreeMap::new(),
            None,
        );
        assert_eq!(config.matches("upstream web_80 {").count(), 1);
        assert_eq!(config.matches("proxy_pass http://web_80;").count(), 2);
    }

    #[test]
    fn upstream_name_ends_with_the_port() {
        assert_eq!(upstream_name("shop-api", 8080), "shop-api_8080");
    }
}
