//! Formatted output helpers for CLI commands.

use std::fmt::Write;

use berth_compose::Synthesis;
use berth_compose::diagnostics::{Diagnostics, Severity};
use berth_compose::tls::CertificateStatus;

/// Prints every diagnostic to stderr.
pub fn print_diagnostics(diagnostics: &Diagnostics) {
    for diagnostic in diagnostics.entries() {
        eprintln!("{diagnostic}");
    }
}

/// Renders a human-readable plan.
#[must_use]
pub fn format_plan(project: &str, synthesis: &Synthesis) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Stack plan for: {project}");
    let _ = writeln!(out, "{}", "\u{2550}".repeat(35));
    out.push('\n');

    let services = &synthesis.document.services;
    for name in &synthesis.start_order {
        let Some(service) = services.get(name) else {
            continue;
        };
        let _ = writeln!(out, "  + {name}");
        match (&service.image, &service.build) {
            (Some(image), _) => {
                let _ = writeln!(out, "      image: {image}");
            }
            (None, Some(build)) => {
                let _ = writeln!(out, "      build: {build}");
            }
            (None, None) => {}
        }
        if !service.ports.is_empty() {
            let _ = writeln!(out, "      ports: {}", service.ports.join(", "));
        }
        if !service.depends_on.is_empty() {
            let deps: Vec<&str> = service.depends_on.keys().map(String::as_str).collect();
            let _ = writeln!(out, "      depends on: {}", deps.join(", "));
        }
    }
    out.push('\n');
    let _ = writeln!(out, "  {} service(s) will be generated.", services.len());

    if !synthesis.document.volumes.is_empty() {
        out.push('\n');
        out.push_str("  Volumes:\n");
        for volume in synthesis.document.volumes.keys() {
            let _ = writeln!(out, "    {volume}");
        }
    }

    if !synthesis.bindings.is_empty() {
        out.push('\n');
        out.push_str("  Routes:\n");
        for binding in &synthesis.bindings {
            let scheme = if binding.tls { "https" } else { "http" };
            let _ = writeln!(
                out,
                "    {scheme}://{} -> {}:{}",
                binding.hostname, binding.service, binding.port
            );
        }
    }

    if !synthesis.certificates.is_empty() {
        out.push('\n');
        out.push_str("  Certificates:\n");
        for cert in &synthesis.certificates {
            let status = match cert.status {
                CertificateStatus::Reused => "reused",
                CertificateStatus::Generated => "new",
            };
            let _ = writeln!(
                out,
                "    {} ({status}, expires {})",
                cert.domain,
                cert.not_after.format("%Y-%m-%d")
            );
        }
    }

    let warnings = synthesis
        .diagnostics
        .entries()
        .iter()
        .filter(|d| d.severity == Severity::Warning)
        .count();
    if warnings > 0 {
        out.push('\n');
        let _ = writeln!(out, "  {warnings} warning(s).");
    }
    out
}

#[cfg(test)]
mod tests {
    use berth_common::config::{BerthConfig, OutputLayout};
    use berth_common::types::ServiceDescription;
    use berth_compose::synthesize;
    use berth_compose::tls::MemoryCertificateStore;

    use super::*;

    fn plan(descriptions: &[ServiceDescription]) -> String {
        let config = BerthConfig::default();
        let layout = OutputLayout::new("/srv/shop", &config);
        let synthesis = synthesize(
            descriptions,
            "shop",
            &config,
            &layout,
            MemoryCertificateStore::new(layout.tls_dir()),
        )
        .expect("synthesize");
        format_plan("shop", &synthesis)
    }

    #[test]
    fn plan_lists_services_in_start_order() {
        let text = plan(&[ServiceDescription {
            database: Some("postgres:15".into()),
            ..ServiceDescription::with_image("app", "shop/app")
        }]);
        let db = text.find("+ postgres-15").expect("db");
        let app = text.find("+ app").expect("app");
        assert!(db < app, "got:\n{text}");
        assert!(text.contains("depends on: postgres-15"));
        assert!(text.contains("postgres-15-data"));
        assert!(text.contains("2 service(s)"));
    }

    #[test]
    fn plan_shows_routes_and_certificates() {
        let text = plan(&[ServiceDescription {
            hostname: Some("shop".into()),
            tls: true,
            ..ServiceDescription::with_image("web", "nginx")
        }]);
        assert!(text.contains("https://shop.test -> web:80"), "got:\n{text}");
        assert!(text.contains("shop.test (new, expires"));
    }
}
