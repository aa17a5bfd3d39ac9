//! Certificate renewal against a real directory.
//!
//! Covers the on-disk side of the TLS lifecycle:
//! 1. Renewal inside the 30-day window
//! 2. Byte-identical reuse outside it
//! 3. Recovery from corrupt files
//! 4. File permissions
//! 5. A failing domain falling back to plain HTTP

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::fs;
use std::path::PathBuf;

use berth_common::config::{BerthConfig, OutputLayout};
use berth_common::constants;
use berth_common::error::{BerthError, Result};
use berth_common::types::ServiceDescription;
use berth_compose::Synthesizer;
use berth_compose::output::write_artifacts;
use berth_compose::tls::{
    CertificateManager, CertificateStatus, CertificateStore, FsCertificateStore,
    MemoryCertificateStore, certificate_expiry, generate_certificate,
};
use chrono::{DateTime, Duration, Utc};

fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_750_000_000, 0).expect("timestamp")
}

/// Stores a certificate for `domain` that expires `days_left` days from now.
fn seed(store: &mut FsCertificateStore, domain: &str, days_left: i64) -> Vec<u8> {
    let issued_at = now() - Duration::days(365 - days_left);
    let generated = generate_certificate(domain, issued_at, 365).expect("generate");
    store
        .write(&format!("{domain}.key"), generated.key_pem.as_bytes(), true)
        .expect("write key");
    store
        .write(&format!("{domain}.crt"), generated.cert_pem.as_bytes(), false)
        .expect("write cert");
    generated.cert_pem.into_bytes()
}

#[test]
fn certificate_expiring_in_ten_days_is_regenerated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut store = FsCertificateStore::new(dir.path());
    let old = seed(&mut store, "shop.test", 10);

    let cert = CertificateManager::new(&mut store, &BerthConfig::default(), now())
        .ensure("shop.test")
        .expect("ensure");

    assert_eq!(cert.status, CertificateStatus::Generated);
    let new = fs::read(dir.path().join("shop.test.crt")).expect("read");
    assert_ne!(new, old);
    assert_eq!(certificate_expiry(&new), Some(now() + Duration::days(365)));
}

#[test]
fn certificate_expiring_in_two_hundred_days_is_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut store = FsCertificateStore::new(dir.path());
    let old = seed(&mut store, "shop.test", 200);
    let old_key = fs::read(dir.path().join("shop.test.key")).expect("key");

    let cert = CertificateManager::new(&mut store, &BerthConfig::default(), now())
        .ensure("shop.test")
        .expect("ensure");

    assert_eq!(cert.status, CertificateStatus::Reused);
    assert_eq!(fs::read(dir.path().join("shop.test.crt")).expect("read"), old);
    assert_eq!(fs::read(dir.path().join("shop.test.key")).expect("read"), old_key);
}

#[test]
fn corrupt_certificate_is_replaced() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("shop.test.crt"), "garbage").expect("write");
    fs::write(dir.path().join("shop.test.key"), "garbage").expect("write");
    let mut store = FsCertificateStore::new(dir.path());

    let cert = CertificateManager::new(&mut store, &BerthConfig::default(), now())
        .ensure("shop.test")
        .expect("ensure");

    assert_eq!(cert.status, CertificateStatus::Generated);
    let pem = fs::read(dir.path().join("shop.test.crt")).expect("read");
    assert!(certificate_expiry(&pem).is_some());
}

#[cfg(unix)]
#[test]
fn keys_are_private_and_certificates_readable() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().expect("tempdir");
    let mut store = FsCertificateStore::new(dir.path());
    let mut manager = CertificateManager::new(&mut store, &BerthConfig::default(), now());
    let _ = manager.ensure("shop.test").expect("ensure");
    manager.ensure_shared_files().expect("shared");

    let mode = |name: &str| {
        fs::metadata(dir.path().join(name))
            .expect("metadata")
            .permissions()
            .mode()
            & 0o777
    };
    assert_eq!(mode("shop.test.key"), 0o600);
    assert_eq!(mode("shop.test.crt"), 0o644);
    assert_eq!(mode(constants::TLS_PARAMS_FILE), 0o644);
    assert_eq!(mode(constants::DH_PARAMS_FILE), 0o644);
}

#[test]
fn full_run_on_disk_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = BerthConfig::default();
    let layout = OutputLayout::new(dir.path(), &config);
    let descriptions = vec![ServiceDescription {
        hostname: Some("shop".into()),
        tls: true,
        database: Some("postgres:15".into()),
        ..ServiceDescription::with_image("web", "nginx")
    }];

    let run = || {
        let synthesis = Synthesizer::new(&config, &layout, FsCertificateStore::new(layout.tls_dir()))
            .at(now())
            .synthesize(&descriptions, "shop")
            .expect("synthesize");
        let _ = write_artifacts(&synthesis, &layout).expect("write");
        let mut files: Vec<(String, Vec<u8>)> = Vec::new();
        for path in [layout.compose_file(), layout.proxy_config()] {
            files.push((path.display().to_string(), fs::read(&path).expect("read")));
        }
        for entry in fs::read_dir(layout.tls_dir()).expect("certs") {
            let path = entry.expect("entry").path();
            files.push((path.display().to_string(), fs::read(&path).expect("read")));
        }
        files.sort();
        files
    };

    let first = run();
    let second = run();
    assert_eq!(first, second);
    assert!(first.iter().any(|(name, _)| name.ends_with("default.crt")));
    assert!(first.iter().any(|(name, _)| name.ends_with("dhparam.pem")));
}

/// Memory store that refuses every file for one domain.
struct RefusingStore {
    inner: MemoryCertificateStore,
    refused: &'static str,
}

impl CertificateStore for RefusingStore {
    fn read(&self, name: &str) -> Option<Vec<u8>> {
        self.inner.read(name)
    }

    fn write(&mut self, name: &str, contents: &[u8], private: bool) -> Result<()> {
        if name.starts_with(self.refused) {
            return Err(BerthError::Io {
                path: self.inner.location(name),
                source: std::io::Error::other("disk full"),
            });
        }
        self.inner.write(name, contents, private)
    }

    fn location(&self, name: &str) -> PathBuf {
        self.inner.location(name)
    }
}

#[test]
fn certificate_failure_only_drops_tls_for_that_domain() {
    let config = BerthConfig::default();
    let layout = OutputLayout::new("/srv/shop", &config);
    let store = RefusingStore {
        inner: MemoryCertificateStore::new(layout.tls_dir()),
        refused: "shop.test",
    };
    let descriptions = vec![
        ServiceDescription {
            hostname: Some("shop".into()),
            tls: true,
            ..ServiceDescription::with_image("web", "nginx")
        },
        ServiceDescription {
            hostname: Some("admin".into()),
            tls: true,
            ..ServiceDescription::with_image("admin", "nginx")
        },
    ];

    let mut synthesizer = Synthesizer::new(&config, &layout, store).at(now());
    let synthesis = synthesizer.synthesize(&descriptions, "shop").expect("synthesize");

    let tls: Vec<_> = synthesis
        .bindings
        .iter()
        .map(|b| (b.hostname.as_str(), b.tls))
        .collect();
    assert_eq!(tls, vec![("shop.test", false), ("admin.test", true)]);

    let warnings: Vec<_> = synthesis.diagnostics.warnings().collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("shop.test"), "got: {}", warnings[0].message);

    let proxy = synthesis.proxy_config.as_deref().expect("proxy config");
    assert!(proxy.contains("listen 80;\n    server_name shop.test;\n\n    location / {"));
    assert!(!proxy.contains("shop.test.crt"));
    assert!(proxy.contains("server_name admin.test;\n    return 301 https://$host$request_uri;"));
    assert!(proxy.contains("ssl_certificate /etc/nginx/certs/admin.test.crt;"));

    let domains: Vec<_> = synthesis.certificates.iter().map(|c| c.domain.as_str()).collect();
    assert_eq!(domains, vec!["localhost", "admin.test"]);
    let stored: Vec<_> = synthesizer.store().inner.names().collect();
    assert!(stored.contains(&"admin.test.key"));
    assert!(!stored.iter().any(|name| name.starts_with("shop.test")));
}
