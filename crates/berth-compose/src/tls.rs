//! Self-signed TLS certificates and their renewal policy.
//!
//! Certificates are the only state that survives between runs. A stored
//! certificate is reused while `now + window < notAfter` and its stored key
//! matches it; otherwise it is regenerated. All file access goes through a
//! [`CertificateStore`] so the policy can be exercised in memory.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use berth_common::config::BerthConfig;
use berth_common::constants;
use berth_common::error::{BerthError, Result};
use chrono::{DateTime, Duration, Utc};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, RsaKeySize, SanType};
use serde::Serialize;

/// Shared TLS settings included by every HTTPS server block.
pub const SSL_PARAMS: &str = "\
ssl_protocols TLSv1.2 TLSv1.3;
ssl_prefer_server_ciphers off;
ssl_session_cache shared:SSL:10m;
ssl_session_timeout 1d;
ssl_session_tickets off;
ssl_dhparam /etc/nginx/certs/dhparam.pem;
";

/// RFC 7919 `ffdhe2048` group.
pub const DH_PARAMS: &str = "\
-----BEGIN DH PARAMETERS-----
MIIBCAKCAQEA//////////+t+FRYortKmq/cViAnPTzx2LnFg84tNpWp4TZBFGQz
+8yTnc4kmz75fS/jY2MMddj2gbICrsRhetPfHtXV/WVhJDP1H18GbtCFY2VVPe0a
87VXE15/V8k1mE8McODmi3fipona8+/och3xWKE2rec1MKzKT0g6eXq8CrGCsyT7
YdEIqUuyyOP7uWrat2DX9GgdT0Kj3jlN9K5W7edjcrsZCwenyO4KbXCeAvzhzffi
7MA0BM0oNC9hkXL+nOmFg/+OTxIy7vKBg8P+OxtMb61zO7X8vC7CIAXFjvGDfRaD
ssbzSibBsu/6iGtCOGEoXJf//////////wIBAg==
-----END DH PARAMETERS-----
";

/// Domain of the catch-all certificate.
const DEFAULT_CERTIFICATE_DOMAIN: &str = "localhost";

/// Durable storage for certificates, keys, and shared TLS files.
pub trait CertificateStore {
    /// Reads a stored file; `None` if it is missing or unreadable.
    fn read(&self, name: &str) -> Option<Vec<u8>>;

    /// Stores a file. Private files are readable by the owner only.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    fn write(&mut self, name: &str, contents: &[u8], private: bool) -> Result<()>;

    /// Where a file lives, as mounted into containers.
    fn location(&self, name: &str) -> PathBuf;
}

impl<T: CertificateStore + ?Sized> CertificateStore for &mut T {
    fn read(&self, name: &str) -> Option<Vec<u8>> {
        (**self).read(name)
    }

    fn write(&mut self, name: &str, contents: &[u8], private: bool) -> Result<()> {
        (**self).write(name, contents, private)
    }

    fn location(&self, name: &str) -> PathBuf {
        (**self).location(name)
    }
}

/// Certificate store backed by a directory.
#[derive(Debug, Clone)]
pub struct FsCertificateStore {
    dir: PathBuf,
}

impl FsCertificateStore {
    /// Creates a store rooted at `dir`; the directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl CertificateStore for FsCertificateStore {
    fn read(&self, name: &str) -> Option<Vec<u8>> {
        let path = self.dir.join(name);
        match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "certificate file not readable");
                None
            }
        }
    }

    fn write(&mut self, name: &str, contents: &[u8], private: bool) -> Result<()> {
        let path = self.dir.join(name);
        let io_err = |source| BerthError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(|source| BerthError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mode = if private { 0o600 } else { 0o644 };
        let mut options = OpenOptions::new();
        let _ = options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            let _ = options.mode(mode);
        }
        let mut file = options.open(&path).map_err(io_err)?;
        file.write_all(contents).map_err(io_err)?;
        // `mode` only applies to newly created files.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(mode)).map_err(io_err)?;
        }
        #[cfg(not(unix))]
        let _ = mode;
        tracing::debug!(path = %path.display(), private, "wrote TLS file");
        Ok(())
    }

    fn location(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

/// In-memory certificate store, used for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryCertificateStore {
    root: PathBuf,
    files: BTreeMap<String, (Vec<u8>, bool)>,
}

impl MemoryCertificateStore {
    /// Creates an empty store reporting locations under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: BTreeMap::new(),
        }
    }

    /// Names of stored files, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Whether `name` was stored as private.
    #[must_use]
    pub fn is_private(&self, name: &str) -> Option<bool> {
        self.files.get(name).map(|(_, private)| *private)
    }
}

impl CertificateStore for MemoryCertificateStore {
    fn read(&self, name: &str) -> Option<Vec<u8>> {
        self.files.get(name).map(|(bytes, _)| bytes.clone())
    }

    fn write(&mut self, name: &str, contents: &[u8], private: bool) -> Result<()> {
        let _ = self
            .files
            .insert(name.to_string(), (contents.to_vec(), private));
        Ok(())
    }

    fn location(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

/// Whether a certificate was reused or written in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateStatus {
    /// Still valid and left untouched.
    Reused,
    /// Newly generated.
    Generated,
}

/// A certificate/key pair ready to be mounted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Certificate {
    /// Common name.
    pub domain: String,
    /// File name stem shared by the `.crt` and `.key` files.
    pub stem: String,
    /// Certificate location.
    pub cert_path: PathBuf,
    /// Private key location.
    pub key_path: PathBuf,
    /// End of validity.
    pub not_after: DateTime<Utc>,
    /// Reused or generated.
    pub status: CertificateStatus,
}

impl Certificate {
    /// Certificate file name.
    #[must_use]
    pub fn cert_file(&self) -> String {
        format!("{}.crt", self.stem)
    }

    /// Key file name.
    #[must_use]
    pub fn key_file(&self) -> String {
        format!("{}.key", self.stem)
    }
}

/// PEM-encoded output of [`generate_certificate`].
#[derive(Debug, Clone)]
pub struct GeneratedCertificate {
    /// Certificate.
    pub cert_pem: String,
    /// PKCS#8 private key.
    pub key_pem: String,
}

/// File name stem for `domain`; a leading wildcard becomes `_wildcard`.
#[must_use]
pub fn file_stem(domain: &str) -> String {
    domain.replace('*', "_wildcard")
}

/// Subject alternative names for `domain`: the domain, its `www.` form
/// (unless it already is one or is a wildcard), `localhost`, and the
/// loopback address.
#[must_use]
pub fn subject_alt_names(domain: &str) -> Vec<String> {
    let mut names = vec![domain.to_string()];
    if !domain.starts_with("www.") && !domain.starts_with("*.") {
        names.push(format!("www.{domain}"));
    }
    names.push("localhost".into());
    names.push(Ipv4Addr::LOCALHOST.to_string());
    let mut seen = std::collections::HashSet::new();
    names.retain(|n| seen.insert(n.clone()));
    names
}

/// Generates a self-signed certificate with a fresh 2048-bit RSA key.
///
/// # Errors
///
/// Returns [`BerthError::Certificate`] if key generation or signing fails.
pub fn generate_certificate(
    domain: &str,
    issued_at: DateTime<Utc>,
    validity_days: u32,
) -> Result<GeneratedCertificate> {
    let fail = |message: String| BerthError::Certificate {
        domain: domain.to_string(),
        message,
    };
    let to_offset = |at: DateTime<Utc>| {
        time::OffsetDateTime::from_unix_timestamp(at.timestamp()).map_err(|e| fail(e.to_string()))
    };

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, domain);
    dn.push(DnType::OrganizationName, constants::APP_NAME);
    params.distinguished_name = dn;
    params.subject_alt_names = subject_alt_names(domain)
        .into_iter()
        .map(|name| match name.parse::<IpAddr>() {
            Ok(ip) => Ok(SanType::IpAddress(ip)),
            Err(_) => name.try_into().map(SanType::DnsName),
        })
        .collect::<std::result::Result<_, _>>()
        .map_err(|e: rcgen::Error| fail(e.to_string()))?;
    params.not_before = to_offset(issued_at)?;
    params.not_after = to_offset(issued_at + Duration::days(i64::from(validity_days)))?;

    let key_pair = KeyPair::generate_rsa_for(&rcgen::PKCS_RSA_SHA256, RsaKeySize::_2048)
        .map_err(|e| fail(format!("key generation: {e}")))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| fail(format!("signing: {e}")))?;
    Ok(GeneratedCertificate {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// Reads the `notAfter` instant of a PEM certificate.
#[must_use]
pub fn certificate_expiry(pem: &[u8]) -> Option<DateTime<Utc>> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(pem).ok()?;
    let cert = pem.parse_x509().ok()?;
    DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
}

/// Whether a stored certificate is still good: `now + window < notAfter`.
#[must_use]
pub fn is_valid(pem: &[u8], now: DateTime<Utc>, window: Duration) -> bool {
    certificate_expiry(pem).is_some_and(|not_after| now + window < not_after)
}

/// Whether the PEM private key `key` belongs to the PEM certificate `cert`.
///
/// Compares the certificate's subject public key info with the one derived
/// from the key. Anything unparsable counts as a mismatch.
#[must_use]
pub fn key_matches(cert: &[u8], key: &[u8]) -> bool {
    let Ok(key) = std::str::from_utf8(key) else {
        return false;
    };
    let Ok(key_pair) = KeyPair::from_pem(key) else {
        return false;
    };
    let Ok((_, pem)) = x509_parser::pem::parse_x509_pem(cert) else {
        return false;
    };
    pem.parse_x509()
        .is_ok_and(|cert| cert.public_key().raw == key_pair.public_key_der().as_slice())
}

/// Applies the renewal policy against a store.
#[derive(Debug)]
pub struct CertificateManager<'s, S: CertificateStore + ?Sized> {
    store: &'s mut S,
    now: DateTime<Utc>,
    window: Duration,
    validity_days: u32,
}

impl<'s, S: CertificateStore + ?Sized> CertificateManager<'s, S> {
    /// Creates a manager evaluating validity at `now`.
    pub fn new(store: &'s mut S, config: &BerthConfig, now: DateTime<Utc>) -> Self {
        Self {
            store,
            now,
            window: Duration::days(i64::from(config.renewal_window_days)),
            validity_days: config.certificate_validity_days,
        }
    }

    /// Ensures the catch-all certificate exists and is valid.
    ///
    /// # Errors
    ///
    /// Returns an error if a new certificate cannot be generated or stored.
    pub fn ensure_default(&mut self) -> Result<Certificate> {
        self.ensure_named(constants::DEFAULT_CERTIFICATE_NAME, DEFAULT_CERTIFICATE_DOMAIN)
    }

    /// Ensures a valid certificate for `domain`.
    ///
    /// # Errors
    ///
    /// Returns an error if a new certificate cannot be generated or stored.
    pub fn ensure(&mut self, domain: &str) -> Result<Certificate> {
        self.ensure_named(&file_stem(domain), domain)
    }

    fn ensure_named(&mut self, stem: &str, domain: &str) -> Result<Certificate> {
        let cert_file = format!("{stem}.crt");
        let key_file = format!("{stem}.key");
        let existing = self.store.read(&cert_file);
        let key = self.store.read(&key_file);

        let reusable = match (&existing, &key) {
            (Some(pem), Some(key)) if is_valid(pem, self.now, self.window) && key_matches(pem, key) => {
                certificate_expiry(pem)
            }
            _ => None,
        };

        let (not_after, status) = if let Some(not_after) = reusable {
            tracing::debug!(domain, %not_after, "reusing certificate");
            (not_after, CertificateStatus::Reused)
        } else {
            let reason = match (&existing, &key) {
                (None, _) => "missing",
                (Some(_), None) => "key missing",
                (Some(pem), Some(_)) if certificate_expiry(pem).is_none() => "unparsable",
                (Some(pem), Some(_)) if is_valid(pem, self.now, self.window) => "key mismatch",
                _ => "expiring",
            };
            tracing::info!(domain, reason, "generating certificate");
            let generated = generate_certificate(domain, self.now, self.validity_days)?;
            self.store.write(&key_file, generated.key_pem.as_bytes(), true)?;
            self.store.write(&cert_file, generated.cert_pem.as_bytes(), false)?;
            let not_after = self.now + Duration::days(i64::from(self.validity_days));
            (not_after, CertificateStatus::Generated)
        };

        Ok(Certificate {
            domain: domain.to_string(),
            stem: stem.to_string(),
            cert_path: self.store.location(&cert_file),
            key_path: self.store.location(&key_file),
            not_after,
            status,
        })
    }

    /// Writes the shared TLS parameter files if they are absent.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be written.
    pub fn ensure_shared_files(&mut self) -> Result<()> {
        for (name, contents) in [
            (constants::TLS_PARAMS_FILE, SSL_PARAMS),
            (constants::DH_PARAMS_FILE, DH_PARAMS),
        ] {
            if self.store.read(name).is_none() {
                self.store.write(name, contents.as_bytes(), false)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_750_000_000, 0).expect("timestamp")
    }

    #[test]
    fn sans_cover_www_localhost_and_loopback() {
        assert_eq!(
            subject_alt_names("shop.test"),
            vec!["shop.test", "www.shop.test", "localhost", "127.0.0.1"]
        );
        assert_eq!(
            subject_alt_names("www.shop.test"),
            vec!["www.shop.test", "localhost", "127.0.0.1"]
        );
        assert_eq!(
            subject_alt_names("*.shop.test"),
            vec!["*.shop.test", "localhost", "127.0.0.1"]
        );
        assert_eq!(subject_alt_names("localhost"), vec!["localhost", "www.localhost", "127.0.0.1"]);
    }

    #[test]
    fn wildcard_file_stem() {
        assert_eq!(file_stem("*.shop.test"), "_wildcard.shop.test");
        assert_eq!(file_stem("shop.test"), "shop.test");
    }

    #[test]
    fn generated_certificate_has_requested_validity() {
        let generated = generate_certificate("shop.test", now(), 365).expect("generate");
        let not_after = certificate_expiry(generated.cert_pem.as_bytes()).expect("parse");
        assert_eq!(not_after, now() + Duration::days(365));
        assert!(generated.key_pem.contains("PRIVATE KEY"));
    }

    #[test]
    fn validity_respects_renewal_window() {
        let generated = generate_certificate("shop.test", now(), 40).expect("generate");
        let pem = generated.cert_pem.as_bytes();
        assert!(is_valid(pem, now(), Duration::days(30)));
        assert!(!is_valid(pem, now() + Duration::days(10), Duration::days(30)));
        assert!(!is_valid(b"not a certificate", now(), Duration::days(30)));
    }

    #[test]
    fn manager_generates_then_reuses() {
        let mut store = MemoryCertificateStore::new("/certs");
        let config = BerthConfig::default();

        let first = CertificateManager::new(&mut store, &config, now())
            .ensure("shop.test")
            .expect("first");
        assert_eq!(first.status, CertificateStatus::Generated);
        assert_eq!(first.cert_path, Path::new("/certs/shop.test.crt"));
        let stored = store.read("shop.test.crt").expect("stored");

        let second = CertificateManager::new(&mut store, &config, now() + Duration::days(1))
            .ensure("shop.test")
            .expect("second");
        assert_eq!(second.status, CertificateStatus::Reused);
        assert_eq!(store.read("shop.test.crt").expect("stored"), stored);
        assert_eq!(store.is_private("shop.test.key"), Some(true));
        assert_eq!(store.is_private("shop.test.crt"), Some(false));
    }

    #[test]
    fn missing_key_forces_regeneration() {
        let mut store = MemoryCertificateStore::new("/certs");
        let generated = generate_certificate("shop.test", now(), 365).expect("generate");
        store
            .write("shop.test.crt", generated.cert_pem.as_bytes(), false)
            .expect("write");
        let cert = CertificateManager::new(&mut store, &BerthConfig::default(), now())
            .ensure("shop.test")
            .expect("ensure");
        assert_eq!(cert.status, CertificateStatus::Generated);
        assert!(store.read("shop.test.key").is_some());
    }

    /// Memory store whose writes fail for names ending in `failing`.
    struct FlakyStore {
        inner: MemoryCertificateStore,
        failing: Option<&'static str>,
    }

    impl CertificateStore for FlakyStore {
        fn read(&self, name: &str) -> Option<Vec<u8>> {
            self.inner.read(name)
        }

        fn write(&mut self, name: &str, contents: &[u8], private: bool) -> Result<()> {
            if self.failing.is_some_and(|suffix| name.ends_with(suffix)) {
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
    fn key_matches_only_its_own_certificate() {
        let first = generate_certificate("shop.test", now(), 365).expect("generate");
        let second = generate_certificate("shop.test", now(), 365).expect("generate");
        assert!(key_matches(first.cert_pem.as_bytes(), first.key_pem.as_bytes()));
        assert!(!key_matches(first.cert_pem.as_bytes(), second.key_pem.as_bytes()));
        assert!(!key_matches(first.cert_pem.as_bytes(), b"garbage"));
    }

    #[test]
    fn mismatched_key_forces_regeneration() {
        let mut store = MemoryCertificateStore::new("/certs");
        let cert = generate_certificate("shop.test", now(), 365).expect("generate");
        let stray = generate_certificate("shop.test", now(), 365).expect("generate");
        store
            .write("shop.test.crt", cert.cert_pem.as_bytes(), false)
            .expect("write");
        store
            .write("shop.test.key", stray.key_pem.as_bytes(), true)
            .expect("write");

        let ensured = CertificateManager::new(&mut store, &BerthConfig::default(), now())
            .ensure("shop.test")
            .expect("ensure");

        assert_eq!(ensured.status, CertificateStatus::Generated);
        let cert = store.read("shop.test.crt").expect("cert");
        let key = store.read("shop.test.key").expect("key");
        assert!(key_matches(&cert, &key));
    }

    #[test]
    fn interrupted_generation_is_repaired_on_the_next_run() {
        let original = generate_certificate("shop.test", now(), 365).expect("generate");
        let mut store = FlakyStore {
            inner: MemoryCertificateStore::new("/certs"),
            failing: None,
        };
        store
            .write("shop.test.crt", original.cert_pem.as_bytes(), false)
            .expect("write");
        store.failing = Some(".crt");

        let config = BerthConfig::default();
        let _ = CertificateManager::new(&mut store, &config, now())
            .ensure("shop.test")
            .unwrap_err();
        assert!(store.read("shop.test.key").is_some());

        store.failing = None;
        let ensured = CertificateManager::new(&mut store, &config, now())
            .ensure("shop.test")
            .expect("ensure");

        assert_eq!(ensured.status, CertificateStatus::Generated);
        let cert = store.read("shop.test.crt").expect("cert");
        let key = store.read("shop.test.key").expect("key");
        assert_ne!(cert, original.cert_pem.as_bytes());
        assert!(key_matches(&cert, &key));
    }

    #[test]
    fn shared_files_are_written_once() {
        let mut store = MemoryCertificateStore::new("/certs");
        store
            .write(constants::DH_PARAMS_FILE, b"custom", false)
            .expect("write");
        CertificateManager::new(&mut store, &BerthConfig::default(), now())
            .ensure_shared_files()
            .expect("shared");
        assert_eq!(store.read(constants::DH_PARAMS_FILE).expect("dh"), b"custom");
        assert_eq!(
            store.read(constants::TLS_PARAMS_FILE).expect("params"),
            SSL_PARAMS.as_bytes()
        );
    }
}
