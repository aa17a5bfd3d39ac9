//! Companion runtime containers for static web servers.
//!
//! A web server fronting application code (nginx serving a PHP app) needs
//! a second container running the interpreter against the same source
//! tree. The front-end depends on the companion.

use berth_common::error::{BerthError, Result};

/// Image repositories that can front a companion runtime.
pub const WEB_SERVERS: &[&str] = &["nginx", "httpd", "caddy"];

/// Port the FastCGI process manager listens on.
pub const FPM_PORT: u16 = 9000;

const DEFAULT_PHP_VERSION: &str = "8.3";

/// A parsed `runtime` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Companion {
    /// Runtime version, without a leading `v`.
    pub version: String,
}

impl Companion {
    /// Parses `php[:version]`.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::Config`] for any runtime other than `php` or a
    /// version that is not dotted digits.
    pub fn parse(raw: &str) -> Result<Self> {
        let (kind, version) = match raw.trim().split_once(':') {
            Some((kind, version)) => (kind.trim(), version.trim()),
            None => (raw.trim(), ""),
        };
        if !kind.eq_ignore_ascii_case("php") {
            return Err(BerthError::config(format!(
                "unsupported runtime \"{kind}\" (supported: php)"
            )));
        }
        let version = version.strip_prefix(['v', 'V']).unwrap_or(version);
        let version = if version.is_empty() { DEFAULT_PHP_VERSION } else { version };
        if !version.split('.').all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())) {
            return Err(BerthError::config(format!(
                "invalid php runtime version \"{version}\""
            )));
        }
        Ok(Self {
            version: version.to_string(),
        })
    }

    /// Name of the companion container for `frontend`.
    #[must_use]
    pub fn service_name(frontend: &str) -> String {
        format!("{frontend}-php")
    }

    /// Image of the companion container.
    #[must_use]
    pub fn image(&self) -> String {
        format!("php:{}-fpm", self.version)
    }
}

/// Whether an image repository is a static web server.
#[must_use]
pub fn is_web_server(repository: &str) -> bool {
    WEB_SERVERS.iter().any(|server| repository.starts_with(server))
}
