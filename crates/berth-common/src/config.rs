//! Settings model for a synthesis run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;

/// Settings that shape the generated stack.
///
/// Every field has a default, so a project file may omit the whole
/// `settings` block or any subset of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BerthConfig {
    /// Directory for generated files, relative to the working directory.
    pub output_dir: PathBuf,
    /// Suffix appended to hostnames that contain no dot.
    pub domain_suffix: String,
    /// Name of the shared bridge network.
    pub network_name: String,
    /// Private subnet of the shared bridge network.
    pub subnet: String,
    /// Image used for the reverse proxy.
    pub proxy_image: String,
    /// Service name of the reverse proxy.
    pub proxy_service: String,
    /// Certificates expiring within this many days are regenerated.
    pub renewal_window_days: u32,
    /// Validity period of newly generated certificates.
    pub certificate_validity_days: u32,
    /// Container path a description's source folder is mounted at.
    pub source_target: String,
}

impl Default for BerthConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(constants::DEFAULT_OUTPUT_DIR),
            domain_suffix: constants::DEFAULT_DOMAIN_SUFFIX.into(),
            network_name: constants::DEFAULT_NETWORK.into(),
            subnet: constants::DEFAULT_SUBNET.into(),
            proxy_image: constants::DEFAULT_PROXY_IMAGE.into(),
            proxy_service: constants::DEFAULT_PROXY_SERVICE.into(),
            renewal_window_days: constants::RENEWAL_WINDOW_DAYS,
            certificate_validity_days: constants::CERTIFICATE_VALIDITY_DAYS,
            source_target: constants::DEFAULT_SOURCE_TARGET.into(),
        }
    }
}

/// Absolute locations of every generated artifact.
///
/// Mounted paths must be absolute so the container tool resolves them
/// independently of its own working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    working_dir: PathBuf,
    output_dir: PathBuf,
}

impl OutputLayout {
    /// Builds the layout for `config` rooted at `working_dir`.
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>, config: &BerthConfig) -> Self {
        let working_dir = working_dir.into();
        let output_dir = if config.output_dir.is_absolute() {
            config.output_dir.clone()
        } else {
            working_dir.join(&config.output_dir)
        };
        Self {
            working_dir,
            output_dir,
        }
    }

    /// Directory holding all generated files.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path of the orchestration document.
    #[must_use]
    pub fn compose_file(&self) -> PathBuf {
        self.output_dir.join(constants::COMPOSE_FILE_NAME)
    }

    /// Path of the reverse-proxy configuration.
    #[must_use]
    pub fn proxy_config(&self) -> PathBuf {
        self.output_dir.join(constants::PROXY_CONFIG_FILE)
    }

    /// Directory holding certificates, keys, and shared TLS files.
    #[must_use]
    pub fn tls_dir(&self) -> PathBuf {
        self.output_dir.join(constants::TLS_DIR)
    }

    /// Resolves a path written in a description against the working directory.
    #[must_use]
    pub fn absolutize(&self, path: &str) -> PathBuf {
        let trimmed = path.strip_prefix("./").unwrap_or(path);
        let candidate = Path::new(trimmed);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else if trimmed == "." {
            self.working_dir.clone()
        } else {
            self.working_dir.join(candidate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let config = BerthConfig::default();
        assert_eq!(config.domain_suffix, "test");
        assert_eq!(config.renewal_window_days, 30);
        assert_eq!(config.certificate_validity_days, 365);
        assert_eq!(config.subnet, "172.28.0.0/16");
    }

    #[test]
    fn partial_settings_fill_defaults() {
        let config: BerthConfig =
            serde_yaml::from_str("domain_suffix: localhost\n").expect("parse settings");
        assert_eq!(config.domain_suffix, "localhost");
        assert_eq!(config.proxy_service, "proxy");
    }

    #[test]
    fn unknown_setting_is_rejected() {
        let result: Result<BerthConfig, _> = serde_yaml::from_str("bogus: 1\n");
        assert!(result.is_err());
    }

    #[test]
    fn layout_paths_are_absolute_under_working_dir() {
        let layout = OutputLayout::new("/srv/shop", &BerthConfig::default());
        assert_eq!(layout.compose_file(), Path::new("/srv/shop/.berth/compose.yml"));
        assert_eq!(
            layout.proxy_config(),
            Path::new("/srv/shop/.berth/proxy/default.conf")
        );
        assert_eq!(layout.tls_dir(), Path::new("/srv/shop/.berth/certs"));
    }

    #[test]
    fn absolutize_resolves_relative_markers() {
        let layout = OutputLayout::new("/srv/shop", &BerthConfig::default());
        assert_eq!(layout.absolutize("./src"), Path::new("/srv/shop/src"));
        assert_eq!(layout.absolutize("."), Path::new("/srv/shop"));
        assert_eq!(layout.absolutize("../shared"), Path::new("/srv/shop/../shared"));
        assert_eq!(layout.absolutize("/opt/data"), Path::new("/opt/data"));
    }
}
