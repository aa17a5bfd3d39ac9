//! System-wide constants and default paths.

/// Application name used in CLI output and generated headers.
pub const APP_NAME: &str = "berth";

/// Default project file read by the CLI.
pub const DEFAULT_PROJECT_FILE: &str = "berth.yml";

/// Header prepended to every generated file.
pub const GENERATED_HEADER: &str =
    "# Generated by berth. Do not edit by hand: changes are overwritten on the next run.";

/// Default directory (relative to the working directory) for generated files.
pub const DEFAULT_OUTPUT_DIR: &str = ".berth";

/// File name of the generated orchestration document.
pub const COMPOSE_FILE_NAME: &str = "compose.yml";

/// Path of the generated proxy configuration, relative to the output directory.
pub const PROXY_CONFIG_FILE: &str = "proxy/default.conf";

/// Directory (relative to the output directory) holding certificates and keys.
pub const TLS_DIR: &str = "certs";

/// Default bridge network every service joins.
pub const DEFAULT_NETWORK: &str = "berth";

/// Fixed private subnet of the bridge network.
pub const DEFAULT_SUBNET: &str = "172.28.0.0/16";

/// Suffix appended to hostnames that have no dot.
pub const DEFAULT_DOMAIN_SUFFIX: &str = "test";

/// Reverse-proxy image.
pub const DEFAULT_PROXY_IMAGE: &str = "nginx:1.27-alpine";

/// Name of the synthesized reverse-proxy service.
pub const DEFAULT_PROXY_SERVICE: &str = "proxy";

/// Container path the proxy configuration is mounted at.
pub const PROXY_CONFIG_MOUNT: &str = "/etc/nginx/conf.d/default.conf";

/// Container path the TLS directory is mounted at.
pub const PROXY_CERTS_MOUNT: &str = "/etc/nginx/certs";

/// Container path a description's source folder is mounted at.
pub const DEFAULT_SOURCE_TARGET: &str = "/app";

/// Certificates expiring within this many days are regenerated.
pub const RENEWAL_WINDOW_DAYS: u32 = 30;

/// Validity period of generated certificates.
pub const CERTIFICATE_VALIDITY_DAYS: u32 = 365;

/// Stem of the catch-all certificate served for unknown hostnames.
pub const DEFAULT_CERTIFICATE_NAME: &str = "default";

/// Shared TLS parameters file, written once.
pub const TLS_PARAMS_FILE: &str = "ssl-params.conf";

/// Diffie-Hellman parameters file, written once.
pub const DH_PARAMS_FILE: &str = "dhparam.pem";
