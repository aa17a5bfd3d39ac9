//! Writes generated artifacts to disk.
//!
//! Certificates are written by the certificate store during synthesis; this
//! module handles the compose document and the proxy configuration.

use std::fs;
use std::path::{Path, PathBuf};

use berth_common::config::OutputLayout;
use berth_common::error::{BerthError, Result};

use crate::synthesize::Synthesis;

/// Writes the compose file and, if routing is active, the proxy
/// configuration. Returns the paths written.
///
/// A stale proxy configuration from an earlier run is removed when routing
/// is no longer active.
///
/// # Errors
///
/// Returns [`BerthError::Io`] if a directory or file cannot be written.
pub fn write_artifacts(synthesis: &Synthesis, layout: &OutputLayout) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    let compose = layout.compose_file();
    write_public(&compose, synthesis.compose_yaml()?.as_bytes())?;
    written.push(compose);

    let proxy = layout.proxy_config();
    match &synthesis.proxy_config {
        Some(config) => {
            write_public(&proxy, config.as_bytes())?;
            written.push(proxy);
        }
        None if proxy.exists() => {
            fs::remove_file(&proxy).map_err(|source| BerthError::Io {
                path: proxy.clone(),
                source,
            })?;
            tracing::debug!(path = %proxy.display(), "removed stale proxy configuration");
        }
        None => {}
    }

    tracing::info!(files = written.len(), dir = %layout.output_dir().display(), "artifacts written");
    Ok(written)
}

/// Writes `contents` to `path` with mode 0644, creating parent directories.
fn write_public(path: &Path, contents: &[u8]) -> Result<()> {
    let io_err = |source| BerthError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, contents).map_err(io_err)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o644)).map_err(io_err)?;
    }
    tracing::debug!(path = %path.display(), bytes = contents.len(), "wrote artifact");
    Ok(())
}
