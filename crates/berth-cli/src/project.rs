//! Project file loading.
//!
//! A project file is plain YAML:
//!
//! ```yaml
//! project: shop
//! settings:
//!   domain_suffix: test
//! services:
//!   - name: web
//!     image: nginx:1.27
//!     hostname: shop
//!     tls: true
//!     database: postgres:16
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use berth_common::config::{BerthConfig, OutputLayout};
use berth_common::types::ServiceDescription;
use serde::Deserialize;

/// Parsed project file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectFile {
    /// Project name; defaults to the working directory's name.
    pub project: Option<String>,
    /// Engine settings.
    pub settings: BerthConfig,
    /// Service descriptions, in declaration order.
    pub services: Vec<ServiceDescription>,
}

/// A loaded project with its resolved name and output layout.
#[derive(Debug, Clone)]
pub struct Project {
    /// Project name.
    pub name: String,
    /// Parsed file contents.
    pub file: ProjectFile,
    /// Where artifacts go.
    pub layout: OutputLayout,
}

impl ProjectFile {
    /// Parses YAML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid project file.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(text).context("invalid project file")
    }
}

/// Loads `path` relative to the current directory.
///
/// # Errors
///
/// Returns an error if the working directory is unavailable or the file
/// cannot be read or parsed.
pub fn load(path: &Path) -> anyhow::Result<Project> {
    let working_dir = std::env::current_dir().context("cannot determine the working directory")?;
    load_in(&working_dir, path)
}

/// Loads `path` with `working_dir` as the base for relative paths.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_in(working_dir: &Path, path: &Path) -> anyhow::Result<Project> {
    let full: PathBuf = working_dir.join(path);
    let text = std::fs::read_to_string(&full)
        .with_context(|| format!("cannot read project file {}", full.display()))?;
    let file = ProjectFile::parse(&text).with_context(|| format!("in {}", full.display()))?;
    tracing::debug!(path = %full.display(), services = file.services.len(), "project file loaded");

    let name = file
        .project
        .clone()
        .filter(|n| !n.trim().is_empty())
        .or_else(|| {
            working_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| berth_common::constants::APP_NAME.to_string());
    let layout = OutputLayout::new(working_dir, &file.settings);
    Ok(Project { name, file, layout })
}
