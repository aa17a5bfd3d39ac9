//! `berth plan`: show what `generate` would produce without writing.

use std::path::PathBuf;

use berth_compose::Synthesizer;
use berth_compose::tls::MemoryCertificateStore;
use clap::{Args, ValueEnum};

use crate::output::{format_plan, print_diagnostics};
use crate::project;

/// Output format of the plan.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlanFormat {
    /// Human-readable summary.
    #[default]
    Text,
    /// The full synthesis result as JSON.
    Json,
}

/// Arguments for the `plan` command.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Path to the project file.
    #[arg(default_value = berth_common::constants::DEFAULT_PROJECT_FILE)]
    pub file: PathBuf,

    /// Output format.
    #[arg(long, value_enum, default_value_t = PlanFormat::Text)]
    pub format: PlanFormat,
}

/// Executes the `plan` command.
///
/// Runs the full synthesis against an empty in-memory certificate store,
/// so nothing on disk is touched.
///
/// # Errors
///
/// Returns an error if the project cannot be loaded or fails validation.
pub fn execute(args: PlanArgs) -> anyhow::Result<()> {
    let project = project::load(&args.file)?;
    let store = MemoryCertificateStore::new(project.layout.tls_dir());
    let synthesis = Synthesizer::new(&project.file.settings, &project.layout, store)
        .synthesize(&project.file.services, &project.name)?;

    match args.format {
        PlanFormat::Text => {
            print_diagnostics(&synthesis.diagnostics);
            print!("{}", format_plan(&project.name, &synthesis));
        }
        PlanFormat::Json => println!("{}", serde_json::to_string_pretty(&synthesis)?),
    }
    Ok(())
}
