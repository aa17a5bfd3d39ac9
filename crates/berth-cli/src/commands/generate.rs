//! `berth generate`: synthesize the stack and write every artifact.

use std::path::PathBuf;

use anyhow::Context;
use berth_compose::Synthesizer;
use berth_compose::output::write_artifacts;
use berth_compose::tls::FsCertificateStore;
use clap::Args;

use crate::output::print_diagnostics;
use crate::project;

/// Arguments for the `generate` command.
#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Path to the project file.
    #[arg(default_value = berth_common::constants::DEFAULT_PROJECT_FILE)]
    pub file: PathBuf,
}

/// Executes the `generate` command.
///
/// Certificates are reused from the output directory while still valid.
///
/// # Errors
///
/// Returns an error if the project cannot be loaded, synthesis fails
/// validation, or an artifact cannot be written.
pub fn execute(args: GenerateArgs) -> anyhow::Result<()> {
    let project = project::load(&args.file)?;
    let store = FsCertificateStore::new(project.layout.tls_dir());
    let synthesis = Synthesizer::new(&project.file.settings, &project.layout, store)
        .synthesize(&project.file.services, &project.name)
        .with_context(|| format!("cannot synthesize {}", project.name))?;
    print_diagnostics(&synthesis.diagnostics);

    let written = write_artifacts(&synthesis, &project.layout)?;
    for path in &written {
        println!("wrote {}", path.display());
    }
    for cert in &synthesis.certificates {
        println!("certificate {} -> {}", cert.domain, cert.cert_path.display());
    }
    println!(
        "{} service(s) in {}",
        synthesis.document.services.len(),
        project.layout.compose_file().display()
    );
    Ok(())
}
