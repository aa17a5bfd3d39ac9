//! `berth ports`: host port utilities.

use std::net::{Ipv4Addr, TcpListener};
use std::path::PathBuf;

use berth_compose::assembler::Assembler;
use berth_compose::domain::DomainRouter;
use berth_compose::ports::PortRegistry;
use berth_compose::provider::ProviderRegistry;
use clap::{Args, Subcommand};

use crate::project;

/// Arguments for the `ports` command.
#[derive(Args, Debug)]
pub struct PortsArgs {
    /// Ports subcommand.
    #[command(subcommand)]
    pub command: PortsCommand,
}

/// Port subcommands.
#[derive(Subcommand, Debug)]
pub enum PortsCommand {
    /// Suggest a free host port near PORT.
    Suggest {
        /// Preferred port.
        port: u16,
        /// Project file whose claims are taken into account.
        #[arg(default_value = berth_common::constants::DEFAULT_PROJECT_FILE)]
        file: PathBuf,
    },
}

/// Executes the `ports` command.
///
/// # Errors
///
/// Returns an error if the project file exists but cannot be assembled, or
/// no free port is left.
pub fn execute(args: PortsArgs) -> anyhow::Result<()> {
    match args.command {
        PortsCommand::Suggest { port, file } => suggest(port, &file),
    }
}

fn suggest(port: u16, file: &std::path::Path) -> anyhow::Result<()> {
    let suggestion = if file.exists() {
        let project = project::load(file)?;
        let settings = &project.file.settings;
        let registry = ProviderRegistry::new();
        let mut assembly = Assembler::new(settings, &project.layout, &registry, &project.name)
            .assemble(&project.file.services)?;
        let router = DomainRouter::new(settings, &project.layout);
        let bindings = router.plan(&project.file.services, &mut assembly);
        router.attach_proxy(&mut assembly, &bindings);
        assembly.ports().suggest_port_with(port, is_bindable)
    } else {
        tracing::debug!(path = %file.display(), "no project file; checking the host only");
        PortRegistry::new().suggest_port_with(port, is_bindable)
    };

    match suggestion {
        Some(found) => {
            println!("{found}");
            Ok(())
        }
        None => anyhow::bail!("no free port found near {port}"),
    }
}

/// Whether nothing on this host is listening on `port`.
fn is_bindable(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}
