//! CLI command definitions and dispatch.

pub mod generate;
pub mod plan;
pub mod ports;

use clap::{Parser, Subcommand};

/// berth: compose stacks from service descriptions.
#[derive(Parser, Debug)]
#[command(name = "berth", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Synthesize the stack and write compose, proxy, and TLS files.
    Generate(generate::GenerateArgs),
    /// Show what would be generated without writing anything.
    Plan(plan::PlanArgs),
    /// Host port utilities.
    Ports(ports::PortsArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Generate(args) => generate::execute(args),
        Command::Plan(args) => plan::execute(args),
        Command::Ports(args) => ports::execute(args),
    }
}
