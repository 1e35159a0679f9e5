//! Command-line interface
//!
//! Provides the main CLI structure using clap with subcommands for:
//! - `split`: Run the configured splitting passes over a chunk graph
//! - `init`: Write a sample configuration and chunk graph

mod init;
mod split;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

pub use init::InitCommand;
pub use split::{SplitCommand, SplitOutput};

/// Divide - split bundler chunks into balanced bundles
#[derive(Parser, Debug)]
#[command(name = "divide")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to divide.toml. Built-in defaults apply when unset and no
    /// divide.toml exists in the working directory.
    #[arg(short, long, global = true, env = "DIVIDE_CONFIG")]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Split the chunks of a serialized chunk graph
    Split(SplitCommand),

    /// Write a sample divide.toml and graph.json
    Init(InitCommand),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(&self) -> Result<()> {
        print_banner();

        match &self.command {
            Commands::Split(cmd) => cmd.execute(self.config.as_deref()),
            Commands::Init(cmd) => cmd.execute(),
        }
    }
}

/// Print the banner
fn print_banner() {
    eprintln!(
        "\n{} {} {}\n",
        "✂".cyan(),
        "Divide".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}
