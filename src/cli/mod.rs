//! Command-line interface module
//!
//! This module handles argument parsing and output formatting.
//! It contains no resolution logic - that belongs in the [`crate::core`] module.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use crate::config::Settings;
use commands::Commands;

/// Version details recorded by the build script
const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\nbuilt:  ",
    env!("VERGEN_BUILD_TIMESTAMP"),
    "\ntarget: ",
    env!("VERGEN_CARGO_TARGET_TRIPLE"),
    "\nrustc:  ",
    env!("VERGEN_RUSTC_SEMVER"),
);

/// insturl - installation source resolver
///
/// Parse installation source addresses, fetch from them and mount them.
#[derive(Parser, Debug)]
#[command(name = "insturl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(long_version = LONG_VERSION)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output in JSON format for scripting
    #[arg(long, global = true)]
    pub json: bool,

    /// Settings file
    #[arg(long, global = true, env = "INSTURL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Settings from `--config`, or the default location
    pub fn settings(&self) -> Result<Settings> {
        let settings = match &self.config {
            Some(path) => Settings::load_from_path(path),
            None => Settings::load(),
        };
        settings.context("Failed to load settings")
    }

    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let settings = self.settings()?;
        if let Some(cmd) = self.command {
            cmd.run(&settings)
        } else {
            // No subcommand provided, show help
            use clap::CommandFactory;
            let mut cmd = Self::command();
            cmd.print_help()?;
            Ok(())
        }
    }
}
