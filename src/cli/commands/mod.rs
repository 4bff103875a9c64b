//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod fetch;
pub mod locate;
pub mod mount;
pub mod parse;

use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Settings;

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse an address and show its fields
    Parse {
        /// Installation source address
        url: String,
    },

    /// Download a resource to a local file
    Fetch {
        /// Installation source address
        url: String,

        /// Destination file
        dest: PathBuf,

        /// Decompress gzip content
        #[arg(short = 'z', long)]
        unzip: bool,
    },

    /// Resolve an address and mount it read-only
    Mount {
        /// Installation source address
        url: String,

        /// Mountpoint (a temporary one if omitted)
        dir: Option<PathBuf>,
    },

    /// Find an installation repository and mount it
    FindRepo {
        /// Repository address
        url: String,

        /// Mountpoint (a temporary one if omitted)
        dir: Option<PathBuf>,
    },

    /// Find an install-system image and mount it
    FindInstsys {
        /// Install-system address
        url: String,

        /// Mountpoint (a temporary one if omitted)
        dir: Option<PathBuf>,
    },
}

impl Commands {
    /// Execute the command
    pub fn run(self, settings: &Settings) -> Result<()> {
        match self {
            Self::Parse { url } => parse::execute(&url),
            Self::Fetch { url, dest, unzip } => fetch::execute(settings, &url, &dest, unzip),
            Self::Mount { url, dir } => mount::execute(settings, &url, dir.as_deref()),
            Self::FindRepo { url, dir } => locate::execute_repo(settings, &url, dir.as_deref()),
            Self::FindInstsys { url, dir } => {
                locate::execute_instsys(settings, &url, dir.as_deref())
            }
        }
    }
}
