//! CLI argument parsing definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Ask extensions for verbose logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the extension server and every installed extension
    ///
    /// Each line read from stdin is handled as launcher query text. Lines
    /// starting with ':' are runtime commands (:status, :run ID, :stop ID,
    /// :reload ID, :error ID, :quit).
    Serve {
        /// Do not start installed extensions, only accept registrations
        #[arg(long)]
        no_run: bool,
    },

    /// Validate the manifest of an extension directory
    Check {
        /// Extension directory or manifest.json path
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// Print the extension identity for a repository URL or directory
    Id {
        #[arg(value_name = "URL_OR_PATH")]
        source: String,
    },

    /// Print the effective configuration as YAML
    Config {
        /// Print the built-in defaults instead
        #[arg(long)]
        sample: bool,
    },
}
