//! Command-line arguments

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(author, version, about = "Work with files in a Solid pod")]
pub struct Invocation {
    /// Path to TOML config file (falls back to SOLID_POD_CONFIG, then solid-pod.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Print Prometheus metrics to stderr when the command finishes
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Exchange base64 account details for tokens
    Login { details: String },

    /// Rotate the access token
    Refresh,

    /// Create a directory unless it exists
    Mkdir { name: String },

    /// Check whether a directory exists
    LookupDir { name: String },

    /// Check whether a resource exists
    Lookup {
        name: String,
        #[arg(long)]
        dir: Option<String>,
    },

    /// Upload a local file without overwriting
    Upload {
        #[arg(value_name = "PATH")]
        file: PathBuf,
        #[arg(long)]
        dir: String,
        /// Name in the pod; defaults to the local file name
        #[arg(long)]
        name: Option<String>,
        /// MIME type; guessed from the extension when absent
        #[arg(long)]
        mime: Option<String>,
    },

    /// Download a resource to a file or stdout
    Download {
        name: String,
        #[arg(long)]
        dir: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Delete a resource
    Delete {
        name: String,
        #[arg(long)]
        dir: Option<String>,
    },
}
