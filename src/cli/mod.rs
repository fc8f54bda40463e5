//! CLI Module
//!
//! Command-line front-end for the Overdub engine.

pub mod commands;
pub mod shell;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Overdub - multi-track recorder engine
#[derive(Parser, Debug)]
#[command(name = "overdub")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Engine configuration file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Simulate audio I/O instead of launching PipeWire tools
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the tracks of a project
    #[command(name = "tracks")]
    Tracks {
        /// Path to the project
        project: PathBuf,
    },

    /// Copy one track's audio out of a project
    #[command(name = "export-track")]
    ExportTrack {
        /// Path to the project
        project: PathBuf,

        /// Track number, name or id
        track: String,

        /// Destination WAV file
        dest: PathBuf,
    },

    /// Mix every audible track into one file
    #[command(name = "export-mixed")]
    ExportMixed {
        /// Path to the project
        project: PathBuf,

        /// Destination WAV file
        dest: PathBuf,
    },

    /// Export every track plus the mix into a directory
    #[command(name = "export-all")]
    ExportAll {
        /// Path to the project
        project: PathBuf,

        /// Output directory
        dir: PathBuf,
    },

    /// Open a project in the interactive shell (created if missing)
    #[command(name = "shell")]
    Shell {
        /// Path to the project
        project: PathBuf,
    },
}
