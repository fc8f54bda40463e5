//! Overdub CLI - Multi-Track Recorder
//!
//! Command-line interface for the Overdub engine.

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::info;

use overdub::cli::commands::{self, SessionOptions};
use overdub::cli::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    info!("Overdub v{}", env!("CARGO_PKG_VERSION"));

    let options = commands::load_options(cli.config.as_deref(), cli.dry_run)
        .context("failed to load engine configuration")?;

    match cli.command {
        Some(cmd) => handle_command(cmd, &options),
        None => {
            println!("Overdub v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(cmd: Commands, options: &SessionOptions) -> anyhow::Result<()> {
    match cmd {
        Commands::Tracks { project } => commands::list_tracks(&project, options)
            .with_context(|| format!("could not list tracks of {}", project.display())),
        Commands::ExportTrack {
            project,
            track,
            dest,
        } => commands::export_track(&project, &track, &dest, options)
            .with_context(|| format!("could not export track '{}'", track)),
        Commands::ExportMixed { project, dest } => commands::export_mixed(&project, &dest, options)
            .with_context(|| format!("could not mix {}", project.display())),
        Commands::ExportAll { project, dir } => commands::export_all(&project, &dir, options)
            .with_context(|| format!("could not export {}", project.display())),
        Commands::Shell { project } => commands::run_shell(&project, options)
            .with_context(|| format!("shell session on {} failed", project.display())),
    }
}
