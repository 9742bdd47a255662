mod cli;
mod config;
mod controller;
mod daemon;
mod ipc;
mod models;
mod player;
mod presence;
mod tray;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{App, Cli, Commands, ConfigCommands, DaemonCommands};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let app = App::new(cli.config)?;

    match cli.command {
        Commands::Run => {
            app.run()?;
        }
        Commands::Start => {
            app.start()?;
        }
        Commands::Stop => {
            app.stop()?;
        }
        Commands::Reload => {
            app.reload()?;
        }
        Commands::Status => {
            app.status()?;
        }
        Commands::Check => {
            app.check()?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                app.config_show()?;
            }
            ConfigCommands::Path => {
                app.config_path()?;
            }
            ConfigCommands::Set { key, value } => {
                app.config_set(&key, &value)?;
            }
            ConfigCommands::Edit => {
                app.config_edit()?;
            }
        },
        Commands::Daemon { command } => match command {
            DaemonCommands::Start => {
                app.daemon_start()?;
            }
            DaemonCommands::Stop => {
                app.daemon_stop()?;
            }
            DaemonCommands::Status => {
                app.daemon_status()?;
            }
            DaemonCommands::Run => {
                app.run()?;
            }
        },
    }

    Ok(())
}
