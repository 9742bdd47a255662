use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
pub use commands::*;

#[derive(Parser)]
#[command(name = "kodicord")]
#[command(about = "Mirror what Kodi is playing onto your Discord rich presence")]
#[command(version)]
pub struct Cli {
    /// Path to the config file
    #[arg(long, global = true, env = "KODICORD_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run in the foreground with the tray icon
    Run,

    /// Start presence updates (starts the daemon if needed)
    Start,

    /// Stop presence updates after the current poll
    Stop,

    /// Re-read the config file and restart presence updates
    Reload,

    /// Show what the daemon is doing
    Status,

    /// Poll Kodi once and show the presence it would produce
    Check,

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Daemon management
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the current configuration
    Show,
    /// Print the config file location
    Path,
    /// Set a value, e.g. `player.host 192.168.1.20`
    Set {
        /// Dotted key (player.host, player.port, player.username,
        /// player.password, presence.client_id, daemon.auto_start,
        /// daemon.poll_on_start, storage.path)
        key: String,
        value: String,
    },
    /// Open the config file in the default editor
    Edit,
}

#[derive(Subcommand)]
pub enum DaemonCommands {
    /// Start the daemon
    Start,
    /// Stop the daemon
    Stop,
    /// Show daemon status
    Status,
    /// Run daemon in foreground (internal use)
    Run,
}
