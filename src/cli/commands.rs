use anyhow::{Result, bail};
use std::path::PathBuf;

use crate::config::{self, Config};
use crate::daemon::Daemon;
use crate::ipc::DaemonClient;
use crate::models::{ControllerStatus, PlayerPoll};
use crate::player::{KodiClient, MediaPlayer};
use crate::presence::PresenceUpdate;

pub struct App {
    pub config_path: PathBuf,
    pub config: Config,
}

impl App {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = config_path.unwrap_or_else(Config::default_path);
        let config = Config::load_from(&config_path)?;
        Ok(Self {
            config_path,
            config,
        })
    }

    fn client(&self) -> DaemonClient {
        DaemonClient::new(self.config.socket_path())
    }

    fn ensure_daemon(&self) -> Result<DaemonClient> {
        let client = self.client();
        if !client.is_daemon_running() {
            if self.config.daemon.auto_start {
                println!("Starting daemon...");
                Daemon::start_detached(&self.config, &self.config_path)?;
            } else {
                bail!("Daemon is not running. Start it with: kodicord daemon start");
            }
        }
        Ok(client)
    }

    fn running_daemon(&self) -> Result<DaemonClient> {
        let client = self.client();
        if !client.is_daemon_running() {
            bail!("Daemon is not running. Start it with: kodicord start");
        }
        Ok(client)
    }

    // Command implementations

    pub fn run(&self) -> Result<()> {
        self.config.validate()?;
        let daemon = Daemon::new(self.config_path.clone(), self.config.clone())?;
        daemon.run()
    }

    pub fn start(&self) -> Result<()> {
        self.config.validate()?;
        let client = self.ensure_daemon()?;
        client.start()?;
        println!("Presence updates started.");
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        let client = self.running_daemon()?;
        client.stop()?;
        println!("Presence updates will stop after the current poll.");
        Ok(())
    }

    pub fn reload(&self) -> Result<()> {
        let client = self.running_daemon()?;
        client.reload()?;
        println!("Configuration reloaded.");
        Ok(())
    }

    pub fn status(&self) -> Result<()> {
        let client = self.client();

        if !client.is_daemon_running() {
            println!("Daemon is not running.");
            return Ok(());
        }

        let status = client.get_status()?;
        print_status(&status);

        Ok(())
    }

    pub fn check(&self) -> Result<()> {
        let client = KodiClient::new(&self.config.player)?;
        println!("Polling {}...", client.endpoint());

        match client.fetch_currently_playing()? {
            PlayerPoll::Unreachable => {
                println!("Kodi is unreachable.");
                println!(
                    "Check that remote control via HTTP is enabled and that player.host/player.port are correct."
                );
            }
            PlayerPoll::Reached(snapshot) => match PresenceUpdate::from_snapshot(&snapshot) {
                Some(update) => {
                    println!("Details:     {}", update.details);
                    println!("State:       {}", update.state);
                    println!("Large image: {}", update.large_image);
                }
                None => println!("Nothing is playing; presence would be cleared."),
            },
        }

        Ok(())
    }

    pub fn config_show(&self) -> Result<()> {
        print!("{}", self.config.to_display_string()?);
        Ok(())
    }

    pub fn config_path(&self) -> Result<()> {
        println!("{}", self.config_path.display());
        Ok(())
    }

    pub fn config_set(&self, key: &str, value: &str) -> Result<()> {
        let mut config = self.config.clone();
        config.set(key, value)?;
        config.save_to(&self.config_path)?;
        println!("Set {key}.");

        if self.client().is_daemon_running() {
            println!("Run 'kodicord reload' to apply it to the running daemon.");
        }
        Ok(())
    }

    pub fn config_edit(&self) -> Result<()> {
        config::open_in_editor(&self.config_path)?;
        println!("Opened {}", self.config_path.display());
        Ok(())
    }

    pub fn daemon_start(&self) -> Result<()> {
        if Daemon::is_running(&self.config) {
            println!("Daemon is already running.");
            return Ok(());
        }

        Daemon::start_detached(&self.config, &self.config_path)?;
        println!("Daemon started.");

        Ok(())
    }

    pub fn daemon_stop(&self) -> Result<()> {
        if !Daemon::is_running(&self.config) {
            println!("Daemon is not running.");
            return Ok(());
        }

        Daemon::stop(&self.config)?;
        println!("Daemon stopped.");

        Ok(())
    }

    pub fn daemon_status(&self) -> Result<()> {
        if Daemon::is_running(&self.config) {
            println!("Daemon is running.");
        } else {
            println!("Daemon is not running.");
        }

        Ok(())
    }
}

fn print_status(status: &ControllerStatus) {
    println!("Presence updates: {}", status.summary());
    if status.running {
        println!("Poll rate: {}", status.poll_rate);
    }
    if let Some(at) = status.last_poll {
        println!("Last poll: {}", at.with_timezone(&chrono::Local).format("%H:%M:%S"));
    }
    if let Some(err) = &status.last_error {
        println!("Last error: {err}");
    }
}
