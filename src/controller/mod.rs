//! The poll/update loop.
//!
//! Each cycle sleeps for the current poll interval, asks the player what it
//! is doing and mirrors the answer onto the presence client. An unreachable
//! player switches to the slow interval; any answer switches back.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::PlayerConfig;
use crate::models::{ControllerStatus, PlaybackSnapshot, PlayerPoll, PollRate, SharedStatus};
use crate::player::{MediaPlayer, PlayerConnector};
use crate::presence::{PresenceClient, PresenceError, PresenceUpdate};

/// Cross-thread run flag. Cleared by `stop`, read once per loop iteration.
#[derive(Debug, Clone)]
pub struct RunSignal(Arc<AtomicBool>);

impl RunSignal {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for RunSignal {
    fn default() -> Self {
        Self::new()
    }
}

pub trait Sleeper {
    fn sleep(&mut self, interval: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, interval: Duration) {
        thread::sleep(interval);
    }
}

pub struct Controller<C: PlayerConnector, P: PresenceClient, S: Sleeper = ThreadSleeper> {
    config: PlayerConfig,
    connector: C,
    player: Option<C::Player>,
    presence: P,
    sleeper: S,
    rate: PollRate,
    signal: RunSignal,
    status: SharedStatus,
    notify: Option<Box<dyn Fn() + Send>>,
}

impl<C: PlayerConnector, P: PresenceClient, S: Sleeper> Controller<C, P, S> {
    pub fn new(
        config: PlayerConfig,
        connector: C,
        presence: P,
        sleeper: S,
        signal: RunSignal,
    ) -> Self {
        Self {
            config,
            connector,
            player: None,
            presence,
            sleeper,
            rate: PollRate::Fast,
            signal,
            status: Arc::new(Mutex::new(ControllerStatus::default())),
            notify: None,
        }
    }

    /// Mirror progress into an externally owned status.
    pub fn with_status(mut self, status: SharedStatus) -> Self {
        self.status = status;
        self
    }

    /// Called whenever the running flag or the status summary changes.
    pub fn with_notifier(mut self, notify: impl Fn() + Send + 'static) -> Self {
        self.notify = Some(Box::new(notify));
        self
    }

    #[allow(dead_code)]
    pub fn signal(&self) -> RunSignal {
        self.signal.clone()
    }

    #[allow(dead_code)]
    pub fn rate(&self) -> PollRate {
        self.rate
    }

    /// Takes effect at the top of the next iteration; the cycle in progress
    /// is allowed to finish.
    #[allow(dead_code)]
    pub fn stop(&self) {
        self.signal.stop();
    }

    pub fn get_player_connection(&self) -> Result<C::Player> {
        self.connector.connect(&self.config).with_context(|| {
            format!(
                "Failed to create client for {}:{}",
                self.config.host, self.config.port
            )
        })
    }

    pub fn run(&mut self) -> Result<()> {
        info!("Polling Kodi at {}:{}", self.config.host, self.config.port);
        self.player = Some(self.get_player_connection()?);
        let signal = self.signal.clone();
        self.set_status(|s| {
            s.running = signal.is_running();
            s.last_error = None;
        });

        while self.signal.is_running() {
            self.sleeper.sleep(self.rate.interval());
            self.tick()?;
        }

        info!("Presence loop stopped");
        self.presence
            .disconnect()
            .context("Failed to clear presence on exit")?;
        Ok(())
    }

    /// One fetch/decide/push step.
    pub fn tick(&mut self) -> Result<()> {
        let player = match self.player.take() {
            // Fresh client after a back-off.
            Some(player) if self.rate == PollRate::Fast => player,
            _ => self.get_player_connection()?,
        };
        let poll = player
            .fetch_currently_playing()
            .context("Failed to read playback state from Kodi")?;
        self.player = Some(player);

        let next = PollRate::after(&poll);
        if next != self.rate {
            match next {
                PollRate::Slow => warn!("Kodi is unreachable, retrying every {}s", next.secs()),
                PollRate::Fast => info!("Kodi is reachable again"),
            }
        }
        self.rate = next;

        match poll {
            PlayerPoll::Reached(snapshot) => {
                self.set_status(|s| {
                    s.poll_rate = next;
                    s.now_playing = snapshot.title.clone();
                    s.playing = snapshot.playing;
                    s.last_poll = Some(Utc::now());
                });
                self.update_presence(&snapshot)?;
            }
            PlayerPoll::Unreachable => {
                self.set_status(|s| {
                    s.poll_rate = next;
                    s.now_playing = None;
                    s.playing = false;
                    s.last_poll = Some(Utc::now());
                });
            }
        }

        Ok(())
    }

    pub fn update_presence(&mut self, snapshot: &PlaybackSnapshot) -> Result<(), PresenceError> {
        match PresenceUpdate::from_snapshot(snapshot) {
            Some(update) => {
                self.presence.connect()?;
                debug!("Presence: {} | {}", update.details, update.state);
                self.presence
                    .update_status(&update.details, &update.large_image, &update.state)
            }
            None => self.presence.disconnect(),
        }
    }

    fn set_status(&self, f: impl FnOnce(&mut ControllerStatus)) {
        let changed = {
            let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
            let before = (status.running, status.summary());
            f(&mut status);
            before != (status.running, status.summary())
        };
        if changed {
            if let Some(notify) = &self.notify {
                notify();
            }
        }
    }
}
