use discord_rich_presence::{DiscordIpc, DiscordIpcClient, activity};
use tracing::{debug, info};

use crate::models::{PlayTime, PlaybackSnapshot};

pub const PLAY_ICON: &str = "\u{25B6}";
pub const PAUSE_ICON: &str = "\u{275A}\u{275A}";

#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    #[error("failed to connect to Discord: {0}")]
    Connect(String),
    #[error("failed to update Discord activity: {0}")]
    Update(String),
    #[error("failed to disconnect from Discord: {0}")]
    Disconnect(String),
}

/// A chat client that can show a status line for the user.
pub trait PresenceClient {
    /// Idempotent.
    fn connect(&mut self) -> Result<(), PresenceError>;
    /// Idempotent.
    fn disconnect(&mut self) -> Result<(), PresenceError>;
    fn update_status(
        &mut self,
        details: &str,
        large_image: &str,
        state: &str,
    ) -> Result<(), PresenceError>;
}

/// The fields pushed to the presence client for one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub details: String,
    pub large_image: String,
    pub state: String,
}

impl PresenceUpdate {
    /// `None` when nothing is playing, meaning the session should be closed.
    pub fn from_snapshot(snapshot: &PlaybackSnapshot) -> Option<Self> {
        let title = snapshot.title.as_ref()?;
        Some(Self {
            details: title.clone(),
            large_image: snapshot.media_type.clone(),
            state: status_line(snapshot.playing, snapshot.current_time, snapshot.total_time),
        })
    }
}

/// `"<icon> <elapsed>/<total>"`.
pub fn status_line(playing: bool, current: PlayTime, total: PlayTime) -> String {
    let icon = if playing { PLAY_ICON } else { PAUSE_ICON };
    format!("{icon} {current}/{total}")
}

pub struct DiscordPresence {
    client: DiscordIpcClient,
    connected: bool,
}

impl DiscordPresence {
    pub fn new(client_id: &str) -> Self {
        Self {
            client: DiscordIpcClient::new(client_id),
            connected: false,
        }
    }
}

impl PresenceClient for DiscordPresence {
    fn connect(&mut self) -> Result<(), PresenceError> {
        if self.connected {
            return Ok(());
        }
        self.client
            .connect()
            .map_err(|e| PresenceError::Connect(e.to_string()))?;
        self.connected = true;
        info!("Connected to Discord IPC");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), PresenceError> {
        if !self.connected {
            return Ok(());
        }
        // Mark as closed first so a failing close is not retried forever.
        self.connected = false;
        if let Err(e) = self.client.clear_activity() {
            debug!("Failed to clear Discord activity: {e}");
        }
        self.client
            .close()
            .map_err(|e| PresenceError::Disconnect(e.to_string()))?;
        info!("Disconnected from Discord IPC");
        Ok(())
    }

    fn update_status(
        &mut self,
        details: &str,
        large_image: &str,
        state: &str,
    ) -> Result<(), PresenceError> {
        let payload = activity::Activity::new()
            .details(details)
            .state(state)
            .assets(activity::Assets::new().large_image(large_image));

        if let Err(e) = self.client.set_activity(payload) {
            // The pipe is most likely gone; reconnect on the next update.
            self.connected = false;
            return Err(PresenceError::Update(e.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(title: Option<&str>, playing: bool) -> PlaybackSnapshot {
        PlaybackSnapshot {
            title: title.map(str::to_string),
            media_type: "movie".to_string(),
            playing,
            current_time: PlayTime::new(0, 5, 30),
            total_time: PlayTime::new(1, 30, 0),
        }
    }

    #[test]
    fn test_movie_update() {
        let update = PresenceUpdate::from_snapshot(&snapshot(Some("Movie A"), true)).unwrap();
        assert_eq!(update.details, "Movie A");
        assert_eq!(update.large_image, "movie");
        assert_eq!(update.state, "▶ 0:05:30/1:30:00");
    }

    #[test]
    fn test_icon_follows_playing_flag() {
        let playing = PresenceUpdate::from_snapshot(&snapshot(Some("X"), true)).unwrap();
        let paused = PresenceUpdate::from_snapshot(&snapshot(Some("X"), false)).unwrap();
        assert!(playing.state.starts_with(PLAY_ICON));
        assert!(paused.state.starts_with(PAUSE_ICON));
        assert_eq!(paused.state, "❚❚ 0:05:30/1:30:00");
        assert_eq!(playing.details, paused.details);
    }

    #[test]
    fn test_no_title_no_update() {
        assert!(PresenceUpdate::from_snapshot(&snapshot(None, true)).is_none());
    }

    #[test]
    fn test_status_line_zero() {
        assert_eq!(
            status_line(true, PlayTime::default(), PlayTime::new(1, 2, 3)),
            "▶ 0:00:00/1:02:03"
        );
    }
}
