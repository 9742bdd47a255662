use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A position or duration as reported by the player, kept as-is.
///
/// Components are not normalized: a player reporting 75 seconds is displayed
/// as `0:00:75`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlayTime {
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
}

impl PlayTime {
    pub fn new(hours: u32, minutes: u32, seconds: u32) -> Self {
        Self {
            hours,
            minutes,
            seconds,
        }
    }
}

impl std::fmt::Display for PlayTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
    }
}

/// One poll's worth of playback state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSnapshot {
    /// `None` when nothing is playing.
    pub title: Option<String>,
    pub media_type: String,
    pub playing: bool,
    pub current_time: PlayTime,
    pub total_time: PlayTime,
}

impl PlaybackSnapshot {
    pub fn idle() -> Self {
        Self {
            title: None,
            media_type: "unknown".to_string(),
            playing: false,
            current_time: PlayTime::default(),
            total_time: PlayTime::default(),
        }
    }
}

/// Outcome of asking the player what it is doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerPoll {
    /// The player could not be reached. Carries nothing else.
    Unreachable,
    Reached(PlaybackSnapshot),
}

impl PlayerPoll {
    pub fn failed_connection(&self) -> bool {
        matches!(self, PlayerPoll::Unreachable)
    }
}

/// Two-speed polling: fast while the player answers, slow after it didn't.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PollRate {
    #[default]
    Fast,
    Slow,
}

impl PollRate {
    pub fn interval(self) -> Duration {
        Duration::from_secs(self.secs())
    }

    pub fn secs(self) -> u64 {
        match self {
            PollRate::Fast => 1,
            PollRate::Slow => 30,
        }
    }

    /// Rate to use after a poll with the given outcome.
    pub fn after(poll: &PlayerPoll) -> Self {
        if poll.failed_connection() {
            PollRate::Slow
        } else {
            PollRate::Fast
        }
    }
}

impl std::fmt::Display for PollRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollRate::Fast => write!(f, "fast ({}s)", self.secs()),
            PollRate::Slow => write!(f, "slow ({}s)", self.secs()),
        }
    }
}

/// What the controller last saw, mirrored for the tray and `status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub running: bool,
    pub poll_rate: PollRate,
    pub now_playing: Option<String>,
    pub playing: bool,
    pub last_poll: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl ControllerStatus {
    /// Short human description, used as the tray's status line.
    pub fn summary(&self) -> String {
        if !self.running {
            return "Stopped".to_string();
        }
        if self.poll_rate == PollRate::Slow {
            return "Waiting for Kodi".to_string();
        }
        match &self.now_playing {
            Some(title) if self.playing => format!("\u{25B6} {title}"),
            Some(title) => format!("\u{275A}\u{275A} {title}"),
            None => "Idle".to_string(),
        }
    }
}

pub type SharedStatus = Arc<Mutex<ControllerStatus>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_time_display() {
        assert_eq!(PlayTime::new(1, 2, 3).to_string(), "1:02:03");
        assert_eq!(PlayTime::new(0, 0, 0).to_string(), "0:00:00");
        assert_eq!(PlayTime::new(12, 30, 5).to_string(), "12:30:05");
    }

    #[test]
    fn test_play_time_is_not_normalized() {
        assert_eq!(PlayTime::new(0, 61, 75).to_string(), "0:61:75");
    }

    #[test]
    fn test_poll_rate_after() {
        assert_eq!(PollRate::after(&PlayerPoll::Unreachable), PollRate::Slow);
        assert_eq!(
            PollRate::after(&PlayerPoll::Reached(PlaybackSnapshot::idle())),
            PollRate::Fast
        );
        assert_eq!(PollRate::Fast.interval(), Duration::from_secs(1));
        assert_eq!(PollRate::Slow.interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_status_summary() {
        let mut status = ControllerStatus::default();
        assert_eq!(status.summary(), "Stopped");

        status.running = true;
        assert_eq!(status.summary(), "Idle");

        status.now_playing = Some("Movie A".to_string());
        status.playing = true;
        assert_eq!(status.summary(), "\u{25B6} Movie A");

        status.playing = false;
        assert_eq!(status.summary(), "\u{275A}\u{275A} Movie A");

        status.poll_rate = PollRate::Slow;
        assert_eq!(status.summary(), "Waiting for Kodi");
    }
}
