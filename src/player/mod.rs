//! Kodi JSON-RPC client.
//!
//! Only the three read-only calls needed to describe the current item are
//! used: `Player.GetActivePlayers`, `Player.GetItem` and
//! `Player.GetProperties`.

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::PlayerConfig;
use crate::models::{PlayTime, PlaybackSnapshot, PlayerPoll};

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("malformed response to {method}: {source}")]
    Malformed {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{method} returned no result")]
    EmptyResult { method: &'static str },
}

/// Something that can report what is currently playing.
pub trait MediaPlayer {
    /// Never fails for an unreachable player; that is `PlayerPoll::Unreachable`.
    fn fetch_currently_playing(&self) -> Result<PlayerPoll, PlayerError>;
}

/// Builds a fresh player client from connection settings.
pub trait PlayerConnector {
    type Player: MediaPlayer;

    fn connect(&self, config: &PlayerConfig) -> Result<Self::Player, PlayerError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KodiConnector;

impl PlayerConnector for KodiConnector {
    type Player = KodiClient;

    fn connect(&self, config: &PlayerConfig) -> Result<KodiClient, PlayerError> {
        KodiClient::new(config)
    }
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u32,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ActivePlayer {
    playerid: i64,
}

#[derive(Debug, Deserialize)]
struct ItemResult {
    item: Item,
}

#[derive(Debug, Deserialize)]
struct Item {
    #[serde(default)]
    label: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    showtitle: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Properties {
    speed: f64,
    time: KodiTime,
    totaltime: KodiTime,
}

#[derive(Debug, Deserialize)]
struct KodiTime {
    hours: u32,
    minutes: u32,
    seconds: u32,
}

impl From<KodiTime> for PlayTime {
    fn from(t: KodiTime) -> Self {
        PlayTime::new(t.hours, t.minutes, t.seconds)
    }
}

/// Result of a single JSON-RPC call.
enum Call<T> {
    Ok(T),
    /// The server answered with a JSON-RPC error object.
    Rejected,
    Unreachable,
}

pub struct KodiClient {
    http: Client,
    endpoint: String,
    username: String,
    password: String,
}

impl KodiClient {
    pub fn new(config: &PlayerConfig) -> Result<Self, PlayerError> {
        let http = Client::builder().build().map_err(PlayerError::Client)?;
        Ok(Self {
            http,
            endpoint: format!("http://{}:{}/jsonrpc", config.host, config.port),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Value,
    ) -> Result<Call<T>, PlayerError> {
        let body = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let mut request = self.http.post(&self.endpoint).json(&body);
        if !self.username.is_empty() {
            request = request.basic_auth(&self.username, Some(&self.password));
        }

        let response = match request.send() {
            Ok(r) => r,
            Err(e) => {
                debug!("Kodi request {method} failed: {e}");
                return Ok(Call::Unreachable);
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!("Kodi answered {method} with HTTP {status}");
            return Ok(Call::Unreachable);
        }

        let decoded: RpcResponse<T> = match response.json() {
            Ok(d) => d,
            Err(e) if e.is_decode() => return Err(PlayerError::Malformed { method, source: e }),
            Err(e) => {
                debug!("Kodi response to {method} was cut off: {e}");
                return Ok(Call::Unreachable);
            }
        };

        if let Some(err) = decoded.error {
            debug!("Kodi rejected {method} ({}): {}", err.code, err.message);
            return Ok(Call::Rejected);
        }

        match decoded.result {
            Some(result) => Ok(Call::Ok(result)),
            None => Err(PlayerError::EmptyResult { method }),
        }
    }
}

impl MediaPlayer for KodiClient {
    fn fetch_currently_playing(&self) -> Result<PlayerPoll, PlayerError> {
        let players: Vec<ActivePlayer> = match self.call("Player.GetActivePlayers", json!({}))? {
            Call::Ok(p) => p,
            Call::Rejected => return Ok(PlayerPoll::Reached(PlaybackSnapshot::idle())),
            Call::Unreachable => return Ok(PlayerPoll::Unreachable),
        };

        let Some(player) = players.first() else {
            return Ok(PlayerPoll::Reached(PlaybackSnapshot::idle()));
        };

        let item: ItemResult = match self.call(
            "Player.GetItem",
            json!({ "playerid": player.playerid, "properties": ["title", "showtitle"] }),
        )? {
            Call::Ok(i) => i,
            Call::Rejected => return Ok(PlayerPoll::Reached(PlaybackSnapshot::idle())),
            Call::Unreachable => return Ok(PlayerPoll::Unreachable),
        };

        let props: Properties = match self.call(
            "Player.GetProperties",
            json!({ "playerid": player.playerid, "properties": ["time", "totaltime", "speed"] }),
        )? {
            Call::Ok(p) => p,
            Call::Rejected => return Ok(PlayerPoll::Reached(PlaybackSnapshot::idle())),
            Call::Unreachable => return Ok(PlayerPoll::Unreachable),
        };

        Ok(PlayerPoll::Reached(snapshot_from(item.item, props)))
    }
}

fn snapshot_from(item: Item, props: Properties) -> PlaybackSnapshot {
    let media_type = item
        .kind
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    let title = item
        .title
        .filter(|t| !t.is_empty())
        .or_else(|| Some(item.label).filter(|l| !l.is_empty()));
    let title = match (title, item.showtitle.filter(|s| !s.is_empty())) {
        (Some(title), Some(show)) if media_type == "episode" => Some(format!("{show} - {title}")),
        (title, _) => title,
    };

    PlaybackSnapshot {
        title,
        media_type,
        playing: props.speed != 0.0,
        current_time: props.time.into(),
        total_time: props.totaltime.into(),
    }
}
