use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Connection settings for Kodi's JSON-RPC web server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            username: "kodi".to_string(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Discord application id.
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub auto_start: bool,
    pub poll_on_start: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            auto_start: true,
            poll_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            path: home.join(".kodicord"),
        }
    }
}

impl Config {
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kodicord")
    }

    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Loads the config at `path`, falling back to defaults when the file
    /// does not exist yet.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| {
                format!("Failed to create config directory: {}", dir.display())
            })?;
        }

        let content = toml::to_string_pretty(self).with_context(|| "Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        Ok(())
    }

    /// Checks the fields the presence loop cannot run without.
    pub fn validate(&self) -> Result<()> {
        if self.player.host.trim().is_empty() {
            bail!("player.host is empty");
        }
        if self.player.port == 0 {
            bail!("player.port must be between 1 and 65535");
        }
        let client_id = self.presence.client_id.trim();
        if client_id.is_empty() {
            bail!(
                "presence.client_id is not set. Set it with: kodicord config set presence.client_id <id>"
            );
        }
        if !client_id.chars().all(|c| c.is_ascii_digit()) {
            bail!("presence.client_id must be a numeric Discord application id");
        }
        Ok(())
    }

    /// Sets a single `section.key` value from its string form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "player.host" => self.player.host = value.to_string(),
            "player.port" => {
                self.player.port = value
                    .parse()
                    .with_context(|| format!("Invalid port: {value}"))?
            }
            "player.username" => self.player.username = value.to_string(),
            "player.password" => self.player.password = value.to_string(),
            "presence.client_id" => self.presence.client_id = value.to_string(),
            "daemon.auto_start" => self.daemon.auto_start = parse_bool(value)?,
            "daemon.poll_on_start" => self.daemon.poll_on_start = parse_bool(value)?,
            "storage.path" => self.storage.path = PathBuf::from(value),
            _ => bail!("Unknown config key '{key}'"),
        }
        Ok(())
    }

    /// Config as TOML with the player password masked.
    pub fn to_display_string(&self) -> Result<String> {
        let mut shown = self.clone();
        if !shown.player.password.is_empty() {
            shown.player.password = "********".to_string();
        }
        toml::to_string_pretty(&shown).with_context(|| "Failed to serialize config")
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.storage.path
    }

    pub fn socket_path(&self) -> PathBuf {
        self.storage.path.join("kodicord.sock")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.storage.path.join("kodicord.pid")
    }

    pub fn log_path(&self) -> PathBuf {
        self.storage.path.join("kodicord.log")
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.data_dir()).with_context(|| {
            format!(
                "Failed to create data directory: {}",
                self.data_dir().display()
            )
        })?;
        Ok(())
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => bail!("Expected true or false, got '{value}'"),
    }
}

/// Opens the config file with the desktop's default handler, writing the
/// defaults first if it does not exist.
pub fn open_in_editor(path: &Path) -> Result<()> {
    if !path.exists() {
        Config::default().save_to(path)?;
    }

    #[cfg(target_os = "macos")]
    let mut command = Command::new("open");
    #[cfg(windows)]
    let mut command = {
        let mut c = Command::new("cmd");
        c.args(["/C", "start", ""]);
        c
    };
    #[cfg(not(any(target_os = "macos", windows)))]
    let mut command = Command::new("xdg-open");

    command
        .arg(path)
        .spawn()
        .with_context(|| format!("Failed to open {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_for_missing_sections() {
        let config: Config = toml::from_str("[presence]\nclient_id = \"123\"\n").unwrap();
        assert_eq!(config.player, PlayerConfig::default());
        assert_eq!(config.player.port, 8080);
        assert!(config.daemon.auto_start);
        assert!(config.daemon.poll_on_start);
        assert_eq!(config.presence.client_id, "123");
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.player.host, "localhost");
        assert!(config.presence.client_id.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.set("player.host", "192.168.1.20").unwrap();
        config.set("player.port", "9090").unwrap();
        config.set("presence.client_id", "42").unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.player.host, "192.168.1.20");
        assert_eq!(loaded.player.port, 9090);
        assert_eq!(loaded.presence.client_id, "42");
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut config = Config::default();
        assert!(config.set("player.port", "eighty").is_err());
        assert!(config.set("daemon.auto_start", "maybe").is_err());
        assert!(config.set("player.colour", "blue").is_err());

        config.set("daemon.auto_start", "off").unwrap();
        assert!(!config.daemon.auto_start);
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.presence.client_id = "not-a-number".to_string();
        assert!(config.validate().is_err());

        config.presence.client_id = "1339263648872411156".to_string();
        assert!(config.validate().is_ok());

        config.player.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_display_masks_password() {
        let mut config = Config::default();
        config.player.password = "hunter2".to_string();
        let shown = config.to_display_string().unwrap();
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("********"));
    }
}
