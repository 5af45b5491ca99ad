use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::commands::ChatCommands;
use super::error::{ConnectorError, Result};
use super::rules::{sorted_thresholds, BitsThreshold, RewardTrigger};

const SETTINGS_FILE: &str = "settings.toml";

/// Twitch login material supplied by the operator
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub channel: String,
    pub bot_username: String,
    pub oauth_token: String,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

impl Credentials {
    /// Channel login without a leading `#`, lowercased
    pub fn channel_login(&self) -> String {
        self.channel.trim().trim_start_matches('#').to_lowercase()
    }

    /// Token without any `oauth:` prefix
    pub fn bare_token(&self) -> &str {
        let token = self.oauth_token.trim();
        token.strip_prefix("oauth:").unwrap_or(token)
    }
}

/// Discord bot configuration
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscordSettings {
    #[serde(default)]
    pub enabled: bool,
    pub bot_token: String,
    pub channel_id: String,
}

/// Everything the connector layer reads from or writes to the settings store
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twitch: Option<Credentials>,
    pub twitch_token_scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twitch_token_expires_at: Option<DateTime<Utc>>,
    pub channel_point_triggers: Vec<RewardTrigger>,
    pub bits_thresholds: Vec<BitsThreshold>,
    pub chat_commands: ChatCommands,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discord: Option<DiscordSettings>,
}

/// Owner of the persisted settings; reads always reflect the latest write
pub trait SettingsStore: Send + Sync {
    fn read(&self) -> Result<Settings>;
    fn write(&self, settings: &Settings) -> Result<()>;
}

/// TOML file backed store, re-read from disk on every call
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Store at `settings.toml` in the project root
    pub fn in_project_root() -> Result<Self> {
        let project_root = project_root::get_project_root()?;
        Ok(Self::new(project_root.join(SETTINGS_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettingsStore {
    fn read(&self) -> Result<Settings> {
        // A missing file is a fresh install
        if !self.path.exists() {
            return Ok(Settings::default());
        }

        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Settings::default());
        }

        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    fn write(&self, settings: &Settings) -> Result<()> {
        let mut settings = settings.clone();
        settings.bits_thresholds = sorted_thresholds(settings.bits_thresholds);

        let content = toml::to_string_pretty(&settings)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, content)?;
        Ok(())
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<Settings>,
}

impl MemorySettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }

    /// Apply an edit in place
    pub fn update(&self, edit: impl FnOnce(&mut Settings)) {
        edit(&mut self.settings.lock());
    }
}

impl SettingsStore for MemorySettingsStore {
    fn read(&self) -> Result<Settings> {
        Ok(self.settings.lock().clone())
    }

    fn write(&self, settings: &Settings) -> Result<()> {
        let mut settings = settings.clone();
        settings.bits_thresholds = sorted_thresholds(settings.bits_thresholds);
        *self.settings.lock() = settings;
        Ok(())
    }
}

/// Fail early when a configured credential field is blank
pub fn check_credentials(credentials: &Credentials) -> Result<()> {
    let missing: Vec<&str> = [
        ("channel", credentials.channel.trim()),
        ("bot_username", credentials.bot_username.trim()),
        ("oauth_token", credentials.bare_token()),
        ("client_id", credentials.client_id.trim()),
    ]
    .iter()
    .filter(|(_, value)| value.is_empty())
    .map(|(name, _)| *name)
    .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConnectorError::ConfigError(format!(
            "Missing credentials: {}",
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::rules::RuleProvider;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("chatboss-{}-{}.toml", name, std::process::id()))
    }

    #[test]
    fn test_missing_file_reads_default() {
        let store = FileSettingsStore::new(temp_path("missing"));
        let settings = store.read().unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_file_store_write_then_read() {
        let path = temp_path("roundtrip");
        let store = FileSettingsStore::new(&path);

        let mut settings = Settings::default();
        settings.twitch_token_scopes = vec!["chat:read".to_string()];
        settings.bits_thresholds = vec![
            BitsThreshold {
                min_bits: 500,
                key: "big".to_string(),
                enabled: true,
            },
            BitsThreshold {
                min_bits: 1,
                key: "small".to_string(),
                enabled: true,
            },
        ];
        store.write(&settings).unwrap();

        let read = store.read().unwrap();
        assert_eq!(read.twitch_token_scopes, vec!["chat:read".to_string()]);
        assert_eq!(read.bits_thresholds[0].key, "small");
        assert_eq!(read.bits_thresholds[1].key, "big");

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_file_edits_apply_without_restart() {
        let path = temp_path("live-edit");
        let store = FileSettingsStore::new(&path);
        assert!(store.current_rules().rewards.is_empty());

        fs::write(
            &path,
            "[[channel_point_triggers]]\nmatch = \"heal\"\nkey = \"heal\"\n",
        )
        .unwrap();
        let rules = store.current_rules();
        assert_eq!(rules.rewards.len(), 1);
        assert!(rules.rewards[0].enabled);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_memory_store_update() {
        let store = MemorySettingsStore::default();
        store.update(|s| s.twitch_token_scopes.push("bits:read".to_string()));
        assert_eq!(store.read().unwrap().twitch_token_scopes, vec!["bits:read"]);
    }

    #[test]
    fn test_credentials_helpers() {
        let credentials = Credentials {
            channel: "#SomeChannel".to_string(),
            bot_username: "bot".to_string(),
            oauth_token: "oauth:abc123".to_string(),
            client_id: "cid".to_string(),
            client_secret: None,
        };
        assert_eq!(credentials.channel_login(), "somechannel");
        assert_eq!(credentials.bare_token(), "abc123");
        assert!(check_credentials(&credentials).is_ok());

        let blank = Credentials::default();
        let err = check_credentials(&blank).unwrap_err();
        assert!(err.to_string().contains("channel"));
    }
}
