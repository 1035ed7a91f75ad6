use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const REQUEST_TIMEOUT_SECS: u64 = 15;
/// Longest wait between blocks, whatever the server asks for.
pub const MAX_WAIT_SECS: f64 = 24.0 * 60.0 * 60.0;
pub const USER_AGENT: &str = concat!("tomato-client/", env!("CARGO_PKG_VERSION"));
pub const USER_DIR_ENV: &str = "TOMATO_USER_DIR";

const CONFIG_FILE: &str = "config.json";

/// Keys the server is allowed to push down with an export.
pub const SERVER_CONFIG_KEYS: &[&str] = &[
    "clickable_waveform",
    "fade_assets_ms",
    "wait_interval_minutes",
    "wait_interval_subtracts_stopset_playtime",
];

/// Where the client keeps its config, catalog and downloaded media.
#[derive(Debug, Clone, PartialEq)]
pub struct UserDir {
    root: PathBuf,
}

impl UserDir {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Resolution order: explicit directory, `TOMATO_USER_DIR`, platform data dir.
    pub fn resolve(cli_dir: Option<PathBuf>) -> Self {
        if let Some(dir) = cli_dir {
            return Self::new(dir);
        }

        if let Ok(dir) = std::env::var(USER_DIR_ENV) {
            if !dir.trim().is_empty() {
                return Self::new(dir);
            }
        }

        if let Some(dir) = dirs_next::data_local_dir() {
            return Self::new(dir.join("tomato"));
        }

        match dirs_next::home_dir() {
            Some(home) => Self::new(home.join(".tomato")),
            None => Self::new(".tomato"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn catalog_file(&self) -> PathBuf {
        self.root.join("catalog.json")
    }

    pub fn media_dir(&self) -> PathBuf {
        self.root.join("media")
    }

    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create user directory: {}", self.root.display()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub audio_device: Option<String>,
    pub auth_token: Option<String>,
    pub height: u32,
    pub hostname: Option<String>,
    pub last_sync: Option<String>,
    pub protocol: String,
    pub width: u32,
    pub clickable_waveform: bool,
    pub fade_assets_ms: u64,
    pub wait_interval_minutes: f64,
    pub wait_interval_subtracts_stopset_playtime: bool,
    /// Start the first asset of a freshly loaded block without operator action.
    pub autoplay_blocks: bool,
    /// Load a block that arrives mid-countdown right away instead of after the wait.
    pub interrupt_wait_on_sync: bool,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio_device: None,
            auth_token: None,
            height: 700,
            hostname: None,
            last_sync: None,
            protocol: "https".to_string(),
            width: 900,
            clickable_waveform: false,
            fade_assets_ms: 0,
            wait_interval_minutes: 20.0,
            wait_interval_subtracts_stopset_playtime: false,
            autoplay_blocks: false,
            interrupt_wait_on_sync: true,
            path: None,
        }
    }
}

impl Config {
    /// Config that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the config file, writing defaults if it does not exist yet.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            match serde_json::from_str::<Config>(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Invalid config file {} ({}), using defaults", path.display(), e);
                    Config::default()
                }
            }
        } else {
            info!("No config at {}, writing defaults", path.display());
            Config::default()
        };

        config.path = Some(path.to_path_buf());
        if !path.exists() {
            config.save()?;
        }
        Ok(config)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let mut content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        content.push('\n');
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        debug!("Saved config to {}", path.display());
        Ok(())
    }

    pub fn to_map(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self).context("Failed to serialize config")? {
            Value::Object(map) => Ok(map),
            _ => Err(anyhow!("Config did not serialize to an object")),
        }
    }

    pub fn get(&self, key: &str) -> Result<Value> {
        self.to_map()?
            .remove(key)
            .ok_or_else(|| anyhow!("Config entry not found: {}", key))
    }

    /// Sets one key from a JSON value and saves.
    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        let mut values = Map::new();
        values.insert(key.to_string(), value);
        self.update(values)
    }

    /// Sets one key from command-line text. Text that is not valid JSON is taken as a string.
    pub fn set_from_str(&mut self, key: &str, raw: &str) -> Result<()> {
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        self.set(key, value)
    }

    /// Applies several keys at once with a single save.
    pub fn update(&mut self, values: Map<String, Value>) -> Result<()> {
        let mut map = self.to_map()?;
        for (key, value) in values {
            if !map.contains_key(&key) {
                return Err(anyhow!("Config entry not found: {}", key));
            }
            map.insert(key, value);
        }

        let path = self.path.clone();
        let updated: Config = serde_json::from_value(Value::Object(map))
            .context("Invalid value for config entry")?;
        *self = Config { path, ..updated };
        self.save()
    }

    /// Merges the client settings a server export carries, ignoring anything else.
    pub fn update_from_server(&mut self, server: &Map<String, Value>) -> Result<()> {
        let values: Map<String, Value> = server
            .iter()
            .filter(|(key, _)| SERVER_CONFIG_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        if values.is_empty() {
            return Ok(());
        }

        debug!("Applying server config: {:?}", values);
        self.update(values)
    }

    pub fn is_configured(&self) -> bool {
        self.auth_token.is_some() && self.hostname.is_some() && !self.protocol.is_empty()
    }

    /// Seconds to wait after a block of `block_length` seconds has played.
    pub fn block_wait(&self, block_length: f64) -> f64 {
        let mut wait = self.wait_interval_minutes.max(0.0) * 60.0;
        if self.wait_interval_subtracts_stopset_playtime {
            wait -= block_length;
        }
        wait.max(0.0).min(MAX_WAIT_SECS)
    }
}
