use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{Local, Utc};
use log::{debug, info, warn};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::asset_block::AssetBlock;
use crate::catalog::{Catalog, CatalogAsset, ExportResponse};
use crate::config::{Config, UserDir, REQUEST_TIMEOUT_SECS, USER_AGENT};

/// Why a bridge call failed.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Server refused the token or credentials (HTTP 403).
    AccessDenied,
    Timeout,
    Network(String),
    InvalidStatus(u16),
    JsonDecode(String),
    /// No hostname, protocol or token configured.
    NotConfigured,
    /// The synced catalog has nothing eligible to air right now.
    NoBlock,
    Io(String),
    /// Server runs an incompatible release; carries its software string.
    VersionMismatch(String),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::AccessDenied => write!(f, "Access denied"),
            SyncError::Timeout => write!(f, "Request timed out"),
            SyncError::Network(msg) => write!(f, "Network error: {}", msg),
            SyncError::InvalidStatus(code) => write!(f, "Invalid HTTP status code: {}", code),
            SyncError::JsonDecode(msg) => write!(f, "Bad response from host: {}", msg),
            SyncError::NotConfigured => write!(f, "Not logged in"),
            SyncError::NoBlock => write!(f, "No stop set is currently eligible to air"),
            SyncError::Io(msg) => write!(f, "I/O error: {}", msg),
            SyncError::VersionMismatch(server) => {
                write!(f, "Incompatible server version {} (ours: {})", server, env!("CARGO_PKG_VERSION"))
            }
        }
    }
}

impl std::error::Error for SyncError {}

impl SyncError {
    pub fn io(err: impl fmt::Display) -> Self {
        SyncError::Io(err.to_string())
    }

    /// True when the server could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, SyncError::Timeout | SyncError::Network(_))
    }

    /// Text shown under the login form for a failed login.
    pub fn login_message(&self, protocol: &str) -> String {
        match self {
            SyncError::AccessDenied => "Invalid username or password.".to_string(),
            SyncError::Timeout | SyncError::Network(_) => {
                format!("Timeout, bad hostname, or invalid protocol ({}).", protocol)
            }
            SyncError::InvalidStatus(_) | SyncError::JsonDecode(_) => "Bad response from host.".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthStatus {
    pub logged_in: bool,
    pub connected: bool,
    pub has_synced: bool,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub protocol: String,
    pub hostname: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("protocol", &self.protocol)
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Host services the playout session depends on: auth, config and block sync.
#[allow(async_fn_in_trait)]
pub trait SyncBridge {
    async fn check_authorization(&self) -> Result<AuthStatus, SyncError>;
    async fn login(&self, credentials: Credentials) -> Result<(), SyncError>;
    async fn logout(&self) -> Result<(), SyncError>;
    /// When the last successful sync happened; `None` if it never did.
    fn last_sync(&self) -> Option<String>;
    /// Refreshes the local catalog from the server.
    async fn sync(&self) -> Result<(), SyncError>;
    /// Builds the next block from whatever catalog is on hand.
    async fn load_asset_block(&self) -> Result<AssetBlock, SyncError>;
}

/// [`SyncBridge`] talking to a Tomato server over HTTP(S).
pub struct HttpBridge {
    client: reqwest::Client,
    user_dir: UserDir,
    config: Mutex<Config>,
    catalog: Mutex<Catalog>,
}

impl HttpBridge {
    pub fn new(user_dir: UserDir) -> anyhow::Result<Self> {
        user_dir.ensure()?;
        let config = Config::load(user_dir.config_file())?;
        let catalog = match Catalog::load(user_dir.catalog_file()) {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!("Ignoring unreadable catalog: {:#}", e);
                Catalog::default()
            }
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            user_dir,
            config: Mutex::new(config),
            catalog: Mutex::new(catalog),
        })
    }

    fn config_guard(&self) -> MutexGuard<'_, Config> {
        self.config.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn catalog_guard(&self) -> MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> Config {
        self.config_guard().clone()
    }

    pub fn user_dir(&self) -> &UserDir {
        &self.user_dir
    }

    /// Applies a change to the config; the closure is expected to save.
    pub fn update_config<F>(&self, change: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut Config) -> anyhow::Result<()>,
    {
        change(&mut self.config_guard())
    }

    fn base_url(&self) -> Result<String, SyncError> {
        let config = self.config_guard();
        match config.hostname.as_deref() {
            Some(hostname) if !hostname.is_empty() && !config.protocol.is_empty() => {
                Ok(format!("{}://{}", config.protocol, hostname.trim_end_matches('/')))
            }
            _ => Err(SyncError::NotConfigured),
        }
    }

    async fn request(&self, method: Method, endpoint: &str, form: Option<&[(&str, &str)]>) -> Result<Value, SyncError> {
        let url = format!("{}/{}", self.base_url()?, endpoint);
        let token = self.config_guard().auth_token.clone();

        info!("Hitting [{}] {}", method, url);
        let mut builder = self.client.request(method, &url);
        if let Some(token) = token {
            builder = builder.header("X-Auth-Token", token);
        }
        if let Some(form) = form {
            builder = builder.form(form);
        }

        let response = builder.send().await.map_err(map_transport)?;
        match response.status() {
            StatusCode::OK => response.json::<Value>().await.map_err(|e| {
                if e.is_timeout() {
                    SyncError::Timeout
                } else {
                    SyncError::JsonDecode(e.to_string())
                }
            }),
            StatusCode::FORBIDDEN => Err(SyncError::AccessDenied),
            status => Err(SyncError::InvalidStatus(status.as_u16())),
        }
    }

    /// Downloads an asset's audio unless a file of the expected size is already there.
    async fn download_media(&self, media_url: &str, asset: &CatalogAsset) -> Result<(), SyncError> {
        let local = asset.local_path(&self.user_dir.media_dir());
        if let Ok(meta) = tokio::fs::metadata(&local).await {
            if meta.len() == asset.audio_size {
                debug!("Already have {}", local.display());
                return Ok(());
            }
        }

        let remote = format!("{}{}", media_url, asset.audio);
        info!("Downloading asset: {}", remote);

        let mut response = self.client.get(&remote).send().await.map_err(map_transport)?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::FORBIDDEN => return Err(SyncError::AccessDenied),
            status => return Err(SyncError::InvalidStatus(status.as_u16())),
        }

        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(SyncError::io)?;
        }
        let mut partial = local.clone().into_os_string();
        partial.push(".part");
        let partial = PathBuf::from(partial);
        let mut file = tokio::fs::File::create(&partial).await.map_err(SyncError::io)?;
        while let Some(chunk) = response.chunk().await.map_err(map_transport)? {
            file.write_all(&chunk).await.map_err(SyncError::io)?;
        }
        file.flush().await.map_err(SyncError::io)?;
        drop(file);

        tokio::fs::rename(&partial, &local).await.map_err(SyncError::io)?;
        Ok(())
    }

    fn save_catalog(&self, catalog: &Catalog, path: &Path) -> Result<(), SyncError> {
        catalog.save(path).map_err(|e| SyncError::io(format!("{:#}", e)))
    }
}

fn map_transport(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout
    } else {
        SyncError::Network(err.to_string())
    }
}

/// Accepts `tomato/<major>.<rest>` when the major version matches ours.
fn server_compatible(software: &str) -> bool {
    let Some(version) = software.strip_prefix("tomato/") else {
        return false;
    };
    version.split('.').next() == Some(env!("CARGO_PKG_VERSION_MAJOR"))
}

impl SyncBridge for HttpBridge {
    async fn check_authorization(&self) -> Result<AuthStatus, SyncError> {
        let (configured, has_synced) = {
            let config = self.config_guard();
            (config.is_configured(), config.last_sync.is_some())
        };

        let mut status = AuthStatus {
            has_synced,
            ..AuthStatus::default()
        };
        if !configured {
            return Ok(status);
        }

        match self.request(Method::GET, "ping", None).await {
            Ok(response) => {
                status.connected = true;
                status.logged_in = response.get("valid_token").and_then(Value::as_bool).unwrap_or(false);
                if let Some(software) = response.get("software").and_then(Value::as_str) {
                    debug!("Server software: {}", software);
                    if !server_compatible(software) {
                        return Err(SyncError::VersionMismatch(software.to_string()));
                    }
                }
            }
            // Can't reach the server, so assume the token is still good.
            Err(e) if e.is_connectivity() => {
                warn!("Could not reach server: {}", e);
                status.logged_in = true;
            }
            Err(e) => return Err(e),
        }

        Ok(status)
    }

    async fn login(&self, credentials: Credentials) -> Result<(), SyncError> {
        self.update_config(|config| {
            config.hostname = Some(credentials.hostname.clone());
            config.protocol = credentials.protocol.clone();
            config.save()
        })
        .map_err(|e| SyncError::io(format!("{:#}", e)))?;

        let form = [
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
        ];
        let response = self.request(Method::POST, "auth", Some(&form)).await?;
        let token = response
            .get("auth_token")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::JsonDecode("missing auth_token".to_string()))?
            .to_string();

        self.update_config(|config| {
            config.auth_token = Some(token);
            config.save()
        })
        .map_err(|e| SyncError::io(format!("{:#}", e)))?;

        info!("Logged in to {} as {}", credentials.hostname, credentials.username);
        Ok(())
    }

    async fn logout(&self) -> Result<(), SyncError> {
        self.update_config(|config| {
            config.auth_token = None;
            config.save()
        })
        .map_err(|e| SyncError::io(format!("{:#}", e)))?;
        info!("Logged out");
        Ok(())
    }

    fn last_sync(&self) -> Option<String> {
        self.config_guard().last_sync.clone()
    }

    async fn sync(&self) -> Result<(), SyncError> {
        let response = self.request(Method::GET, "export", None).await?;
        let export: ExportResponse =
            serde_json::from_value(response).map_err(|e| SyncError::JsonDecode(e.to_string()))?;

        let catalog = Catalog::from_export(export.objects);
        for asset in &catalog.assets {
            self.download_media(&export.media_url, asset).await?;
        }

        self.save_catalog(&catalog, &self.user_dir.catalog_file())?;
        *self.catalog_guard() = catalog;

        let stamp = Local::now().format("%c").to_string();
        self.update_config(|config| {
            config.update_from_server(&export.config)?;
            config.last_sync = Some(stamp);
            config.save()
        })
        .map_err(|e| SyncError::io(format!("{:#}", e)))?;

        info!("Sync complete");
        Ok(())
    }

    async fn load_asset_block(&self) -> Result<AssetBlock, SyncError> {
        let media_dir = self.user_dir.media_dir();
        let generated = {
            let catalog = self.catalog_guard();
            let mut rng = rand::thread_rng();
            catalog.generate_asset_block(Utc::now(), &mut rng, &media_dir)
        };

        let generated = generated.ok_or(SyncError::NoBlock)?;
        let wait = self.config_guard().block_wait(generated.total_length());
        info!("Stop set '{}' selected", generated.stopset);
        Ok(generated.into_asset_block(wait))
    }
}
