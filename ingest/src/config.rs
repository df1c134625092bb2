use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0 ({0})")]
    InvalidPort(&'static str),

    #[error("Storage path cannot be empty")]
    EmptyStoragePath,

    #[error("Page file name cannot be empty ({0})")]
    EmptyPage(&'static str),

    #[error("max_body_size must be greater than 0")]
    InvalidBodyLimit,
}

/// How accepted form bodies reach the record store.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    /// Raw bytes are relayed as a datagram to the receive loop, which decodes
    /// and stores them.
    #[default]
    Relay,
    /// The HTTP handler decodes and hands the submission to the in-process
    /// store writer.
    Direct,
}

/// Pipeline configuration. Every field falls back to its default when absent.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Listener for form posts and pages
    pub listener: Listener,
    /// Optional listener for `/health` and `/ready`
    pub admin_listener: Option<Listener>,
    /// Datagram endpoint shared by the HTTP side and the receive loop
    pub relay: RelayConfig,
    pub storage: StorageConfig,
    pub pages: PagesConfig,
    pub mode: DeploymentMode,
    /// Requests declaring a larger body are refused with 413
    pub max_body_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listener: Listener::default(),
            admin_listener: None,
            relay: RelayConfig::default(),
            storage: StorageConfig::default(),
            pages: PagesConfig::default(),
            mode: DeploymentMode::default(),
            max_body_size: 64 * 1024,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate("listener")?;
        if let Some(admin) = &self.admin_listener {
            admin.validate("admin_listener")?;
        }
        if self.relay.port == 0 {
            return Err(ValidationError::InvalidPort("relay"));
        }
        if self.storage.path.as_os_str().is_empty() {
            return Err(ValidationError::EmptyStoragePath);
        }
        self.pages.validate()?;
        if self.max_body_size == 0 {
            return Err(ValidationError::InvalidBodyLimit);
        }
        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "0.0.0.0".into(),
            port: 3000,
        }
    }
}

impl Listener {
    pub fn validate(&self, name: &'static str) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort(name));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            host: "localhost".into(),
            port: 5000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON document accumulating every submission
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            path: PathBuf::from("storage/data.json"),
        }
    }
}

/// Fixed pages and static files, all relative to `base_dir`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PagesConfig {
    pub base_dir: PathBuf,
    /// Served for `GET /`
    pub index: String,
    /// Served for `GET /message.html` and targeted by the post redirect
    pub message: String,
    /// Served with 404 for anything that cannot be found
    pub error: String,
    /// When false, only the fixed pages are served
    pub serve_static: bool,
}

impl Default for PagesConfig {
    fn default() -> Self {
        PagesConfig {
            base_dir: PathBuf::from("."),
            index: "index.html".into(),
            message: "message.html".into(),
            error: "error.html".into(),
            serve_static: true,
        }
    }
}

impl PagesConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        for (name, file) in [
            ("index", &self.index),
            ("message", &self.message),
            ("error", &self.error),
        ] {
            if file.is_empty() {
                return Err(ValidationError::EmptyPage(name));
            }
        }
        Ok(())
    }
}
