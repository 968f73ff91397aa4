//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `thingmesh.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where persisted state lives.
    pub storage: StorageConfig,
    /// Identity of this node.
    pub node: NodeConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Demo things.
    pub demo: DemoConfig,
}

/// Which state store backs the persistent state manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    File,
    Sqlite,
}

impl Backend {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "file" => Some(Self::File),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

/// State store configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: Backend,
    /// File used by the `file` backend.
    pub path: PathBuf,
    /// `SQLite` connection URL used by the `sqlite` backend.
    pub database_url: String,
    /// Row of the `sqlite` backend holding this node's state.
    pub store_name: String,
}

/// Node configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Authority this node answers to on the loopback network.
    pub authority: String,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Demo toggles.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Host the demo light bulb.
    pub bulb_enabled: bool,
}

impl Config {
    /// Load configuration from `thingmesh.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// result does not validate.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("thingmesh.toml")?;
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(backend) = var("THINGMESH_STORAGE").as_deref().and_then(Backend::parse) {
            self.storage.backend = backend;
        }
        if let Some(val) = var("THINGMESH_STATE_PATH") {
            self.storage.path = PathBuf::from(val);
        }
        if let Some(val) = var("THINGMESH_DATABASE_URL") {
            self.storage.database_url = val;
        }
        if let Some(val) = var("THINGMESH_STORE_NAME") {
            self.storage.store_name = val;
        }
        if let Some(val) = var("THINGMESH_AUTHORITY") {
            self.node.authority = val;
        }
        if let Some(val) = var("THINGMESH_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
        if let Some(enabled) = var("THINGMESH_DEMO_BULB").and_then(|val| val.parse().ok()) {
            self.demo.bulb_enabled = enabled;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.node.authority.trim().is_empty() {
            return Err(ConfigError::Validation("node authority must not be empty".to_string()));
        }
        if self.storage.store_name.trim().is_empty() {
            return Err(ConfigError::Validation("store name must not be empty".to_string()));
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::File,
            path: PathBuf::from("thingmesh-state.json"),
            database_url: "sqlite:thingmesh.db?mode=rwc".to_string(),
            store_name: "thingmesh".to_string(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            authority: "node-1".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "thingmeshd=info,thingmesh=info".to_string(),
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self { bulb_enabled: true }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
