use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};

const APP_DIR: &str = "sshmux";

fn default_port() -> u16 {
    22
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Application settings
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct AppSettings {
    pub default_port: u16,
    /// Seconds allowed for TCP connect plus handshake and authentication.
    pub connection_timeout: u64,
    /// Idle timeout in seconds for one-shot transfer connections. Interactive
    /// shells are never given one.
    pub inactivity_timeout: Option<u64>,
    pub terminal_type: String,
    pub initial_cols: u16,
    pub initial_rows: u16,
    /// Capacity of the per-session channel between the transport and its session.
    pub event_buffer: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            default_port: default_port(),
            connection_timeout: 20,
            inactivity_timeout: None,
            terminal_type: "xterm-256color".to_string(),
            initial_cols: 80,
            initial_rows: 24,
            event_buffer: 256,
        }
    }
}

/// The single credential a profile authenticates with.
#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    #[default]
    None,
    Password {
        password: String,
    },
    /// OpenSSH or PEM encoded private key text.
    PrivateKey {
        key: String,
        #[serde(default)]
        passphrase: Option<String>,
    },
    /// Path to a private key file, `~/` is expanded.
    KeyFile {
        path: String,
        #[serde(default)]
        passphrase: Option<String>,
    },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::None => write!(f, "None"),
            Credential::Password { .. } => write!(f, "Password(<redacted>)"),
            Credential::PrivateKey { .. } => write!(f, "PrivateKey(<redacted>)"),
            Credential::KeyFile { path, .. } => f.debug_struct("KeyFile").field("path", path).finish(),
        }
    }
}

/// Represents an SSH connection configuration.
///
/// `id` is the logical connection identity: every tab opened for this profile
/// is bound through it.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProfile {
    #[serde(default = "new_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(alias = "hostname")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default, skip_serializing)]
    pub credential: Credential,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

impl ConnectionProfile {
    /// Creates a new profile with the given parameters
    pub fn new(host: String, port: u16, username: String, credential: Credential) -> Self {
        let name = host.clone();
        Self {
            id: new_id(),
            name,
            host,
            port,
            username,
            credential,
            created_at: Utc::now(),
            last_used: None,
        }
    }

    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validates the connection parameters
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(AppError::Validation("Host cannot be empty".to_string()));
        }

        if self.port == 0 {
            return Err(AppError::Validation(
                "Port must be greater than 0".to_string(),
            ));
        }

        if self.username.trim().is_empty() {
            return Err(AppError::Validation(
                "Username cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.host } else { &self.name }
    }

    pub fn update_last_used(&mut self) {
        self.last_used = Some(Utc::now());
    }
}

/// Main configuration structure
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub connections: Vec<ConnectionProfile>,
    #[serde(default)]
    pub settings: AppSettings,
}

/// Loads and persists settings and saved profiles. Credentials are never written.
pub struct ConfigManager {
    config_path: PathBuf,
    config: Config,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::with_path(config_path)
    }

    /// Create a configuration manager with a custom config path
    pub fn with_path<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref().to_path_buf();
        let config = Self::load_config_from_path(&config_path)?;

        Ok(Self {
            config_path,
            config,
        })
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::Config("Could not determine config directory".to_string()))?
            .join(APP_DIR);

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).map_err(|e| {
                AppError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        Ok(config_dir.join("config.toml"))
    }

    fn load_config_from_path(config_path: &Path) -> Result<Config> {
        if !config_path.exists() {
            return Ok(Config::default());
        }

        let config_content = fs::read_to_string(config_path)
            .map_err(|e| AppError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&config_content)
            .map_err(|e| AppError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }
        let toml = toml::to_string_pretty(&self.config)
            .map_err(|e| AppError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(&self.config_path, toml)
            .map_err(|e| AppError::Config(format!("Failed to write config: {}", e)))?;
        Ok(())
    }

    pub fn settings(&self) -> &AppSettings {
        &self.config.settings
    }

    pub fn connections(&self) -> &[ConnectionProfile] {
        &self.config.connections
    }

    pub fn find_connection(&self, id_or_name: &str) -> Option<&ConnectionProfile> {
        self.config
            .connections
            .iter()
            .find(|c| c.id == id_or_name || c.name == id_or_name)
    }

    /// Add a profile and persist it. Profiles with the same host, port and
    /// username are treated as duplicates.
    pub fn add_connection(&mut self, connection: ConnectionProfile) -> Result<()> {
        connection.validate()?;

        if !self.config.connections.iter().any(|c| {
            c.host == connection.host
                && c.port == connection.port
                && c.username == connection.username
        }) {
            self.config.connections.push(connection);
        }
        self.save()
    }

    pub fn remove_connection(&mut self, id: &str) -> Result<()> {
        let initial_len = self.config.connections.len();
        self.config.connections.retain(|conn| conn.id != id);

        if self.config.connections.len() == initial_len {
            Err(AppError::Config("Connection not found".to_string()))
        } else {
            self.save()
        }
    }

    pub fn touch_last_used(&mut self, id: &str) -> Result<()> {
        if let Some(c) = self.config.connections.iter_mut().find(|c| c.id == id) {
            c.update_last_used();
            self.save()?;
        }
        Ok(())
    }
}
