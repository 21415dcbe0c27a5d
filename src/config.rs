use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default port for the transfer server
pub const DEFAULT_PORT: u16 = 8000;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Storage directory {} does not exist: {source}", .path.display())]
    MissingStorageDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Storage path {} is not a directory", .0.display())]
    NotADirectory(PathBuf),
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind to
    pub port: u16,

    /// Directory where files are stored and served from
    pub storage_dir: PathBuf,

    /// Disconnect a client that makes no progress for this many seconds
    pub idle_timeout_secs: Option<u64>,

    /// Directory for rolling log files
    pub log_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            storage_dir: PathBuf::from("."),
            idle_timeout_secs: None,
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl ServerConfig {
    /// Create a new ServerConfig with custom settings
    pub fn new(port: Option<u16>, storage_dir: Option<PathBuf>) -> Self {
        let mut config = Self::default();

        if let Some(p) = port {
            config.port = p;
        }

        if let Some(dir) = storage_dir {
            config.storage_dir = dir;
        }

        config
    }

    /// Read a JSON config file; missing fields take their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load configuration from file or fall back to defaults
    pub fn load_or_default(config_path: Option<&Path>) -> Self {
        config_path
            .and_then(|path| Self::from_file(path).ok())
            .unwrap_or_default()
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(
        &self,
        config_path: P,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.port)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    /// Check that the storage directory exists and is a directory
    pub fn validate(&self) -> Result<(), ConfigError> {
        let metadata =
            std::fs::metadata(&self.storage_dir).map_err(|source| ConfigError::MissingStorageDir {
                path: self.storage_dir.clone(),
                source,
            })?;
        if !metadata.is_dir() {
            return Err(ConfigError::NotADirectory(self.storage_dir.clone()));
        }
        Ok(())
    }
}
