//! Configuration management with environment variable support.
//!
//! This module provides [`Config`] for loading and validating lockstream
//! settings from JSON files and environment variables.
//!
//! ## Environment Variables
//!
//! - `LOCKSTREAM_CONFIG`: Override config file path
//! - `LOCKSTREAM_BIND`: Override the server bind address
//! - `LOCKSTREAM_PASSWORD`: Register one more password at startup

use crate::registry::CipherRegistry;
use crate::streaming::DEFAULT_CHUNK_SIZE;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use tracing::{debug, info, warn};

/// Environment variable names for configuration overrides
pub const ENV_CONFIG_PATH: &str = "LOCKSTREAM_CONFIG";
pub const ENV_BIND_ADDR: &str = "LOCKSTREAM_BIND";
pub const ENV_PASSWORD: &str = "LOCKSTREAM_PASSWORD";

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7878";

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: String,
    /// Registered in order at startup; earlier entries win on ambiguity.
    pub passwords: Vec<String>,
    pub chunk_size: usize,
    pub cache_resolutions: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            passwords: Vec::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            cache_resolutions: false,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("passwords", &self.passwords.len())
            .field("chunk_size", &self.chunk_size)
            .field("cache_resolutions", &self.cache_resolutions)
            .finish()
    }
}

impl Config {
    /// Load config from file path
    pub fn load(path: &str) -> Result<Self> {
        let s =
            fs::read_to_string(path).with_context(|| format!("reading config file {}", path))?;
        let mut config: Config = serde_json::from_str(&s)?;
        if !config.passwords.is_empty() {
            warn!(path, "config file stores passwords in plain text");
        }
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config with environment variable overrides
    /// Priority: ENV vars > config file > defaults
    pub fn load_with_env(path: Option<&str>) -> Result<Self> {
        let config_path = path
            .map(String::from)
            .or_else(|| env::var(ENV_CONFIG_PATH).ok());

        match config_path {
            Some(ref p) if Path::new(p).exists() => {
                info!(path = p, "loading config from file");
                Self::load(p)
            }
            _ => {
                debug!("using default configuration");
                let mut config = Config::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Apply environment variable overrides to config
    fn apply_env_overrides(&mut self) {
        if let Ok(bind_addr) = env::var(ENV_BIND_ADDR) {
            debug!(bind_addr = %bind_addr, "overriding bind_addr from environment");
            self.bind_addr = bind_addr;
        }

        if let Ok(password) = env::var(ENV_PASSWORD) {
            debug!("appending password from environment");
            self.passwords.push(password);
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than zero");
        }

        if self.chunk_size < 16 {
            warn!(chunk_size = self.chunk_size, "chunk_size below one cipher block - streaming will be slow");
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind_addr
            .parse()
            .with_context(|| format!("invalid bind_addr {:?}", self.bind_addr))
    }

    /// Builds a registry with every configured password, in order.
    pub fn build_registry(&self) -> CipherRegistry {
        let registry = if self.cache_resolutions {
            CipherRegistry::new().with_cache()
        } else {
            CipherRegistry::new()
        };
        for password in &self.passwords {
            registry.register(password.as_str());
        }
        registry
    }
}
