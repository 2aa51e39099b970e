//! Configuration for TideKV
//!
//! Centralized configuration with sensible defaults. The server binary can
//! populate it from `TIDEKV_*` environment variables; invalid values are
//! rejected before the listener opens.

use crate::error::{Result, TideError};

/// Environment variable holding the shared API key (required).
pub const ENV_API_KEY: &str = "TIDEKV_API_KEY";
/// Environment variable for the tree's lower branching bound.
pub const ENV_TREE_A: &str = "TIDEKV_A";
/// Environment variable for the tree's upper branching bound.
pub const ENV_TREE_B: &str = "TIDEKV_B";
/// Environment variable for the listening port.
pub const ENV_PORT: &str = "TIDEKV_PORT";

/// Main configuration for a TideKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Authentication
    // -------------------------------------------------------------------------
    /// Shared secret compared byte-for-byte against `AuthRequest` payloads
    pub api_key: String,

    // -------------------------------------------------------------------------
    // Tree Configuration
    // -------------------------------------------------------------------------
    /// (a,b)-tree lower bound; must be >= 2
    pub tree_a: usize,

    /// (a,b)-tree upper bound; must be >= 2 * tree_a - 1
    pub tree_b: usize,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listening port (bound on all interfaces)
    pub port: u16,

    /// Max concurrent client connections
    pub max_connections: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            tree_a: 2,
            tree_b: 3,
            port: 3000,
            max_connections: 1024,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Build a config from `TIDEKV_*` environment variables.
    ///
    /// `TIDEKV_API_KEY` is required; the rest fall back to defaults.
    /// The result is validated before being returned.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(ENV_API_KEY)
            .map_err(|_| TideError::Config(format!("{} is not set", ENV_API_KEY)))?;

        let mut config = Config {
            api_key,
            ..Config::default()
        };

        if let Some(a) = read_env_int(ENV_TREE_A)? {
            config.tree_a = a;
        }
        if let Some(b) = read_env_int(ENV_TREE_B)? {
            config.tree_b = b;
        }
        if let Some(port) = read_env_int(ENV_PORT)? {
            config.port = u16::try_from(port).map_err(|_| {
                TideError::Config(format!("{} must be in [0, 65535], got {}", ENV_PORT, port))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration invariants.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(TideError::Config("API key must not be empty".to_string()));
        }
        if self.tree_a < 2 {
            return Err(TideError::Config(format!(
                "tree parameter a must be >= 2, got {}",
                self.tree_a
            )));
        }
        if self.tree_b < 2 * self.tree_a - 1 {
            return Err(TideError::Config(format!(
                "tree parameter b must be >= 2a - 1 = {}, got {}",
                2 * self.tree_a - 1,
                self.tree_b
            )));
        }
        if self.max_connections == 0 {
            return Err(TideError::Config(
                "max_connections must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Address string the server listens on.
    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

fn read_env_int(name: &str) -> Result<Option<usize>> {
    match std::env::var(name) {
        Ok(raw) => {
            let value = raw.parse::<usize>().map_err(|_| {
                TideError::Config(format!("{} must be an integer, got {:?}", name, raw))
            })?;
            Ok(Some(value))
        }
        Err(_) => Ok(None),
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config.api_key = api_key.into();
        self
    }

    pub fn tree_a(mut self, a: usize) -> Self {
        self.config.tree_a = a;
        self
    }

    pub fn tree_b(mut self, b: usize) -> Self {
        self.config.tree_b = b;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
