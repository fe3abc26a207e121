use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use apns_binary::ChannelConfig;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub delivery: DeliveryConfig,
    /// Read by the registration endpoints, not by delivery
    pub auth_mode: Option<AuthMode>,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Save notifications after sending unless the caller says otherwise
    pub persist_notifications: bool,
    /// Devices per connection
    pub chunk_size: usize,
    /// Bound on a whole deliver or feedback call
    pub timeout: Duration,
    /// Bound on TCP connect plus TLS handshake
    pub connect_timeout: Duration,
    /// PEM CA to trust instead of the platform roots
    pub trust_anchor_path: Option<PathBuf>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            persist_notifications: true,
            chunk_size: 100,
            timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(30),
            trust_anchor_path: None,
        }
    }
}

impl DeliveryConfig {
    pub fn channel_config(&self) -> Result<ChannelConfig, ConfigError> {
        let config = ChannelConfig::new(self.connect_timeout);

        match &self.trust_anchor_path {
            Some(path) => {
                let pem = std::fs::read_to_string(path).map_err(|e| ConfigError::Invalid {
                    name: "PUSH_TRUST_ANCHOR_PATH",
                    reason: format!("{}: {e}", path.display()),
                })?;
                Ok(config.with_trust_anchor(pem))
            }
            None => Ok(config),
        }
    }
}

/// Authentication required by the device registration endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMode {
    AuthNone,
    AuthBasic,
    AuthBasicIsStaff,
}

impl FromStr for AuthMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AuthNone" => Ok(AuthMode::AuthNone),
            "AuthBasic" => Ok(AuthMode::AuthBasic),
            "AuthBasicIsStaff" => Ok(AuthMode::AuthBasicIsStaff),
            other => Err(ConfigError::Invalid {
                name: "PUSH_AUTHENTICATION",
                reason: format!(
                    "'{other}', expected one of AuthNone, AuthBasic, AuthBasicIsStaff"
                ),
            }),
        }
    }
}

fn var_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = DeliveryConfig::default();

        let chunk_size: usize = var_or("PUSH_CHUNK_SIZE", defaults.chunk_size)?;
        if chunk_size == 0 {
            return Err(ConfigError::Invalid {
                name: "PUSH_CHUNK_SIZE",
                reason: "must be a positive integer".to_string(),
            });
        }

        Ok(Config {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
                max_connections: var_or("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            delivery: DeliveryConfig {
                persist_notifications: var_or(
                    "PUSH_PERSIST_NOTIFICATIONS",
                    defaults.persist_notifications,
                )?,
                chunk_size,
                timeout: Duration::from_secs(var_or(
                    "PUSH_DELIVERY_TIMEOUT_SECS",
                    defaults.timeout.as_secs(),
                )?),
                connect_timeout: Duration::from_secs(var_or(
                    "PUSH_CONNECT_TIMEOUT_SECS",
                    defaults.connect_timeout.as_secs(),
                )?),
                trust_anchor_path: std::env::var("PUSH_TRUST_ANCHOR_PATH").ok().map(PathBuf::from),
            },
            auth_mode: std::env::var("PUSH_AUTHENTICATION")
                .ok()
                .map(|v| v.parse::<AuthMode>())
                .transpose()?,
        })
    }
}
