//! Environment-based configuration and credentials for the OMTrader SDK

use std::time::Duration;
use thiserror::Error;

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "OMTRADER_API_KEY";
/// Environment variable overriding the REST host
pub const HOST_ENV: &str = "OMTRADER_HOST";
/// Environment variable overriding the WebSocket host
pub const WS_HOST_ENV: &str = "OMTRADER_WS_HOST";

pub const DEFAULT_HOST: &str = "https://api.omtrader.io";
pub const DEFAULT_WS_HOST: &str = "wss://api.omtrader.io";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("API key is required. Provide it as a parameter or set the {API_KEY_ENV} environment variable")]
    MissingApiKey,
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
}

/// REST client configuration
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// OMTrader API key
    pub api_key: String,
    /// REST API host, e.g. `https://api.omtrader.io`
    pub host: String,
    /// Request timeout
    pub timeout: Duration,
}

impl RestConfig {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        Ok(Self {
            api_key,
            host: host_from_env(),
            timeout: Duration::from_secs(30),
        })
    }

    /// Build from `OMTRADER_API_KEY` / `OMTRADER_HOST`, loading `.env` if present
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        Ok(Self {
            api_key,
            host: host_from_env(),
            timeout: Duration::from_secs(30),
        })
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn host_from_env() -> String {
    std::env::var(HOST_ENV).unwrap_or_else(|_| DEFAULT_HOST.to_string())
}

/// Session credentials consumed by the WebSocket client.
///
/// Obtained from the REST-side token acquisition flow ([`crate::rest::RestClient::login`]);
/// a fresh token requires a new client instance or an explicit reconnect with
/// updated credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub session_id: String,
    pub access_token: String,
}

impl Credentials {
    pub fn new(
        session_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let session_id = session_id.into();
        let access_token = access_token.into();
        if session_id.is_empty() {
            return Err(ConfigError::MissingCredential("session_id"));
        }
        if access_token.is_empty() {
            return Err(ConfigError::MissingCredential("access_token"));
        }
        Ok(Self {
            session_id,
            access_token,
        })
    }
}
