//! Client configuration.
//!
//! Loaded from JSON or from `NEOLANE_*` environment variables. The session
//! token is a credential, so `Debug` never prints it.

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{ApiError, Result};

pub const ENV_ENDPOINT: &str = "NEOLANE_ENDPOINT";
pub const ENV_SESSION_TOKEN: &str = "NEOLANE_SESSION_TOKEN";
pub const ENV_TIMEOUT_SECS: &str = "NEOLANE_TIMEOUT_SECS";
pub const ENV_DUMP_DIR: &str = "NEOLANE_DUMP_DIR";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Deserialize)]
pub struct ClientConfig {
    /// SOAP router URL, e.g. `https://host/nl/jsp/soaprouter.jsp`.
    pub endpoint: String,
    /// Token sent as `__sessiontoken`, e.g. `user/password`.
    pub session_token: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// When set, each exchange is written to `request.xml`/`response.xml` here.
    #[serde(default)]
    pub dump_dir: Option<PathBuf>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl ClientConfig {
    pub fn new(endpoint: &str, session_token: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            session_token: session_token.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            dump_dir: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ApiError::Config(e.to_string()))
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| ApiError::Config(format!("{key} is not set")))
        };

        let timeout_secs = match lookup(ENV_TIMEOUT_SECS) {
            Some(raw) => raw
                .parse()
                .map_err(|_| ApiError::Config(format!("{ENV_TIMEOUT_SECS}: invalid number {raw:?}")))?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            endpoint: required(ENV_ENDPOINT)?,
            session_token: required(ENV_SESSION_TOKEN)?,
            timeout_secs,
            dump_dir: lookup(ENV_DUMP_DIR).map(PathBuf::from),
        })
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("session_token", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .field("dump_dir", &self.dump_dir)
            .finish()
    }
}
