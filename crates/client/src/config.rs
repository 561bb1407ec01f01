use std::str::FromStr;
use std::time::Duration;

use agentdesk_core::job::DEFAULT_JOB_TIMEOUT;
use agentdesk_core::types::Identity;

use crate::reconnect::ReconnectConfig;

/// Client configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Agent WebSocket endpoint (default: `ws://localhost:8000/ws`).
    pub ws_url: String,
    /// Agent REST base URL (default: `http://localhost:3000`).
    pub api_url: String,
    /// Identity to bind on startup, if known.
    pub identity: Option<Identity>,
    /// Bearer credential for the REST calls.
    pub access_token: Option<String>,
    /// Local wait before a pending job times out (default: 8 minutes).
    pub job_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a valid {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8000/ws".into(),
            api_url: "http://localhost:3000".into(),
            identity: None,
            access_token: None,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                  | Default                  |
    /// |--------------------------|--------------------------|
    /// | `AGENT_WS_URL`           | `ws://localhost:8000/ws` |
    /// | `API_URL`                | `http://localhost:3000`  |
    /// | `AGENT_IDENTITY`         | --                       |
    /// | `ACCESS_TOKEN`           | --                       |
    /// | `JOB_TIMEOUT_SECS`       | `480`                    |
    /// | `RECONNECT_INITIAL_MS`   | `1000`                   |
    /// | `RECONNECT_MAX_DELAY_MS` | `5000`                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let ws_url = lookup("AGENT_WS_URL").unwrap_or(defaults.ws_url);
        let api_url = lookup("API_URL").unwrap_or(defaults.api_url);
        let identity = lookup("AGENT_IDENTITY").and_then(|v| Identity::parse(&v));
        let access_token = lookup("ACCESS_TOKEN").filter(|v| !v.trim().is_empty());

        let job_timeout_secs: u64 = parse_var(
            &lookup,
            "JOB_TIMEOUT_SECS",
            defaults.job_timeout.as_secs(),
        )?;
        let initial_ms: u64 = parse_var(
            &lookup,
            "RECONNECT_INITIAL_MS",
            defaults.reconnect.initial_delay.as_millis() as u64,
        )?;
        let max_delay_ms: u64 = parse_var(
            &lookup,
            "RECONNECT_MAX_DELAY_MS",
            defaults.reconnect.max_delay.as_millis() as u64,
        )?;

        Ok(Self {
            ws_url,
            api_url,
            identity,
            access_token,
            job_timeout: Duration::from_secs(job_timeout_secs),
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(initial_ms),
                max_delay: Duration::from_millis(max_delay_ms),
                ..defaults.reconnect
            },
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            expected: std::any::type_name::<T>(),
            value: raw,
        }),
    }
}
