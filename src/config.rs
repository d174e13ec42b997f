use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::engine::PollSettings;

const DEFAULT_BIND_ADDR: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
    3000,
);
const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value `{value}`")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub frontend_origin: String,
    pub bind_addr: SocketAddr,
    pub n8n_base_url: String,
    pub n8n_api_key: String,
    pub poll: PollSettings,
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: String,
    pub anthropic_model: String,
    pub rate_limit_ms: u64,
    pub rate_limit_burst: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok(); // Load .env file
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let defaults = PollSettings::default();
        let poll = PollSettings {
            interval: Duration::from_millis(parse_or(
                &lookup,
                "RUN_POLL_INTERVAL_MS",
                defaults.interval.as_millis() as u64,
            )?),
            max_attempts: parse_or(&lookup, "RUN_POLL_MAX_ATTEMPTS", defaults.max_attempts)?,
            failure_limit: parse_or(&lookup, "RUN_POLL_FAILURE_LIMIT", defaults.failure_limit)?,
        };
        if poll.interval.is_zero() {
            return Err(ConfigError::Invalid {
                name: "RUN_POLL_INTERVAL_MS",
                value: "0".to_string(),
            });
        }

        Ok(Config {
            database_url: required("DATABASE_URL")?,
            frontend_origin: required("FRONTEND_ORIGIN")?,
            bind_addr: parse_or(&lookup, "BIND_ADDR", DEFAULT_BIND_ADDR)?,
            n8n_base_url: required("N8N_BASE_URL")?,
            n8n_api_key: required("N8N_API_KEY")?,
            poll,
            anthropic_api_key: lookup("ANTHROPIC_API_KEY").filter(|v| !v.trim().is_empty()),
            anthropic_base_url: lookup("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.to_string()),
            anthropic_model: lookup("ANTHROPIC_MODEL")
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
            // Default: 200ms/token (~5 req/sec)
            rate_limit_ms: parse_or(&lookup, "RATE_LIMITER_MILLISECONDS", 200)?,
            rate_limit_burst: parse_or(&lookup, "RATE_LIMITER_BURST", 20)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}
