//! Engine configuration sourced from the environment.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the engine, read once at startup. The
/// truncation thresholds are hard constants in `exec`, not configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding `resource_{id}.{ext}` cache files.
    pub cache_dir: PathBuf,
    /// Base URL of the remote catalog API.
    pub api_base: String,
    /// Overall per-request timeout for catalog lookups and downloads.
    pub http_timeout: Duration,
    /// Connect timeout, shorter than the overall timeout.
    pub connect_timeout: Duration,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let cache_dir = std::env::var("TABQ_CACHE_DIR").unwrap_or_else(|_| "resource_cache".to_string());
        let api_base = std::env::var("TABQ_API_BASE").unwrap_or_else(|_| "https://api.dane.gov.pl".to_string());
        let http_timeout = std::env::var("TABQ_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);
        let connect_timeout = std::env::var("TABQ_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(5);
        EngineConfig {
            cache_dir: PathBuf::from(cache_dir),
            api_base,
            http_timeout: Duration::from_secs(http_timeout),
            connect_timeout: Duration::from_secs(connect_timeout),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            cache_dir: PathBuf::from("resource_cache"),
            api_base: "https://api.dane.gov.pl".to_string(),
            http_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}
