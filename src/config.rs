use anyhow::Context;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub version: u32,
    pub database: Database,
    pub http: HttpConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    pub pinning: PinningConfig,
    pub rate_limit: Option<RateLimitConfig>,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Config> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {path}"))?;
        toml::from_str(&contents).with_context(|| "Failed to parse config TOML")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub bind_addr: String,
    pub port: u16,
    /// callers allowed to use the /admin routes
    #[serde(default)]
    pub operators: Vec<String>,
}

/// Where snapshots and the payout journal live.
#[derive(Debug, Deserialize, Clone)]
pub struct Database {
    pub in_memory: bool,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    #[serde(default = "default_max_title_len")]
    pub max_title_len: usize,
    #[serde(default = "default_max_description_len")]
    pub max_description_len: usize,
}

fn default_max_title_len() -> usize {
    100
}

fn default_max_description_len() -> usize {
    1000
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_title_len: default_max_title_len(),
            max_description_len: default_max_description_len(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PinningConfig {
    pub dir: PathBuf,
}

/// Sliding window of `max_calls` mutating calls per caller per `window_secs`.
#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    pub max_calls: usize,
    pub window_secs: u64,
    /// callers remembered at once, the stalest is forgotten beyond that
    #[serde(default = "default_max_tracked")]
    pub max_tracked: usize,
}

fn default_max_tracked() -> usize {
    10_000
}
