use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub system: SystemConfig,
    pub feed: FeedConfig,
    pub settlement: SettlementConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    pub database_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_jitter")]
    pub poll_jitter_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_betting_close")]
    pub betting_close_secs: i64,
    #[serde(default = "default_stale_retention")]
    pub stale_retention_secs: i64,
    #[serde(default = "default_match_ceiling")]
    pub match_ceiling_secs: i64,
    #[serde(default = "default_cooldown_base")]
    pub cooldown_base_secs: u64,
    #[serde(default = "default_cooldown_jitter")]
    pub cooldown_jitter_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_void_grace")]
    pub void_grace_secs: i64,
    #[serde(default = "default_min_stake")]
    pub min_stake_tokens: u64,
    #[serde(default = "default_receipt_timeout")]
    pub receipt_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    pub csv_logging: bool,
    pub csv_log_path: String,
}

fn default_poll_interval() -> u64 { 45 }
fn default_poll_jitter() -> u64 { 5 }
fn default_request_timeout() -> u64 { 8 }
fn default_betting_close() -> i64 { 300 }
fn default_stale_retention() -> i64 { 900 }
fn default_match_ceiling() -> i64 { 10_800 }
fn default_cooldown_base() -> u64 { 60 }
fn default_cooldown_jitter() -> u64 { 60 }
fn default_sweep_interval() -> u64 { 5 }
fn default_void_grace() -> i64 { 18_000 }
fn default_min_stake() -> u64 { 1 }
fn default_receipt_timeout() -> u64 { 10 }

#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub token_address: String,
    pub house_private_key: Option<String>,
    pub feed_base_url: String,
    pub feed_api_key: Option<String>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        Ok(config)
    }
}

impl EnvConfig {
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(Self {
            rpc_url: std::env::var("RPC_URL")
                .unwrap_or_else(|_| "https://rpc.minato.soneium.org".to_string()),
            chain_id: std::env::var("CHAIN_ID")
                .unwrap_or_else(|_| "1946".to_string())
                .parse()
                .context("CHAIN_ID must be a number")?,
            token_address: std::env::var("DBET_TOKEN_ADDRESS")
                .context("DBET_TOKEN_ADDRESS not set")?,
            house_private_key: std::env::var("HOUSE_PRIVATE_KEY").ok(),
            feed_base_url: std::env::var("FEED_BASE_URL")
                .unwrap_or_else(|_| "https://api.opendota.com/api".to_string()),
            feed_api_key: std::env::var("OPENDOTA_API_KEY").ok(),
        })
    }
}
