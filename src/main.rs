use anyhow::{Context, Result};
use ethers::providers::{Http, Provider};
use ethers::types::{Address, U256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dbet_house::chain::payout::{HouseWallet, PayoutIssuer};
use dbet_house::chain::verifier::ChainVerifier;
use dbet_house::chain::{probe_token_meta, Erc20};
use dbet_house::config::{Config, EnvConfig};
use dbet_house::data::feed::FeedClient;
use dbet_house::data::tracker::{run_poll_loop, MatchTracker, TrackerConfig};
use dbet_house::markets::catalog::MarketCatalog;
use dbet_house::monitoring::logger::CsvLogger;
use dbet_house::settlement::engine::{EngineConfig, SettlementEngine};
use dbet_house::settlement::store::WagerStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    tracing::info!("🎲 DBET house engine starting...");

    // Load configuration
    tracing::info!("Loading configuration...");
    let config = Config::load("config.toml")?;
    let env_config = EnvConfig::load()?;

    // Initialize database
    tracing::info!("Initializing database: {}", config.system.database_path);
    let store = Arc::new(WagerStore::new(&config.system.database_path)?);
    let carried_over = store.count_pending()?;
    tracing::info!("Pending wagers carried over: {}", carried_over);

    // Chain setup
    let provider = Provider::<Http>::try_from(env_config.rpc_url.as_str())
        .context("Invalid RPC_URL")?;
    let token_address: Address = env_config
        .token_address
        .parse()
        .context("Invalid DBET_TOKEN_ADDRESS")?;

    let house = HouseWallet::new(
        provider.clone(),
        env_config.chain_id,
        token_address,
        env_config.house_private_key.as_deref(),
    )?;
    tracing::info!("House address: {:?}", house.address());
    if !house.is_funded() {
        tracing::warn!("HOUSE_PRIVATE_KEY not set, payouts will fail until configured");
    }

    let token_read = Erc20::new(token_address, Arc::new(provider.clone()));
    let meta = probe_token_meta(&token_read).await;
    tracing::info!("Staking token: {} ({} decimals)", meta.symbol, meta.decimals);

    let verifier = Arc::new(ChainVerifier::new(
        Arc::new(provider),
        token_address,
        house.address(),
        Duration::from_secs(config.settlement.receipt_timeout_secs),
    ));
    let payout: Arc<dyn PayoutIssuer> = Arc::new(house);

    // Market catalog and match tracker
    let catalog = Arc::new(MarketCatalog::standard());
    tracing::info!("Markets offered: {}", catalog.view().len());

    let tracker = Arc::new(MatchTracker::new(
        catalog.snapshot_targets(),
        TrackerConfig {
            betting_close_secs: config.feed.betting_close_secs,
            stale_retention_secs: config.feed.stale_retention_secs,
            match_ceiling_secs: config.feed.match_ceiling_secs,
            cooldown_base_secs: config.feed.cooldown_base_secs,
            cooldown_jitter_secs: config.feed.cooldown_jitter_secs,
        },
    ));

    let audit = if config.monitoring.csv_logging {
        Some(CsvLogger::new(config.monitoring.csv_log_path.clone())?)
    } else {
        None
    };

    let min_stake_units = U256::from(config.settlement.min_stake_tokens) * meta.one_token();
    let engine = Arc::new(SettlementEngine::new(
        store.clone(),
        tracker.clone(),
        catalog,
        verifier,
        payout,
        audit,
        EngineConfig {
            betting_close_secs: config.feed.betting_close_secs,
            void_grace_secs: config.settlement.void_grace_secs,
            min_stake_units,
        },
    ));

    // Poll loop: tracker owns match state, pruning consults the store
    // for matches pending wagers still depend on.
    let feed = FeedClient::new(
        env_config.feed_base_url.clone(),
        env_config.feed_api_key.clone(),
        Duration::from_secs(config.feed.request_timeout_secs),
    )?;
    let prune_store = store.clone();
    tokio::spawn(run_poll_loop(
        tracker,
        feed,
        config.feed.poll_interval_secs,
        config.feed.poll_jitter_secs,
        move || {
            prune_store.match_ids_with_pending().unwrap_or_else(|e| {
                tracing::warn!("Pending match lookup failed: {:#}", e);
                HashSet::new()
            })
        },
    ));

    // Settlement sweep loop
    tokio::spawn(
        engine
            .clone()
            .run(Duration::from_secs(config.settlement.sweep_interval_secs)),
    );

    tracing::info!("✅ House engine initialized");

    // Keep running
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    Ok(())
}
