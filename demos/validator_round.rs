//! Runs the validator loop for a while and prints the resulting weights.
//!
//! With `VALIDATOR_CONFIG` pointing at a TOML file (`[validator]` and `[roster]` sections) the
//! roster is queried over HTTP. When `RPC_HTTP_URL` and `FACTORY_ADDRESS` are also set the
//! reference is computed directly from the chain instead of asking trusted miners.
//!
//! Without a config file a handful of simulated miners answer in-process.
use async_trait::async_trait;
use eyre::Result;
use liquidity_validator::utils::{DAY_SECONDS, RosterSection, SectionLoader, USDC, USDT, WETH};
use liquidity_validator::{
    EncodedQuery, FeeTier, FetchConfig, HealthReport, LocalMinerClient, MinerClient, MinerId, MinerRoster, PoolFetcher,
    PoolKey, PoolRecord, PoolSample, QueryConstraints, Token, ValidatorBuilder, ValidatorConfig, ValidatorError,
};
use liquidity_validator::logic::types::unix_now_secs;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Simulated miners: uid N answers a flat record after N * 40 ms, off by N percent. Uids from 100
/// up are exact. Uid 5 stopped syncing a month ago.
struct SimulatedMiners;

#[async_trait]
impl MinerClient for SimulatedMiners {
    async fn fetch(&self, miner: MinerId, query: &EncodedQuery) -> Result<PoolRecord, ValidatorError> {
        if miner.0 == 4 {
            return Err(ValidatorError::Unreachable { miner, reason: "offline".to_string() });
        }
        tokio::time::sleep(Duration::from_millis((miner.0 % 100) as u64 * 40)).await;

        let query = query.query();
        let skew = if miner.0 >= 100 { 1.0 } else { 1.0 + miner.0 as f64 / 100.0 };
        let samples = (query.start_time..query.end_time)
            .step_by(query.interval_secs as usize)
            .map(|ts| PoolSample::new(ts, 3_000.0 * skew, 1e7 * skew, 120.0 * skew))
            .collect();
        Ok(PoolRecord::new(samples))
    }

    async fn health(&self, miner: MinerId) -> Result<HealthReport, ValidatorError> {
        let lag = if miner.0 == 5 { 30 * DAY_SECONDS } else { 0 };
        Ok(HealthReport::new(unix_now_secs() - lag))
    }
}

fn constraints() -> QueryConstraints {
    let tokens = vec![
        Token::new_with_data(WETH, Some("WETH".to_string()), Some(18)),
        Token::new_with_data(USDC, Some("USDC".to_string()), Some(6)),
        Token::new_with_data(USDT, Some("USDT".to_string()), Some(6)),
    ];
    let pools = vec![
        PoolKey::new(WETH, USDC, FeeTier::Low),
        PoolKey::new(WETH, USDC, FeeTier::Medium),
        PoolKey::new(WETH, USDT, FeeTier::Medium),
        PoolKey::new(USDC, USDT, FeeTier::Lowest),
    ];
    QueryConstraints::new(tokens, pools, 0)
}

fn simulated_roster() -> Result<MinerRoster> {
    let mut roster = MinerRoster::new().with_trusted(MinerId(100)).with_trusted(MinerId(101));
    for uid in 1u16..=5 {
        roster = roster.with_miner(MinerId(uid), Url::parse(&format!("http://127.0.0.1:{}", 8_000 + uid))?);
    }
    Ok(roster)
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("No .env file loaded: {}", e);
    }

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let run_secs: u64 = std::env::var("RUN_SECS").ok().and_then(|s| s.parse().ok()).unwrap_or(20);

    let mut builder = ValidatorBuilder::new().with_constraints(constraints());
    match std::env::var("VALIDATOR_CONFIG") {
        Ok(path) => {
            info!("Loading validator config from {}", path);
            let config = ValidatorConfig::load_section_from_file(path.clone()).await?;
            let section = RosterSection::load_section_from_file(path).await?;
            builder = builder.with_config(config).with_roster(MinerRoster::from_section(&section)?);

            if std::env::var("RPC_HTTP_URL").is_ok() {
                let fetch_config = FetchConfig::from_env()?;
                let fetcher = Arc::new(PoolFetcher::from_config(&fetch_config)?);
                info!("Reference computed directly via {}", fetch_config.rpc_http_url);
                builder = builder.with_direct_reference(Arc::new(LocalMinerClient::new(fetcher)), MinerId(0));
            }
        }
        Err(_) => {
            warn!("VALIDATOR_CONFIG not set, running against simulated miners");
            let config = ValidatorConfig {
                iteration_interval_secs: 5,
                query_timeout_ms: 1_000,
                ..Default::default()
            };
            builder = builder.with_config(config).with_roster(simulated_roster()?).with_client(Arc::new(SimulatedMiners));
        }
    }

    let validator = Arc::new(builder.build().await?);
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel(1);
    let handle = tokio::spawn(Arc::clone(&validator).run(shutdown_rx));

    tokio::time::sleep(Duration::from_secs(run_secs)).await;
    shutdown_tx.send(()).await?;
    handle.await??;

    info!("Weights after {}s:", run_secs);
    for (miner, weight) in validator.snapshot().weights {
        info!("  miner {:>4}: {:.4}", miner.0, weight);
    }
    info!("Chain weights: {:?}", validator.chain_weights());
    Ok(())
}
