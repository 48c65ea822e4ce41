use super::types::{FeeTier, Query};
use crate::error::ValidatorError;
use crate::utils::constants::{DAY_SECONDS, DEFAULT_INTERVAL_SECS, HISTORY_START_TIMESTAMP};
use crate::utils::Token;
use alloy_primitives::Address;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use tracing::debug;

/// A pool the validator knows to exist, identified by its canonical pair and fee tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolKey {
    pub token0: Address,
    pub token1: Address,
    pub fee_tier: FeeTier,
}

impl PoolKey {
    pub fn new(token_a: Address, token_b: Address, fee_tier: FeeTier) -> Self {
        let (token0, token1) = if token_a <= token_b { (token_a, token_b) } else { (token_b, token_a) };
        Self { token0, token1, fee_tier }
    }

    fn matches_pair(&self, pair: (Address, Address)) -> bool {
        let other = PoolKey::new(pair.0, pair.1, self.fee_tier);
        other.token0 == self.token0 && other.token1 == self.token1
    }
}

/// Bounds a generated query must respect.
#[derive(Debug, Clone)]
pub struct QueryConstraints {
    pub tokens: Vec<Token>,
    pub fee_tiers: Vec<FeeTier>,
    pub known_pools: Vec<PoolKey>,
    /// Earliest timestamp the chain has pool history for.
    pub history_start: u64,
    /// Latest timestamp a query may reach. Never in the future.
    pub latest: u64,
    pub window_secs: u64,
    pub interval_secs: u64,
    pub pair: Option<(Address, Address)>,
}

impl QueryConstraints {
    pub fn new(tokens: Vec<Token>, known_pools: Vec<PoolKey>, latest: u64) -> Self {
        Self {
            tokens,
            fee_tiers: FeeTier::iter().collect(),
            known_pools,
            history_start: HISTORY_START_TIMESTAMP,
            latest,
            window_secs: DAY_SECONDS,
            interval_secs: DEFAULT_INTERVAL_SECS,
            pair: None,
        }
    }

    pub fn with_fee_tiers(mut self, fee_tiers: Vec<FeeTier>) -> Self {
        self.fee_tiers = fee_tiers;
        self
    }

    pub fn with_history_start(mut self, history_start: u64) -> Self {
        self.history_start = history_start;
        self
    }

    pub fn with_window(mut self, window_secs: u64, interval_secs: u64) -> Self {
        self.window_secs = window_secs;
        self.interval_secs = interval_secs;
        self
    }

    pub fn with_pair(mut self, token_a: Address, token_b: Address) -> Self {
        self.pair = Some((token_a, token_b));
        self
    }

    fn allows_token(&self, token: Address) -> bool {
        self.tokens.iter().any(|t| t.get_address() == token)
    }

    fn candidate_pools(&self) -> Vec<PoolKey> {
        self.known_pools
            .iter()
            .filter(|pool| self.allows_token(pool.token0) && self.allows_token(pool.token1))
            .filter(|pool| self.fee_tiers.contains(&pool.fee_tier))
            .filter(|pool| self.pair.is_none_or(|pair| pool.matches_pair(pair)))
            .copied()
            .collect()
    }
}

/// Produce a query within `constraints` using the thread-local RNG.
pub fn generate(constraints: &QueryConstraints) -> Result<Query, ValidatorError> {
    generate_with_rng(constraints, &mut rand::thread_rng())
}

/// Produce a query within `constraints`. The start time is a uniformly chosen multiple of
/// the sampling interval after `history_start` such that the whole window ends by `latest`.
pub fn generate_with_rng<R: Rng>(constraints: &QueryConstraints, rng: &mut R) -> Result<Query, ValidatorError> {
    let window = constraints.window_secs;
    let interval = constraints.interval_secs;

    if window == 0 || interval == 0 {
        return Err(ValidatorError::InvalidConstraint("window and interval must be positive".to_string()));
    }
    if interval > window {
        return Err(ValidatorError::InvalidConstraint(format!("interval {interval}s exceeds window {window}s")));
    }

    let latest_start = constraints
        .latest
        .checked_sub(window)
        .filter(|start| *start >= constraints.history_start)
        .ok_or_else(|| {
            ValidatorError::InvalidConstraint(format!(
                "empty time window: {}s does not fit between {} and {}",
                window, constraints.history_start, constraints.latest
            ))
        })?;

    let candidates = constraints.candidate_pools();
    if candidates.is_empty() {
        let scope = match constraints.pair {
            Some((a, b)) => format!("{a}/{b}"),
            None => "allowed tokens".to_string(),
        };
        return Err(ValidatorError::InvalidConstraint(format!("no known pool for {scope}")));
    }

    let pool = candidates[rng.gen_range(0..candidates.len())];
    let slots = (latest_start - constraints.history_start) / interval + 1;
    let start_time = constraints.history_start + rng.gen_range(0..slots) * interval;
    let end_time = start_time + window;

    let query = Query::new(pool.token0, pool.token1, pool.fee_tier, start_time, end_time, interval, rng.next_u64());
    debug!(
        "Generated query {} for {}/{} fee={} range={}..{}",
        query.query_id, query.token0, query.token1, query.fee_tier, start_time, end_time
    );
    Ok(query)
}
