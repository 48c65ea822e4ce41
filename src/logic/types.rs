use alloy_primitives::{Address, B256, Bytes};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use strum_macros::{Display, EnumIter};

/// Network uid of a miner module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MinerId(pub u16);

impl fmt::Display for MinerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for MinerId {
    fn from(uid: u16) -> Self {
        Self(uid)
    }
}

/// Identifier of one round. Derived from the query parameters and a nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(pub B256);

impl QueryId {
    /// Hash arbitrary bytes into a query id. Handy for tests with readable labels.
    pub fn digest(data: impl AsRef<[u8]>) -> Self {
        Self(B256::from_slice(&Sha256::digest(data.as_ref())))
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // short form is enough for logs
        write!(f, "0x{}", hex::encode(&self.0[..6]))
    }
}

/// Uniswap V3 fee tiers, in hundredths of a basis point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum FeeTier {
    #[strum(serialize = "100")]
    Lowest,
    #[strum(serialize = "500")]
    Low,
    #[strum(serialize = "3000")]
    Medium,
    #[strum(serialize = "10000")]
    High,
}

impl FeeTier {
    pub fn as_u32(&self) -> u32 {
        match self {
            FeeTier::Lowest => 100,
            FeeTier::Low => 500,
            FeeTier::Medium => 3000,
            FeeTier::High => 10000,
        }
    }
}

impl From<FeeTier> for u32 {
    fn from(fee: FeeTier) -> Self {
        fee.as_u32()
    }
}

impl TryFrom<u32> for FeeTier {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            100 => Ok(FeeTier::Lowest),
            500 => Ok(FeeTier::Low),
            3000 => Ok(FeeTier::Medium),
            10000 => Ok(FeeTier::High),
            other => Err(format!("unsupported fee tier {other}")),
        }
    }
}

/// Parameters of one pool-data query. Immutable once dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub query_id: QueryId,
    pub token0: Address,
    pub token1: Address,
    pub fee_tier: FeeTier,
    pub start_time: u64,
    pub end_time: u64,
    pub interval_secs: u64,
}

impl Query {
    /// Build a query. The token pair is stored in canonical (sorted) order and the id is
    /// derived from every parameter plus `nonce`, so two rounds over the same pool and range
    /// still get distinct ids.
    pub fn new(
        token_a: Address,
        token_b: Address,
        fee_tier: FeeTier,
        start_time: u64,
        end_time: u64,
        interval_secs: u64,
        nonce: u64,
    ) -> Self {
        let (token0, token1) = if token_a <= token_b { (token_a, token_b) } else { (token_b, token_a) };

        let mut hasher = Sha256::new();
        hasher.update(token0.as_slice());
        hasher.update(token1.as_slice());
        hasher.update(fee_tier.as_u32().to_be_bytes());
        hasher.update(start_time.to_be_bytes());
        hasher.update(end_time.to_be_bytes());
        hasher.update(interval_secs.to_be_bytes());
        hasher.update(nonce.to_be_bytes());
        let query_id = QueryId(B256::from_slice(&hasher.finalize()));

        Self { query_id, token0, token1, fee_tier, start_time, end_time, interval_secs }
    }

    /// Same query parameters under an explicit id.
    pub fn with_id(mut self, query_id: QueryId) -> Self {
        self.query_id = query_id;
        self
    }

    pub fn duration_secs(&self) -> u64 {
        self.end_time.saturating_sub(self.start_time)
    }
}

/// A query together with its wire encoding. Encoded once per round so every miner
/// receives byte-identical parameters.
#[derive(Debug, Clone)]
pub struct EncodedQuery {
    query: Query,
    bytes: Bytes,
}

impl EncodedQuery {
    pub fn encode(query: Query) -> Result<Self, serde_json::Error> {
        let bytes = serde_json::to_vec(&query)?.into();
        Ok(Self { query, bytes })
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn query_id(&self) -> QueryId {
        self.query.query_id
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

/// One interval of pool metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolSample {
    pub timestamp: u64,
    pub price: f64,
    pub liquidity: f64,
    pub volume: f64,
}

impl PoolSample {
    pub fn new(timestamp: u64, price: f64, liquidity: f64, volume: f64) -> Self {
        Self { timestamp, price, liquidity, volume }
    }

    pub fn fields(&self) -> [f64; 3] {
        [self.price, self.liquidity, self.volume]
    }
}

/// Normalized result of one query: samples ordered by strictly increasing timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolRecord {
    pub samples: Vec<PoolSample>,
}

impl PoolRecord {
    pub fn new(samples: Vec<PoolSample>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Lookup by timestamp. Relies on the ordering invariant checked by the record validator.
    pub fn sample_at(&self, timestamp: u64) -> Option<&PoolSample> {
        self.samples
            .binary_search_by_key(&timestamp, |s| s.timestamp)
            .ok()
            .map(|idx| &self.samples[idx])
    }

    /// Content digest used to decide whether two records agree. `-0.0` and `0.0` hash the same.
    pub fn digest(&self) -> B256 {
        let mut hasher = Sha256::new();
        for sample in &self.samples {
            hasher.update(sample.timestamp.to_be_bytes());
            for value in sample.fields() {
                hasher.update((value + 0.0).to_bits().to_be_bytes());
            }
        }
        B256::from_slice(&hasher.finalize())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum ResponseOutcome {
    Ok,
    Timeout,
    Malformed,
    Unreachable,
}

/// What the dispatch coordinator collected from one miner for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinerResponse {
    pub query_id: QueryId,
    pub miner_id: MinerId,
    pub payload: Option<PoolRecord>,
    /// Unix time in milliseconds.
    pub received_at: u64,
    pub latency_ms: u64,
    pub outcome: ResponseOutcome,
}

impl MinerResponse {
    pub fn valid(query_id: QueryId, miner_id: MinerId, payload: PoolRecord, latency_ms: u64) -> Self {
        Self {
            query_id,
            miner_id,
            payload: Some(payload),
            received_at: unix_now_millis(),
            latency_ms,
            outcome: ResponseOutcome::Ok,
        }
    }

    pub fn absent(query_id: QueryId, miner_id: MinerId, latency_ms: u64, outcome: ResponseOutcome) -> Self {
        Self { query_id, miner_id, payload: None, received_at: unix_now_millis(), latency_ms, outcome }
    }

    pub fn is_valid(&self) -> bool {
        self.payload.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum ReferenceConfidence {
    /// A strict majority of responding trusted miners agreed.
    Majority,
    /// No majority; the fastest trusted responder was taken.
    Degraded,
    /// Computed by the validator's own fetch client.
    Direct,
}

/// Authoritative result for one query id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub query_id: QueryId,
    pub payload: PoolRecord,
    pub confidence: ReferenceConfidence,
    pub sources: Vec<MinerId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub query_id: QueryId,
    pub miner_id: MinerId,
    pub accuracy: f64,
    pub latency_score: f64,
    pub combined: f64,
}

impl ScoreRecord {
    /// Record for a miner that produced no usable payload.
    pub fn zero(query_id: QueryId, miner_id: MinerId) -> Self {
        Self { query_id, miner_id, accuracy: 0.0, latency_score: 0.0, combined: 0.0 }
    }
}

/// A miner's answer to the health check: how far its local pool history is synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Unix time up to which the miner holds complete pool history.
    pub completed_until: u64,
}

impl HealthReport {
    pub fn new(completed_until: u64) -> Self {
        Self { completed_until }
    }

    /// Whether the miner's history reaches the end of `query`.
    pub fn covers(&self, query: &Query) -> bool {
        self.completed_until >= query.end_time
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinerWeight {
    pub miner_id: MinerId,
    pub weight: f64,
    /// Unix time in milliseconds of the last applied score.
    pub last_updated: u64,
    pub rounds: u64,
}

pub fn unix_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
