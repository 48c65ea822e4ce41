use crate::logic::types::{MinerId, QueryId};

/// Typed outcomes of the validator pipeline.
///
/// Per-miner kinds (`Timeout`, `MalformedResponse`, `Unreachable`) never leave the dispatch
/// layer as errors: they are folded into an absent-payload `MinerResponse`. Only
/// `NoReferenceAvailable` aborts a round.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidatorError {
    #[error("invalid query constraint: {0}")]
    InvalidConstraint(String),
    #[error("miner {miner} timed out after {after_ms}ms")]
    Timeout { miner: MinerId, after_ms: u64 },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("miner {miner} unreachable: {reason}")]
    Unreachable { miner: MinerId, reason: String },
    #[error("no reference available for query {0}")]
    NoReferenceAvailable(QueryId),
    #[error("unknown miner {0}")]
    UnknownMiner(MinerId),
    #[error("score record for miner {record} applied to miner {target}")]
    MinerMismatch { target: MinerId, record: MinerId },
    #[error("fetch failed: {0}")]
    Fetch(String),
}

impl From<FetchError> for ValidatorError {
    fn from(error: FetchError) -> Self {
        Self::Fetch(error.to_string())
    }
}

/// Errors raised by the miner-side fetch client while talking to the execution client.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("pool not found for {0}")]
    PoolNotFound(String),
    #[error("block not found: {0}")]
    BlockNotFound(String),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("missing result in RPC response")]
    MissingResult,
    #[error("invalid time range {start}..{end}")]
    InvalidRange { start: u64, end: u64 },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
    #[error(transparent)]
    Decode(#[from] alloy_sol_types::Error),
}

impl From<eyre::Report> for FetchError {
    fn from(error: eyre::Report) -> Self {
        Self::Rpc(error.to_string())
    }
}
