// Three-Layer Architecture
pub mod data_sync; // Data Layer: chain access, swap aggregation, miner-side fetch client
pub mod logic; // Logic Layer: query generation, validation, scoring, weights
pub mod execution; // Execution Layer: miner transport, dispatch, reference, validator loop

// Common utilities and types
pub mod error;
pub mod utils;

// Re-export key components from each layer
pub use data_sync::{FetchConfig, JsonRpcClient, PoolFetcher};
pub use error::{FetchError, ValidatorError};
pub use execution::{
    DispatchCoordinator, HttpMinerClient, LocalMinerClient, MinerClient, ReferenceMode, ReferenceResolver,
    RoundOutcome, Validator, ValidatorBuilder, ValidatorConfig,
};
pub use logic::{
    AggregationPolicy, EncodedQuery, FeeTier, HealthReport, MinerId, MinerResponse, MinerSelection, MinerWeight, PoolKey,
    PoolRecord, PoolSample, Query, QueryConstraints, QueryId, Reference, ReferenceConfidence, ResponseOutcome, ScoreRecord, ScoringEngine,
    WeightAggregator, WeightSnapshot,
};
pub use utils::{JsonlArchive, MemoryArchive, MinerRoster, RoundArchive, Token};
