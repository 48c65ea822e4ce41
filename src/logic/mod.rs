/// Logic Layer - Query, Validation and Scoring
///
/// This layer is responsible for:
/// - Generating well-formed pool-data queries
/// - Selecting miners whose synced history covers a query
/// - Validating miner records against a query
/// - Scoring responses against a reference
/// - Folding scores into per-miner weights
///
/// Everything here is pure computation over plain data; network and storage live in the
/// data_sync and execution layers.

pub mod health;
pub mod query_generator;
pub mod scoring;
pub mod types;
pub mod validation;
pub mod weights;

// Re-export key components from the logic layer
pub use health::{MinerSelection, health_scores, select_healthy};
pub use query_generator::{PoolKey, QueryConstraints, generate, generate_with_rng};
pub use scoring::{ScoringConfig, ScoringEngine};
pub use types::{
    EncodedQuery, FeeTier, HealthReport, MinerId, MinerResponse, MinerWeight, PoolRecord, PoolSample, Query, QueryId,
    Reference, ReferenceConfidence, ResponseOutcome, ScoreRecord,
};
pub use validation::validate_record;
pub use weights::{AggregationPolicy, WeightAggregator, WeightSnapshot};
