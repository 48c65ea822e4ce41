use super::types::{MinerResponse, PoolRecord, PoolSample, Reference, ScoreRecord};
use crate::utils::constants::EPS;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Score responses on the rayon pool instead of the calling thread.
    pub enable_parallel_scoring: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self { enable_parallel_scoring: true }
    }
}

/// Turns the responses of one round into score records.
///
/// Contract, pinned by the tests below:
/// - accuracy is the mean per-sample similarity over the union of reference and candidate
///   timestamps, where a sample's similarity is the mean over price, liquidity and volume of
///   `clamp(1 - |m - r| / |r|, 0, 1)`;
/// - latency score is `fastest / observed`, where `fastest` is the quickest valid responder with
///   non-zero accuracy (any valid responder when none has);
/// - combined is the unweighted mean of the two.
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Score every response of a round against its reference.
    ///
    /// Returns nothing when no response carries a payload: such a round says nothing about
    /// the miners and must not drag their weights down.
    pub fn score(&self, reference: &Reference, responses: &[MinerResponse]) -> Vec<ScoreRecord> {
        let round: Vec<&MinerResponse> = responses
            .iter()
            .filter(|response| {
                let same_round = response.query_id == reference.query_id;
                if !same_round {
                    warn!(
                        "Dropping response of miner {} for query {} from round {}",
                        response.miner_id, response.query_id, reference.query_id
                    );
                }
                same_round
            })
            .collect();

        let accuracies: Vec<Option<f64>> = if self.config.enable_parallel_scoring {
            round.par_iter().map(|response| response_accuracy(reference, response)).collect()
        } else {
            round.iter().map(|response| response_accuracy(reference, response)).collect()
        };

        let Some(fastest_ms) = pace(&round, &accuracies) else {
            debug!("Query {}: no valid responders, round produces no scores", reference.query_id);
            return Vec::new();
        };

        let records: Vec<ScoreRecord> = round
            .iter()
            .zip(&accuracies)
            .map(|(response, accuracy)| match accuracy {
                Some(accuracy) => {
                    let latency_score = latency_score(fastest_ms, response.latency_ms);
                    let combined = ((accuracy + latency_score) / 2.0).clamp(0.0, 1.0);
                    ScoreRecord {
                        query_id: response.query_id,
                        miner_id: response.miner_id,
                        accuracy: *accuracy,
                        latency_score,
                        combined,
                    }
                }
                None => ScoreRecord::zero(response.query_id, response.miner_id),
            })
            .collect();

        debug!(
            "Query {}: scored {} responses, fastest valid responder {}ms",
            reference.query_id,
            records.len(),
            fastest_ms
        );
        records
    }
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

fn response_accuracy(reference: &Reference, response: &MinerResponse) -> Option<f64> {
    match &response.payload {
        Some(payload) if response.is_valid() => Some(accuracy(&reference.payload, payload)),
        _ => None,
    }
}

/// Latency every responder is measured against: the fastest valid responder whose record matches
/// the reference at all. An answer with zero accuracy (an empty record, say) only sets the pace
/// when nothing better arrived, so a single valid responder always gets full latency credit.
fn pace(round: &[&MinerResponse], accuracies: &[Option<f64>]) -> Option<u64> {
    let fastest = |matching: bool| {
        round
            .iter()
            .zip(accuracies)
            .filter(|(_, accuracy)| accuracy.is_some_and(|a| !matching || a > 0.0))
            .map(|(response, _)| response.latency_ms.max(1))
            .min()
    };
    fastest(true).or_else(|| fastest(false))
}

/// Similarity of `candidate` to `reference` in [0, 1].
pub fn accuracy(reference: &PoolRecord, candidate: &PoolRecord) -> f64 {
    let extra = candidate
        .samples
        .iter()
        .filter(|sample| reference.sample_at(sample.timestamp).is_none())
        .count();
    let union = reference.len() + extra;
    if union == 0 {
        return 1.0;
    }

    let total: f64 = reference
        .samples
        .iter()
        .map(|expected| match candidate.sample_at(expected.timestamp) {
            Some(observed) => sample_similarity(expected, observed),
            None => 0.0,
        })
        .sum();

    (total / union as f64).clamp(0.0, 1.0)
}

/// `fastest / observed`, capped at 1. Latencies are floored at one millisecond.
pub fn latency_score(fastest_ms: u64, observed_ms: u64) -> f64 {
    (fastest_ms.max(1) as f64 / observed_ms.max(1) as f64).min(1.0)
}

fn sample_similarity(expected: &PoolSample, observed: &PoolSample) -> f64 {
    let fields = expected.fields();
    let sum: f64 = fields
        .iter()
        .zip(observed.fields())
        .map(|(r, m)| field_similarity(*r, m))
        .sum();
    sum / fields.len() as f64
}

fn field_similarity(reference: f64, observed: f64) -> f64 {
    if reference.abs() < EPS {
        return if observed.abs() < EPS { 1.0 } else { 0.0 };
    }
    (1.0 - (observed - reference).abs() / reference.abs()).clamp(0.0, 1.0)
}
