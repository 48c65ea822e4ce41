use super::types::{MinerId, MinerWeight, ScoreRecord, unix_now_millis};
use crate::error::ValidatorError;
use crate::utils::constants::CHAIN_WEIGHT_SCALE;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

/// How successive combined scores fold into a weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// `w = (1 - alpha) * w + alpha * combined`, seeded by the first score.
    Ema { alpha: f64 },
    /// Mean of the last `size` combined scores.
    MovingWindow { size: usize },
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        AggregationPolicy::Ema { alpha: 0.1 }
    }
}

impl AggregationPolicy {
    fn sanitized(self) -> Self {
        match self {
            AggregationPolicy::Ema { alpha } if alpha.is_finite() => {
                AggregationPolicy::Ema { alpha: alpha.clamp(f64::EPSILON, 1.0) }
            }
            AggregationPolicy::Ema { .. } => AggregationPolicy::default(),
            AggregationPolicy::MovingWindow { size } => AggregationPolicy::MovingWindow { size: size.max(1) },
        }
    }
}

#[derive(Debug, Default)]
struct MinerState {
    weight: f64,
    last_updated: u64,
    rounds: u64,
    window: VecDeque<f64>,
}

impl MinerState {
    fn to_weight(&self, miner_id: MinerId) -> MinerWeight {
        MinerWeight { miner_id, weight: self.weight, last_updated: self.last_updated, rounds: self.rounds }
    }
}

/// Owner of the per-miner weight table.
///
/// Every write goes through [`WeightAggregator::update`], which holds the map entry for the
/// whole read-modify-write, so concurrent rounds touching the same miner are serialized and
/// no update is lost. Readers only get copies.
#[derive(Debug)]
pub struct WeightAggregator {
    policy: AggregationPolicy,
    table: DashMap<MinerId, MinerState>,
}

impl WeightAggregator {
    pub fn new(policy: AggregationPolicy) -> Self {
        Self { policy: policy.sanitized(), table: DashMap::new() }
    }

    pub fn policy(&self) -> AggregationPolicy {
        self.policy
    }

    /// Fold `record` into the weight of `miner_id`.
    pub fn update(&self, miner_id: MinerId, record: &ScoreRecord) -> Result<MinerWeight, ValidatorError> {
        if record.miner_id != miner_id {
            return Err(ValidatorError::MinerMismatch { target: miner_id, record: record.miner_id });
        }

        let combined = if record.combined.is_finite() { record.combined.clamp(0.0, 1.0) } else { 0.0 };

        let mut state = self.table.entry(miner_id).or_default();
        let previous = state.weight;
        let next = match self.policy {
            AggregationPolicy::Ema { alpha } => {
                if state.rounds == 0 {
                    combined
                } else {
                    (1.0 - alpha) * previous + alpha * combined
                }
            }
            AggregationPolicy::MovingWindow { size } => {
                state.window.push_back(combined);
                while state.window.len() > size {
                    state.window.pop_front();
                }
                state.window.iter().sum::<f64>() / state.window.len() as f64
            }
        };

        state.weight = next.clamp(0.0, 1.0);
        state.rounds += 1;
        state.last_updated = unix_now_millis();

        debug!(
            "Miner {}: weight {:.4} -> {:.4} (combined {:.4}, query {})",
            miner_id, previous, state.weight, combined, record.query_id
        );
        Ok(state.to_weight(miner_id))
    }

    /// Apply every record of a round. Miners without a record keep their weight.
    pub fn apply_round(&self, records: &[ScoreRecord]) -> Vec<MinerWeight> {
        records
            .iter()
            .filter_map(|record| self.update(record.miner_id, record).ok())
            .collect()
    }

    pub fn weight(&self, miner_id: MinerId) -> Result<MinerWeight, ValidatorError> {
        self.table
            .get(&miner_id)
            .map(|state| state.to_weight(miner_id))
            .ok_or(ValidatorError::UnknownMiner(miner_id))
    }

    pub fn snapshot(&self) -> WeightSnapshot {
        let weights = self.table.iter().map(|entry| (*entry.key(), entry.value().weight)).collect();
        WeightSnapshot { weights, taken_at: unix_now_millis() }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Default for WeightAggregator {
    fn default() -> Self {
        Self::new(AggregationPolicy::default())
    }
}

/// Point-in-time copy of the weight table handed to the incentive runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightSnapshot {
    pub weights: BTreeMap<MinerId, f64>,
    pub taken_at: u64,
}

impl WeightSnapshot {
    pub fn get(&self, miner_id: MinerId) -> Option<f64> {
        self.weights.get(&miner_id).copied()
    }

    /// Integer weights for on-chain voting: keep the `max_allowed` heaviest miners, scale each to
    /// `floor(w * 1000 / sum)` and drop the ones that round to zero.
    pub fn to_chain_weights(&self, max_allowed: usize) -> Vec<(MinerId, u16)> {
        let mut ranked: Vec<(MinerId, f64)> = self.weights.iter().map(|(id, w)| (*id, *w)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(max_allowed);

        let total: f64 = ranked.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return Vec::new();
        }

        ranked
            .into_iter()
            .map(|(id, w)| (id, (w * CHAIN_WEIGHT_SCALE / total).floor() as u16))
            .filter(|(_, w)| *w > 0)
            .collect()
    }
}
