use crate::error::ValidatorError;
use crate::execution::dispatch::DispatchCoordinator;
use crate::execution::miner_client::MinerClient;
use crate::logic::types::{EncodedQuery, MinerId, MinerResponse, QueryId, Reference, ReferenceConfidence};
use crate::logic::validation::validate_record;
use alloy_primitives::B256;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the reference for a round comes from.
#[derive(Clone)]
pub enum ReferenceMode {
    /// Ask the trusted miners through the dispatch coordinator and take their consensus.
    TrustedMiners,
    /// Compute the reference with the validator's own fetch client. `self_id` is the validator's uid
    /// and is reported as the only source.
    Direct { client: Arc<dyn MinerClient>, self_id: MinerId },
}

impl std::fmt::Debug for ReferenceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceMode::TrustedMiners => write!(f, "TrustedMiners"),
            ReferenceMode::Direct { self_id, .. } => write!(f, "Direct({self_id})"),
        }
    }
}

pub struct ReferenceResolver {
    dispatcher: Arc<DispatchCoordinator>,
    mode: ReferenceMode,
}

impl ReferenceResolver {
    pub fn new(dispatcher: Arc<DispatchCoordinator>, mode: ReferenceMode) -> Self {
        Self { dispatcher, mode }
    }

    pub fn mode(&self) -> &ReferenceMode {
        &self.mode
    }

    pub async fn resolve(
        &self,
        query: &EncodedQuery,
        trusted: &[MinerId],
        timeout: Duration,
    ) -> Result<Reference, ValidatorError> {
        match &self.mode {
            ReferenceMode::TrustedMiners => {
                let responses = self.dispatcher.dispatch(query, trusted, timeout).await;
                select_reference(query.query_id(), &responses)
            }
            ReferenceMode::Direct { client, self_id } => self.resolve_direct(client.as_ref(), *self_id, query, timeout).await,
        }
    }

    async fn resolve_direct(
        &self,
        client: &dyn MinerClient,
        self_id: MinerId,
        query: &EncodedQuery,
        timeout: Duration,
    ) -> Result<Reference, ValidatorError> {
        let query_id = query.query_id();
        let record = match tokio::time::timeout(timeout, client.fetch(self_id, query)).await {
            Ok(Ok(record)) => record,
            Ok(Err(e)) => {
                warn!("Query {}: direct reference fetch failed: {}", query_id, e);
                return Err(ValidatorError::NoReferenceAvailable(query_id));
            }
            Err(_) => {
                warn!("Query {}: direct reference fetch timed out", query_id);
                return Err(ValidatorError::NoReferenceAvailable(query_id));
            }
        };

        if let Err(e) = validate_record(query.query(), &record) {
            warn!("Query {}: direct reference rejected: {}", query_id, e);
            return Err(ValidatorError::NoReferenceAvailable(query_id));
        }

        info!("Query {}: reference computed directly ({} samples)", query_id, record.len());
        Ok(Reference { query_id, payload: record, confidence: ReferenceConfidence::Direct, sources: vec![self_id] })
    }
}

/// Pick the reference among trusted responses.
///
/// A payload shared (by digest) by more than half of the valid responders wins with `Majority`
/// confidence. Otherwise the fastest valid responder is taken with `Degraded` confidence.
pub fn select_reference(query_id: QueryId, responses: &[MinerResponse]) -> Result<Reference, ValidatorError> {
    let valid: Vec<&MinerResponse> = responses
        .iter()
        .filter(|r| r.query_id == query_id && r.is_valid())
        .collect();

    let mut groups: BTreeMap<B256, Vec<&MinerResponse>> = BTreeMap::new();
    for response in &valid {
        if let Some(payload) = &response.payload {
            groups.entry(payload.digest()).or_default().push(response);
        }
    }

    if let Some(group) = groups.values().find(|group| group.len() * 2 > valid.len()) {
        if let Some(payload) = group.first().and_then(|r| r.payload.clone()) {
            let sources: Vec<MinerId> = group.iter().map(|r| r.miner_id).collect();
            info!("Query {}: reference agreed by {}/{} trusted miners", query_id, sources.len(), valid.len());
            return Ok(Reference { query_id, payload, confidence: ReferenceConfidence::Majority, sources });
        }
    }

    let fastest = valid.iter().min_by_key(|r| (r.latency_ms, r.miner_id));
    match fastest.and_then(|r| r.payload.clone().map(|payload| (r.miner_id, payload))) {
        Some((miner_id, payload)) => {
            warn!(
                "Query {}: no majority among {} trusted responders ({} distinct payloads), using miner {}",
                query_id,
                valid.len(),
                groups.len(),
                miner_id
            );
            Ok(Reference { query_id, payload, confidence: ReferenceConfidence::Degraded, sources: vec![miner_id] })
        }
        None => {
            debug!("Query {}: none of {} trusted miners returned a valid payload", query_id, responses.len());
            Err(ValidatorError::NoReferenceAvailable(query_id))
        }
    }
}
