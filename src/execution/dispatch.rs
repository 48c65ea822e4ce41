use crate::error::ValidatorError;
use crate::execution::miner_client::MinerClient;
use crate::logic::types::{EncodedQuery, HealthReport, MinerId, MinerResponse, ResponseOutcome};
use crate::logic::validation::validate_record;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Extra time granted to the join loop over the per-miner deadline before stragglers are aborted.
const JOIN_GRACE: Duration = Duration::from_millis(250);

/// Fans one query out to many miners and collects exactly one response per miner.
pub struct DispatchCoordinator {
    client: Arc<dyn MinerClient>,
}

impl DispatchCoordinator {
    pub fn new(client: Arc<dyn MinerClient>) -> Self {
        Self { client }
    }

    /// Send `query` to every miner in `miners` concurrently, each call bounded by `timeout`.
    ///
    /// Duplicate ids are collapsed. Timeouts, transport failures, malformed records and panicking
    /// calls all come back as absent-payload responses. Responses are ordered by miner id.
    pub async fn dispatch(&self, query: &EncodedQuery, miners: &[MinerId], timeout: Duration) -> Vec<MinerResponse> {
        let miners: BTreeSet<MinerId> = miners.iter().copied().collect();
        if miners.is_empty() {
            return Vec::new();
        }

        let query_id = query.query_id();
        let timeout_ms = timeout.as_millis() as u64;
        let shared = Arc::new(query.clone());
        let started = Instant::now();

        let mut tasks = JoinSet::new();
        for miner in &miners {
            let client = Arc::clone(&self.client);
            let query = Arc::clone(&shared);
            let miner = *miner;
            tasks.spawn(async move { call_miner(client, miner, query, timeout).await });
        }

        let deadline = started + timeout + JOIN_GRACE;
        let mut collected: BTreeMap<MinerId, MinerResponse> = BTreeMap::new();
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(response))) => {
                    collected.insert(response.miner_id, response);
                }
                Ok(Some(Err(e))) => warn!("Query {}: dispatch task failed: {}", query_id, e),
                Ok(None) => break,
                Err(_) => {
                    warn!("Query {}: aborting {} unfinished miner calls", query_id, tasks.len());
                    break;
                }
            }
        }
        // dropping the set aborts whatever is still running
        drop(tasks);

        for miner in &miners {
            collected
                .entry(*miner)
                .or_insert_with(|| MinerResponse::absent(query_id, *miner, timeout_ms, ResponseOutcome::Unreachable));
        }

        let valid = collected.values().filter(|r| r.is_valid()).count();
        info!(
            "Query {}: {}/{} miners returned valid records in {:?}",
            query_id,
            valid,
            collected.len(),
            started.elapsed()
        );
        collected.into_values().collect()
    }

    /// Ask every miner in `miners` how far its history is synced. Miners that fail, time out or
    /// panic map to `None`.
    pub async fn check_health(&self, miners: &[MinerId], timeout: Duration) -> BTreeMap<MinerId, Option<HealthReport>> {
        let mut reports: BTreeMap<MinerId, Option<HealthReport>> = miners.iter().map(|m| (*m, None)).collect();
        if reports.is_empty() {
            return reports;
        }

        let mut tasks = JoinSet::new();
        for miner in reports.keys().copied() {
            let client = Arc::clone(&self.client);
            tasks.spawn(async move { (miner, tokio::time::timeout(timeout, client.health(miner)).await) });
        }

        let deadline = Instant::now() + timeout + JOIN_GRACE;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((miner, Ok(Ok(report)))))) => {
                    reports.insert(miner, Some(report));
                }
                Ok(Some(Ok((miner, Ok(Err(e)))))) => warn!("Health check of miner {} failed: {}", miner, e),
                Ok(Some(Ok((miner, Err(_))))) => debug!("Health check of miner {} timed out", miner),
                Ok(Some(Err(e))) => warn!("Health check task failed: {}", e),
                Ok(None) => break,
                Err(_) => {
                    warn!("Aborting {} unfinished health checks", tasks.len());
                    break;
                }
            }
        }

        let healthy = reports.values().filter(|r| r.is_some()).count();
        debug!("{}/{} miners answered the health check", healthy, reports.len());
        reports
    }
}

async fn call_miner(client: Arc<dyn MinerClient>, miner: MinerId, query: Arc<EncodedQuery>, timeout: Duration) -> MinerResponse {
    let query_id = query.query_id();
    let timeout_ms = timeout.as_millis() as u64;
    let started = Instant::now();

    let result = tokio::time::timeout(timeout, client.fetch(miner, &query)).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    match result {
        Err(_) | Ok(Err(ValidatorError::Timeout { .. })) => {
            debug!("Query {}: miner {} timed out after {}ms", query_id, miner, timeout_ms);
            MinerResponse::absent(query_id, miner, timeout_ms, ResponseOutcome::Timeout)
        }
        Ok(Err(ValidatorError::MalformedResponse(reason))) => {
            warn!("Query {}: miner {} sent a malformed response: {}", query_id, miner, reason);
            MinerResponse::absent(query_id, miner, latency_ms, ResponseOutcome::Malformed)
        }
        Ok(Err(e)) => {
            warn!("Query {}: miner {} failed: {}", query_id, miner, e);
            MinerResponse::absent(query_id, miner, latency_ms, ResponseOutcome::Unreachable)
        }
        Ok(Ok(record)) => match validate_record(query.query(), &record) {
            Ok(()) => {
                debug!("Query {}: miner {} answered {} samples in {}ms", query_id, miner, record.len(), latency_ms);
                MinerResponse::valid(query_id, miner, record, latency_ms)
            }
            Err(e) => {
                warn!("Query {}: miner {} record rejected: {}", query_id, miner, e);
                MinerResponse::absent(query_id, miner, latency_ms, ResponseOutcome::Malformed)
            }
        },
    }
}
