//! Integration tests for the execution layer
//!
//! Scripted miners stand in for the network: each miner id is bound to a delay and a record (or a
//! failure), and rounds run end to end through dispatch, reference resolution, scoring, weight
//! updates and archiving. Timing-sensitive scenarios run on tokio's paused clock so latencies are
//! exact.
use super::*;
use crate::error::ValidatorError;
use crate::logic::query_generator::{PoolKey, QueryConstraints};
use crate::logic::types::{
    EncodedQuery, FeeTier, HealthReport, MinerId, MinerResponse, PoolRecord, PoolSample, Query, ReferenceConfidence, ResponseOutcome,
    ScoreRecord,
};
use crate::logic::weights::AggregationPolicy;
use crate::utils::{MemoryArchive, MinerRoster, RoundArchive, Token};
use alloy_primitives::Address;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

type Builder = Arc<dyn Fn(&Query) -> Option<PoolRecord> + Send + Sync>;

/// Behaviour of one scripted miner.
#[derive(Clone)]
pub(crate) enum Scripted {
    /// Answer `record` after `delay_ms`.
    Record { delay_ms: u64, record: PoolRecord },
    /// Build the answer from the decoded query after `delay_ms`; `None` never answers.
    Respond { delay_ms: u64, build: Builder },
    Fail(ValidatorError),
    Hang,
    Panic,
}

impl Scripted {
    pub fn respond(delay_ms: u64, build: impl Fn(&Query) -> Option<PoolRecord> + Send + Sync + 'static) -> Self {
        Scripted::Respond { delay_ms, build: Arc::new(build) }
    }
}

#[derive(Default)]
pub(crate) struct ScriptedClient {
    scripts: HashMap<MinerId, Scripted>,
    health: HashMap<MinerId, Result<HealthReport, ValidatorError>>,
    pub calls: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, miner: MinerId, script: Scripted) -> Self {
        self.scripts.insert(miner, script);
        self
    }

    /// Miners without a health script report a history that covers any query.
    pub fn with_health(mut self, miner: MinerId, report: Result<HealthReport, ValidatorError>) -> Self {
        self.health.insert(miner, report);
        self
    }
}

#[async_trait]
impl MinerClient for ScriptedClient {
    async fn fetch(&self, miner: MinerId, query: &EncodedQuery) -> Result<PoolRecord, ValidatorError> {
        let Some(script) = self.scripts.get(&miner) else {
            return Err(ValidatorError::Unreachable { miner, reason: "not scripted".to_string() });
        };
        self.calls.fetch_add(1, Ordering::SeqCst);

        match script {
            Scripted::Record { delay_ms, record } => {
                tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                Ok(record.clone())
            }
            Scripted::Respond { delay_ms, build } => {
                tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                let decoded: Query = serde_json::from_slice(query.bytes())
                    .map_err(|e| ValidatorError::MalformedResponse(e.to_string()))?;
                match build(&decoded) {
                    Some(record) => Ok(record),
                    None => std::future::pending().await,
                }
            }
            Scripted::Fail(e) => Err(e.clone()),
            Scripted::Hang => std::future::pending().await,
            Scripted::Panic => panic!("scripted miner {miner} panicked"),
        }
    }

    async fn health(&self, miner: MinerId) -> Result<HealthReport, ValidatorError> {
        self.health.get(&miner).cloned().unwrap_or(Ok(HealthReport::new(u64::MAX)))
    }
}

/// Four samples from the start of `query`, scaled around price 2, liquidity 1000 and volume 50.
pub(crate) fn record_for(query: &Query, scale: f64) -> PoolRecord {
    PoolRecord::new(
        (0..4)
            .map(|i| {
                PoolSample::new(query.start_time + i * query.interval_secs, 2.0 * scale, 1_000.0 * scale, 50.0 * scale)
            })
            .collect(),
    )
}

pub(crate) fn sample_record(query: &EncodedQuery, scale: f64) -> PoolRecord {
    record_for(query.query(), scale)
}

fn query_with_nonce(nonce: u64) -> Query {
    Query::new(Address::repeat_byte(1), Address::repeat_byte(2), FeeTier::Medium, 1_600, 2_800, 300, nonce)
}

pub(crate) fn sample_query() -> EncodedQuery {
    EncodedQuery::encode(query_with_nonce(7)).unwrap()
}

const M1: MinerId = MinerId(1);
const M2: MinerId = MinerId(2);
const M3: MinerId = MinerId(3);
const T1: MinerId = MinerId(100);
const T2: MinerId = MinerId(101);

fn roster(miners: &[MinerId]) -> MinerRoster {
    miners
        .iter()
        .fold(MinerRoster::new(), |roster, miner| {
            let url = Url::parse(&format!("http://10.0.0.{}:8091", miner.0 % 250)).unwrap();
            roster.with_miner(*miner, url)
        })
        .with_trusted(T1)
        .with_trusted(T2)
}

fn constraints() -> QueryConstraints {
    QueryConstraints::new(
        vec![Token::repeat_byte(1), Token::repeat_byte(2)],
        vec![PoolKey::new(Address::repeat_byte(1), Address::repeat_byte(2), FeeTier::Medium)],
        0,
    )
}

fn config(timeout_ms: u64) -> ValidatorConfig {
    ValidatorConfig { query_timeout_ms: timeout_ms, ..Default::default() }
}

async fn validator(client: ScriptedClient, config: ValidatorConfig, archive: Arc<MemoryArchive>) -> Validator {
    ValidatorBuilder::new()
        .with_config(config)
        .with_constraints(constraints())
        .with_roster(roster(&[M1, M2, M3]))
        .with_client(Arc::new(client))
        .with_archive(archive)
        .build()
        .await
        .unwrap()
}

fn score_of(scores: &[ScoreRecord], miner: MinerId) -> ScoreRecord {
    *scores.iter().find(|s| s.miner_id == miner).unwrap()
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[tokio::test(start_paused = true)]
async fn test_round_scores_exact_fast_and_timed_out_miners() {
    let q2 = query_with_nonce(2);
    let q2_id = q2.query_id;
    let trusted = move |q: &Query| (q.query_id != q2_id).then(|| record_for(q, 1.0));
    let client = ScriptedClient::new()
        .with(T1, Scripted::respond(50, trusted.clone()))
        .with(T2, Scripted::respond(60, trusted))
        .with(M1, Scripted::respond(200, |q| Some(record_for(q, 1.0))))
        .with(M2, Scripted::respond(400, |q| Some(record_for(q, 1.05))))
        .with(M3, Scripted::Hang);
    let archive = Arc::new(MemoryArchive::new());
    let validator = validator(client, config(1_000), Arc::clone(&archive)).await;

    // Q1: reference agreed by both trusted miners
    let outcome = validator.run_query(query_with_nonce(1)).await.unwrap();
    assert_eq!(outcome.confidence, ReferenceConfidence::Majority);
    assert_eq!(outcome.scores.len(), 3);

    let m1 = score_of(&outcome.scores, M1);
    assert_eq!((m1.accuracy, m1.latency_score, m1.combined), (1.0, 1.0, 1.0));

    let m2 = score_of(&outcome.scores, M2);
    assert!(approx(m2.accuracy, 0.95));
    assert_eq!(m2.latency_score, 0.5);
    assert!(approx(m2.combined, 0.725));

    let m3 = score_of(&outcome.scores, M3);
    assert_eq!((m3.accuracy, m3.latency_score, m3.combined), (0.0, 0.0, 0.0));
    let m3_response = outcome.responses.iter().find(|r| r.miner_id == M3).unwrap();
    assert_eq!(m3_response.outcome, ResponseOutcome::Timeout);
    assert_eq!(m3_response.latency_ms, 1_000);

    let weights = validator.weights();
    assert_eq!(weights.weight(M1).unwrap().weight, 1.0);
    assert!(approx(weights.weight(M2).unwrap().weight, 0.725));
    assert_eq!(weights.weight(M3).unwrap().weight, 0.0);
    let before = validator.snapshot().weights;

    // Q2: every trusted miner times out, the round is discarded
    let err = validator.run_query(q2).await.unwrap_err();
    assert_eq!(err, ValidatorError::NoReferenceAvailable(q2_id));
    assert_eq!(validator.snapshot().weights, before);
    assert_eq!(weights.weight(M1).unwrap().rounds, 1);

    assert_eq!(archive.scores().await.len(), 3);
    assert_eq!(archive.responses().await.len(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_round_without_valid_responders_scores_nobody() {
    let client = ScriptedClient::new()
        .with(T1, Scripted::respond(10, |q| Some(record_for(q, 1.0))))
        .with(M1, Scripted::Hang)
        .with(M2, Scripted::Fail(ValidatorError::MalformedResponse("truncated".to_string())));
    let archive = Arc::new(MemoryArchive::new());
    let validator = validator(client, config(500), Arc::clone(&archive)).await;

    let outcome = validator.run_query(query_with_nonce(1)).await.unwrap();
    assert_eq!(outcome.responses.len(), 3);
    assert!(outcome.scores.is_empty());
    assert!(outcome.weights.is_empty());
    assert!(validator.weights().is_empty());
    assert!(validator.weights().weight(M1).is_err());
    assert!(archive.scores().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_degraded_reference_when_trusted_disagree() {
    let client = ScriptedClient::new()
        .with(T1, Scripted::respond(30, |q| Some(record_for(q, 1.0))))
        .with(T2, Scripted::respond(80, |q| Some(record_for(q, 1.5))))
        .with(M1, Scripted::respond(100, |q| Some(record_for(q, 1.0))));
    let validator = validator(client, config(1_000), Arc::new(MemoryArchive::new())).await;

    let outcome = validator.run_query(query_with_nonce(1)).await.unwrap();
    assert_eq!(outcome.confidence, ReferenceConfidence::Degraded);
    assert_eq!(score_of(&outcome.scores, M1).accuracy, 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_direct_reference() {
    let miners = ScriptedClient::new().with(M1, Scripted::respond(100, |q| Some(record_for(q, 0.9))));
    let own = ScriptedClient::new().with(MinerId(42), Scripted::respond(5, |q| Some(record_for(q, 1.0))));
    let validator = ValidatorBuilder::new()
        .with_config(config(1_000))
        .with_constraints(constraints())
        .with_roster(roster(&[M1]))
        .with_client(Arc::new(miners))
        .with_direct_reference(Arc::new(own), MinerId(42))
        .build()
        .await
        .unwrap();

    let outcome = validator.run_query(query_with_nonce(1)).await.unwrap();
    assert_eq!(outcome.confidence, ReferenceConfidence::Direct);
    let m1 = score_of(&outcome.scores, M1);
    assert!(approx(m1.accuracy, 0.9));
    assert_eq!(m1.latency_score, 1.0);
}

struct FailingArchive;

#[async_trait]
impl RoundArchive for FailingArchive {
    async fn archive_responses(&self, _responses: &[MinerResponse]) -> eyre::Result<()> {
        Err(eyre::eyre!("disk full"))
    }

    async fn archive_scores(&self, _scores: &[ScoreRecord]) -> eyre::Result<()> {
        Err(eyre::eyre!("disk full"))
    }
}

#[tokio::test(start_paused = true)]
async fn test_archive_failure_does_not_fail_round() {
    let client = ScriptedClient::new()
        .with(T1, Scripted::respond(10, |q| Some(record_for(q, 1.0))))
        .with(M1, Scripted::respond(10, |q| Some(record_for(q, 1.0))));
    let validator = ValidatorBuilder::new()
        .with_config(config(1_000))
        .with_constraints(constraints())
        .with_roster(roster(&[M1]))
        .with_client(Arc::new(client))
        .with_archive(Arc::new(FailingArchive))
        .build()
        .await
        .unwrap();

    let outcome = validator.run_query(query_with_nonce(1)).await.unwrap();
    assert_eq!(outcome.scores.len(), 1);
    assert_eq!(validator.weights().weight(M1).unwrap().weight, 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_generated_round() {
    let client = ScriptedClient::new()
        .with(T1, Scripted::respond(10, |q| Some(record_for(q, 1.0))))
        .with(M1, Scripted::respond(10, |q| Some(record_for(q, 1.0))));
    let validator = validator(client, config(1_000), Arc::new(MemoryArchive::new())).await;

    let outcome = validator.run_round().await.unwrap();
    let query = &outcome.query;
    assert_eq!(query.end_time - query.start_time, validator.config().window_secs);
    assert_eq!(query.interval_secs, validator.config().interval_secs);
    assert_eq!(query.fee_tier, FeeTier::Medium);
    assert_eq!(validator.chain_weights(), vec![(M1, 1000)]);
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_until_shutdown() {
    let client = ScriptedClient::new()
        .with(T1, Scripted::respond(10, |q| Some(record_for(q, 1.0))))
        .with(M1, Scripted::respond(10, |q| Some(record_for(q, 1.0))));
    let config = ValidatorConfig { iteration_interval_secs: 60, ..config(1_000) };
    let validator = Arc::new(validator(client, config, Arc::new(MemoryArchive::new())).await);

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel(1);
    let handle = tokio::spawn(Arc::clone(&validator).run(shutdown_rx));

    // ticks at 0s, 60s and 120s
    tokio::time::sleep(Duration::from_secs(150)).await;
    shutdown_tx.send(()).await.unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(validator.weights().weight(M1).unwrap().rounds, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rounds_match_sequential_baseline() {
    const ROUNDS: u64 = 32;

    fn client() -> ScriptedClient {
        ScriptedClient::new()
            .with(T1, Scripted::respond(0, |q| Some(record_for(q, 1.0))))
            // varies per query so the final weight depends on every round
            .with(M1, Scripted::respond(0, |q| Some(record_for(q, 1.0 + (q.start_time / 300 % 7) as f64 / 100.0))))
            .with(M2, Scripted::Fail(ValidatorError::MalformedResponse("garbage".to_string())))
    }
    let config = ValidatorConfig {
        aggregation: AggregationPolicy::MovingWindow { size: 1_000 },
        ..config(5_000)
    };
    let queries: Vec<Query> = (0..ROUNDS)
        .map(|i| {
            let start = 1_500 + i * 300;
            Query::new(Address::repeat_byte(1), Address::repeat_byte(2), FeeTier::Medium, start, start + 1_200, 300, i)
        })
        .collect();

    let concurrent = Arc::new(validator(client(), config.clone(), Arc::new(MemoryArchive::new())).await);
    let handles: Vec<_> = queries
        .iter()
        .cloned()
        .map(|query| {
            let validator = Arc::clone(&concurrent);
            tokio::spawn(async move { validator.run_query(query).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let sequential = validator(client(), config, Arc::new(MemoryArchive::new())).await;
    for query in queries {
        sequential.run_query(query).await.unwrap();
    }

    for miner in [M1, M2] {
        let a = concurrent.weights().weight(miner).unwrap();
        let b = sequential.weights().weight(miner).unwrap();
        assert_eq!(a.rounds, ROUNDS);
        assert_eq!(b.rounds, ROUNDS);
        assert!(approx(a.weight, b.weight), "{miner}: {} vs {}", a.weight, b.weight);
    }
    assert!(concurrent.weights().weight(M1).unwrap().weight < 1.0);
    assert_eq!(concurrent.weights().weight(M2).unwrap().weight, 0.0);
}

/// M1 is synced, M2 fails its health check and M3 stopped syncing before the query ends at 2_800.
fn client_with_lagging_miners() -> Arc<ScriptedClient> {
    Arc::new(
        ScriptedClient::new()
            .with(T1, Scripted::respond(50, |q| Some(record_for(q, 1.0))))
            .with(T2, Scripted::respond(60, |q| Some(record_for(q, 1.0))))
            .with(M1, Scripted::respond(200, |q| Some(record_for(q, 1.0))))
            .with(M2, Scripted::respond(200, |q| Some(record_for(q, 1.0))))
            .with(M3, Scripted::respond(200, |q| Some(record_for(q, 1.0))))
            .with_health(M2, Err(ValidatorError::Unreachable { miner: M2, reason: "refused".to_string() }))
            .with_health(M3, Ok(HealthReport::new(2_000))),
    )
}

async fn validator_with(client: Arc<ScriptedClient>, config: ValidatorConfig) -> Validator {
    ValidatorBuilder::new()
        .with_config(config)
        .with_constraints(constraints())
        .with_roster(roster(&[M1, M2, M3]))
        .with_client(client)
        .build()
        .await
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_miners_are_neither_dispatched_nor_scored() {
    let client = client_with_lagging_miners();
    let validator = validator_with(Arc::clone(&client), config(1_000)).await;

    let outcome = validator.run_query(query_with_nonce(1)).await.unwrap();

    // two trusted miners and M1
    assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    assert_eq!(outcome.excluded, vec![M2, M3]);
    let responders: Vec<MinerId> = outcome.responses.iter().map(|r| r.miner_id).collect();
    assert_eq!(responders, vec![M1]);
    let scored: Vec<MinerId> = outcome.scores.iter().map(|s| s.miner_id).collect();
    assert_eq!(scored, vec![M1]);
    assert_eq!(outcome.health.keys().copied().collect::<Vec<_>>(), vec![M1, M3]);

    let weights = validator.weights();
    assert_eq!(weights.weight(M1).unwrap().weight, 1.0);
    assert!(weights.weight(M2).is_err());
    assert!(weights.weight(M3).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_disabled_health_check_dispatches_to_everyone() {
    let client = client_with_lagging_miners();
    let config = ValidatorConfig { health_check: false, ..config(1_000) };
    let validator = validator_with(Arc::clone(&client), config).await;

    let outcome = validator.run_query(query_with_nonce(1)).await.unwrap();

    assert_eq!(client.calls.load(Ordering::SeqCst), 5);
    assert!(outcome.excluded.is_empty());
    assert!(outcome.health.is_empty());
    assert_eq!(outcome.scores.len(), 3);
}

#[tokio::test]
async fn test_builder_requires_constraints() {
    let result = ValidatorBuilder::new()
        .with_config(ValidatorConfig::default())
        .with_client(Arc::new(ScriptedClient::new()))
        .build()
        .await;
    assert!(result.is_err());
}
