use crate::error::ValidatorError;
use crate::execution::config::ValidatorConfig;
use crate::execution::dispatch::DispatchCoordinator;
use crate::execution::miner_client::{HttpMinerClient, MinerClient};
use crate::execution::reference::{ReferenceMode, ReferenceResolver};
use crate::logic::health::{MinerSelection, select_healthy};
use crate::logic::query_generator::{QueryConstraints, generate};
use crate::logic::scoring::{ScoringConfig, ScoringEngine};
use crate::logic::types::{
    EncodedQuery, MinerId, MinerResponse, MinerWeight, Query, ReferenceConfidence, ScoreRecord, unix_now_secs,
};
use crate::logic::weights::{WeightAggregator, WeightSnapshot};
use crate::utils::archive::{JsonlArchive, RoundArchive};
use crate::utils::roster::MinerRoster;
use eyre::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// What one completed round produced.
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    pub query: Query,
    pub confidence: ReferenceConfidence,
    pub responses: Vec<MinerResponse>,
    pub scores: Vec<ScoreRecord>,
    pub weights: Vec<MinerWeight>,
    /// Health score of every miner that answered the health check
    pub health: BTreeMap<MinerId, f64>,
    /// Miners left out of the round because their history does not reach the end of the query
    pub excluded: Vec<MinerId>,
}

/// Validator pipeline: generate a query, dispatch it to the roster while resolving the reference,
/// score the responses and fold the scores into the weight table.
pub struct Validator {
    config: ValidatorConfig,
    constraints: QueryConstraints,
    roster: MinerRoster,
    dispatcher: Arc<DispatchCoordinator>,
    resolver: ReferenceResolver,
    scoring: ScoringEngine,
    weights: Arc<WeightAggregator>,
    archive: Option<Arc<dyn RoundArchive>>,
}

impl Validator {
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn roster(&self) -> &MinerRoster {
        &self.roster
    }

    pub fn weights(&self) -> Arc<WeightAggregator> {
        Arc::clone(&self.weights)
    }

    pub fn snapshot(&self) -> WeightSnapshot {
        self.weights.snapshot()
    }

    /// Weights in the integer form the incentive runtime expects.
    pub fn chain_weights(&self) -> Vec<(MinerId, u16)> {
        self.weights.snapshot().to_chain_weights(self.config.max_allowed_weights)
    }

    /// Run one round over a freshly generated query.
    pub async fn run_round(&self) -> Result<RoundOutcome, ValidatorError> {
        let mut constraints = self.constraints.clone();
        constraints.latest = unix_now_secs().saturating_sub(self.config.query_lag_secs);
        let query = generate(&constraints)?;
        self.run_query(query).await
    }

    /// Run one round over `query`. Fails only when no reference could be established, in which
    /// case no miner is scored.
    pub async fn run_query(&self, query: Query) -> Result<RoundOutcome, ValidatorError> {
        let started = Instant::now();
        let query_id = query.query_id;
        let encoded = EncodedQuery::encode(query)
            .map_err(|e| ValidatorError::InvalidConstraint(format!("query {query_id} not encodable: {e}")))?;

        let miners = self.roster.miners();
        let trusted = self.roster.trusted();
        let timeout = self.config.query_timeout();
        info!(
            "Round {}: {} miners on the roster, {} trusted, timeout {:?}",
            query_id,
            miners.len(),
            trusted.len(),
            timeout
        );

        let dispatch_healthy = async {
            let selection = self.select_miners(encoded.query(), &miners, timeout).await;
            let responses = self.dispatcher.dispatch(&encoded, &selection.healthy, timeout).await;
            (selection, responses)
        };
        let ((selection, responses), reference) =
            tokio::join!(dispatch_healthy, self.resolver.resolve(&encoded, &trusted, timeout));

        if let Some(archive) = &self.archive {
            if let Err(e) = archive.archive_responses(&responses).await {
                warn!("Round {}: failed to archive responses: {}", query_id, e);
            }
        }

        let reference = match reference {
            Ok(reference) => reference,
            Err(e) => {
                error!("Round {}: discarded, {}", query_id, e);
                return Err(e);
            }
        };

        let scores = self.scoring.score(&reference, &responses);
        let weights = self.weights.apply_round(&scores);

        if let Some(archive) = &self.archive {
            if let Err(e) = archive.archive_scores(&scores).await {
                warn!("Round {}: failed to archive scores: {}", query_id, e);
            }
        }

        info!(
            "Round {}: reference {} from {:?}, scored {} of {} miners in {:?}",
            query_id,
            reference.confidence,
            reference.sources,
            scores.len(),
            responses.len(),
            started.elapsed()
        );

        Ok(RoundOutcome {
            query: encoded.query().clone(),
            confidence: reference.confidence,
            responses,
            scores,
            weights,
            health: selection.scores,
            excluded: selection.excluded,
        })
    }

    /// Split `miners` by whether their synced history covers `query`. Everyone passes when the
    /// health check is off.
    async fn select_miners(&self, query: &Query, miners: &[MinerId], timeout: Duration) -> MinerSelection {
        if !self.config.health_check {
            return MinerSelection { healthy: miners.to_vec(), ..Default::default() };
        }

        let reports = self.dispatcher.check_health(miners, timeout).await;
        let selection = select_healthy(query, &reports, unix_now_secs());
        if !selection.excluded.is_empty() {
            info!(
                "Round {}: skipping {} miners not synced to {}: {:?}",
                query.query_id,
                selection.excluded.len(),
                query.end_time,
                selection.excluded
            );
        }
        selection
    }

    /// Run rounds every `iteration_interval` until `shutdown` fires or its sender is dropped.
    /// At most `max_concurrent_rounds` rounds are in flight; a tick that finds no free slot is
    /// skipped. In-flight rounds are awaited before returning.
    pub async fn run(self: Arc<Self>, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        let slots = Arc::new(Semaphore::new(self.config.max_concurrent_rounds));
        let mut ticker = tokio::time::interval(self.config.iteration_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut rounds: JoinSet<Result<RoundOutcome, ValidatorError>> = JoinSet::new();

        info!(
            "Validator started: {} miners, every {:?}, up to {} concurrent rounds",
            self.roster.len(),
            self.config.iteration_interval(),
            self.config.max_concurrent_rounds
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown requested, waiting for {} rounds", rounds.len());
                    break;
                }
                _ = ticker.tick() => {
                    let Ok(permit) = Arc::clone(&slots).try_acquire_owned() else {
                        warn!("All {} round slots busy, skipping tick", self.config.max_concurrent_rounds);
                        continue;
                    };
                    let validator = Arc::clone(&self);
                    rounds.spawn(async move {
                        let outcome = validator.run_round().await;
                        drop(permit);
                        outcome
                    });
                }
                Some(joined) = rounds.join_next(), if !rounds.is_empty() => {
                    log_round(joined);
                }
            }
        }

        while let Some(joined) = rounds.join_next().await {
            log_round(joined);
        }
        info!("Validator stopped");
        Ok(())
    }
}

fn log_round(joined: Result<Result<RoundOutcome, ValidatorError>, tokio::task::JoinError>) {
    match joined {
        Ok(Ok(outcome)) => debug!("Round {} finished with {} scores", outcome.query.query_id, outcome.scores.len()),
        Ok(Err(ValidatorError::NoReferenceAvailable(_))) => {}
        Ok(Err(e)) => warn!("Round failed: {}", e),
        Err(e) => error!("Round task panicked: {}", e),
    }
}

/// Environment errors fall back to the defaults instead of failing the build.
fn config_or_default(loaded: Result<ValidatorConfig>) -> ValidatorConfig {
    loaded.unwrap_or_else(|e| {
        warn!("Ignoring validator environment, using defaults: {}", e);
        ValidatorConfig::default()
    })
}

/// Builder for Validator to make creation more ergonomic
pub struct ValidatorBuilder {
    config: Option<ValidatorConfig>,
    constraints: Option<QueryConstraints>,
    roster: MinerRoster,
    client: Option<Arc<dyn MinerClient>>,
    reference_mode: ReferenceMode,
    archive: Option<Arc<dyn RoundArchive>>,
}

impl ValidatorBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            constraints: None,
            roster: MinerRoster::default(),
            client: None,
            reference_mode: ReferenceMode::TrustedMiners,
            archive: None,
        }
    }

    pub fn with_config(mut self, config: ValidatorConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_constraints(mut self, constraints: QueryConstraints) -> Self {
        self.constraints = Some(constraints);
        self
    }

    pub fn with_roster(mut self, roster: MinerRoster) -> Self {
        self.roster = roster;
        self
    }

    /// Transport to miners. Defaults to HTTP against the roster endpoints.
    pub fn with_client(mut self, client: Arc<dyn MinerClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_direct_reference(mut self, client: Arc<dyn MinerClient>, self_id: MinerId) -> Self {
        self.reference_mode = ReferenceMode::Direct { client, self_id };
        self
    }

    pub fn with_archive(mut self, archive: Arc<dyn RoundArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub async fn build(self) -> Result<Validator> {
        let config = match self.config {
            Some(config) => config,
            None => config_or_default(ValidatorConfig::from_env()),
        };
        config.validate()?;

        let constraints = self
            .constraints
            .ok_or_else(|| eyre::eyre!("Validator needs query constraints"))?
            .with_window(config.window_secs, config.interval_secs);

        let client: Arc<dyn MinerClient> = match self.client {
            Some(client) => client,
            None => Arc::new(
                HttpMinerClient::new(self.roster.clone(), config.query_timeout())?
                    .with_max_body_bytes(config.max_response_bytes),
            ),
        };

        let archive = match (self.archive, &config.archive_dir) {
            (Some(archive), _) => Some(archive),
            (None, Some(dir)) => Some(Arc::new(JsonlArchive::open(dir).await?) as Arc<dyn RoundArchive>),
            (None, None) => None,
        };

        if self.roster.is_empty() {
            warn!("Validator built with an empty roster");
        }

        let dispatcher = Arc::new(DispatchCoordinator::new(client));
        let resolver = ReferenceResolver::new(Arc::clone(&dispatcher), self.reference_mode);
        let scoring = ScoringEngine::new(ScoringConfig { enable_parallel_scoring: config.enable_parallel_scoring });
        let weights = Arc::new(WeightAggregator::new(config.aggregation));

        Ok(Validator {
            config,
            constraints,
            roster: self.roster,
            dispatcher,
            resolver,
            scoring,
            weights,
            archive,
        })
    }
}

impl Default for ValidatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
