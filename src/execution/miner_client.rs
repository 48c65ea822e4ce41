use crate::data_sync::{ChainRpc, PoolFetcher};
use crate::error::ValidatorError;
use crate::logic::types::{EncodedQuery, HealthReport, MinerId, PoolRecord, Query};
use crate::utils::MinerRoster;
use crate::utils::constants::DEFAULT_MAX_RESPONSE_BYTES;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;
use url::Url;

/// Transport to a miner. Implementations return the miner's answers as received; validation and
/// deadlines are the dispatch coordinator's job.
#[async_trait]
pub trait MinerClient: Send + Sync {
    async fn fetch(&self, miner: MinerId, query: &EncodedQuery) -> Result<PoolRecord, ValidatorError>;

    /// How far the miner's local pool history is synced.
    async fn health(&self, miner: MinerId) -> Result<HealthReport, ValidatorError>;
}

/// Posts the encoded query to `{endpoint}/query` and expects a JSON pool record back. Health is
/// read from `{endpoint}/health`. Bodies larger than `max_body_bytes` are rejected as malformed.
pub struct HttpMinerClient {
    http_client: reqwest::Client,
    roster: MinerRoster,
    timeout_ms: u64,
    max_body_bytes: usize,
}

impl HttpMinerClient {
    /// `timeout` is a transport-level backstop; the per-round deadline is enforced by dispatch.
    pub fn new(roster: MinerRoster, timeout: Duration) -> eyre::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| eyre::eyre!("Failed to create HTTP client: {}", e))?;
        Ok(Self {
            http_client,
            roster,
            timeout_ms: timeout.as_millis() as u64,
            max_body_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        })
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    fn url(&self, miner: MinerId, path: &str) -> Result<Url, ValidatorError> {
        let endpoint = self
            .roster
            .endpoint(miner)
            .ok_or_else(|| ValidatorError::Unreachable { miner, reason: "no endpoint in roster".to_string() })?;
        endpoint.join(path).map_err(|e| ValidatorError::Unreachable { miner, reason: e.to_string() })
    }

    fn transport_error(&self, miner: MinerId, e: reqwest::Error) -> ValidatorError {
        if e.is_timeout() {
            ValidatorError::Timeout { miner, after_ms: self.timeout_ms }
        } else {
            ValidatorError::Unreachable { miner, reason: e.to_string() }
        }
    }

    /// Check the status, then buffer the body up to `max_body_bytes` and decode it as JSON.
    async fn read_json<T: DeserializeOwned>(
        &self,
        miner: MinerId,
        mut response: reqwest::Response,
    ) -> Result<T, ValidatorError> {
        let status = response.status();
        if !status.is_success() {
            return Err(ValidatorError::Unreachable { miner, reason: format!("HTTP {status}") });
        }

        let too_large =
            || ValidatorError::MalformedResponse(format!("miner {miner}: body exceeds {} bytes", self.max_body_bytes));
        if response.content_length().is_some_and(|len| len > self.max_body_bytes as u64) {
            return Err(too_large());
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.transport_error(miner, e))? {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        serde_json::from_slice(&body).map_err(|e| ValidatorError::MalformedResponse(format!("miner {miner}: {e}")))
    }
}

#[async_trait]
impl MinerClient for HttpMinerClient {
    async fn fetch(&self, miner: MinerId, query: &EncodedQuery) -> Result<PoolRecord, ValidatorError> {
        let url = self.url(miner, "query")?;
        trace!("Query {} -> miner {} at {}", query.query_id(), miner, url);

        let response = self
            .http_client
            .post(url)
            .header("Content-Type", "application/json")
            .body(query.bytes().to_vec())
            .send()
            .await
            .map_err(|e| self.transport_error(miner, e))?;
        self.read_json(miner, response).await
    }

    async fn health(&self, miner: MinerId) -> Result<HealthReport, ValidatorError> {
        let url = self.url(miner, "health")?;
        trace!("Health check -> miner {} at {}", miner, url);

        let response = self.http_client.get(url).send().await.map_err(|e| self.transport_error(miner, e))?;
        self.read_json(miner, response).await
    }
}

/// Serves queries from an in-process fetch client, decoding the same bytes a remote miner would
/// receive. Used for direct reference resolution and local runs.
pub struct LocalMinerClient<R: ChainRpc> {
    fetcher: Arc<PoolFetcher<R>>,
}

impl<R: ChainRpc> LocalMinerClient<R> {
    pub fn new(fetcher: Arc<PoolFetcher<R>>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl<R: ChainRpc + 'static> MinerClient for LocalMinerClient<R> {
    async fn fetch(&self, _miner: MinerId, query: &EncodedQuery) -> Result<PoolRecord, ValidatorError> {
        let decoded: Query = serde_json::from_slice(query.bytes())
            .map_err(|e| ValidatorError::MalformedResponse(format!("undecodable query: {e}")))?;
        Ok(self.fetcher.fetch(&decoded).await?)
    }

    /// The chain head is as far as a live RPC client is synced.
    async fn health(&self, _miner: MinerId) -> Result<HealthReport, ValidatorError> {
        Ok(HealthReport::new(self.fetcher.completed_until().await?))
    }
}
