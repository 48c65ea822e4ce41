use crate::logic::types::{MinerId, MinerResponse, PoolRecord, QueryId, ResponseOutcome, ScoreRecord, unix_now_millis};
use async_trait::async_trait;
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Raw miner answer as stored, keyed by query id, miner id and receive time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedResponse {
    pub query_id: QueryId,
    pub miner_id: MinerId,
    pub received_at: u64,
    pub latency_ms: u64,
    pub outcome: ResponseOutcome,
    pub payload: Option<PoolRecord>,
}

impl From<&MinerResponse> for ArchivedResponse {
    fn from(response: &MinerResponse) -> Self {
        Self {
            query_id: response.query_id,
            miner_id: response.miner_id,
            received_at: response.received_at,
            latency_ms: response.latency_ms,
            outcome: response.outcome,
            payload: response.payload.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedScore {
    pub archived_at: u64,
    #[serde(flatten)]
    pub score: ScoreRecord,
}

/// Write-only sink for round data. Callers log failures and carry on.
#[async_trait]
pub trait RoundArchive: Send + Sync {
    async fn archive_responses(&self, responses: &[MinerResponse]) -> Result<()>;

    async fn archive_scores(&self, scores: &[ScoreRecord]) -> Result<()>;
}

/// Appends JSON lines to `records.jsonl` and `scores.jsonl` in a directory.
pub struct JsonlArchive {
    records_file: PathBuf,
    scores_file: PathBuf,
    // overlapping rounds must not interleave partial lines
    write_lock: Mutex<()>,
}

impl JsonlArchive {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| eyre::eyre!("Failed to create archive dir {}: {}", dir.display(), e))?;
        info!("Archiving rounds to {}", dir.display());

        Ok(Self {
            records_file: dir.join("records.jsonl"),
            scores_file: dir.join("scores.jsonl"),
            write_lock: Mutex::new(()),
        })
    }

    pub fn records_file(&self) -> &Path {
        &self.records_file
    }

    pub fn scores_file(&self) -> &Path {
        &self.scores_file
    }

    async fn append<T: Serialize>(&self, path: &Path, items: impl Iterator<Item = T>) -> Result<usize> {
        let mut buffer = Vec::new();
        let mut count = 0;
        for item in items {
            serde_json::to_writer(&mut buffer, &item)?;
            buffer.push(b'\n');
            count += 1;
        }
        if count == 0 {
            return Ok(0);
        }

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
        file.write_all(&buffer).await?;
        file.flush().await?;
        Ok(count)
    }
}

#[async_trait]
impl RoundArchive for JsonlArchive {
    async fn archive_responses(&self, responses: &[MinerResponse]) -> Result<()> {
        let written = self.append(&self.records_file, responses.iter().map(ArchivedResponse::from)).await?;
        debug!("Archived {} miner responses", written);
        Ok(())
    }

    async fn archive_scores(&self, scores: &[ScoreRecord]) -> Result<()> {
        let archived_at = unix_now_millis();
        let written = self
            .append(&self.scores_file, scores.iter().map(|score| ArchivedScore { archived_at, score: *score }))
            .await?;
        debug!("Archived {} score records", written);
        Ok(())
    }
}

/// In-memory archive for tests and demos.
#[derive(Default)]
pub struct MemoryArchive {
    responses: Mutex<Vec<ArchivedResponse>>,
    scores: Mutex<Vec<ScoreRecord>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn responses(&self) -> Vec<ArchivedResponse> {
        self.responses.lock().await.clone()
    }

    pub async fn scores(&self) -> Vec<ScoreRecord> {
        self.scores.lock().await.clone()
    }
}

#[async_trait]
impl RoundArchive for MemoryArchive {
    async fn archive_responses(&self, responses: &[MinerResponse]) -> Result<()> {
        self.responses.lock().await.extend(responses.iter().map(ArchivedResponse::from));
        Ok(())
    }

    async fn archive_scores(&self, scores: &[ScoreRecord]) -> Result<()> {
        self.scores.lock().await.extend_from_slice(scores);
        Ok(())
    }
}
