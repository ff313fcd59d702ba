//! Hand-off of changed analytics rows to downstream consumers.

use async_trait::async_trait;
use bangumi_sync_models::{AnalyticsRecord, Scope};
use chrono::Utc;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
#[error("{publisher} could not publish {count} rows for {scope}: {reason}")]
pub struct PublishError {
    pub publisher: String,
    pub scope: Scope,
    pub count: usize,
    pub reason: String,
}

/// Receives the inserted and updated analytics rows of every committed page.
/// A failure here never rolls back the commit.
#[async_trait]
pub trait AnalyticsPublisher: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, scope: Scope, rows: &[AnalyticsRecord]) -> Result<(), PublishError>;
}

/// Appends rows as JSON lines to `dir/analytics-YYYYMMDD.jsonl`
pub struct JsonlOutbox {
    dir: PathBuf,
}

impl JsonlOutbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn current_file(&self) -> PathBuf {
        self.dir.join(format!("analytics-{}.jsonl", Utc::now().format("%Y%m%d")))
    }

    fn error(&self, scope: Scope, count: usize, reason: impl ToString) -> PublishError {
        PublishError {
            publisher: self.name().to_string(),
            scope,
            count,
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl AnalyticsPublisher for JsonlOutbox {
    fn name(&self) -> &str {
        "jsonl-outbox"
    }

    async fn publish(&self, scope: Scope, rows: &[AnalyticsRecord]) -> Result<(), PublishError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut buffer = Vec::new();
        for row in rows {
            serde_json::to_writer(&mut buffer, row).map_err(|e| self.error(scope, rows.len(), e))?;
            buffer.push(b'\n');
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| self.error(scope, rows.len(), e))?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_file())
            .await
            .map_err(|e| self.error(scope, rows.len(), e))?;
        file.write_all(&buffer).await.map_err(|e| self.error(scope, rows.len(), e))?;
        file.flush().await.map_err(|e| self.error(scope, rows.len(), e))?;
        Ok(())
    }
}
