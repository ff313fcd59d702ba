use bangumi_sync_models::Scope;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PairStatus {
    /// The stream was read to its end and every page committed
    Complete,
    /// Stopped early on retry exhaustion, storage failure or cancellation. The cursor marks the resume point.
    Partial,
    /// Stopped by a fatal error, or never started because another pair hit one
    Failed,
}

/// Outcome of syncing a single (category, status) pair
#[derive(Debug, Clone, Serialize)]
pub struct PairSummary {
    pub scope: Scope,
    pub status: PairStatus,
    pub pages_fetched: u32,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub rejected: usize,
    /// Coercions and clamps applied to accepted records
    pub warnings: usize,
    pub duplicates: usize,
    pub start_offset: u32,
    /// Offset the cursor was left at
    pub cursor_offset: u32,
    /// Collection size reported by the API
    pub total: Option<u32>,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejections: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub publish_failures: Vec<String>,
}

impl PairSummary {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            status: PairStatus::Partial,
            pages_fetched: 0,
            inserted: 0,
            updated: 0,
            skipped: 0,
            rejected: 0,
            warnings: 0,
            duplicates: 0,
            start_offset: 0,
            cursor_offset: 0,
            total: None,
            elapsed_ms: 0,
            failure: None,
            rejections: Vec::new(),
            publish_failures: Vec::new(),
        }
    }

    pub fn fetched(&self) -> usize {
        self.inserted + self.updated + self.skipped
    }

    /// Share of the reported total covered by the cursor, in percent
    pub fn completion(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(100.0),
            Some(total) => Some((self.cursor_offset.min(total) as f64 / total as f64) * 100.0),
            None => None,
        }
    }

    pub(crate) fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed_ms = elapsed.as_millis().min(u64::MAX as u128) as u64;
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    /// At least one pair stopped early; others may have completed
    Partial,
    /// A fatal error stopped the run
    Aborted { reason: String },
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub outcome: RunOutcome,
    /// One entry per pair, in scope order
    pub pairs: Vec<PairSummary>,
    /// Rejected records, pair failures and publish failures
    pub error_count: usize,
    pub failures: Vec<String>,
}

impl RunSummary {
    pub fn new(started_at: DateTime<Utc>, elapsed: Duration, outcome: RunOutcome, mut pairs: Vec<PairSummary>) -> Self {
        pairs.sort_by_key(|p| p.scope);
        let mut failures = Vec::new();
        for pair in &pairs {
            if let Some(failure) = &pair.failure {
                failures.push(format!("{}: {}", pair.scope, failure));
            }
            for rejection in &pair.rejections {
                failures.push(format!("{}: rejected record at {}", pair.scope, rejection));
            }
            for publish in &pair.publish_failures {
                failures.push(format!("{}: {}", pair.scope, publish));
            }
        }
        Self {
            started_at,
            elapsed_ms: elapsed.as_millis().min(u64::MAX as u128) as u64,
            outcome,
            pairs,
            error_count: failures.len(),
            failures,
        }
    }

    pub fn inserted(&self) -> usize {
        self.pairs.iter().map(|p| p.inserted).sum()
    }

    pub fn updated(&self) -> usize {
        self.pairs.iter().map(|p| p.updated).sum()
    }

    pub fn skipped(&self) -> usize {
        self.pairs.iter().map(|p| p.skipped).sum()
    }

    pub fn rejected(&self) -> usize {
        self.pairs.iter().map(|p| p.rejected).sum()
    }

    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bangumi_sync_models::{CollectionType, SubjectType};

    #[test]
    fn test_summary_orders_pairs_and_collects_failures() {
        let late = Scope::new(SubjectType::Music, CollectionType::Wish);
        let early = Scope::new(SubjectType::Book, CollectionType::Done);
        let mut failed = PairSummary::new(late);
        failed.failure = Some("rate limited".into());
        let mut ok = PairSummary::new(early);
        ok.status = PairStatus::Complete;
        ok.inserted = 3;
        ok.rejected = 1;
        ok.rejections.push("offset 2: field `subject_id` is missing".into());

        let summary = RunSummary::new(Utc::now(), Duration::from_millis(5), RunOutcome::Partial, vec![failed, ok]);
        assert_eq!(summary.pairs[0].scope, early);
        assert_eq!(summary.error_count, 2);
        assert_eq!(summary.failures[0], "book/done: rejected record at offset 2: field `subject_id` is missing");
        assert_eq!(summary.failures[1], "music/wish: rate limited");
        assert_eq!(summary.inserted(), 3);
        assert!(!summary.is_success());
    }

    #[test]
    fn test_completion() {
        let mut pair = PairSummary::new(Scope::new(SubjectType::Anime, CollectionType::Done));
        assert_eq!(pair.completion(), None);
        pair.total = Some(250);
        pair.cursor_offset = 100;
        assert_eq!(pair.completion(), Some(40.0));
        pair.total = Some(0);
        assert_eq!(pair.completion(), Some(100.0));
    }
}
