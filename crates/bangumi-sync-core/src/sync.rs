use bangumi_sync_config::Config;
use bangumi_sync_models::{AnalyticsRecord, ChangeSet, CollectionRecord, Scope, SyncCursor};
use bangumi_sync_sources::{FailureClass, FetchError, FetchedPage, RetryMachine, RetryPolicy, RetryState, Sleeper, SourceFactory, TokioSleeper};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use crate::flatten::flatten;
use crate::normalize::Normalizer;
use crate::publish::AnalyticsPublisher;
use crate::reconcile::{apply_to_index, reconcile};
use crate::store::{CollectionStore, PageCommit, StorageError};
use crate::summary::{PairStatus, PairSummary, RunOutcome, RunSummary};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub scopes: Vec<Scope>,
    pub page_size: u32,
    /// Pairs synced concurrently
    pub workers: usize,
    /// Ignore stored cursors and start every pair at offset 0
    pub full_resync: bool,
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            scopes: config.scopes()?,
            page_size: config.bangumi.page_size,
            workers: config.sync.workers,
            full_resync: config.sync.full_resync,
        })
    }
}

/// Why a pair stopped before reaching the end of its stream
enum PairStop {
    /// Unrecoverable for the whole run
    Fatal(String),
    /// Resumable from the stored cursor on the next run
    Incomplete(String),
    /// Another pair hit a fatal error
    Aborted,
}

const ABORTED_REASON: &str = "not completed: the run was aborted by a fatal error";
const CANCELLED_REASON: &str = "cancelled";

/// Drives every configured pair through fetch, normalize, reconcile and commit.
///
/// Pairs are independent: each owns its source, its cursor and its backoff
/// state. Only a fatal error reaches across pairs, by cancelling the run.
pub struct SyncOrchestrator {
    factory: Arc<dyn SourceFactory>,
    store: Arc<dyn CollectionStore>,
    publisher: Option<Arc<dyn AnalyticsPublisher>>,
    normalizer: Normalizer,
    options: SyncOptions,
    storage_policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl SyncOrchestrator {
    pub fn new(
        factory: Arc<dyn SourceFactory>,
        store: Arc<dyn CollectionStore>,
        user_id: impl Into<String>,
        options: SyncOptions,
    ) -> Self {
        Self {
            factory,
            store,
            publisher: None,
            normalizer: Normalizer::new(user_id),
            options,
            storage_policy: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn AnalyticsPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Policy for storage retries; only its storage budget and delays are used
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.storage_policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn set_full_resync(&mut self, full_resync: bool) {
        self.options.full_resync = full_resync;
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Run one sync cycle over every configured pair.
    ///
    /// Cancelling `stop` ends the run at the next suspension point; committed
    /// pages stay committed and their cursors stay valid.
    #[instrument(skip(self, stop), fields(user = %self.normalizer.user_id()))]
    pub async fn sync(&self, stop: CancellationToken) -> RunSummary {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut scopes = self.options.scopes.clone();
        scopes.sort();
        scopes.dedup();
        let workers = self.options.workers.max(1);

        info!(
            operation = "sync_start",
            source = self.factory.source_name(),
            pairs = scopes.len(),
            workers,
            full_resync = self.options.full_resync,
            "Starting collection sync"
        );

        // cancelled by the caller, or by the first fatal error
        let abort = stop.child_token();
        let mut reports: Vec<(PairSummary, Option<String>)> = stream::iter(scopes)
            .map(|scope| self.sync_pair(scope, &stop, &abort))
            .buffer_unordered(workers)
            .collect()
            .await;
        reports.sort_by_key(|(summary, _)| summary.scope);

        let fatal = reports.iter().find_map(|(_, fatal)| fatal.clone());
        let pairs: Vec<PairSummary> = reports.into_iter().map(|(summary, _)| summary).collect();
        let outcome = if let Some(reason) = fatal {
            RunOutcome::Aborted { reason }
        } else if stop.is_cancelled() {
            RunOutcome::Cancelled
        } else if pairs.iter().all(|p| p.status == PairStatus::Complete) {
            RunOutcome::Completed
        } else {
            RunOutcome::Partial
        };

        let summary = RunSummary::new(started_at, start.elapsed(), outcome, pairs);
        info!(
            operation = "sync_complete",
            outcome = ?summary.outcome,
            inserted = summary.inserted(),
            updated = summary.updated(),
            skipped = summary.skipped(),
            rejected = summary.rejected(),
            errors = summary.error_count,
            duration_ms = summary.elapsed_ms,
            "Collection sync finished"
        );
        summary
    }

    async fn sync_pair(
        &self,
        scope: Scope,
        stop: &CancellationToken,
        abort: &CancellationToken,
    ) -> (PairSummary, Option<String>) {
        let started = Instant::now();
        let mut summary = PairSummary::new(scope);
        let mut fatal = None;

        match self.run_pair(scope, stop, abort, &mut summary).await {
            Ok(()) => summary.status = PairStatus::Complete,
            Err(PairStop::Incomplete(reason)) => {
                warn!(operation = "pair_incomplete", scope = %scope, offset = summary.cursor_offset, reason = %reason, "Pair stopped early, will resume from its cursor");
                summary.status = PairStatus::Partial;
                summary.failure = Some(reason);
            }
            Err(PairStop::Fatal(reason)) => {
                error!(operation = "pair_failed", scope = %scope, reason = %reason, "Fatal error, aborting run");
                abort.cancel();
                summary.status = PairStatus::Failed;
                summary.failure = Some(reason.clone());
                fatal = Some(format!("{}: {}", scope, reason));
            }
            Err(PairStop::Aborted) => {
                summary.status = PairStatus::Failed;
                summary.failure = Some(ABORTED_REASON.to_string());
            }
        }

        summary.set_elapsed(started.elapsed());
        info!(
            operation = "pair_complete",
            scope = %scope,
            status = ?summary.status,
            pages = summary.pages_fetched,
            inserted = summary.inserted,
            updated = summary.updated,
            skipped = summary.skipped,
            rejected = summary.rejected,
            cursor = summary.cursor_offset,
            total = ?summary.total,
            duration_ms = summary.elapsed_ms,
            "Finished pair"
        );
        (summary, fatal)
    }

    async fn run_pair(
        &self,
        scope: Scope,
        stop: &CancellationToken,
        abort: &CancellationToken,
        summary: &mut PairSummary,
    ) -> Result<(), PairStop> {
        check_interrupt(stop, abort)?;
        let mut source = self.factory.create_source(abort.clone()).map_err(|e| {
            PairStop::Fatal(format!("could not create {} source: {:#}", self.factory.source_name(), e))
        })?;

        let mut index = self
            .with_storage_retry(scope, "load stored records", stop, abort, || self.store.load_existing_index(scope))
            .await?;
        let stored_cursor = self
            .with_storage_retry(scope, "load cursor", stop, abort, || self.store.load_cursor(scope))
            .await?;
        let mut cursor = stored_cursor.unwrap_or_else(|| SyncCursor::start(scope, Utc::now()));
        let mut offset = cursor.resume_offset(self.options.full_resync);
        summary.start_offset = offset;
        summary.cursor_offset = offset;
        if offset > 0 {
            info!(operation = "pair_resume", scope = %scope, offset, "Resuming unfinished pair");
        } else {
            debug!(operation = "pair_start", scope = %scope, known = index.len(), "Starting pair from the beginning");
        }

        loop {
            check_interrupt(stop, abort)?;
            let page = source
                .fetch_page(scope, offset, self.options.page_size)
                .await
                .map_err(|e| fetch_stop(e, stop))?;
            summary.pages_fetched += 1;
            if page.total.is_some() {
                summary.total = page.total;
            }

            let batch = self.prepare_page(&page, summary);
            let changes = reconcile(batch, &index);
            let complete = !page.has_more;
            let commit = PageCommit {
                cursor: cursor.advanced(page.next_offset(), complete, Utc::now()),
                total: page.total,
            };
            self.with_storage_retry(scope, "commit page", stop, abort, || {
                self.store.apply_changeset(scope, &changes, &commit)
            })
            .await?;

            apply_to_index(&mut index, &changes);
            cursor = commit.cursor;
            summary.inserted += changes.inserts.len();
            summary.updated += changes.updates.len();
            summary.skipped += changes.skipped.len();
            summary.duplicates += changes.duplicates;
            summary.cursor_offset = cursor.offset;

            info!(
                operation = "page_committed",
                scope = %scope,
                offset = page.offset,
                records = page.records.len(),
                inserted = changes.inserts.len(),
                updated = changes.updates.len(),
                skipped = changes.skipped.len(),
                progress = cursor.offset,
                total = ?page.total,
                "Committed page"
            );
            self.publish(scope, &changes, summary).await;

            if complete {
                return Ok(());
            }
            offset = cursor.offset;
        }
    }

    /// Normalize and flatten a page; rejected records are counted and dropped
    fn prepare_page(&self, page: &FetchedPage, summary: &mut PairSummary) -> Vec<(CollectionRecord, AnalyticsRecord)> {
        let mut batch = Vec::with_capacity(page.records.len());
        for (position, raw) in page.records.iter().enumerate() {
            let record_offset = page.offset as usize + position;
            match self.normalizer.normalize(raw) {
                Ok(normalized) => {
                    for warning in &normalized.warnings {
                        debug!(scope = %page.scope, offset = record_offset, field = warning.field, "{}", warning.message);
                    }
                    summary.warnings += normalized.warnings.len();
                    if normalized.record.scope() != page.scope {
                        warn!(
                            scope = %page.scope,
                            offset = record_offset,
                            record_scope = %normalized.record.scope(),
                            "Record reports a different category or status than the page it came from"
                        );
                    }
                    let analytics = flatten(&normalized.record);
                    batch.push((normalized.record, analytics));
                }
                Err(e) => {
                    warn!(operation = "record_rejected", scope = %page.scope, offset = record_offset, error = %e, "Rejected collection record");
                    summary.rejected += 1;
                    summary.rejections.push(format!("offset {}: {}", record_offset, e));
                }
            }
        }
        batch
    }

    async fn publish(&self, scope: Scope, changes: &ChangeSet, summary: &mut PairSummary) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        if !changes.has_writes() {
            return;
        }
        let rows: Vec<AnalyticsRecord> = changes.writes().map(|staged| staged.analytics.clone()).collect();
        if let Err(e) = publisher.publish(scope, &rows).await {
            warn!(operation = "publish", publisher = publisher.name(), scope = %scope, error = %e, "Failed to publish analytics rows");
            summary.publish_failures.push(e.to_string());
        }
    }

    /// Run a storage operation under the storage retry budget. Both the call
    /// and the backoff sleep end early when the run is cancelled.
    async fn with_storage_retry<T, F, Fut>(
        &self,
        scope: Scope,
        step: &'static str,
        stop: &CancellationToken,
        abort: &CancellationToken,
        mut op: F,
    ) -> Result<T, PairStop>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let mut machine = RetryMachine::new(self.storage_policy.clone());
        loop {
            let result = tokio::select! {
                biased;
                _ = abort.cancelled() => return Err(interrupt_reason(stop)),
                result = op() => result,
            };
            let error = match result {
                Ok(value) => {
                    machine.succeed();
                    return Ok(value);
                }
                Err(e) => e,
            };

            match machine.fail(FailureClass::Storage).clone() {
                RetryState::Backoff { retry, delay, .. } => {
                    warn!(
                        operation = "storage_retry",
                        scope = %scope,
                        step,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Storage operation failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = abort.cancelled() => return Err(interrupt_reason(stop)),
                        _ = self.sleeper.sleep(delay) => {}
                    }
                    machine.resume();
                }
                RetryState::Exhausted { retries, .. } => {
                    return Err(PairStop::Incomplete(format!("{} failed after {} retries: {}", step, retries, error)));
                }
                _ => return Err(PairStop::Incomplete(format!("{} failed: {}", step, error))),
            }
        }
    }
}

fn interrupt_reason(stop: &CancellationToken) -> PairStop {
    if stop.is_cancelled() {
        PairStop::Incomplete(CANCELLED_REASON.to_string())
    } else {
        PairStop::Aborted
    }
}

fn check_interrupt(stop: &CancellationToken, abort: &CancellationToken) -> Result<(), PairStop> {
    if abort.is_cancelled() {
        Err(interrupt_reason(stop))
    } else {
        Ok(())
    }
}

fn fetch_stop(error: FetchError, stop: &CancellationToken) -> PairStop {
    match error {
        FetchError::Cancelled { .. } => interrupt_reason(stop),
        e if e.is_fatal() => PairStop::Fatal(e.to_string()),
        e => PairStop::Incomplete(e.to_string()),
    }
}
