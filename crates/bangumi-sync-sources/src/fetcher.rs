use async_trait::async_trait;
use bangumi_sync_config::MAX_PAGE_SIZE;
use bangumi_sync_models::Scope;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::backoff::{BackoffContext, FailureClass, RetryState};
use crate::bangumi::api::{describe_error_body, PageBody};
use crate::error::{FetchError, TransportError};
use crate::traits::{CollectionSource, PageQuery, PageTransport, TransportResponse};

/// One page of raw collection records
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub scope: Scope,
    pub offset: u32,
    pub limit: u32,
    pub records: Vec<Value>,
    /// Total reported by the API for the whole scope, when present
    pub total: Option<u32>,
    pub has_more: bool,
}

impl FetchedPage {
    pub fn new(scope: Scope, offset: u32, limit: u32, records: Vec<Value>, total: Option<u32>) -> Self {
        let has_more = records.len() >= limit as usize && limit > 0;
        Self { scope, offset, limit, records, total, has_more }
    }

    /// Offset of the page that follows this one
    pub fn next_offset(&self) -> u32 {
        self.offset.saturating_add(self.records.len() as u32)
    }
}

enum Attempt {
    Page(PageBody),
    RateLimited,
    Transient(String),
    Fatal { status: Option<u16>, reason: String },
}

fn classify(response: TransportResponse) -> Attempt {
    match response.status {
        200..=299 => match serde_json::from_str::<PageBody>(&response.body) {
            Ok(body) => Attempt::Page(body),
            Err(e) => Attempt::Transient(format!("undecodable page body: {}", e)),
        },
        429 => Attempt::RateLimited,
        500..=599 => Attempt::Transient(format!("HTTP {}", response.status)),
        status => Attempt::Fatal {
            status: Some(status),
            reason: describe_error_body(status, &response.body),
        },
    }
}

/// Fetches pages through a [`PageTransport`], retrying throttled and transient
/// failures according to its own [`BackoffContext`].
pub struct RateLimitedFetcher<T: PageTransport> {
    transport: T,
    backoff: BackoffContext,
    stop: CancellationToken,
}

impl<T: PageTransport> RateLimitedFetcher<T> {
    pub fn new(transport: T, backoff: BackoffContext, stop: CancellationToken) -> Self {
        Self { transport, backoff, stop }
    }

    pub fn backoff(&self) -> &BackoffContext {
        &self.backoff
    }

    pub async fn fetch_page(&mut self, scope: Scope, offset: u32, limit: u32) -> Result<FetchedPage, FetchError> {
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(FetchError::Fatal {
                scope,
                offset,
                status: None,
                reason: format!("page limit must be between 1 and {}, got {}", MAX_PAGE_SIZE, limit),
            });
        }

        let query = PageQuery { scope, offset, limit };
        let mut machine = self.backoff.machine();

        loop {
            if self.stop.is_cancelled() {
                return Err(FetchError::Cancelled { scope, offset });
            }

            let attempt = match self.transport.get_collections(&query).await {
                Ok(response) => classify(response),
                Err(TransportError::Timeout(reason)) => Attempt::Transient(format!("timeout: {}", reason)),
                Err(TransportError::Connection(reason)) => Attempt::Transient(format!("connection: {}", reason)),
                Err(TransportError::InvalidRequest(reason)) => Attempt::Fatal { status: None, reason },
            };

            let (class, reason) = match attempt {
                Attempt::Page(body) => {
                    machine.succeed();
                    let page = FetchedPage::new(scope, offset, limit, body.data, body.total);
                    debug!(
                        operation = "fetch_page",
                        scope = %scope,
                        offset = offset,
                        count = page.records.len(),
                        total = ?page.total,
                        attempts = machine.attempts(),
                        "Fetched page"
                    );
                    return Ok(page);
                }
                Attempt::Fatal { status, reason } => {
                    return Err(FetchError::Fatal { scope, offset, status, reason });
                }
                Attempt::RateLimited => (FailureClass::RateLimited, "HTTP 429".to_string()),
                Attempt::Transient(reason) => (FailureClass::Transient, reason),
            };

            match machine.fail(class).clone() {
                RetryState::Backoff { class, retry, delay } => {
                    warn!(
                        operation = "fetch_backoff",
                        scope = %scope,
                        offset = offset,
                        retry = retry,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Backing off before retrying page"
                    );
                    self.backoff.record_backoff(class, delay);
                    tokio::select! {
                        _ = self.stop.cancelled() => {
                            info!(operation = "fetch_cancelled", scope = %scope, offset = offset, "Stop requested during backoff");
                            return Err(FetchError::Cancelled { scope, offset });
                        }
                        _ = self.backoff.sleeper().sleep(delay) => {}
                    }
                    machine.resume();
                }
                RetryState::Exhausted { class: FailureClass::RateLimited, retries } => {
                    return Err(FetchError::RateLimitExceeded { scope, offset, retries });
                }
                RetryState::Exhausted { retries, .. } => {
                    return Err(FetchError::Transient { scope, offset, retries, reason });
                }
                RetryState::Attempting { .. } | RetryState::Succeeded => {}
            }
        }
    }
}

#[async_trait]
impl<T: PageTransport> CollectionSource for RateLimitedFetcher<T> {
    fn source_name(&self) -> &str {
        "bangumi"
    }

    async fn fetch_page(&mut self, scope: Scope, offset: u32, limit: u32) -> Result<FetchedPage, FetchError> {
        RateLimitedFetcher::fetch_page(self, scope, offset, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::{RetryPolicy, Sleeper};
    use bangumi_sync_models::{CollectionType, SubjectType};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn scope() -> Scope {
        Scope::new(SubjectType::Anime, CollectionType::Done)
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(1000),
            rate_limit_retries: 3,
            transient_retries: 2,
            storage_retries: 1,
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    /// Replays canned responses in order and records every query
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
        queries: Arc<Mutex<Vec<PageQuery>>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<TransportResponse, TransportError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                queries: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl PageTransport for ScriptedTransport {
        async fn get_collections(&self, query: &PageQuery) -> Result<TransportResponse, TransportError> {
            self.queries.lock().unwrap().push(*query);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::InvalidRequest("script exhausted".into())))
        }
    }

    /// Serves `total` synthetic records by offset and limit
    struct CatalogTransport {
        total: u32,
    }

    #[async_trait]
    impl PageTransport for CatalogTransport {
        async fn get_collections(&self, query: &PageQuery) -> Result<TransportResponse, TransportError> {
            let end = (query.offset + query.limit).min(self.total);
            let data: Vec<Value> = (query.offset..end).map(|i| json!({ "subject_id": i + 1 })).collect();
            let body = json!({ "data": data, "total": self.total, "limit": query.limit, "offset": query.offset });
            Ok(TransportResponse { status: 200, body: body.to_string() })
        }
    }

    fn status(code: u16) -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse { status: code, body: String::new() })
    }

    fn page_body(count: u32) -> Result<TransportResponse, TransportError> {
        let data: Vec<Value> = (0..count).map(|i| json!({ "subject_id": i })).collect();
        Ok(TransportResponse { status: 200, body: json!({ "data": data, "total": count }).to_string() })
    }

    fn fetcher<T: PageTransport>(transport: T, sleeper: Arc<RecordingSleeper>) -> RateLimitedFetcher<T> {
        RateLimitedFetcher::new(transport, BackoffContext::new(policy(), sleeper), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_paginates_250_records_in_three_pages() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let mut fetcher = fetcher(CatalogTransport { total: 250 }, sleeper);

        let mut offset = 0;
        let mut offsets = vec![offset];
        let mut sizes = Vec::new();
        let mut flags = Vec::new();
        loop {
            let page = fetcher.fetch_page(scope(), offset, 100).await.unwrap();
            sizes.push(page.records.len());
            flags.push(page.has_more);
            offset = page.next_offset();
            if !page.has_more {
                break;
            }
            offsets.push(offset);
        }

        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(flags, vec![true, true, false]);
        assert_eq!(offsets, vec![0, 100, 200]);
        assert_eq!(offset, 250);
    }

    #[tokio::test]
    async fn test_empty_page_ends_stream() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let mut fetcher = fetcher(CatalogTransport { total: 0 }, sleeper);
        let page = fetcher.fetch_page(scope(), 0, 100).await.unwrap();
        assert!(page.records.is_empty());
        assert!(!page.has_more);
        assert_eq!(page.total, Some(0));
    }

    #[tokio::test]
    async fn test_rate_limit_exhausts_after_exact_budget() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let transport = ScriptedTransport::new((0..10).map(|_| status(429)).collect());
        let queries = transport.queries.clone();
        let mut fetcher = fetcher(transport, sleeper.clone());

        let err = fetcher.fetch_page(scope(), 300, 100).await.unwrap_err();
        match err {
            FetchError::RateLimitExceeded { offset, retries, .. } => {
                assert_eq!(offset, 300);
                assert_eq!(retries, 3);
            }
            other => panic!("unexpected error {:?}", other),
        }
        // one initial attempt plus one per retry
        assert_eq!(queries.lock().unwrap().len(), 4);
        let slept: Vec<u128> = sleeper.slept.lock().unwrap().iter().map(|d| d.as_millis()).collect();
        assert_eq!(slept, vec![10, 20, 40]);
        assert_eq!(fetcher.backoff().stats().throttled, 3);
    }

    #[tokio::test]
    async fn test_rate_limit_then_success_retries_same_page() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let transport = ScriptedTransport::new(vec![status(429), status(429), page_body(100)]);
        let queries = transport.queries.clone();
        let mut fetcher = fetcher(transport, sleeper.clone());

        let page = fetcher.fetch_page(scope(), 100, 100).await.unwrap();
        assert!(page.has_more);
        assert!(queries.lock().unwrap().iter().all(|q| q.offset == 100));
        assert_eq!(sleeper.slept.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_transient_failures_use_separate_budget() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Timeout("read".into())),
            status(503),
            Err(TransportError::Connection("reset".into())),
        ]);
        let mut fetcher = fetcher(transport, sleeper.clone());

        let err = fetcher.fetch_page(scope(), 0, 100).await.unwrap_err();
        match err {
            FetchError::Transient { retries, reason, .. } => {
                assert_eq!(retries, 2);
                assert!(reason.contains("reset"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        let slept: Vec<u128> = sleeper.slept.lock().unwrap().iter().map(|d| d.as_millis()).collect();
        assert_eq!(slept, vec![10, 20]);
    }

    #[tokio::test]
    async fn test_undecodable_body_is_transient() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let transport = ScriptedTransport::new(vec![
            Ok(TransportResponse { status: 200, body: "<html>".into() }),
            page_body(3),
        ]);
        let mut fetcher = fetcher(transport, sleeper);
        let page = fetcher.fetch_page(scope(), 0, 100).await.unwrap();
        assert_eq!(page.records.len(), 3);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_auth_rejection_is_fatal_without_retry() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let transport = ScriptedTransport::new(vec![
            Ok(TransportResponse { status: 401, body: r#"{"title":"Unauthorized","description":"bad token"}"#.into() }),
            page_body(1),
        ]);
        let queries = transport.queries.clone();
        let mut fetcher = fetcher(transport, sleeper.clone());

        let err = fetcher.fetch_page(scope(), 0, 100).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("bad token"));
        assert_eq!(queries.lock().unwrap().len(), 1);
        assert!(sleeper.slept.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_limit_is_rejected_before_request() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let transport = ScriptedTransport::new(vec![page_body(1)]);
        let queries = transport.queries.clone();
        let mut fetcher = fetcher(transport, sleeper);

        let err = fetcher.fetch_page(scope(), 0, 101).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(queries.lock().unwrap().is_empty());
    }

    struct CancellingSleeper {
        stop: CancellationToken,
    }

    #[async_trait]
    impl Sleeper for CancellingSleeper {
        async fn sleep(&self, _duration: Duration) {
            self.stop.cancel();
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }

    #[tokio::test]
    async fn test_stop_signal_interrupts_backoff() {
        let stop = CancellationToken::new();
        let sleeper = Arc::new(CancellingSleeper { stop: stop.clone() });
        let transport = ScriptedTransport::new(vec![status(429), page_body(1)]);
        let queries = transport.queries.clone();
        let mut fetcher = RateLimitedFetcher::new(transport, BackoffContext::new(policy(), sleeper), stop);

        let err = fetcher.fetch_page(scope(), 200, 100).await.unwrap_err();
        assert!(matches!(err, FetchError::Cancelled { offset: 200, .. }));
        assert_eq!(queries.lock().unwrap().len(), 1);
    }
}
