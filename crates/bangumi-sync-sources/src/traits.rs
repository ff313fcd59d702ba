use async_trait::async_trait;
use bangumi_sync_models::Scope;
use crate::error::{FetchError, TransportError};
use crate::fetcher::FetchedPage;

/// One request against the collections endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    pub scope: Scope,
    pub offset: u32,
    pub limit: u32,
}

/// Status and body of a completed HTTP exchange
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Low-level access to the collections endpoint, one attempt per call.
///
/// Retries, backoff and status classification live in the fetcher; a
/// transport only reports what happened on the wire.
#[async_trait]
pub trait PageTransport: Send + Sync {
    async fn get_collections(&self, query: &PageQuery) -> Result<TransportResponse, TransportError>;
}

/// A paginated stream of collection records for one user
#[async_trait]
pub trait CollectionSource: Send {
    fn source_name(&self) -> &str;

    /// Fetch the page starting at `offset`. `has_more` on the result is true
    /// while the page is full-sized.
    async fn fetch_page(&mut self, scope: Scope, offset: u32, limit: u32) -> Result<FetchedPage, FetchError>;
}
