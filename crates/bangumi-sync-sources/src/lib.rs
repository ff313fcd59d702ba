pub mod backoff;
pub mod bangumi;
pub mod error;
pub mod factory;
pub mod fetcher;
pub mod traits;

pub use backoff::{backoff_delay, BackoffContext, FailureClass, RetryMachine, RetryPolicy, RetryState, Sleeper, TokioSleeper};
pub use bangumi::{BangumiClient, BangumiSettings};
pub use error::{FetchError, TransportError};
pub use factory::{BangumiSourceFactory, SourceFactory};
pub use fetcher::{FetchedPage, RateLimitedFetcher};
pub use traits::{CollectionSource, PageQuery, PageTransport, TransportResponse};
