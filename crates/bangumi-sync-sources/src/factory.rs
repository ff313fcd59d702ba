//! Builds one collection source per sync worker.
//!
//! Workers never share a source: each gets its own HTTP client and its own
//! backoff context, so throttling on one (category, status) pair does not
//! slow down the others.

use anyhow::Result;
use bangumi_sync_config::Config;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use crate::backoff::{BackoffContext, RetryPolicy, Sleeper, TokioSleeper};
use crate::bangumi::{BangumiClient, BangumiSettings};
use crate::fetcher::RateLimitedFetcher;
use crate::traits::CollectionSource;

pub trait SourceFactory: Send + Sync {
    fn source_name(&self) -> &str;

    /// Create a fresh source whose backoff sleeps end early once `stop` fires
    fn create_source(&self, stop: CancellationToken) -> Result<Box<dyn CollectionSource>>;
}

pub struct BangumiSourceFactory {
    settings: BangumiSettings,
    access_token: Option<String>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl BangumiSourceFactory {
    pub fn new(settings: BangumiSettings, access_token: Option<String>, policy: RetryPolicy) -> Self {
        Self {
            settings,
            access_token,
            policy,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn from_config(config: &Config, access_token: Option<String>) -> Self {
        Self::new(
            BangumiSettings::from(&config.bangumi),
            access_token,
            RetryPolicy::from(&config.retry),
        )
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

impl SourceFactory for BangumiSourceFactory {
    fn source_name(&self) -> &str {
        "bangumi"
    }

    fn create_source(&self, stop: CancellationToken) -> Result<Box<dyn CollectionSource>> {
        let client = BangumiClient::new(&self.settings, self.access_token.clone())?;
        let backoff = BackoffContext::new(self.policy.clone(), self.sleeper.clone());
        Ok(Box::new(RateLimitedFetcher::new(client, backoff, stop)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_builds_independent_sources() {
        let config = Config::new("sai");
        let factory = BangumiSourceFactory::from_config(&config, Some("token".into()));
        let stop = CancellationToken::new();
        let a = factory.create_source(stop.clone()).unwrap();
        let b = factory.create_source(stop).unwrap();
        assert_eq!(a.source_name(), "bangumi");
        assert_eq!(b.source_name(), "bangumi");
    }
}
