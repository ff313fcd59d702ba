//! Retry policy and backoff bookkeeping for paginated fetches.
//!
//! The retry loop is modelled as a small state machine
//! (`Attempting -> Backoff -> Attempting ... -> Succeeded | Exhausted`) driven by
//! [`RetryMachine`]. Delays come from the pure [`backoff_delay`] function and are
//! slept through an injected [`Sleeper`], so tests never wait on real timers.

use async_trait::async_trait;
use bangumi_sync_config::RetryConfig;
use std::time::Duration;

/// Retry budgets and delay bounds shared by fetch and storage retries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub rate_limit_retries: u32,
    pub transient_retries: u32,
    pub storage_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            rate_limit_retries: config.rate_limit_retries,
            transient_retries: config.transient_retries,
            storage_retries: config.storage_retries,
        }
    }
}

impl RetryPolicy {
    pub fn budget(&self, class: FailureClass) -> u32 {
        match class {
            FailureClass::RateLimited => self.rate_limit_retries,
            FailureClass::Transient => self.transient_retries,
            FailureClass::Storage => self.storage_retries,
        }
    }

    pub fn delay(&self, retry_index: u32) -> Duration {
        backoff_delay(self.base_delay, self.max_delay, retry_index)
    }
}

/// Delay before retry number `retry_index` (0-based): `base * 2^retry_index`, capped at `max`
pub fn backoff_delay(base: Duration, max: Duration, retry_index: u32) -> Duration {
    let factor = 2u32.checked_pow(retry_index).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

/// Failure categories with independent retry budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    RateLimited,
    Transient,
    Storage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryState {
    Attempting { attempt: u32 },
    Backoff { class: FailureClass, retry: u32, delay: Duration },
    Succeeded,
    Exhausted { class: FailureClass, retries: u32 },
}

/// Tracks one operation (one page fetch or one page commit) through its retries
#[derive(Debug, Clone)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: RetryState,
    attempts: u32,
    rate_limited: u32,
    transient: u32,
    storage: u32,
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Attempting { attempt: 1 },
            attempts: 1,
            rate_limited: 0,
            transient: 0,
            storage: 0,
        }
    }

    pub fn state(&self) -> &RetryState {
        &self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retries(&self, class: FailureClass) -> u32 {
        match class {
            FailureClass::RateLimited => self.rate_limited,
            FailureClass::Transient => self.transient,
            FailureClass::Storage => self.storage,
        }
    }

    pub fn succeed(&mut self) -> &RetryState {
        self.state = RetryState::Succeeded;
        &self.state
    }

    /// Record a failed attempt and decide between backing off and giving up
    pub fn fail(&mut self, class: FailureClass) -> &RetryState {
        let budget = self.policy.budget(class);
        let used = match class {
            FailureClass::RateLimited => &mut self.rate_limited,
            FailureClass::Transient => &mut self.transient,
            FailureClass::Storage => &mut self.storage,
        };
        self.state = if *used >= budget {
            RetryState::Exhausted { class, retries: *used }
        } else {
            let delay = self.policy.delay(*used);
            *used += 1;
            RetryState::Backoff { class, retry: *used, delay }
        };
        &self.state
    }

    /// Leave the backoff state once the delay has elapsed
    pub fn resume(&mut self) -> &RetryState {
        if matches!(self.state, RetryState::Backoff { .. }) {
            self.attempts += 1;
            self.state = RetryState::Attempting { attempt: self.attempts };
        }
        &self.state
    }
}

/// Clock abstraction for backoff sleeps
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackoffStats {
    pub throttled: u32,
    pub transient_failures: u32,
    pub total_backoff: Duration,
}

/// Backoff state owned by a single worker.
///
/// Each worker builds its own context so throttling on one scope never delays
/// fetches running for another.
pub struct BackoffContext {
    policy: RetryPolicy,
    sleeper: std::sync::Arc<dyn Sleeper>,
    stats: BackoffStats,
}

impl BackoffContext {
    pub fn new(policy: RetryPolicy, sleeper: std::sync::Arc<dyn Sleeper>) -> Self {
        Self { policy, sleeper, stats: BackoffStats::default() }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn sleeper(&self) -> &dyn Sleeper {
        self.sleeper.as_ref()
    }

    pub fn stats(&self) -> &BackoffStats {
        &self.stats
    }

    pub fn machine(&self) -> RetryMachine {
        RetryMachine::new(self.policy.clone())
    }

    pub(crate) fn record_backoff(&mut self, class: FailureClass, delay: Duration) {
        match class {
            FailureClass::RateLimited => self.stats.throttled += 1,
            FailureClass::Transient => self.stats.transient_failures += 1,
            FailureClass::Storage => {}
        }
        self.stats.total_backoff += delay;
    }
}
