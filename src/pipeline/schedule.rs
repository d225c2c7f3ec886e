//! Call scheduling: inter-call spacing and rate-limit recovery.
//!
//! The provider enforces a requests-per-minute ceiling shared by every call
//! the pipeline makes (OCR, questions, speeches, evaluations). Two mechanisms
//! keep us under it:
//!
//! 1. **Spacing**: consecutive calls start at least `inter_call_delay`
//!    apart. Slots are reserved under a short lock, so pipelines sharing one
//!    [`RateLimitedCaller`] are spaced against each other too.
//! 2. **Recovery**: a rate-limit response waits for the provider's hint plus
//!    a safety margin (or a fixed default wait) and retries, at most
//!    `max_retries` times.
//!
//! All waiting goes through a [`Clock`], so tests use [`ManualClock`] and run
//! instantly while still asserting on the exact waits requested.

use crate::config::PipelineConfig;
use crate::error::ProviderError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Time source and sleeper.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock time, tokio sleeps.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock: `sleep` advances time instantly and records the request.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    state: Mutex<ManualState>,
}

#[derive(Debug, Default)]
struct ManualState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Mutex::new(ManualState::default()),
        }
    }

    /// Move time forward without recording a sleep.
    pub fn advance(&self, by: Duration) {
        self.lock().elapsed += by;
    }

    /// Every duration passed to `sleep`, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.lock().sleeps.iter().sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.lock().elapsed
    }

    async fn sleep(&self, duration: Duration) {
        let mut state = self.lock();
        state.elapsed += duration;
        state.sleeps.push(duration);
    }
}

/// Spacing and retry settings, usually derived from [`PipelineConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub inter_call_delay: Duration,
    /// Used when a rate-limit response carries no hint.
    pub default_wait: Duration,
    /// Added to a provider hint.
    pub margin: Duration,
    /// Retries after the first rate-limited attempt.
    pub max_retries: u32,
}

impl RateLimitPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            inter_call_delay: config.inter_call_delay(),
            default_wait: config.rate_limit_wait(),
            margin: config.rate_limit_margin(),
            max_retries: config.rate_limit_retries,
        }
    }

    /// How long to back off after a rate-limit response.
    pub fn backoff(&self, hint: Option<Duration>) -> Duration {
        match hint {
            Some(h) => h + self.margin,
            None => self.default_wait,
        }
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Wraps provider calls with spacing and rate-limit retries.
pub struct RateLimitedCaller {
    policy: RateLimitPolicy,
    clock: Arc<dyn Clock>,
    /// Start time of the most recently reserved call slot.
    last_slot: Mutex<Option<Instant>>,
}

impl RateLimitedCaller {
    pub fn new(policy: RateLimitPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            last_slot: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Run `op` under the spacing and retry policy.
    ///
    /// Non-rate-limit errors are returned immediately. When every attempt
    /// was rate limited the result is [`ProviderError::RateLimitExhausted`].
    pub async fn call<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, ProviderError>> + Send,
        T: Send,
    {
        let attempts = self.policy.max_retries + 1;

        for attempt in 0..attempts {
            self.wait_for_slot().await;

            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("{}: recovered after {} rate-limited attempt(s)", label, attempt);
                    }
                    return Ok(value);
                }
                Err(ProviderError::RateLimited { retry_after }) => {
                    if attempt + 1 == attempts {
                        break;
                    }
                    let backoff = self.policy.backoff(retry_after);
                    warn!(
                        "{}: rate limited, retry {}/{} after {}ms",
                        label,
                        attempt + 1,
                        self.policy.max_retries,
                        backoff.as_millis()
                    );
                    self.clock.sleep(backoff).await;
                }
                Err(other) => return Err(other),
            }
        }

        warn!("{}: still rate limited after {} attempts", label, attempts);
        Err(ProviderError::RateLimitExhausted { attempts })
    }

    /// Like [`call`](Self::call), but rate-limit exhaustion yields `fallback()`.
    ///
    /// Other provider errors still propagate.
    pub async fn call_or_rate_limited<T, F, Fut, D>(
        &self,
        label: &str,
        op: F,
        fallback: D,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, ProviderError>> + Send,
        T: Send,
        D: FnOnce() -> T + Send,
    {
        match self.call(label, op).await {
            Err(ProviderError::RateLimitExhausted { .. }) => Ok(fallback()),
            other => other,
        }
    }

    /// Reserve the next call slot and sleep until it starts.
    async fn wait_for_slot(&self) {
        let now = self.clock.now();
        let wait = {
            let mut last = self.last_slot.lock().unwrap_or_else(|e| e.into_inner());
            let slot = match *last {
                Some(prev) => (prev + self.policy.inter_call_delay).max(now),
                None => now,
            };
            *last = Some(slot);
            slot.saturating_duration_since(now)
        };
        if !wait.is_zero() {
            self.clock.sleep(wait).await;
        }
    }
}
