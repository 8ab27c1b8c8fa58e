//! Shared pacing and retry for calls against a rate-limited upstream.
//!
//! One [`CallPacer`] models one upstream quota. Clones share the same gate, so
//! every caller in the process is spaced at least `min_interval` apart
//! start-to-start, whichever task issues the call.
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tradepilot_core::clock::SystemClock;
//! use tradepilot_core::pacing::{CallPacer, RetryPolicy};
//! use tradepilot_core::AiError;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let pacer = CallPacer::new(Arc::new(SystemClock), Duration::from_millis(1));
//! let reply = pacer
//!     .call_with_retry(&RetryPolicy::default(), "demo", || async {
//!         Ok::<_, AiError>("hello".to_string())
//!     })
//!     .await;
//! assert_eq!(reply.as_deref(), Some("hello"));
//! # }
//! ```

use crate::ai_error::AiError;
use crate::clock::Clock;
use crate::config::AiConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Exponential backoff applied to retryable failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn from_config(config: &AiConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_secs(config.retry_base_delay_secs),
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (zero-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2_u32.saturating_pow(attempt))
    }
}

#[derive(Clone)]
pub struct CallPacer {
    clock: Arc<dyn Clock>,
    min_interval: Duration,
    last_call: Arc<Mutex<Option<Instant>>>,
}

impl CallPacer {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, min_interval: Duration) -> Self {
        Self {
            clock,
            min_interval,
            last_call: Arc::new(Mutex::new(None)),
        }
    }

    #[must_use]
    pub fn from_config(clock: Arc<dyn Clock>, config: &AiConfig) -> Self {
        Self::new(clock, Duration::from_secs(config.min_call_interval_secs))
    }

    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Blocks until `min_interval` has passed since the last call by any
    /// caller, then claims the slot.
    ///
    /// The gate stays locked while waiting so concurrent callers queue behind
    /// it; it is released before the caller performs its request.
    pub async fn wait_turn(&self) -> Instant {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = self.clock.now().saturating_duration_since(previous);
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                tracing::debug!("Pacing upstream call, waiting {:?}", wait);
                self.clock.sleep(wait).await;
            }
        }
        let now = self.clock.now();
        *last_call = Some(now);
        now
    }

    /// Runs `call` through the pacing gate, retrying quota failures.
    ///
    /// Retryable errors back off `base_delay × 2^attempt` before the next
    /// attempt. Any other error ends the call immediately.
    ///
    /// # Arguments
    /// * `policy` - Retry budget and base delay
    /// * `label` - Context included in log lines (e.g. the symbol)
    /// * `call` - Produces one attempt's future
    ///
    /// # Returns
    /// `None` when the call fails fatally or the retry budget is exhausted.
    pub async fn call_with_retry<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        label: &str,
        mut call: F,
    ) -> Option<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, AiError>> + Send,
        T: Send,
    {
        let ctx = if label.is_empty() {
            String::new()
        } else {
            format!(" for {label}")
        };

        for attempt in 0..=policy.max_retries {
            self.wait_turn().await;

            match call().await {
                Ok(value) => return Some(value),
                Err(e) if e.is_retryable() => {
                    if attempt == policy.max_retries {
                        tracing::error!(
                            "Rate limit retries exhausted{} after {} attempts: {}",
                            ctx,
                            attempt + 1,
                            e
                        );
                        return None;
                    }
                    let delay = policy.delay_for(attempt);
                    tracing::warn!(
                        "Rate limited{}, retrying in {}s (attempt {}/{})",
                        ctx,
                        delay.as_secs(),
                        attempt + 1,
                        policy.max_retries
                    );
                    self.clock.sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!("Upstream call failed{}: {}", ctx, e);
                    return None;
                }
            }
        }

        None
    }
}
