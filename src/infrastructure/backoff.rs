//! 재시도/백오프 컨트롤러
//!
//! Runs an async ledger operation, retrying transient failures with capped
//! exponential backoff and jitter. After the last try the final error is
//! returned unchanged so callers can still classify it.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use crate::domain::errors::classify;
use crate::domain::errors::{ErrorClass, LedgerError};

pub const MIN_BASE_DELAY_MS: u64 = 1;
const JITTER_SPREAD: f64 = 0.25;

/// 재시도 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub tries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            tries: 3,
            base_delay_ms: 500,
            max_delay_ms: 5_000,
        }
    }
}

impl BackoffPolicy {
    /// tries >= 1, base >= 1ms, max >= base
    #[must_use]
    pub fn normalized(self) -> Self {
        let tries = self.tries.max(1);
        let base_delay_ms = self.base_delay_ms.max(MIN_BASE_DELAY_MS);
        let max_delay_ms = self.max_delay_ms.max(base_delay_ms);
        Self {
            tries,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Delay before retry number `attempt + 1`; `jitter` is clamped into [0, 1)
    pub fn delay_for_attempt(&self, attempt: u32, jitter: f64) -> Duration {
        let policy = self.normalized();
        let jitter = jitter.clamp(0.0, 0.999_999);
        let exp = 2f64.powi(attempt.min(30) as i32);
        let raw = policy.base_delay_ms as f64 * exp * JITTER_SPREAD.mul_add(jitter, 1.0);
        let capped = raw.round().min(policy.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Passed to the `on_retry` observer before each backoff sleep
#[derive(Debug, Clone)]
pub struct RetryNotice {
    /// 1-based number of the failed attempt
    pub attempt: u32,
    pub error: LedgerError,
    pub class: ErrorClass,
    pub delay: Duration,
}

type RetryPredicate<'a> = Box<dyn Fn(&ErrorClass, &LedgerError) -> bool + Send + Sync + 'a>;
type RetryObserver<'a> = Box<dyn Fn(&RetryNotice) + Send + Sync + 'a>;

/// Configured retry loop
///
/// ```ignore
/// let page = Backoff::new(policy)
///     .on_retry(|n| debug!("retry {} in {:?}", n.attempt, n.delay))
///     .run(|| api.next_page(&cursor))
///     .await?;
/// ```
pub struct Backoff<'a> {
    policy: BackoffPolicy,
    retry_if: RetryPredicate<'a>,
    on_retry: Option<RetryObserver<'a>>,
    cancel: Option<CancellationToken>,
    label: &'a str,
}

impl<'a> Backoff<'a> {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy: policy.normalized(),
            retry_if: Box::new(|class, _| class.is_transient()),
            on_retry: None,
            cancel: None,
            label: "ledger call",
        }
    }

    #[must_use]
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ErrorClass, &LedgerError) -> bool + Send + Sync + 'a,
    {
        self.retry_if = Box::new(predicate);
        self
    }

    #[must_use]
    pub fn on_retry<O>(mut self, observer: O) -> Self
    where
        O: Fn(&RetryNotice) + Send + Sync + 'a,
    {
        self.on_retry = Some(Box::new(observer));
        self
    }

    /// Abort the backoff sleep (not an in-flight attempt) when `token` fires
    #[must_use]
    pub fn with_cancel(mut self, token: &CancellationToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }

    #[must_use]
    pub const fn label(mut self, label: &'a str) -> Self {
        self.label = label;
        self
    }

    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let mut attempt = 0u32;
        loop {
            let error = match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("✅ {} succeeded after {} retries", self.label, attempt);
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let class = classify(&error);
            let tries_left = attempt + 1 < self.policy.tries;
            if !tries_left || !(self.retry_if)(&class, &error) {
                return Err(error);
            }

            let delay = self.delay_with_hint(attempt, &error);
            let notice = RetryNotice {
                attempt: attempt + 1,
                error,
                class,
                delay,
            };
            warn!(
                "🔄 {} failed ({}), retry {}/{} in {:?}: {}",
                self.label,
                notice.class.as_str(),
                notice.attempt,
                self.policy.tries - 1,
                delay,
                notice.error
            );
            if let Some(observer) = &self.on_retry {
                observer(&notice);
            }

            match &self.cancel {
                Some(token) => {
                    tokio::select! {
                        () = token.cancelled() => return Err(LedgerError::Aborted),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
            attempt += 1;
        }
    }

    fn delay_with_hint(&self, attempt: u32, error: &LedgerError) -> Duration {
        let computed = self.policy.delay_for_attempt(attempt, fastrand::f64());
        match error.retry_after() {
            Some(hint) => computed.max(hint).min(self.policy.max_delay()),
            None => computed,
        }
    }
}

/// Default predicate and no observer
pub async fn run_with_backoff<T, F, Fut>(policy: &BackoffPolicy, op: F) -> Result<T, LedgerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LedgerError>>,
{
    Backoff::new(*policy).run(op).await
}
