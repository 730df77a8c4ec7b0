use crate::error::{ApiError, Fault};
use crate::services::credential_pool::CredentialPool;
use crate::utils::mask_key;
use log::{error, warn};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Exponential backoff for transient faults.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry `retry` (1-based): base * 2^(retry - 1).
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }
}

/// What to do after one attempt.
enum Step<T> {
    Done(T),
    SwitchCredential(ApiError),
    RetryAfter(Duration, ApiError),
    Fail(ApiError),
}

/// Runs Data API calls with key rotation on quota exhaustion and bounded
/// retry on transient faults.
pub struct QuotaAwareExecutor {
    pool: Arc<CredentialPool>,
    backoff: BackoffPolicy,
    requests: AtomicU64,
}

impl QuotaAwareExecutor {
    pub fn new(pool: Arc<CredentialPool>, backoff: BackoffPolicy) -> Self {
        QuotaAwareExecutor {
            pool,
            backoff,
            requests: AtomicU64::new(0),
        }
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Calls `call` with a key from the pool until it succeeds or fails for good.
    ///
    /// A quota-exhausted key is revoked and the call starts over with another
    /// key and a fresh transient retry budget. Transient faults are retried
    /// `max_retries` times per key; the next one is returned to the caller.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ApiError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut transient_failures = 0u32;

        loop {
            let key = self.pool.acquire()?;
            self.requests.fetch_add(1, Ordering::Relaxed);
            let result = call(key.clone()).await;

            match self.next_step(result, &mut transient_failures) {
                Step::Done(value) => return Ok(value),
                Step::SwitchCredential(err) => {
                    transient_failures = 0;
                    if self.pool.revoke(&key) {
                        error!(
                            "Quota exceeded during {operation}, no longer using key {}: {err}",
                            mask_key(&key)
                        );
                    }
                }
                Step::RetryAfter(delay, err) => {
                    warn!(
                        "Transient failure during {operation} (retry {transient_failures}/{} in {delay:?}): {err}",
                        self.backoff.max_retries
                    );
                    tokio::time::sleep(delay).await;
                }
                Step::Fail(err) => return Err(err),
            }
        }
    }

    fn next_step<T>(&self, result: Result<T, ApiError>, transient_failures: &mut u32) -> Step<T> {
        let err = match result {
            Ok(value) => return Step::Done(value),
            Err(err) => err,
        };

        match err.fault() {
            Fault::QuotaExhausted => Step::SwitchCredential(err),
            Fault::Transient if *transient_failures < self.backoff.max_retries => {
                *transient_failures += 1;
                Step::RetryAfter(self.backoff.delay_before_retry(*transient_failures), err)
            }
            Fault::Transient | Fault::Fatal => Step::Fail(err),
        }
    }
}
