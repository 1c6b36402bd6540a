//! Bounded optimistic increment for `job_counters`.

use autotune_core::retry::RetryPolicy;

use crate::store::{CounterStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum CounterError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Every attempt lost the compare-and-swap race.
    #[error("counter '{key}' still contended after {attempts} attempts")]
    Contention { key: String, attempts: u32 },
}

/// Add one to counter `key`, creating it if absent. Returns the new count.
///
/// Read, then conditionally write (insert-if-absent or version CAS). A lost
/// race sleeps a jittered backoff and retries, up to `policy.max_attempts`.
pub async fn increment_counter(
    store: &dyn CounterStore,
    key: &str,
    policy: &RetryPolicy,
) -> Result<i64, CounterError> {
    let mut attempt = 0;
    loop {
        attempt += 1;

        let written = match store.read(key).await? {
            None => store.try_insert(key, 1).await?.then_some(1),
            Some(current) => {
                let next = current.job_count + 1;
                store
                    .try_update(key, current.version, next)
                    .await?
                    .then_some(next)
            }
        };

        if let Some(count) = written {
            return Ok(count);
        }

        if !policy.should_retry(attempt) {
            tracing::warn!(key, attempts = attempt, "Counter increment gave up");
            return Err(CounterError::Contention {
                key: key.to_string(),
                attempts: attempt,
            });
        }

        let delay = policy.delay_for(attempt);
        tracing::debug!(key, attempt, delay_ms = delay.as_millis() as u64, "Counter write conflict, retrying");
        tokio::time::sleep(delay).await;
    }
}
