use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use tracing::error;

use crate::core::errors::StoreError;
use crate::core::model::KafkaKey;
use crate::stores::snapshot_store::SnapshotStore;

/// Decorates any `SnapshotStore` with an external retry policy for
/// transient failures. Retries are an external concern, injected by
/// decorating the store rather than built into the core engine.
///
/// Only `StoreError::Transient` is retried; `StoreError::Permanent` is
/// returned immediately. Either way the *core* never retries — this
/// decorator only changes when a `PersistError` surfaces to `KeyState`, not
/// whether the core itself loops.
pub struct RetryingSnapshotStore<T> {
    inner: T,
    backoff: ExponentialBuilder,
}

impl<T> RetryingSnapshotStore<T> {
    pub fn new(inner: T) -> Self {
        Self { inner, backoff: ExponentialBuilder::default() }
    }

    pub fn with_backoff(inner: T, backoff: ExponentialBuilder) -> Self {
        Self { inner, backoff }
    }
}

#[async_trait]
impl<S, T> SnapshotStore<S> for RetryingSnapshotStore<T>
where
    S: Send + Sync,
    T: SnapshotStore<S> + Send + Sync,
{
    async fn get(&self, key: &KafkaKey) -> Result<Option<S>, StoreError> {
        (|| async { self.inner.get(key).await })
            .retry(self.backoff.clone())
            .when(|e: &StoreError| e.is_transient())
            .sleep(tokio::time::sleep)
            .notify(|err, dur| error!(key = %key, error = %err, "retrying store get after {dur:?}"))
            .await
    }

    async fn persist(&self, key: &KafkaKey, state: &S) -> Result<(), StoreError> {
        (|| async { self.inner.persist(key, state).await })
            .retry(self.backoff.clone())
            .when(|e: &StoreError| e.is_transient())
            .sleep(tokio::time::sleep)
            .notify(|err, dur| error!(key = %key, error = %err, "retrying store persist after {dur:?}"))
            .await
    }

    async fn delete(&self, key: &KafkaKey) -> Result<(), StoreError> {
        (|| async { self.inner.delete(key).await })
            .retry(self.backoff.clone())
            .when(|e: &StoreError| e.is_transient())
            .sleep(tokio::time::sleep)
            .notify(|err, dur| error!(key = %key, error = %err, "retrying store delete after {dur:?}"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::TopicPartition;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FlakyStore {
        attempts: AtomicUsize,
        fail_until: usize,
        last_value: Mutex<Option<String>>,
    }

    #[async_trait]
    impl SnapshotStore<String> for FlakyStore {
        async fn get(&self, _key: &KafkaKey) -> Result<Option<String>, StoreError> {
            Ok(self.last_value.lock().unwrap().clone())
        }

        async fn persist(&self, _key: &KafkaKey, state: &String) -> Result<(), StoreError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_until {
                Err(StoreError::Transient(anyhow::anyhow!("flaky failure #{attempt}")))
            } else {
                *self.last_value.lock().unwrap() = Some(state.clone());
                Ok(())
            }
        }

        async fn delete(&self, _key: &KafkaKey) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let flaky = FlakyStore { attempts: AtomicUsize::new(0), fail_until: 2, last_value: Mutex::new(None) };
        let store = RetryingSnapshotStore::with_backoff(
            flaky,
            ExponentialBuilder::default().with_min_delay(std::time::Duration::from_millis(1)),
        );
        let key = KafkaKey::new("app", "group", TopicPartition::new("input", 0), vec![1]);
        store.persist(&key, &"value".to_string()).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some("value".to_string()));
    }

    struct AlwaysPermanent;

    #[async_trait]
    impl SnapshotStore<String> for AlwaysPermanent {
        async fn get(&self, _key: &KafkaKey) -> Result<Option<String>, StoreError> {
            Ok(None)
        }
        async fn persist(&self, _key: &KafkaKey, _state: &String) -> Result<(), StoreError> {
            Err(StoreError::Permanent(anyhow::anyhow!("not retryable")))
        }
        async fn delete(&self, _key: &KafkaKey) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let store = RetryingSnapshotStore::new(AlwaysPermanent);
        let key = KafkaKey::new("app", "group", TopicPartition::new("input", 0), vec![1]);
        let result = store.persist(&key, &"value".to_string()).await;
        assert!(matches!(result, Err(StoreError::Permanent(_))));
    }
}
