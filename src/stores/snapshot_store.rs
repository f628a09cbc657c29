use std::sync::Arc;

use async_trait::async_trait;

use crate::core::errors::StoreError;
use crate::core::model::KafkaKey;

/// Persists the latest state per key. Implementations must be safe for
/// concurrent access across disjoint keys — the core never issues
/// concurrent calls for the *same* key, but different partitions may call
/// the same store concurrently.
///
/// `persist`/`delete` are expected to be idempotent overwrites: there is no
/// journal, only the latest value.
#[async_trait]
pub trait SnapshotStore<S>: Send + Sync
where
    S: Send + Sync,
{
    async fn get(&self, key: &KafkaKey) -> Result<Option<S>, StoreError>;
    async fn persist(&self, key: &KafkaKey, state: &S) -> Result<(), StoreError>;
    async fn delete(&self, key: &KafkaKey) -> Result<(), StoreError>;
}

/// Lets an `Arc`-shared store be used anywhere a `SnapshotStore` is
/// expected — e.g. wrapped in `RetryingSnapshotStore` while the same
/// underlying instance is also handed out as a `KeyStore`, so persists and
/// recovery scans observe one shared cache rather than two independent
/// copies.
#[async_trait]
impl<S, T> SnapshotStore<S> for Arc<T>
where
    S: Send + Sync,
    T: SnapshotStore<S> + ?Sized,
{
    async fn get(&self, key: &KafkaKey) -> Result<Option<S>, StoreError> {
        (**self).get(key).await
    }

    async fn persist(&self, key: &KafkaKey, state: &S) -> Result<(), StoreError> {
        (**self).persist(key, state).await
    }

    async fn delete(&self, key: &KafkaKey) -> Result<(), StoreError> {
        (**self).delete(key).await
    }
}
