use async_trait::async_trait;

use crate::core::errors::StoreError;
use crate::core::model::{KafkaKey, TopicPartition};

/// Enumerates the keys known to belong to a partition, so `EagerRecovery`
/// knows which snapshots to load before the first record is processed.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn list(&self, partition: &TopicPartition) -> Result<Vec<KafkaKey>, StoreError>;
    async fn add(&self, key: &KafkaKey) -> Result<(), StoreError>;
    async fn remove(&self, key: &KafkaKey) -> Result<(), StoreError>;
}
