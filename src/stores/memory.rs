use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::errors::StoreError;
use crate::core::model::{KafkaKey, TopicPartition};
use crate::stores::key_store::KeyStore;
use crate::stores::snapshot_store::SnapshotStore;

/// In-memory `SnapshotStore`, used by this crate's own tests and by anyone
/// wiring up the engine without a real store yet. Safe for concurrent
/// key-disjoint access per the trait's contract.
#[derive(Default)]
pub struct InMemorySnapshotStore<S> {
    states: Mutex<HashMap<KafkaKey, S>>,
}

impl<S> InMemorySnapshotStore<S> {
    pub fn new() -> Self {
        Self { states: Mutex::new(HashMap::new()) }
    }

    /// Test/inspection helper: snapshot of everything currently stored.
    pub fn snapshot(&self) -> HashMap<KafkaKey, S>
    where
        S: Clone,
    {
        self.states.lock().expect("snapshot store poisoned").clone()
    }
}

#[async_trait]
impl<S> SnapshotStore<S> for InMemorySnapshotStore<S>
where
    S: Clone + Send + Sync,
{
    async fn get(&self, key: &KafkaKey) -> Result<Option<S>, StoreError> {
        Ok(self.states.lock().expect("snapshot store poisoned").get(key).cloned())
    }

    async fn persist(&self, key: &KafkaKey, state: &S) -> Result<(), StoreError> {
        self.states
            .lock()
            .expect("snapshot store poisoned")
            .insert(key.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, key: &KafkaKey) -> Result<(), StoreError> {
        self.states.lock().expect("snapshot store poisoned").remove(key);
        Ok(())
    }
}

/// In-memory `KeyStore`: tracks which keys are known per partition.
#[derive(Default)]
pub struct InMemoryKeyStore {
    keys: Mutex<HashMap<TopicPartition, Vec<KafkaKey>>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self { keys: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn list(&self, partition: &TopicPartition) -> Result<Vec<KafkaKey>, StoreError> {
        Ok(self.keys.lock().expect("key store poisoned").get(partition).cloned().unwrap_or_default())
    }

    async fn add(&self, key: &KafkaKey) -> Result<(), StoreError> {
        let mut guard = self.keys.lock().expect("key store poisoned");
        let entry = guard.entry(key.topic_partition.clone()).or_default();
        if !entry.contains(key) {
            entry.push(key.clone());
        }
        Ok(())
    }

    async fn remove(&self, key: &KafkaKey) -> Result<(), StoreError> {
        let mut guard = self.keys.lock().expect("key store poisoned");
        if let Some(entry) = guard.get_mut(&key.topic_partition) {
            entry.retain(|k| k != key);
        }
        Ok(())
    }
}
