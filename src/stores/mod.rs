pub mod kafka_topic;
pub mod key_store;
pub mod memory;
pub mod retry;
pub mod snapshot_store;

pub use kafka_topic::KafkaTopicSnapshotStore;
pub use key_store::KeyStore;
pub use memory::{InMemoryKeyStore, InMemorySnapshotStore};
pub use retry::RetryingSnapshotStore;
pub use snapshot_store::SnapshotStore;
