use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{ClientConfig, Message, TopicPartitionList};

use crate::core::errors::StoreError;
use crate::core::model::{KafkaKey, TopicPartition};
use crate::stores::key_store::KeyStore;
use crate::stores::snapshot_store::SnapshotStore;

/// A `SnapshotStore`/`KeyStore` backed by a compacted Kafka topic, per the
/// wire format mandated in `SPEC_FULL.md` §6:
///
/// - record key: the byte encoding of `KafkaKey.key`
/// - record value: the state's byte codec; a `null` value is a tombstone
/// - producer: `acks=all`, `enable.idempotence=true`
/// - recovery consumer: `auto.offset.reset=earliest`, `enable.auto.commit=false`
///
/// `KeyStore::list` performs the "read the compacted topic from earliest to
/// end-offset-at-assignment-time, folding by key" recovery scan described in
/// §4.7 and populates an in-memory cache that `SnapshotStore::get` then
/// serves from — a compacted topic has no random-access-by-key read path,
/// so the full scan *is* the lookup mechanism. `add`/`remove` are no-ops:
/// enumeration is inherent in the topic's own compaction and tombstones,
/// there is no separate side table to maintain.
pub struct KafkaTopicSnapshotStore<S> {
    application_id: String,
    group_id: String,
    bootstrap_servers: String,
    input_topic: String,
    state_topic: String,
    producer: FutureProducer,
    message_timeout: Duration,
    cache: Mutex<HashMap<KafkaKey, S>>,
    codec: Box<dyn Fn(&[u8]) -> Result<S, StoreError> + Send + Sync>,
    encode: Box<dyn Fn(&S) -> Vec<u8> + Send + Sync>,
}

impl<S> KafkaTopicSnapshotStore<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// `application_id`/`group_id`/`input_topic` must match what
    /// `PartitionFlow::key_for` uses to build the live `KafkaKey` for an
    /// incoming record — otherwise a key recovered from the state topic can
    /// never equal the key the engine computes for the same logical entity
    /// once a record for it arrives (`KafkaKey` equality is all four
    /// fields).
    pub fn new(
        application_id: impl Into<String>,
        group_id: impl Into<String>,
        bootstrap_servers: impl Into<String>,
        input_topic: impl Into<String>,
        state_topic: impl Into<String>,
        message_timeout: Duration,
        codec: impl Fn(&[u8]) -> Result<S, StoreError> + Send + Sync + 'static,
        encode: impl Fn(&S) -> Vec<u8> + Send + Sync + 'static,
    ) -> Result<Self, StoreError> {
        let bootstrap_servers = bootstrap_servers.into();
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &bootstrap_servers)
            .set("message.timeout.ms", message_timeout.as_millis().to_string())
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .create()
            .map_err(|e| StoreError::Permanent(e.into()))?;

        Ok(Self {
            application_id: application_id.into(),
            group_id: group_id.into(),
            bootstrap_servers,
            input_topic: input_topic.into(),
            state_topic: state_topic.into(),
            producer,
            message_timeout,
            cache: Mutex::new(HashMap::new()),
            codec: Box::new(codec),
            encode: Box::new(encode),
        })
    }

    fn recovery_consumer(&self) -> Result<BaseConsumer, StoreError> {
        ClientConfig::new()
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("group.id", format!("{}-recovery", self.state_topic))
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .create()
            .map_err(|e| StoreError::Transient(e.into()))
    }

    /// Reads the compacted state topic from earliest to the end offset
    /// observed at call time, folding tombstones and values by key.
    /// Returns the recovered key set; also primes the read cache.
    fn scan_topic(&self) -> Result<Vec<KafkaKey>, StoreError> {
        let consumer = self.recovery_consumer()?;
        let metadata = consumer
            .fetch_metadata(Some(&self.state_topic), Timeout::After(Duration::from_secs(30)))
            .map_err(|e| StoreError::Transient(e.into()))?;
        let topic_meta = metadata
            .topics()
            .iter()
            .find(|t| t.name() == self.state_topic)
            .ok_or_else(|| StoreError::Permanent(anyhow::anyhow!("unknown state topic {}", self.state_topic)))?;

        let mut assignment = TopicPartitionList::new();
        let mut watermarks = HashMap::new();
        for partition_meta in topic_meta.partitions() {
            let (_low, high) = consumer
                .fetch_watermarks(&self.state_topic, partition_meta.id(), Duration::from_secs(30))
                .map_err(|e| StoreError::Transient(e.into()))?;
            watermarks.insert(partition_meta.id(), high);
            assignment
                .add_partition_offset(&self.state_topic, partition_meta.id(), rdkafka::Offset::Beginning)
                .map_err(|e| StoreError::Permanent(e.into()))?;
        }
        consumer.assign(&assignment).map_err(|e| StoreError::Permanent(e.into()))?;

        let mut remaining: HashMap<i32, i64> = watermarks.clone();
        let mut folded: HashMap<KafkaKey, S> = HashMap::new();

        while remaining.values().any(|end| *end > 0) {
            match consumer.poll(Duration::from_secs(5)) {
                Some(Ok(message)) => {
                    let partition = message.partition();
                    let offset = message.offset();
                    let key_bytes = message.key().unwrap_or_default().to_vec();
                    // The state topic's partition count matches the input
                    // topic's (§6), so `partition` here is also the input
                    // topic's partition for this logical entity.
                    let key = KafkaKey::new(
                        self.application_id.clone(),
                        self.group_id.clone(),
                        TopicPartition::new(self.input_topic.clone(), partition),
                        key_bytes,
                    );
                    match message.payload() {
                        Some(payload) => {
                            let state = (self.codec)(payload)?;
                            folded.insert(key, state);
                        }
                        None => {
                            folded.remove(&key);
                        }
                    }
                    if let Some(end) = watermarks.get(&partition) {
                        if offset + 1 >= *end {
                            remaining.insert(partition, 0);
                        }
                    }
                }
                Some(Err(e)) => return Err(StoreError::Transient(e.into())),
                None => {
                    if remaining.values().all(|end| *end == 0) {
                        break;
                    }
                }
            }
        }

        let keys: Vec<KafkaKey> = folded.keys().cloned().collect();
        *self.cache.lock().expect("cache poisoned") = folded;
        Ok(keys)
    }
}

#[async_trait]
impl<S> SnapshotStore<S> for KafkaTopicSnapshotStore<S>
where
    S: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &KafkaKey) -> Result<Option<S>, StoreError> {
        Ok(self.cache.lock().expect("cache poisoned").get(key).cloned())
    }

    async fn persist(&self, key: &KafkaKey, state: &S) -> Result<(), StoreError> {
        let payload = (self.encode)(state);
        self.producer
            .send(
                FutureRecord::to(&self.state_topic).key(&key.key).payload(&payload),
                Timeout::After(self.message_timeout),
            )
            .await
            .map_err(|(e, _)| StoreError::Transient(e.into()))?;
        self.cache.lock().expect("cache poisoned").insert(key.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, key: &KafkaKey) -> Result<(), StoreError> {
        self.producer
            .send(
                FutureRecord::<Vec<u8>, Vec<u8>>::to(&self.state_topic).key(&key.key),
                Timeout::After(self.message_timeout),
            )
            .await
            .map_err(|(e, _)| StoreError::Transient(e.into()))?;
        self.cache.lock().expect("cache poisoned").remove(key);
        Ok(())
    }
}

#[async_trait]
impl<S> KeyStore for KafkaTopicSnapshotStore<S>
where
    S: Clone + Send + Sync + 'static,
{
    async fn list(&self, _partition: &TopicPartition) -> Result<Vec<KafkaKey>, StoreError> {
        // Eager recovery is a one-time bootstrap before normal consumption
        // begins (§4.7), not a hot path, so a blocking full-topic scan is
        // acceptable here. `block_in_place` hands the current worker thread
        // to other tasks for the duration rather than blocking the whole
        // runtime, which requires the multi-thread runtime flavor.
        tokio::task::block_in_place(|| self.scan_topic())
    }

    async fn add(&self, _key: &KafkaKey) -> Result<(), StoreError> {
        Ok(())
    }

    async fn remove(&self, _key: &KafkaKey) -> Result<(), StoreError> {
        Ok(())
    }
}
