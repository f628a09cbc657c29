use std::fmt;

/// A single shard of an input topic. Kept as a plain pair rather than leaning
/// on `rdkafka::TopicPartitionList` so the core has zero dependency on the
/// Kafka client crate.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self { topic: topic.into(), partition }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// Offsets are non-negative and monotonic within a partition.
pub type Offset = i64;

/// Uniquely identifies a stateful entity: `(applicationId, groupId, topicPartition, key)`.
/// Immutable once constructed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KafkaKey {
    pub application_id: String,
    pub group_id: String,
    pub topic_partition: TopicPartition,
    pub key: Vec<u8>,
}

impl KafkaKey {
    pub fn new(
        application_id: impl Into<String>,
        group_id: impl Into<String>,
        topic_partition: TopicPartition,
        key: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            application_id: application_id.into(),
            group_id: group_id.into(),
            topic_partition,
            key: key.into(),
        }
    }
}

impl fmt::Display for KafkaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.application_id,
            self.group_id,
            self.topic_partition,
            String::from_utf8_lossy(&self.key)
        )
    }
}

/// A single consumed Kafka record, decoupled from `rdkafka::Message` so the
/// core can be exercised without a broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub topic_partition: TopicPartition,
    pub offset: Offset,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub timestamp: i64,
    pub headers: Vec<(String, Vec<u8>)>,
}

impl Record {
    pub fn new(topic_partition: TopicPartition, offset: Offset, key: Vec<u8>, value: Vec<u8>) -> Self {
        Self { topic_partition, offset, key, value, timestamp: 0, headers: Vec::new() }
    }
}
