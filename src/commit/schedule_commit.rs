use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::model::{Offset, TopicPartition};

/// Non-blocking handoff of a commit decision to the consumer thread, which
/// performs the actual Kafka commit. `schedule` must never block on the
/// commit itself — it only enqueues.
#[async_trait]
pub trait ScheduleCommit: Send + Sync {
    async fn schedule(&self, partition: TopicPartition, offset: Offset);
}

/// A commit request handed off by `OffsetTracker::maybe_commit`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitRequest {
    pub partition: TopicPartition,
    pub offset: Offset,
}

/// Channel-backed `ScheduleCommit`: `PartitionFlow`s push requests, and a
/// consumer-thread task (see `src/main.rs`) drains them and calls
/// `rdkafka`'s `commit`.
#[derive(Clone)]
pub struct ChannelScheduleCommit {
    sender: mpsc::UnboundedSender<CommitRequest>,
}

impl ChannelScheduleCommit {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CommitRequest>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl ScheduleCommit for ChannelScheduleCommit {
    async fn schedule(&self, partition: TopicPartition, offset: Offset) {
        // A full/closed receiver means the consumer thread has shut down;
        // there is nothing more this partition flow can do about it, so we
        // drop the request rather than block or panic.
        let _ = self.sender.send(CommitRequest { partition, offset });
    }
}
