use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, instrument};

use crate::core::clock::Clock;
use crate::core::config::FlowConfig;
use crate::core::errors::PartitionFlowError;
use crate::core::fold::EnhancedFold;
use crate::core::key_state::KeyState;
use crate::core::model::{KafkaKey, Offset, Record, TopicPartition};
use crate::core::offset_tracker::OffsetTracker;
use crate::core::timer_flow::TimerFlow;
use crate::stores::key_store::KeyStore;
use crate::stores::snapshot_store::SnapshotStore;

/// Per-partition orchestrator: ingests a batch of records, dispatches to
/// keys, drives timers, triggers persist, and computes the commit offset.
///
/// Owns its `KeyState` map exclusively; only one `apply` runs at a time per
/// instance (the cooperative, single-logical-thread-per-partition model of
/// `SPEC_FULL.md` §5).
pub struct PartitionFlow<S, F, Store, KS> {
    partition: TopicPartition,
    application_id: String,
    group_id: String,
    fold: Arc<F>,
    store: Arc<Store>,
    key_store: Arc<KS>,
    clock: Arc<dyn Clock>,
    config: FlowConfig,
    keys: HashMap<KafkaKey, KeyState<S>>,
    timer_flow: TimerFlow,
    offset_tracker: OffsetTracker,
}

impl<S, F, Store, KS> PartitionFlow<S, F, Store, KS>
where
    S: Clone + Send + Sync,
    F: EnhancedFold<S>,
    Store: SnapshotStore<S>,
    KS: KeyStore,
{
    pub fn new(
        application_id: impl Into<String>,
        group_id: impl Into<String>,
        partition: TopicPartition,
        assigned_at_offset: Offset,
        fold: Arc<F>,
        store: Arc<Store>,
        key_store: Arc<KS>,
        clock: Arc<dyn Clock>,
        config: FlowConfig,
    ) -> Self {
        let offset_tracker = OffsetTracker::new(assigned_at_offset, config.commit_offsets_interval);
        let timer_flow = TimerFlow::new(config.clone());
        Self {
            partition,
            application_id: application_id.into(),
            group_id: group_id.into(),
            fold,
            store,
            key_store,
            clock,
            config,
            keys: HashMap::new(),
            timer_flow,
            offset_tracker,
        }
    }

    /// Seeds the partition's live map with keys recovered before the first
    /// record was processed. Called once by `EagerRecovery`.
    pub fn seed_recovered_keys(&mut self, recovered: HashMap<KafkaKey, KeyState<S>>) {
        self.keys = recovered;
    }

    fn key_for(&self, record: &Record) -> KafkaKey {
        KafkaKey::new(
            self.application_id.clone(),
            self.group_id.clone(),
            record.topic_partition.clone(),
            record.key.clone(),
        )
    }

    /// Ingests a batch of records: groups by key preserving per-key order,
    /// applies folds, runs the timer/persist evaluation, prunes persisted
    /// deletions, and returns a commit offset if one is due.
    ///
    /// Errors from fold abort the whole batch — no partial application is
    /// persisted as a result of this call. Persist errors respect
    /// `ignore_persist_errors`.
    #[instrument(skip_all, fields(partition = %self.partition))]
    pub async fn apply(&mut self, batch: Vec<Record>) -> Result<Option<Offset>, PartitionFlowError> {
        let mut grouped: HashMap<KafkaKey, Vec<Record>> = HashMap::new();
        let mut order: Vec<KafkaKey> = Vec::new();
        for record in batch {
            let key = self.key_for(&record);
            if !grouped.contains_key(&key) {
                order.push(key.clone());
            }
            grouped.entry(key).or_default().push(record);
        }

        for key in order {
            let records = grouped.remove(&key).expect("key present in grouped map");
            for record in records {
                let entry = self
                    .keys
                    .entry(key.clone())
                    .or_insert_with(|| KeyState::new(key.clone(), record.offset));
                entry.apply(&*self.fold, &record).await?;
                self.offset_tracker.record_processed();
            }
        }

        self.timer_flow
            .evaluate(&mut self.keys, &*self.store, &*self.key_store, &*self.clock)
            .await?;

        self.keys.retain(|_, key_state| !key_state.is_deleted_and_persisted());

        let now = self.clock.now();
        let committed = self.offset_tracker.maybe_commit(&self.keys, now);
        if let Some(offset) = committed {
            info!(partition = %self.partition, offset, "commit offset advanced");
        }
        Ok(committed)
    }

    /// Runs the `flush_on_revoke` protocol (if enabled) and releases this
    /// flow's resources. Errors are logged and swallowed, never propagated —
    /// the caller is expected to discard this `PartitionFlow` regardless.
    pub async fn revoke(&mut self) {
        self.timer_flow
            .flush_on_revoke(&mut self.keys, &*self.store, &*self.key_store, &*self.clock)
            .await;
    }

    pub fn partition(&self) -> &TopicPartition {
        &self.partition
    }

    pub fn last_committed_offset(&self) -> Option<Offset> {
        self.offset_tracker.last_committed_offset()
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }
}
