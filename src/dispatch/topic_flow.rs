use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::commit::ScheduleCommit;
use crate::core::clock::Clock;
use crate::core::config::FlowConfig;
use crate::core::eager_recovery;
use crate::core::errors::PartitionFlowError;
use crate::core::fold::EnhancedFold;
use crate::core::model::{Offset, Record, TopicPartition};
use crate::core::partition_flow::PartitionFlow;
use crate::stores::key_store::KeyStore;
use crate::stores::snapshot_store::SnapshotStore;

/// Maps assigned partitions to their `PartitionFlow` instance and drives
/// the assign/revoke lifecycle. It does not itself own an `rdkafka`
/// consumer or subscribe to rebalance callbacks — those are the demo
/// binary's job (`src/main.rs`); this type only answers "which
/// `PartitionFlow` handles this partition, and is it alive right now".
pub struct TopicFlow<S, F, Store, KS, Commit> {
    application_id: String,
    group_id: String,
    fold: Arc<F>,
    store: Arc<Store>,
    key_store: Arc<KS>,
    clock: Arc<dyn Clock>,
    commit: Arc<Commit>,
    config: FlowConfig,
    flows: HashMap<TopicPartition, PartitionFlow<S, F, Store, KS>>,
}

impl<S, F, Store, KS, Commit> TopicFlow<S, F, Store, KS, Commit>
where
    S: Clone + Send + Sync,
    F: EnhancedFold<S>,
    Store: SnapshotStore<S>,
    KS: KeyStore,
    Commit: ScheduleCommit,
{
    pub fn new(
        application_id: impl Into<String>,
        group_id: impl Into<String>,
        fold: Arc<F>,
        store: Arc<Store>,
        key_store: Arc<KS>,
        clock: Arc<dyn Clock>,
        commit: Arc<Commit>,
        config: FlowConfig,
    ) -> Self {
        Self {
            application_id: application_id.into(),
            group_id: group_id.into(),
            fold,
            store,
            key_store,
            clock,
            commit,
            config,
            flows: HashMap::new(),
        }
    }

    /// Runs eager recovery for the newly-assigned partition and starts
    /// tracking its `PartitionFlow`.
    pub async fn on_assign(
        &mut self,
        partition: TopicPartition,
        assigned_at_offset: Offset,
    ) -> Result<(), PartitionFlowError> {
        let recovered = eager_recovery::recover(
            &partition,
            assigned_at_offset,
            &*self.store,
            &*self.key_store,
            &self.clock,
        )
        .await?;

        let mut flow = PartitionFlow::new(
            self.application_id.clone(),
            self.group_id.clone(),
            partition.clone(),
            assigned_at_offset,
            self.fold.clone(),
            self.store.clone(),
            self.key_store.clone(),
            self.clock.clone(),
            self.config.clone(),
        );
        flow.seed_recovered_keys(recovered);

        info!(partition = %partition, "partition assigned");
        self.flows.insert(partition, flow);
        Ok(())
    }

    /// Flushes (if configured) and drops the `PartitionFlow` for a revoked
    /// partition. No-op if the partition was not assigned.
    pub async fn on_revoke(&mut self, partition: &TopicPartition) {
        if let Some(mut flow) = self.flows.remove(partition) {
            flow.revoke().await;
            info!(partition = %partition, "partition revoked");
        } else {
            warn!(partition = %partition, "revoke requested for unassigned partition");
        }
    }

    /// Routes a batch to the assigned partition's flow, scheduling a commit
    /// via `ScheduleCommit` if one is due.
    pub async fn apply(
        &mut self,
        partition: &TopicPartition,
        batch: Vec<Record>,
    ) -> Result<(), PartitionFlowError> {
        let flow = self
            .flows
            .get_mut(partition)
            .ok_or_else(|| PartitionFlowError::NotAssigned(partition.clone()))?;
        if let Some(offset) = flow.apply(batch).await? {
            self.commit.schedule(partition.clone(), offset).await;
        }
        Ok(())
    }

    pub fn is_assigned(&self, partition: &TopicPartition) -> bool {
        self.flows.contains_key(partition)
    }

    pub fn assigned_partitions(&self) -> impl Iterator<Item = &TopicPartition> {
        self.flows.keys()
    }
}
