use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::core::clock::Clock;
use crate::core::errors::RecoveryError;
use crate::core::key_state::KeyState;
use crate::core::model::{KafkaKey, Offset, TopicPartition};
use crate::stores::key_store::KeyStore;
use crate::stores::snapshot_store::SnapshotStore;

/// Bootstraps a partition's live key map before the first record is
/// processed: enumerates all keys known to the partition and loads their
/// latest snapshot, so they don't artificially hold back the commit offset
/// (`SPEC_FULL.md` §4.7).
pub async fn recover<S, Store, KS>(
    partition: &TopicPartition,
    assigned_at_offset: Offset,
    store: &Store,
    key_store: &KS,
    clock: &Arc<dyn Clock>,
) -> Result<HashMap<KafkaKey, KeyState<S>>, RecoveryError>
where
    S: Send + Sync,
    Store: SnapshotStore<S>,
    KS: KeyStore,
{
    let known_keys = key_store
        .list(partition)
        .await
        .map_err(|source| RecoveryError { source: source.into() })?;

    let now = clock.now();
    let mut recovered = HashMap::with_capacity(known_keys.len());
    for key in known_keys {
        let state = store
            .get(&key)
            .await
            .map_err(|source| RecoveryError { source: source.into() })?;
        recovered.insert(key.clone(), KeyState::recovered(key, state, assigned_at_offset, now));
    }

    info!(partition = %partition, keys = recovered.len(), "eager recovery complete");
    Ok(recovered)
}
