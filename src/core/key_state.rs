use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::core::additional_persist::AdditionalPersist;
use crate::core::clock::Clock;
use crate::core::errors::{FoldError, PersistError};
use crate::core::fold::{EnhancedFold, FoldExtras};
use crate::core::model::{KafkaKey, Offset, Record};
use crate::stores::key_store::KeyStore;
use crate::stores::snapshot_store::SnapshotStore;

/// Live, in-memory per-key state. Owned exclusively by its `PartitionFlow` —
/// never shared across partitions or mutated concurrently.
pub struct KeyState<S> {
    pub key: KafkaKey,
    pub state: Option<S>,
    pub last_seen_offset: Offset,
    pub persisted_offset: Option<Offset>,
    last_persisted_at: Option<Instant>,
    cooldown_deadline: Option<Instant>,
    additional_persist_requested: bool,
    /// Snapshot of `(offset, state)` captured the moment a fold called
    /// `request_additional_persist`, so a later record in the same batch
    /// cannot clobber what an honored additional persist actually writes —
    /// it persists the state as of the request, not whatever is live when
    /// the timer evaluation gets around to it.
    pending_additional: Option<(Offset, Option<S>)>,
}

impl<S> KeyState<S> {
    /// A brand-new key, seeing its first record at `first_offset`.
    pub fn new(key: KafkaKey, first_offset: Offset) -> Self {
        Self {
            key,
            state: None,
            last_seen_offset: first_offset,
            persisted_offset: None,
            last_persisted_at: None,
            cooldown_deadline: None,
            additional_persist_requested: false,
            pending_additional: None,
        }
    }

    /// A key pre-populated by eager recovery: its snapshot is already
    /// durable as of `assigned_at_offset`, so it must not hold back the
    /// partition's commit offset.
    pub fn recovered(key: KafkaKey, state: Option<S>, assigned_at_offset: Offset, now: Instant) -> Self {
        Self {
            key,
            state,
            last_seen_offset: assigned_at_offset,
            persisted_offset: Some(assigned_at_offset),
            last_persisted_at: Some(now),
            cooldown_deadline: None,
            additional_persist_requested: false,
            pending_additional: None,
        }
    }

    /// Runs the fold against `record`, advancing `last_seen_offset` only on
    /// success — a failed fold must not move the hold offset.
    pub async fn apply<F>(&mut self, fold: &F, record: &Record) -> Result<(), FoldError>
    where
        F: EnhancedFold<S>,
        S: Clone,
    {
        let mut extras = FoldExtras::default();
        let next_state = fold.fold(&mut extras, self.state.clone(), record).await?;
        self.state = next_state;
        self.last_seen_offset = record.offset;
        if extras.take_requested() {
            self.additional_persist_requested = true;
            self.pending_additional = Some((record.offset, self.state.clone()));
        }
        Ok(())
    }

    /// True if a regular (periodic) persist is due: enough time has passed
    /// since the last persist and there is unpersisted progress.
    pub fn should_persist_regular(&self, now: Instant, persist_every: Duration) -> bool {
        let due = match self.last_persisted_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= persist_every,
        };
        due && self.persisted_offset != Some(self.last_seen_offset)
    }

    /// True if an additional (on-demand) persist was requested and its
    /// per-key cooldown has elapsed.
    pub fn should_persist_additional(&self, policy: &AdditionalPersist, now: Instant) -> bool {
        self.additional_persist_requested && policy.allow(now, self.cooldown_deadline)
    }

    pub fn is_dirty(&self) -> bool {
        self.persisted_offset != Some(self.last_seen_offset)
    }

    /// Deletion has been durably persisted: the key can be dropped from the
    /// partition's live map.
    pub fn is_deleted_and_persisted(&self) -> bool {
        self.state.is_none() && self.persisted_offset == Some(self.last_seen_offset)
    }

    /// Writes current state (or deletes, on `None`) to the snapshot store.
    ///
    /// On success, advances `persisted_offset` to `last_seen_offset`, resets
    /// the cooldown, and clears the additional-persist flag. On failure: if
    /// `ignore_persist_errors` is true the error is logged and swallowed —
    /// `persisted_offset` is *not* advanced, so commits will naturally stall
    /// on this key until a later persist succeeds. Otherwise the error
    /// propagates and the caller should abort the partition.
    pub async fn persist<Store, KS>(
        &mut self,
        store: &Store,
        key_store: &KS,
        clock: &dyn Clock,
        cooldown: Duration,
        ignore_persist_errors: bool,
    ) -> Result<(), PersistError>
    where
        Store: SnapshotStore<S>,
        KS: KeyStore,
        S: Send + Sync,
    {
        let now = clock.now();
        let result = match &self.state {
            Some(state) => store.persist(&self.key, state).await,
            None => store.delete(&self.key).await,
        };

        match result {
            Ok(()) => {
                if self.state.is_none() {
                    let _ = key_store.remove(&self.key).await;
                } else if self.persisted_offset.is_none() {
                    let _ = key_store.add(&self.key).await;
                }
                self.persisted_offset = Some(self.last_seen_offset);
                self.last_persisted_at = Some(now);
                self.cooldown_deadline = Some(now + cooldown);
                self.additional_persist_requested = false;
                self.pending_additional = None;
                debug!(key = %self.key, offset = self.last_seen_offset, "persisted key state");
                Ok(())
            }
            Err(source) => {
                let err = PersistError { key: self.key.clone(), source };
                if ignore_persist_errors {
                    warn!(key = %self.key, error = %err, "ignoring persist error");
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Honors an additional-persist request: writes the `(offset, state)`
    /// snapshot captured when the fold called `request_additional_persist`,
    /// not whatever is live now. Advances `persisted_offset` only to that
    /// snapshot's offset — a record further along in the same batch that
    /// didn't itself request a persist still correctly holds the partition.
    /// No-op if there is no pending request (already superseded by a
    /// regular persist, or never requested).
    pub async fn persist_additional<Store, KS>(
        &mut self,
        store: &Store,
        key_store: &KS,
        clock: &dyn Clock,
        cooldown: Duration,
        ignore_persist_errors: bool,
    ) -> Result<(), PersistError>
    where
        Store: SnapshotStore<S>,
        KS: KeyStore,
        S: Clone + Send + Sync,
    {
        let Some((offset, snapshot)) = self.pending_additional.clone() else {
            return Ok(());
        };
        let now = clock.now();
        let result = match &snapshot {
            Some(state) => store.persist(&self.key, state).await,
            None => store.delete(&self.key).await,
        };

        match result {
            Ok(()) => {
                if snapshot.is_none() {
                    let _ = key_store.remove(&self.key).await;
                } else if self.persisted_offset.is_none() {
                    let _ = key_store.add(&self.key).await;
                }
                self.persisted_offset = Some(offset);
                self.last_persisted_at = Some(now);
                self.cooldown_deadline = Some(now + cooldown);
                self.additional_persist_requested = false;
                self.pending_additional = None;
                debug!(key = %self.key, offset, "persisted key state (additional)");
                Ok(())
            }
            Err(source) => {
                let err = PersistError { key: self.key.clone(), source };
                if ignore_persist_errors {
                    warn!(key = %self.key, error = %err, "ignoring persist error (additional)");
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }
}
