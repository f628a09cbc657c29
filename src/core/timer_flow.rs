use std::time::{Duration, Instant};

use tracing::info;

use crate::core::additional_persist::AdditionalPersist;
use crate::core::clock::Clock;
use crate::core::config::FlowConfig;
use crate::core::errors::PersistError;
use crate::core::key_state::KeyState;
use crate::core::model::KafkaKey;
use crate::stores::key_store::KeyStore;
use crate::stores::snapshot_store::SnapshotStore;

/// Schedules periodic "fire" (flush) and "persist" evaluation for every key
/// in a partition. Evaluation is synchronous, pull-based polling at batch
/// boundaries (see the design note in `SPEC_FULL.md` §9) — there is no
/// timer task per key.
pub struct TimerFlow {
    config: FlowConfig,
    additional_persist: AdditionalPersist,
    last_fired_at: Option<Instant>,
}

impl TimerFlow {
    pub fn new(config: FlowConfig) -> Self {
        let additional_persist = AdditionalPersist::new(config.additional_persist_cooldown);
        Self { config, additional_persist, last_fired_at: None }
    }

    /// True if enough time has elapsed since the last evaluation to run
    /// another one. `fire_every = 0` means "evaluate every batch".
    pub fn should_fire(&self, now: Instant) -> bool {
        if self.config.fire_every.is_zero() {
            return true;
        }
        match self.last_fired_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.config.fire_every,
        }
    }

    /// Evaluates regular and additional persist policy for every key,
    /// persisting the dirty ones. Returns the keys actually persisted.
    ///
    /// Stops and propagates on the first persist error that isn't
    /// swallowed by `ignore_persist_errors`; a partial set of keys may have
    /// already been persisted, which is fine — each persist is independent
    /// and idempotent.
    pub async fn evaluate<S, Store, KS>(
        &mut self,
        keys: &mut std::collections::HashMap<KafkaKey, KeyState<S>>,
        store: &Store,
        key_store: &KS,
        clock: &dyn Clock,
    ) -> Result<Vec<KafkaKey>, PersistError>
    where
        S: Clone + Send + Sync,
        Store: SnapshotStore<S>,
        KS: KeyStore,
    {
        let now = clock.now();
        if !self.should_fire(now) {
            return Ok(Vec::new());
        }
        self.last_fired_at = Some(now);

        let mut persisted = Vec::new();
        for key_state in keys.values_mut() {
            let due_regular = key_state.should_persist_regular(now, self.config.persist_every);
            let due_additional = key_state.should_persist_additional(&self.additional_persist, now);
            if due_regular {
                // A regular persist writes the fully caught-up current
                // state, which supersedes any pending additional-persist
                // snapshot — no need to also run that path this tick.
                key_state
                    .persist(
                        store,
                        key_store,
                        clock,
                        self.config.additional_persist_cooldown,
                        self.config.ignore_persist_errors,
                    )
                    .await?;
                persisted.push(key_state.key.clone());
            } else if due_additional {
                key_state
                    .persist_additional(
                        store,
                        key_store,
                        clock,
                        self.config.additional_persist_cooldown,
                        self.config.ignore_persist_errors,
                    )
                    .await?;
                persisted.push(key_state.key.clone());
            }
        }
        Ok(persisted)
    }

    /// Runs one final persist of every dirty key, swallowing errors — called
    /// on partition revoke when `flush_on_revoke` is enabled.
    pub async fn flush_on_revoke<S, Store, KS>(
        &self,
        keys: &mut std::collections::HashMap<KafkaKey, KeyState<S>>,
        store: &Store,
        key_store: &KS,
        clock: &dyn Clock,
    ) where
        S: Send + Sync,
        Store: SnapshotStore<S>,
        KS: KeyStore,
    {
        if !self.config.flush_on_revoke {
            return;
        }
        for key_state in keys.values_mut() {
            if !key_state.is_dirty() {
                continue;
            }
            // `ignore_persist_errors = true` here regardless of the
            // partition's own setting: §4.4 mandates that revoke-time
            // persist failures are always logged and swallowed, never fatal.
            let _ = key_state
                .persist(store, key_store, clock, self.config.additional_persist_cooldown, true)
                .await;
        }
        info!("flush on revoke complete");
    }

    pub fn fire_every(&self) -> Duration {
        self.config.fire_every
    }
}
