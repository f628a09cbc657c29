use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::core::key_state::KeyState;
use crate::core::model::{KafkaKey, Offset};

/// Computes the partition-wide safe commit offset and arbitrates when a
/// commit should actually be scheduled, per `SPEC_FULL.md` §4.5.
pub struct OffsetTracker {
    assigned_at_offset: Offset,
    last_committed_offset: Option<Offset>,
    last_commit_at: Option<Instant>,
    commit_offsets_interval: Duration,
    any_record_processed: bool,
}

impl OffsetTracker {
    pub fn new(assigned_at_offset: Offset, commit_offsets_interval: Duration) -> Self {
        Self {
            assigned_at_offset,
            last_committed_offset: None,
            last_commit_at: None,
            commit_offsets_interval,
            any_record_processed: false,
        }
    }

    pub fn record_processed(&mut self) {
        self.any_record_processed = true;
    }

    /// `safe` per key: the next offset whose effect is durable. A key fully
    /// caught up (persisted == seen) holds `seen + 1`; a lagging key holds
    /// `persisted + 1`, or `assigned_at_offset` if it has never persisted.
    fn key_safe_next_offset<S>(&self, key_state: &KeyState<S>) -> Offset {
        match key_state.persisted_offset {
            Some(persisted) if persisted == key_state.last_seen_offset => persisted + 1,
            Some(persisted) => persisted + 1,
            None => self.assigned_at_offset,
        }
    }

    /// The current safe commit offset across all live keys.
    pub fn safe_commit_offset<S>(&self, keys: &HashMap<KafkaKey, KeyState<S>>) -> Offset {
        if keys.is_empty() {
            let floor = self.last_committed_offset.unwrap_or(self.assigned_at_offset - 1);
            return if self.any_record_processed {
                std::cmp::max(floor, self.assigned_at_offset)
            } else {
                floor
            };
        }
        keys.values().map(|ks| self.key_safe_next_offset(ks)).min().expect("non-empty map")
    }

    /// Decides whether a commit should be scheduled right now, and if so
    /// records the bookkeeping (`last_committed_offset`, `last_commit_at`).
    /// The very first commit after assignment is exempt from the interval
    /// gate so progress is observable immediately.
    pub fn maybe_commit<S>(
        &mut self,
        keys: &HashMap<KafkaKey, KeyState<S>>,
        now: Instant,
    ) -> Option<Offset> {
        let safe = self.safe_commit_offset(keys);
        let progressed = match self.last_committed_offset {
            Some(committed) => safe > committed,
            None => safe > self.assigned_at_offset - 1,
        };
        if !progressed {
            return None;
        }

        let interval_elapsed = match self.last_commit_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.commit_offsets_interval,
        };
        if !interval_elapsed {
            return None;
        }

        self.last_committed_offset = Some(safe);
        self.last_commit_at = Some(now);
        Some(safe)
    }

    pub fn last_committed_offset(&self) -> Option<Offset> {
        self.last_committed_offset
    }
}
