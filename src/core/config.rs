use std::time::Duration;

/// The six tunables enumerated in `SPEC_FULL.md` §6, owned by the engine
/// (not the ambient application `Settings`, which merely supplies them).
#[derive(Clone, Debug)]
pub struct FlowConfig {
    /// Minimum interval between scheduled commits. First commit after
    /// assignment is exempt, see `OffsetTracker`.
    pub commit_offsets_interval: Duration,
    /// How often timer evaluation runs. Zero means "every batch". Kept
    /// distinct from `fire_every` for config-schema fidelity with the
    /// upstream naming, but `TimerFlow` reads `fire_every` for its own
    /// fire-gate and treats the two as the same knob; callers should set
    /// them equal.
    pub trigger_timers_interval: Duration,
    /// Minimum interval between regular persists, per key.
    pub persist_every: Duration,
    /// Timer fire interval (how often `fireEvery` is evaluated).
    pub fire_every: Duration,
    /// Per-key cooldown between additional (on-demand) persists.
    pub additional_persist_cooldown: Duration,
    /// Attempt one final persist of every dirty key on revoke.
    pub flush_on_revoke: bool,
    /// If true, persist failures are logged and swallowed rather than
    /// propagated to the partition flow.
    pub ignore_persist_errors: bool,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            commit_offsets_interval: Duration::from_secs(60),
            trigger_timers_interval: Duration::ZERO,
            persist_every: Duration::from_secs(60),
            fire_every: Duration::ZERO,
            additional_persist_cooldown: Duration::from_secs(5),
            flush_on_revoke: true,
            ignore_persist_errors: false,
        }
    }
}

impl FlowConfig {
    /// Config tuned for tests: everything evaluates synchronously, every
    /// batch, with no cooldown.
    pub fn immediate() -> Self {
        Self {
            commit_offsets_interval: Duration::ZERO,
            trigger_timers_interval: Duration::ZERO,
            persist_every: Duration::ZERO,
            fire_every: Duration::ZERO,
            additional_persist_cooldown: Duration::ZERO,
            flush_on_revoke: true,
            ignore_persist_errors: false,
        }
    }
}
