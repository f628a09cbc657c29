use std::time::Instant;

/// Stateless rate-limiting policy for on-demand persists. The cooldown is
/// per key, not global, and applies only to additional persists — regular
/// periodic persists ignore it entirely.
#[derive(Clone, Copy, Debug)]
pub struct AdditionalPersist {
    pub cooldown: std::time::Duration,
}

impl AdditionalPersist {
    pub fn new(cooldown: std::time::Duration) -> Self {
        Self { cooldown }
    }

    /// `deadline` is `None` until the key's first persist; absence means
    /// "never cooled down yet", i.e. always allowed.
    pub fn allow(&self, now: Instant, deadline: Option<Instant>) -> bool {
        match deadline {
            None => true,
            Some(deadline) => now >= deadline,
        }
    }
}
