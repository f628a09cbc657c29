use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Time source injected into the flow engine. Production code drives
/// [`SystemClock`]; tests drive [`TestClock`] so cooldowns and timer ticks
/// advance deterministically without sleeping real time.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A manually-advanced clock for deterministic tests.
#[derive(Clone)]
pub struct TestClock {
    inner: Arc<Mutex<Instant>>,
}

impl fmt::Debug for TestClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestClock").field("now", &self.now()).finish()
    }
}

impl TestClock {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(Instant::now())) }
    }

    pub fn advance(&self, duration: Duration) {
        let mut guard = self.inner.lock().expect("test clock poisoned");
        *guard += duration;
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        *self.inner.lock().expect("test clock poisoned")
    }
}
