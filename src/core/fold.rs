use async_trait::async_trait;

use crate::core::errors::FoldError;
use crate::core::model::Record;

/// Side-channel passed to every fold invocation. A fold sets
/// `request_additional_persist` to tell the engine "this key is in a
/// committable state now" — the engine will honor it subject to the
/// per-key cooldown (`AdditionalPersist`).
#[derive(Debug, Default)]
pub struct FoldExtras {
    additional_persist_requested: bool,
}

impl FoldExtras {
    pub fn request_additional_persist(&mut self) {
        self.additional_persist_requested = true;
    }

    pub(crate) fn take_requested(&mut self) -> bool {
        std::mem::take(&mut self.additional_persist_requested)
    }
}

/// The reducer at the heart of the engine: `(state, record) -> new state`.
///
/// Implementations must be deterministic given the same `(state, record)` —
/// recovery replays folds and must reach the same state a live run would
/// have reached. `Ok(None)` signals deletion of the key's state.
#[async_trait]
pub trait EnhancedFold<S>: Send + Sync
where
    S: Send + Sync,
{
    async fn fold(
        &self,
        extras: &mut FoldExtras,
        state: Option<S>,
        record: &Record,
    ) -> Result<Option<S>, FoldError>;
}

/// Adapts a plain synchronous closure to `EnhancedFold`, for folds with no
/// need to request additional persists or perform async effects.
pub struct SyncFold<F> {
    f: F,
}

impl<F> SyncFold<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<S, F> EnhancedFold<S> for SyncFold<F>
where
    S: Send + Sync,
    F: Fn(Option<S>, &Record) -> Result<Option<S>, FoldError> + Send + Sync,
{
    async fn fold(
        &self,
        _extras: &mut FoldExtras,
        state: Option<S>,
        record: &Record,
    ) -> Result<Option<S>, FoldError> {
        (self.f)(state, record)
    }
}
