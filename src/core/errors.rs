use crate::core::model::{KafkaKey, Offset};
use thiserror::Error;

/// User code failed on a record. Fatal to the batch: the partition flow
/// surfaces this to the dispatcher, which may restart the partition.
#[derive(Debug, Error)]
#[error("fold failed for key {key} at offset {offset}: {source}")]
pub struct FoldError {
    pub key: KafkaKey,
    pub offset: Offset,
    #[source]
    pub source: anyhow::Error,
}

impl FoldError {
    pub fn new(key: KafkaKey, offset: Offset, source: impl Into<anyhow::Error>) -> Self {
        Self { key, offset, source: source.into() }
    }
}

/// A `SnapshotStore` write failed.
///
/// `Transient` is the category a store implementation uses for failures an
/// external retry policy should retry (see `stores::retry`); the core never
/// retries either variant itself.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transient store error: {0}")]
    Transient(#[source] anyhow::Error),
    #[error("permanent store error: {0}")]
    Permanent(#[source] anyhow::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// A persist attempt failed. Carries the key so callers can log it and,
/// when `ignore_persist_errors` is false, abort the partition.
#[derive(Debug, Error)]
#[error("persist failed for key {key}: {source}")]
pub struct PersistError {
    pub key: KafkaKey,
    #[source]
    pub source: StoreError,
}

/// Failure to load initial snapshot(s) during eager recovery. Fatal to
/// partition assignment; the dispatcher retries with backoff.
#[derive(Debug, Error)]
#[error("recovery failed: {source}")]
pub struct RecoveryError {
    #[source]
    pub source: anyhow::Error,
}

/// Top-level error surfaced by `PartitionFlow::apply` and `TopicFlow`.
#[derive(Debug, Error)]
pub enum PartitionFlowError {
    #[error(transparent)]
    Fold(#[from] FoldError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Recovery(#[from] RecoveryError),
    #[error("no partition flow assigned for {0}")]
    NotAssigned(crate::core::model::TopicPartition),
}
