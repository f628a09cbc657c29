//! `keyflow` is a library for building stateful stream-processing
//! applications over a partitioned, replayable log (Kafka).
//!
//! The reusable surface is the per-partition flow engine in [`core`]: it
//! maintains the set of live keys and their folded states, arbitrates when
//! state is flushed to a [`stores::SnapshotStore`], tracks which offset is
//! safe to commit, and bootstraps prior state via eager recovery before
//! normal consumption begins. [`dispatch::TopicFlow`] maps partitions to
//! `core::PartitionFlow` instances and drives their assign/revoke
//! lifecycle; [`commit`] carries the resulting commit decisions back to an
//! external committer. [`stores`] ships two concrete `SnapshotStore`s (an
//! in-memory one for tests, and a Kafka-compacted-topic-backed one) plus a
//! retry decorator. [`infra`] is ambient application plumbing (config, CLI,
//! logging) used by the demo binary, not part of the engine itself.

pub mod commit;
pub mod core;
pub mod dispatch;
pub mod infra;
pub mod stores;
