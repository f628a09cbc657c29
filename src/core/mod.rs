pub mod additional_persist;
pub mod clock;
pub mod config;
pub mod eager_recovery;
pub mod errors;
pub mod fold;
pub mod key_state;
pub mod model;
pub mod offset_tracker;
pub mod partition_flow;
pub mod timer_flow;

pub use clock::{Clock, SystemClock, TestClock};
pub use config::FlowConfig;
pub use errors::{FoldError, PartitionFlowError, PersistError, RecoveryError, StoreError};
pub use fold::{EnhancedFold, FoldExtras, SyncFold};
pub use key_state::KeyState;
pub use model::{KafkaKey, Offset, Record, TopicPartition};
pub use partition_flow::PartitionFlow;
