pub mod schedule_commit;

pub use schedule_commit::{ChannelScheduleCommit, CommitRequest, ScheduleCommit};
