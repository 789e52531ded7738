//! Periodic compaction runner.
//!
//! Keeps the journal shallow by folding it into the counters on an
//! interval. Failures back off exponentially and never stop the loop;
//! a failed batch simply stays in the journal for the next pass.

mod scheduler;

pub use scheduler::{CompactionScheduler, SchedulerConfig, retry_delay};
