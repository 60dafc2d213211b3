//! Job execution lifecycle.
//!
//! - [`JobExecutor`] creates jobs, follows their pods and finalizes results
//! - [`JobExecutorBuilder`] wires its collaborators
//! - [`TimeoutMonitor`] turns deadline kills into timeout finalization
//! - [`ExecutionScope`] owns the background tasks of executions

mod builder;
mod job;
mod monitor;
mod scope;

pub use builder::JobExecutorBuilder;
pub use job::{
    ABORTED_TRAILER, JobExecutor, NEGATIVE_PASSED_TRAILER, NEGATIVE_REVERSED_TRAILER,
    TIMEOUT_TRAILER,
};
pub use monitor::{DEADLINE_EXCEEDED, MonitorOutcome, TimeoutHandler, TimeoutMonitor};
pub use scope::{CancelToken, ExecutionScope};
