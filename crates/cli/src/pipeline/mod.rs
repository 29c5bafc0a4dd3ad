//! Relay lifecycle: the supervisor and its run summary.

mod stats;
mod supervisor;

pub use stats::build_summary;
pub use supervisor::{Supervisor, SupervisorOptions};
