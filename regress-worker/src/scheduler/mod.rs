//! Scheduler layer for the worker
//!
//! Decides which job runs next and keeps the worker looping between the
//! waiting list and the build workflow.

pub mod poller;

pub use poller::{JobPoller, PollExit, PollOptions};
