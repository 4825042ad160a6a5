//! Core domain types
//!
//! This module contains the structures shared by the queue client and the
//! worker: job identity and state, and the commit snapshot a job builds.

pub mod job;
pub mod snapshot;

pub use job::{JobId, JobState, JobStatus};
pub use snapshot::{Integration, Snapshot};
