//! Service layer
//!
//! Services hold the worker's business logic: keeping the checkouts in
//! shape, running builds, and walking a job through its lifecycle. They
//! reach the outside world only through [`QueueApi`](regress_client::QueueApi)
//! and [`CommandRunner`](crate::process::CommandRunner), so every service
//! can be exercised against in-memory doubles.

mod pipeline;
mod repository;
mod workflow;

pub use workflow::{JobOutcome, Workflow};
