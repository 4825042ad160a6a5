//! Job domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::protocol::CodecError;

/// Queue-assigned job identifier
///
/// Ids travel over the wire in canonical decimal form. A string is only a
/// valid id if parsing it and rendering it back gives the same string, so
/// `"007"`, `"+7"` and `" 7"` are all rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(u64);

impl JobId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s
            .parse::<u64>()
            .map_err(|_| CodecError::InvalidJobId(s.to_string()))?;

        if id.to_string() != s {
            return Err(CodecError::InvalidJobId(s.to_string()));
        }

        Ok(Self(id))
    }
}

/// Server-side job state
///
/// Transitions only move forward: Waiting -> Running -> Stopped, or
/// Running -> Aborted. The worker never sets these directly, it asks the
/// queue for a transition and the queue decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Waiting,
    Running,
    Stopped,
    Aborted,
}

/// Outcome of a job as read from its output text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Success,
    Failure,
    Aborted,
}

impl JobStatus {
    /// Infers the outcome from free-form job output
    ///
    /// The first line mentioning `FAILED` or `SUCCESS` decides. Output that
    /// mentions neither belongs to a job that never finished.
    pub fn infer(output: &str) -> Self {
        for line in output.lines() {
            if line.contains("FAILED") {
                return JobStatus::Failure;
            }
            if line.contains("SUCCESS") {
                return JobStatus::Success;
            }
        }
        JobStatus::Aborted
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Success => write!(f, "success"),
            JobStatus::Failure => write!(f, "failure"),
            JobStatus::Aborted => write!(f, "aborted"),
        }
    }
}
