//! Regress Core
//!
//! Core types and wire codec for the regression-test queue.
//!
//! This crate contains:
//! - Domain types: job ids and states, commit snapshots
//! - Protocol: request encoding, response literals, percent-coding and
//!   parsers for queue responses

pub mod domain;
pub mod protocol;
