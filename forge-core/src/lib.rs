//! Forge Core
//!
//! Core types and abstractions for the Forge CI/CD execution engine.
//!
//! This crate contains:
//! - Domain types: workflow templates, run snapshots, compiled job tasks, steps
//! - The status state machine and priority aggregation rules
//! - The shared error taxonomy used by the compiler, controller and runner

pub mod domain;
pub mod error;
pub mod spec_util;

pub use error::{CoreError, Result};
