//! Forge Orchestrator
//!
//! Server side of the Forge CI/CD execution engine.
//!
//! Architecture:
//! - Compiler: turns polymorphic job declarations plus live catalog lookups
//!   into concrete executable job tasks
//! - Controller: runs stages sequentially and jobs within a stage
//!   concurrently, owns the status state machine and cancellation registry
//! - Repository: the workflow-task persistence contract with an in-memory
//!   implementation
//!
//! The HTTP/gRPC API surface, webhook ingestion and concrete catalog clients
//! live outside this crate and plug in through the ports defined here.

pub mod compiler;
pub mod controller;
pub mod repository;
