//! Error taxonomy shared by the compiler, controller and step runners
//!
//! The taxonomy mirrors the policy boundaries of the system:
//! - `Decode` is always fatal to the operation in progress;
//! - `Lookup` is skipped during preset population but fatal during final
//!   compilation;
//! - `Execution` marks the owning job task failed;
//! - `Cancelled`/`Timeout` are distinct terminal outcomes ranking above
//!   `Execution` failures during status aggregation.

use thiserror::Error;

use crate::domain::Status;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while compiling, scheduling or executing a workflow
#[derive(Debug, Error)]
pub enum CoreError {
    /// A spec payload does not conform to its variant's schema
    #[error("decode error: {0}")]
    Decode(String),

    /// A referenced entity is missing or unreachable
    #[error("lookup error: {entity} {name}: {detail}")]
    Lookup {
        /// Kind of entity looked up (test definition, service, cluster, ...)
        entity: &'static str,
        name: String,
        detail: String,
    },

    /// A step's subprocess or deploy action failed
    #[error("execution error in step {step}: {detail}")]
    Execution { step: String, detail: String },

    /// The run was cancelled while this operation was in flight
    #[error("cancelled")]
    Cancelled,

    /// The job task exceeded its timeout
    #[error("timed out after {0}s")]
    Timeout(i64),
}

impl CoreError {
    pub fn decode(detail: impl Into<String>) -> Self {
        Self::Decode(detail.into())
    }

    pub fn lookup(entity: &'static str, name: impl Into<String>, detail: impl ToString) -> Self {
        Self::Lookup {
            entity,
            name: name.into(),
            detail: detail.to_string(),
        }
    }

    pub fn execution(step: impl Into<String>, detail: impl ToString) -> Self {
        Self::Execution {
            step: step.into(),
            detail: detail.to_string(),
        }
    }

    /// The terminal status this error maps to for the owning job task.
    pub fn terminal_status(&self) -> Status {
        match self {
            CoreError::Cancelled => Status::Cancelled,
            CoreError::Timeout(_) => Status::Timeout,
            _ => Status::Failed,
        }
    }

    pub fn is_lookup(&self) -> bool {
        matches!(self, Self::Lookup { .. })
    }
}
