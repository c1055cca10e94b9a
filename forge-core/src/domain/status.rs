//! Workflow/job/step status state machine
//!
//! A run moves `Created -> Running -> {Passed, Failed, Timeout, Cancelled,
//! Skipped}`. Terminal statuses carry a fixed priority used to derive a
//! stage's status from its jobs and the workflow's status from its stages:
//! the highest-priority status present wins.

use serde::{Deserialize, Serialize};

/// Execution status of a workflow task, stage, job task or step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Created,
    Running,
    Passed,
    Failed,
    Timeout,
    Cancelled,
    Skipped,
}

impl Status {
    /// Aggregation priority. Higher wins when deriving a parent status from
    /// its children. Non-terminal statuses rank below every terminal one.
    pub fn priority(self) -> i32 {
        match self {
            Status::Cancelled => 4,
            Status::Timeout => 3,
            Status::Failed => 2,
            Status::Passed => 1,
            Status::Skipped => 0,
            Status::Created | Status::Running => -1,
        }
    }

    /// Whether this status is terminal: once entered it is never left.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Created | Status::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Created => "created",
            Status::Running => "running",
            Status::Passed => "passed",
            Status::Failed => "failed",
            Status::Timeout => "timeout",
            Status::Cancelled => "cancelled",
            Status::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derives a parent status from child statuses by the priority rule.
///
/// Any child still non-terminal keeps the parent `Running`. An empty child
/// set is vacuously `Passed`.
pub fn aggregate_statuses<I>(statuses: I) -> Status
where
    I: IntoIterator<Item = Status>,
{
    let mut result: Option<Status> = None;
    for status in statuses {
        if !status.is_terminal() {
            return Status::Running;
        }
        result = match result {
            Some(current) if current.priority() >= status.priority() => Some(current),
            _ => Some(status),
        };
    }
    result.unwrap_or(Status::Passed)
}
