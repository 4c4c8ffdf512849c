use serde::{Deserialize, Serialize};

use crate::collaborators::QueryResult;

/// Observable state of a query session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Generating,
    Retrying,
    Success,
    Error,
    Cancelled,
}

impl SessionStatus {
    /// Whether the session has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Success | SessionStatus::Error | SessionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Generating => "generating",
            SessionStatus::Retrying => "retrying",
            SessionStatus::Success => "success",
            SessionStatus::Error => "error",
            SessionStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Events emitted by the orchestrator while a session runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryEvent {
    /// Session status or progress message changed
    Status {
        status: SessionStatus,
        attempt: u32,
        message: String,
    },

    /// New query text is about to be executed
    QueryText { query_text: String },

    /// Execution succeeded
    Executed { result: QueryResult },

    /// Execution failed
    ExecutionFailed { query_text: String, error: String },
}
