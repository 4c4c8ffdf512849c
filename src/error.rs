use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssistError {
    #[error("AI assistant is disabled; switch to AI mode first")]
    AssistantDisabled,

    #[error("Prompt is empty")]
    EmptyPrompt,

    #[error("A query session is already in progress")]
    Busy,

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for AssistError {
    fn from(err: anyhow::Error) -> Self {
        AssistError::Internal(error_message(&err))
    }
}

// Frontends receive the display text
impl Serialize for AssistError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AssistError>;

/// User-facing text of a collaborator error, including its context chain.
pub fn error_message(err: &anyhow::Error) -> String {
    format!("{:#}", err)
}
