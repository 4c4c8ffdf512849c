//! AI-assisted query generation and repair.
//!
//! - [`orchestrator`]: the generate / execute / repair session state machine
//! - [`events`]: statuses and events observed by frontends
//! - [`normalize`]: query text clean-up before execution
//! - [`llm_client`] and [`prompts`]: an OpenAI-compatible generator
//! - [`history`]: execution history recording

pub mod events;
pub mod history;
pub mod llm_client;
pub mod normalize;
pub mod orchestrator;
pub mod prompts;

mod integration_tests;

pub use events::{QueryEvent, SessionStatus};
pub use history::RecordingExecutor;
pub use llm_client::OpenAiCompatibleGenerator;
pub use normalize::normalize_query;
pub use orchestrator::{OrchestrationSession, QueryOrchestrator, EXECUTION_ROW_LIMIT};
