//! OpenAI-compatible chat completions client used as the query generator.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::prompts::{build_generation_prompt, build_repair_prompt, SYSTEM_PROMPT};
use crate::collaborators::{GeneratedQuery, GenerationRequest, QueryGenerator, RepairRequest};
use crate::settings::ModelConfig;

/// Lowest completion budget sent to the provider.
const MIN_COMPLETION_TOKENS: u32 = 512;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

/// Generates and repairs queries through any OpenAI-compatible API.
#[derive(Debug, Clone, Default)]
pub struct OpenAiCompatibleGenerator {
    client: reqwest::Client,
}

impl OpenAiCompatibleGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    async fn complete(
        &self,
        config: &ModelConfig,
        user_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<GeneratedQuery> {
        validate_config(config)?;

        let body = ChatCompletionRequest {
            model: config.model_name.trim(),
            temperature: config.temperature.clamp(0.0, 1.0),
            max_tokens: config.max_tokens.max(MIN_COMPLETION_TOKENS),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
        };
        let url = resolve_completion_url(&config.endpoint);
        tracing::debug!("Requesting completion from {} with model {}", url, body.model);

        let request = self
            .client
            .post(&url)
            .bearer_auth(config.credential.trim())
            .json(&body)
            .send();
        let response = tokio::select! {
            response = request => response.context("AI request failed")?,
            _ = cancel.cancelled() => bail!("AI request cancelled"),
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("AI provider returned error ({}): {}", status, body);
        }

        let completion: ChatCompletionResponse =
            response.json().await.context("Invalid AI response")?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .context("AI provider returned empty content")?;

        parse_model_response(&content)
    }
}

#[async_trait]
impl QueryGenerator for OpenAiCompatibleGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
        config: &ModelConfig,
        cancel: &CancellationToken,
    ) -> Result<GeneratedQuery> {
        self.complete(config, &build_generation_prompt(request), cancel)
            .await
    }

    async fn repair(
        &self,
        request: &RepairRequest,
        config: &ModelConfig,
        cancel: &CancellationToken,
    ) -> Result<GeneratedQuery> {
        self.complete(config, &build_repair_prompt(request), cancel)
            .await
    }
}

/// Reject configs that cannot possibly reach a provider.
pub fn validate_config(config: &ModelConfig) -> Result<()> {
    if config.endpoint.trim().is_empty() {
        bail!("AI endpoint is required");
    }
    if config.credential.trim().is_empty() {
        bail!("AI API key is required");
    }
    if config.model_name.trim().is_empty() {
        bail!("AI model name is required");
    }
    Ok(())
}

/// Append `/chat/completions` to a base URL unless it is already there.
pub fn resolve_completion_url(endpoint: &str) -> String {
    let normalized = endpoint.trim().trim_end_matches('/');
    if normalized.ends_with("/chat/completions") {
        normalized.to_string()
    } else {
        format!("{}/chat/completions", normalized)
    }
}

/// Extract the query from a model answer.
///
/// Prefers a JSON object with `sql` and `reasoning`, inside a ```json fence
/// or as the outermost braces. Anything else is taken as bare query text.
pub fn parse_model_response(content: &str) -> Result<GeneratedQuery> {
    if let Some(candidate) = extract_json_block(content) {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            if let Some(sql) = value
                .get("sql")
                .and_then(Value::as_str)
                .filter(|sql| !sql.trim().is_empty())
            {
                let rationale = value
                    .get("reasoning")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(String::from);
                return Ok(GeneratedQuery {
                    query_text: sql.to_string(),
                    rationale,
                });
            }
        }
    }

    let cleaned = content.trim().trim_matches('`').trim();
    if cleaned.is_empty() {
        bail!("Model returned no SQL");
    }
    Ok(GeneratedQuery {
        query_text: cleaned.to_string(),
        rationale: None,
    })
}

fn extract_json_block(content: &str) -> Option<&str> {
    if let Some(start) = content.find("```json") {
        let remainder = &content[start + "```json".len()..];
        if let Some(end) = remainder.find("```") {
            return Some(remainder[..end].trim());
        }
    }

    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end > start).then(|| content[start..=end].trim())
}
