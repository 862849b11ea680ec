//! Assistant agent: a thin completion wrapper over an LLM client.
//!
//! Input schema for the `assistant.complete` task type:
//! ```json
//! { "prompt": "…", "system": "optional system prompt" }
//! ```
//! Schema violations come back as `invalid_input`; downstream API failures
//! as `upstream_unavailable`. Without a configured client the agent runs in
//! offline mode and returns a canned reply, so a missing API key never
//! blocks startup.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Agent, AgentId};
use crate::llm::{ChatMessage, LlmClient};
use crate::task::TaskFailure;

/// Task type handled by [`AssistantAgent`].
pub const COMPLETE_TASK_TYPE: &str = "assistant.complete";

pub struct AssistantAgent {
    id: AgentId,
    name: String,
    model: String,
    /// None = offline mode (no credentials configured).
    client: Option<Arc<dyn LlmClient>>,
}

impl AssistantAgent {
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        client: Option<Arc<dyn LlmClient>>,
    ) -> Self {
        Self {
            id: AgentId::new(),
            name: name.into(),
            model: model.into(),
            client,
        }
    }

    /// Whether this agent has a live LLM client.
    pub fn is_online(&self) -> bool {
        self.client.is_some()
    }

    fn parse_input(input: &Value) -> Result<(String, Option<String>), TaskFailure> {
        let prompt = input
            .get("prompt")
            .and_then(Value::as_str)
            .ok_or_else(|| TaskFailure::invalid_input("missing string field 'prompt'"))?;
        if prompt.trim().is_empty() {
            return Err(TaskFailure::invalid_input("'prompt' must be non-empty"));
        }
        let system = match input.get("system") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                return Err(TaskFailure::invalid_input(
                    "'system' must be a string when present",
                ))
            }
        };
        Ok((prompt.to_string(), system))
    }
}

#[async_trait]
impl Agent for AssistantAgent {
    fn id(&self) -> AgentId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supported_task_types(&self) -> Vec<String> {
        vec![COMPLETE_TASK_TYPE.to_string()]
    }

    async fn on_start(&self) -> Result<(), super::AgentStartError> {
        if self.client.is_none() {
            warn!(
                agent = %self.name,
                "No LLM credentials configured; assistant runs in offline mode"
            );
        }
        Ok(())
    }

    async fn process_task(&self, task_type: &str, input: &Value) -> Result<Value, TaskFailure> {
        if task_type != COMPLETE_TASK_TYPE {
            return Err(TaskFailure::invalid_input(format!(
                "assistant agent cannot handle task type '{}'",
                task_type
            )));
        }

        let (prompt, system) = Self::parse_input(input)?;

        let client = match &self.client {
            Some(c) => c,
            None => {
                // Offline mode: degraded canned reply rather than an error.
                return Ok(json!({
                    "reply": "assistant is offline (no API credentials configured)",
                    "offline": true,
                }));
            }
        };

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(prompt));

        let response = client
            .chat(&self.model, &messages)
            .await
            .map_err(|e| TaskFailure::upstream(e.to_string()))?;

        debug!(
            agent = %self.name,
            model = %response.model,
            prompt_tokens = response.prompt_tokens,
            completion_tokens = response.completion_tokens,
            "Completion finished"
        );

        Ok(json!({
            "reply": response.content,
            "model": response.model,
            "offline": false,
        }))
    }
}
