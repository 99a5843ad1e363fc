//! Bridges a rig-core `CompletionModel` to `LlmProvider`.
//!
//! System messages become the rig preamble, the last user message is the
//! prompt and everything before it is passed as chat history.

use async_trait::async_trait;
use rig::OneOrMany;
use rig::completion::{AssistantContent, CompletionModel, Message};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
};

pub struct RigAdapter<M> {
    model: M,
    model_name: String,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
        }
    }
}

fn to_rig_message(message: &ChatMessage) -> Option<Message> {
    match message.role {
        Role::User => Some(Message::user(message.content.clone())),
        Role::Assistant => Some(Message::assistant(message.content.clone())),
        Role::System => None,
    }
}

fn collect_text(choice: &OneOrMany<AssistantContent>) -> String {
    choice
        .iter()
        .filter_map(|content| match content {
            AssistantContent::Text(text) => Some(text.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut history: Vec<Message> = request.messages.iter().filter_map(to_rig_message).collect();
        let prompt = history.pop().ok_or_else(|| LlmError::RequestFailed {
            provider: self.model_name.clone(),
            reason: "completion request has no user message".into(),
        })?;

        let mut builder = self.model.completion_request(prompt).messages(history);
        if let Some(system) = request.system_text() {
            builder = builder.preamble(system);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }

        let response = builder.send().await.map_err(|e| LlmError::RequestFailed {
            provider: self.model_name.clone(),
            reason: e.to_string(),
        })?;

        let content = collect_text(&response.choice);
        if content.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.model_name.clone(),
                reason: "response contained no text".into(),
            });
        }

        tracing::debug!(
            model = %self.model_name,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Completion finished"
        );

        Ok(CompletionResponse {
            content,
            input_tokens: u32::try_from(response.usage.input_tokens).unwrap_or(u32::MAX),
            output_tokens: u32::try_from(response.usage.output_tokens).unwrap_or(u32::MAX),
            finish_reason: FinishReason::Stop,
        })
    }
}
