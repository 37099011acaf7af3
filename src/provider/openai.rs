//! Client for OpenAI-compatible chat completion endpoints.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Generation, ProviderCall, ProviderClient, ProviderError};
use crate::config::{ApiKey, ProviderConfig};

/// Context key whose value is sent as the system message.
pub const SYSTEM_CONTEXT_KEY: &str = "system";

/// Chat completion request body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// A chat message.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Chat completion response body. Only the fields concord reads.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub model: Option<String>,
    pub choices: Vec<Choice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// A completion choice.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: Message,
    pub finish_reason: Option<String>,
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Build the request body for one call.
///
/// `context["system"]` becomes a system message; `temperature` and
/// `max_tokens` are honoured when they parse. Other context keys are ignored.
pub fn build_request(call: &ProviderCall<'_>) -> ChatCompletionRequest {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = call.context.get(SYSTEM_CONTEXT_KEY) {
        messages.push(Message {
            role: "system".to_string(),
            content: system.clone(),
        });
    }
    messages.push(Message {
        role: "user".to_string(),
        content: call.prompt.to_string(),
    });

    ChatCompletionRequest {
        model: call.model_id.to_string(),
        messages,
        temperature: call.context.get("temperature").and_then(|v| v.parse().ok()),
        max_tokens: call.context.get("max_tokens").and_then(|v| v.parse().ok()),
    }
}

/// A provider speaking the OpenAI `/chat/completions` dialect.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    name: String,
    url: String,
    api_key: Option<ApiKey>,
    /// Currency per 1000 prompt tokens.
    input_rate: f64,
    /// Currency per 1000 completion tokens.
    output_rate: f64,
    request_timeout: Option<Duration>,
    http: Client,
}

impl OpenAiCompatibleClient {
    pub fn new(config: &ProviderConfig, http: Client) -> Self {
        Self {
            name: config.name.clone(),
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            input_rate: config.input_rate,
            output_rate: config.output_rate,
            request_timeout: config.request_timeout_secs.map(Duration::from_secs),
            http,
        }
    }

    /// Cost of a call from its token counts and the configured rates.
    pub fn cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        (prompt_tokens as f64 * self.input_rate + completion_tokens as f64 * self.output_rate)
            / 1000.0
    }

    fn effective_timeout(&self, remaining: Duration) -> Duration {
        match self.request_timeout {
            Some(limit) => limit.min(remaining),
            None => remaining,
        }
    }
}

#[async_trait]
impl ProviderClient for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, call: ProviderCall<'_>) -> Result<Generation, ProviderError> {
        let timeout = self.effective_timeout(call.timeout);
        let upstream_url = format!("{}/chat/completions", self.url.trim_end_matches('/'));
        let body = build_request(&call);

        let mut request = self.http.post(&upstream_url).timeout(timeout).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(timeout)
            } else {
                ProviderError::Transport(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::debug!(
                provider = %self.name,
                status = %status,
                body = %message,
                "provider returned error status"
            );
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("response has no choices".to_string()))?;

        let usage = parsed.usage.unwrap_or_default();
        let tokens_used = if usage.total_tokens > 0 {
            usage.total_tokens
        } else {
            usage.prompt_tokens + usage.completion_tokens
        };

        Ok(Generation {
            text: choice.message.content,
            tokens_used,
            cost: self.cost(usage.prompt_tokens, usage.completion_tokens),
            confidence: None,
        })
    }
}
