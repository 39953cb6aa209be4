//! Anthropic Claude backend

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::types::{
    ChatMessage, ChatRole, GenerateOptions, Generation, ModelBackend, NativeToolCall, TokenUsage,
    split_system,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API backend
pub struct AnthropicBackend {
    client: Client,
    api_key: String,
    base_url: String,
    max_tokens: u32,
}

impl std::fmt::Debug for AnthropicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicBackend")
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl AnthropicBackend {
    pub fn new(api_key: String, base_url: String, max_tokens: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_tokens,
        })
    }

    /// Convert provider-agnostic messages to Anthropic wire format
    fn to_anthropic_messages(messages: &[&ChatMessage]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .map(|m| AnthropicMessage {
                role: match m.role {
                    ChatRole::Assistant => "assistant",
                    _ => "user",
                }
                .to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    fn from_anthropic_response(resp: AnthropicApiResponse) -> Generation {
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in resp.content {
            match block {
                AnthropicBlock::Text { text: t } => {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&t);
                }
                AnthropicBlock::ToolUse { id, name, input } => {
                    tool_calls.push(NativeToolCall { id, name, input })
                }
            }
        }

        let mut metadata = serde_json::Map::new();
        metadata.insert("provider".to_string(), Value::from("anthropic"));
        metadata.insert("response_id".to_string(), Value::from(resp.id));
        if let Some(reason) = resp.stop_reason {
            metadata.insert("stop_reason".to_string(), Value::from(reason));
        }

        Generation {
            content: text,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            usage: TokenUsage {
                input_tokens: resp.usage.input_tokens,
                output_tokens: resp.usage.output_tokens,
            },
            metadata,
        }
    }
}

#[async_trait]
impl ModelBackend for AnthropicBackend {
    fn provider_name(&self) -> &str {
        "anthropic"
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &GenerateOptions,
    ) -> Result<Generation> {
        let url = format!("{}/v1/messages", self.base_url);
        let (system, rest) = split_system(messages);
        let anthropic_messages = Self::to_anthropic_messages(&rest);

        let mut body = serde_json::json!({
            "model": model,
            "max_tokens": options.max_tokens.unwrap_or(self.max_tokens),
            "messages": anthropic_messages,
        });
        if !system.is_empty() {
            body["system"] = Value::from(system);
        }
        if let Some(temperature) = options.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if !options.tools.is_empty() {
            body["tools"] = serde_json::to_value(&options.tools)?;
        }

        debug!(
            "Anthropic request: model={}, messages={}",
            model,
            anthropic_messages.len()
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Failed to send request to Anthropic API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Anthropic API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: AnthropicApiResponse = response
            .json()
            .await
            .context("Failed to parse Anthropic API response")?;

        debug!(
            "Anthropic response: blocks={}, stop_reason={:?}",
            api_response.content.len(),
            api_response.stop_reason
        );

        Ok(Self::from_anthropic_response(api_response))
    }

    async fn is_available(&self) -> bool {
        self.list_models().await.is_ok()
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await
            .context("Failed to list Anthropic models")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Anthropic model listing failed with status {}",
                response.status()
            ));
        }

        let listing: AnthropicModelList = response
            .json()
            .await
            .context("Failed to parse Anthropic model list")?;
        Ok(listing.data.into_iter().map(|m| m.id).collect())
    }
}

// ── Anthropic wire types ──

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicApiResponse {
    id: String,
    content: Vec<AnthropicBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicModelList {
    data: Vec<AnthropicModel>,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicModel {
    id: String,
}
