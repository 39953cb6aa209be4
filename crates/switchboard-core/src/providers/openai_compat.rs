//! OpenAI-compatible backend for OpenAI, Ollama, Together, Groq, LM Studio, etc.
//!
//! Speaks the `/chat/completions` wire format against a configurable base URL
//! (e.g. `https://api.openai.com/v1` or `http://localhost:11434/v1`).

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::tools::ToolDefinition;

use super::types::{
    ChatMessage, GenerateOptions, Generation, ModelBackend, NativeToolCall, TokenUsage,
};

/// OpenAI-compatible chat completions backend
pub struct OpenAiCompatBackend {
    client: Client,
    name: String,
    api_key: String,
    base_url: String,
    max_tokens: u32,
}

impl std::fmt::Debug for OpenAiCompatBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatBackend")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl OpenAiCompatBackend {
    /// - `name`: human-readable label (e.g. "openai", "ollama", "groq")
    /// - `base_url`: the endpoint root including the version segment
    pub fn new(name: String, api_key: String, base_url: String, max_tokens: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            name,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_tokens,
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            request
        } else {
            request.header("Authorization", format!("Bearer {}", self.api_key))
        }
    }

    fn to_openai_messages(messages: &[ChatMessage]) -> Vec<OpenAiMessage> {
        messages
            .iter()
            .map(|m| OpenAiMessage {
                role: m.role.to_string(),
                content: Some(m.content.clone()),
            })
            .collect()
    }

    fn to_openai_tools(tools: &[ToolDefinition]) -> Vec<OpenAiToolDef> {
        tools
            .iter()
            .map(|t| OpenAiToolDef {
                r#type: "function".to_string(),
                function: OpenAiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect()
    }

    fn from_openai_response(&self, resp: OpenAiApiResponse) -> Result<Generation> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("{} response had no choices", self.name))?;

        let tool_calls: Vec<NativeToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| NativeToolCall {
                id: tc.id,
                name: tc.function.name,
                input: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(Value::Object(serde_json::Map::new())),
            })
            .collect();

        let mut metadata = serde_json::Map::new();
        metadata.insert("provider".to_string(), Value::from(self.name.clone()));
        if let Some(reason) = choice.finish_reason {
            metadata.insert("finish_reason".to_string(), Value::from(reason));
        }

        Ok(Generation {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            usage: resp.usage.map_or(TokenUsage::default(), |u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            }),
            metadata,
        })
    }
}

#[async_trait]
impl ModelBackend for OpenAiCompatBackend {
    fn provider_name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &GenerateOptions,
    ) -> Result<Generation> {
        let url = format!("{}/chat/completions", self.base_url);
        let openai_messages = Self::to_openai_messages(messages);

        let mut body = serde_json::json!({
            "model": model,
            "max_tokens": options.max_tokens.unwrap_or(self.max_tokens),
            "messages": openai_messages,
        });
        if let Some(temperature) = options.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if !options.tools.is_empty() {
            body["tools"] = serde_json::to_value(Self::to_openai_tools(&options.tools))?;
        }

        debug!(
            "{} request: model={}, messages={}",
            self.name,
            model,
            openai_messages.len()
        );

        let response = self
            .authorized(self.client.post(&url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", self.name))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "{} request failed with status {}: {}",
                self.name,
                status,
                error_text
            ));
        }

        let api_response: OpenAiApiResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", self.name))?;

        self.from_openai_response(api_response)
    }

    async fn is_available(&self) -> bool {
        self.list_models().await.is_ok()
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .with_context(|| format!("Failed to list {} models", self.name))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "{} model listing failed with status {}",
                self.name,
                response.status()
            ));
        }

        let listing: OpenAiModelList = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} model list", self.name))?;
        Ok(listing.data.into_iter().map(|m| m.id).collect())
    }
}

// ── OpenAI wire types ──

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiToolDef {
    r#type: String,
    function: OpenAiToolFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiApiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunction,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiModelList {
    data: Vec<OpenAiModel>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiModel {
    id: String,
}
