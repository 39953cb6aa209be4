//! Runtime agent: a descriptor bound to a model backend

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::context::HistoryEntry;
use crate::error::{Result, SwitchboardError, with_timeout};
use crate::prompt::build_agent_system_prompt;
use crate::providers::{ChatMessage, GenerateOptions, ModelBackend};
use crate::tools::ToolDefinition;
use crate::types::Response;

use super::profile::AgentDescriptor;

/// Per-call inputs for [`Agent::process`]
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    pub conversation_id: String,
    /// Prior turns, oldest first
    pub history: Vec<HistoryEntry>,
    /// Used verbatim instead of the descriptor-derived system prompt
    pub system_prompt_override: Option<String>,
}

impl AgentContext {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: Vec<HistoryEntry>) -> Self {
        self.history = history;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt_override = Some(prompt.into());
        self
    }
}

/// A configured persona that turns one message plus history into a reply.
///
/// At most one [`Agent::process`] call may be in flight per agent.
pub struct Agent {
    descriptor: AgentDescriptor,
    backend: Arc<dyn ModelBackend>,
    tools: Vec<ToolDefinition>,
    model: String,
    timeout_ms: u64,
    history_window: usize,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when the call finishes, including on error or drop
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Agent {
    pub fn new(
        descriptor: AgentDescriptor,
        backend: Arc<dyn ModelBackend>,
        default_model: &str,
    ) -> Self {
        let model = descriptor
            .model
            .clone()
            .unwrap_or_else(|| default_model.to_string());
        info!("Agent '{}' ready (model: {})", descriptor.id, model);
        Self {
            descriptor,
            backend,
            tools: Vec::new(),
            model,
            timeout_ms: 60_000,
            history_window: 10,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Tool definitions advertised in the system prompt
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_history_window(mut self, history_window: usize) -> Self {
        self.history_window = history_window;
        self
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn build_messages(&self, content: &str, context: &AgentContext) -> Vec<ChatMessage> {
        let system = context
            .system_prompt_override
            .clone()
            .unwrap_or_else(|| build_agent_system_prompt(&self.descriptor, &self.tools));

        let start = context.history.len().saturating_sub(self.history_window);
        let mut messages = Vec::with_capacity(2 + 2 * (context.history.len() - start));
        messages.push(ChatMessage::system(system));
        for entry in &context.history[start..] {
            messages.push(ChatMessage::user(entry.message.content.clone()));
            messages.push(ChatMessage::assistant(entry.response.content.clone()));
        }
        messages.push(ChatMessage::user(content));
        messages
    }

    /// Generate a reply to `content`. Fails with [`SwitchboardError::AgentBusy`]
    /// if this agent is already processing a message.
    pub async fn process(&self, content: &str, context: &AgentContext) -> Result<Response> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SwitchboardError::AgentBusy(self.descriptor.id.clone()));
        }
        let _guard = InFlightGuard(&self.in_flight);

        let messages = self.build_messages(content, context);
        debug!(
            "Agent {} processing message in conversation {} ({} messages)",
            self.descriptor.id,
            context.conversation_id,
            messages.len()
        );

        let options = GenerateOptions::default();
        let generation = with_timeout(
            &format!("agent '{}' generation", self.descriptor.id),
            self.timeout_ms,
            async {
                self.backend
                    .generate(&messages, &self.model, &options)
                    .await
                    .map_err(SwitchboardError::ModelBackend)
            },
        )
        .await?;

        debug!(
            "Agent {} replied ({} chars, {} tokens)",
            self.descriptor.id,
            generation.content.len(),
            generation.usage.total()
        );

        let mut response = Response::new(generation.content)
            .with_metadata("agent_id", self.descriptor.id.clone().into())
            .with_metadata("model", self.model.clone().into())
            .with_metadata("provider", self.backend.provider_name().into());
        for (key, value) in generation.metadata {
            response.metadata.entry(key).or_insert(value);
        }
        Ok(response)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.descriptor.id)
            .field("model", &self.model)
            .field("busy", &self.is_busy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;
    use crate::types::Message;

    fn agent(backend: Arc<MockBackend>) -> Agent {
        Agent::new(
            AgentDescriptor::new("coder", "Code Agent").with_role("developer"),
            backend,
            "test-model",
        )
    }

    #[tokio::test]
    async fn test_process_returns_backend_text() {
        let backend = Arc::new(MockBackend::new().with_reply("hello there"));
        let agent = agent(backend.clone());
        let response = agent.process("hi", &AgentContext::new("c1")).await.unwrap();
        assert_eq!(response.content, "hello there");
        assert_eq!(response.metadata["agent_id"], "coder");
        assert_eq!(response.metadata["model"], "test-model");
        assert_eq!(backend.calls(), 1);
        assert!(!agent.is_busy());
    }

    #[tokio::test]
    async fn test_system_prompt_override_used_verbatim() {
        let backend = Arc::new(MockBackend::new().with_reply("ok"));
        let agent = agent(backend.clone());
        let ctx = AgentContext::new("c1").with_system_prompt("You are terse.");
        agent.process("hi", &ctx).await.unwrap();
        let sent = backend.last_messages().unwrap();
        assert_eq!(sent[0].content, "You are terse.");
        assert_eq!(sent.last().unwrap().content, "hi");
    }

    #[tokio::test]
    async fn test_history_window_limits_turns() {
        let backend = Arc::new(MockBackend::new().with_reply("ok"));
        let agent = agent(backend.clone()).with_history_window(1);
        let history = (0..3)
            .map(|i| HistoryEntry {
                message: Message::user("c1", format!("q{}", i)),
                response: Response::new(format!("a{}", i)),
                timestamp: chrono::Utc::now(),
                agent_id: "coder".to_string(),
            })
            .collect();
        agent
            .process("next", &AgentContext::new("c1").with_history(history))
            .await
            .unwrap();
        let sent = backend.last_messages().unwrap();
        // system + one turn (user, assistant) + new message
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[1].content, "q2");
        assert_eq!(sent[2].content, "a2");
    }

    #[tokio::test]
    async fn test_concurrent_process_rejected() {
        let backend = Arc::new(
            MockBackend::new()
                .with_reply("slow")
                .with_delay(std::time::Duration::from_millis(100)),
        );
        let agent = Arc::new(agent(backend));
        let first = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.process("one", &AgentContext::new("c1")).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let second = agent.process("two", &AgentContext::new("c1")).await;
        assert!(matches!(second, Err(SwitchboardError::AgentBusy(ref id)) if id == "coder"));
        assert!(first.await.unwrap().is_ok());
        assert!(!agent.is_busy());
    }

    #[tokio::test]
    async fn test_backend_failure_maps_to_model_backend() {
        let backend = Arc::new(MockBackend::new().with_failure("rate limited"));
        let agent = agent(backend);
        let err = agent.process("hi", &AgentContext::new("c1")).await.unwrap_err();
        assert_eq!(err.kind(), "model_backend");
        assert!(!agent.is_busy());
    }

    #[tokio::test]
    async fn test_generation_timeout() {
        let backend = Arc::new(
            MockBackend::new()
                .with_reply("late")
                .with_delay(std::time::Duration::from_millis(200)),
        );
        let agent = agent(backend).with_timeout_ms(10);
        let err = agent.process("hi", &AgentContext::new("c1")).await.unwrap_err();
        assert!(matches!(err, SwitchboardError::Timeout { .. }));
        assert!(!agent.is_busy());
    }
}
