//! Delegation manager: runs one message through one target agent
//!
//! A delegation goes through a fixed pipeline: permission gate, prompt
//! construction, agent invocation, inline tool-call execution and recording.
//! Exactly one [`DelegationRecord`] is written per attempt, whether it
//! succeeds or not.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::agents::{Agent, AgentContext, AgentDescriptor};
use crate::context::{ConversationStore, DelegationRecord};
use crate::error::{Result, SwitchboardError, with_timeout};
use crate::prompt::build_delegation_prompt;
use crate::requirements::{KeywordRequirementInferrer, RequirementInferrer};
use crate::tool_call::extract_tool_calls;
use crate::tools::{ToolContext, ToolDefinition, ToolExecutor, ToolRegistry};
use crate::types::{Message, Response, ToolCall};

/// Wraps a ToolRegistry and only executes tools the agent is authorised for.
///
/// A tool must be in the agent's allowed set and its security profile must
/// be covered by the agent's network/filesystem permissions.
pub struct AgentToolExecutor {
    inner: Arc<ToolRegistry>,
    agent_id: String,
    allowed: HashSet<String>,
    permissions: crate::agents::PermissionSet,
}

impl AgentToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, agent: &AgentDescriptor) -> Self {
        Self {
            inner: registry,
            agent_id: agent.id.clone(),
            allowed: agent.allowed_tools().into_iter().collect(),
            permissions: agent.permissions.clone(),
        }
    }
}

#[async_trait]
impl ToolExecutor for AgentToolExecutor {
    async fn execute(&self, tool_name: &str, input: Value, ctx: &ToolContext) -> Result<String> {
        if !self.allowed.contains(tool_name) {
            warn!("Agent {} attempted to use non-allowed tool: {}", self.agent_id, tool_name);
            return Err(SwitchboardError::permission_denied(
                &self.agent_id,
                format!("tool '{}' is not allowed", tool_name),
            ));
        }
        let security = self
            .inner
            .security(tool_name)
            .ok_or_else(|| SwitchboardError::ToolNotFound(tool_name.to_string()))?;
        if !self.permissions.covers(&security) {
            warn!(
                "Agent {} lacks permissions for tool {} ({:?})",
                self.agent_id, tool_name, security
            );
            return Err(SwitchboardError::permission_denied(
                &self.agent_id,
                format!("tool '{}' needs permissions the agent does not have", tool_name),
            ));
        }
        debug!("Agent {} executing allowed tool: {}", self.agent_id, tool_name);
        self.inner.execute(tool_name, input, ctx).await
    }

    fn list_tools(&self) -> Vec<ToolDefinition> {
        self.inner
            .list_tools()
            .into_iter()
            .filter(|t| self.allowed.contains(&t.name))
            .collect()
    }
}

/// What the caller knows when handing a message to another agent
#[derive(Debug, Clone)]
pub struct DelegationContext {
    pub from_agent_id: String,
    pub original_message: Message,
    /// Snapshot of the conversation's shared knowledge
    pub shared_context: BTreeMap<String, Value>,
    /// Delegations already made in this conversation
    pub history: Vec<DelegationRecord>,
    /// Tools the caller declares the task needs, on top of inferred ones
    pub required_tools: Vec<String>,
    /// Text the permission gate infers requirements from. Defaults to the
    /// message content.
    pub permission_scope: Option<String>,
}

impl DelegationContext {
    pub fn new(from_agent_id: impl Into<String>, original_message: Message) -> Self {
        Self {
            from_agent_id: from_agent_id.into(),
            original_message,
            shared_context: BTreeMap::new(),
            history: Vec::new(),
            required_tools: Vec::new(),
            permission_scope: None,
        }
    }

    pub fn with_shared_context(mut self, shared_context: BTreeMap<String, Value>) -> Self {
        self.shared_context = shared_context;
        self
    }

    pub fn with_history(mut self, history: Vec<DelegationRecord>) -> Self {
        self.history = history;
        self
    }

    pub fn with_required_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_tools.extend(tools.into_iter().map(Into::into));
        self
    }

    pub fn with_permission_scope(mut self, scope: impl Into<String>) -> Self {
        self.permission_scope = Some(scope.into());
        self
    }
}

pub struct DelegationManager {
    tools: Arc<ToolRegistry>,
    inferrer: Arc<dyn RequirementInferrer>,
    conversations: Arc<ConversationStore>,
    timeout_ms: u64,
    history_window: usize,
}

impl DelegationManager {
    pub fn new(tools: Arc<ToolRegistry>, conversations: Arc<ConversationStore>) -> Self {
        Self {
            tools,
            inferrer: Arc::new(KeywordRequirementInferrer::new()),
            conversations,
            timeout_ms: 60_000,
            history_window: 10,
        }
    }

    pub fn with_inferrer(mut self, inferrer: Arc<dyn RequirementInferrer>) -> Self {
        self.inferrer = inferrer;
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

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Check the agent against what the message is inferred to need.
    /// Network first, then filesystem, then individual tools.
    pub fn check_permissions(&self, agent: &AgentDescriptor, content: &str) -> Result<()> {
        let requirements = self.inferrer.infer(content);

        if requirements.needs_network && !agent.permissions.network {
            warn!("Denied delegation to {}: network access required", agent.id);
            return Err(SwitchboardError::permission_denied(
                &agent.id,
                "network access required",
            ));
        }
        if requirements.needs_filesystem && !agent.permissions.filesystem {
            warn!("Denied delegation to {}: filesystem access required", agent.id);
            return Err(SwitchboardError::permission_denied(
                &agent.id,
                "filesystem access required",
            ));
        }
        if let Some(tool) = requirements.tools.iter().find(|t| !agent.is_tool_allowed(t)) {
            warn!("Denied delegation to {}: tool '{}' not allowed", agent.id, tool);
            return Err(SwitchboardError::permission_denied(
                &agent.id,
                format!("tool '{}' is not allowed", tool),
            ));
        }
        Ok(())
    }

    /// Run `message` through `agent` and record the attempt in the
    /// conversation's delegation history. Errors are recorded, then returned.
    pub async fn delegate(
        &self,
        agent: &Agent,
        message: &Message,
        context: &DelegationContext,
    ) -> Result<Response> {
        info!(
            "Delegating message {} from {} to {}",
            message.id,
            context.from_agent_id,
            agent.id()
        );

        let result = self.run(agent, message, context).await;

        let record = DelegationRecord {
            from_agent_id: context.from_agent_id.clone(),
            to_agent_id: agent.id().to_string(),
            message: message.clone(),
            response: result.as_ref().ok().cloned(),
            timestamp: Utc::now(),
            success: result.is_ok(),
            error: result.as_ref().err().map(|e| e.to_string()),
        };
        self.conversations
            .with_context(&message.conversation_id, |c| c.add_delegation(record))
            .await;

        match &result {
            Ok(_) => info!("Delegation to {} completed", agent.id()),
            Err(e) => warn!("Delegation to {} failed: {}", agent.id(), e),
        }
        result
    }

    async fn run(
        &self,
        agent: &Agent,
        message: &Message,
        context: &DelegationContext,
    ) -> Result<Response> {
        let descriptor = agent.descriptor();
        let scope = context.permission_scope.as_deref().unwrap_or(&message.content);
        self.check_permissions(descriptor, scope)?;
        if let Some(tool) = context
            .required_tools
            .iter()
            .find(|t| !descriptor.is_tool_allowed(t))
        {
            warn!("Denied delegation to {}: required tool '{}' not allowed", descriptor.id, tool);
            return Err(SwitchboardError::permission_denied(
                &descriptor.id,
                format!("task requires tool '{}'", tool),
            ));
        }

        let history = self
            .conversations
            .read(&message.conversation_id, |c| c.recent_history(self.history_window))
            .await
            .unwrap_or_default();

        let prompt = build_delegation_prompt(
            descriptor,
            &message.content,
            &context.shared_context,
            context.history.len(),
        );
        let agent_context = AgentContext::new(message.conversation_id.clone()).with_history(history);
        let response = agent.process(&prompt, &agent_context).await?;

        let mut response = self
            .run_tool_calls(descriptor, response, &message.conversation_id)
            .await;
        response
            .metadata
            .insert("delegated_to".to_string(), Value::from(descriptor.id.clone()));
        response.metadata.insert(
            "delegated_from".to_string(),
            Value::from(context.from_agent_id.clone()),
        );
        Ok(response)
    }

    /// Execute every inline tool call in the reply concurrently and splice the
    /// outcomes back into the text. Tool failures never fail the reply.
    async fn run_tool_calls(
        &self,
        agent: &AgentDescriptor,
        mut response: Response,
        conversation_id: &str,
    ) -> Response {
        let extracted = extract_tool_calls(&response.content);
        if extracted.is_empty() {
            return response;
        }
        debug!(
            "Agent {} requested {} tool call(s)",
            agent.id,
            extracted.len()
        );

        let executor = Arc::new(AgentToolExecutor::new(self.tools.clone(), agent));
        let mut handles = Vec::with_capacity(extracted.len());
        for ex in &extracted {
            let executor = executor.clone();
            let name = ex.call.name.clone();
            let arguments = ex.call.arguments.clone();
            let ctx = ToolContext {
                conversation_id: conversation_id.to_string(),
                agent_id: agent.id.clone(),
                call_id: ex.call.id.clone(),
            };
            let timeout_ms = self.timeout_ms;
            handles.push(tokio::spawn(async move {
                let operation = format!("tool '{}'", name);
                with_timeout(&operation, timeout_ms, executor.execute(&name, arguments, &ctx)).await
            }));
        }

        let mut calls: Vec<ToolCall> = Vec::with_capacity(extracted.len());
        let mut replacements = Vec::with_capacity(extracted.len());
        for (ex, handle) in extracted.into_iter().zip(handles) {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(SwitchboardError::ToolExecution {
                    tool: ex.call.name.clone(),
                    message: format!("tool task panicked: {}", e),
                }),
            };
            let mut call = ex.call;
            let line = match outcome {
                Ok(output) => {
                    let line = format!("[tool {} result] {}", call.name, output);
                    call.result = Some(output);
                    line
                }
                Err(e) => {
                    warn!("Tool call {} failed: {}", call.name, e);
                    call.error = Some(e.to_string());
                    format!("[tool {} error] {}", call.name, e)
                }
            };
            replacements.push((ex.placeholder, line));
            calls.push(call);
        }

        response.content = splice(&response.content, &replacements);
        let raw: Vec<Value> = calls
            .iter()
            .map(|c| {
                serde_json::json!({
                    "id": c.id,
                    "name": c.name,
                    "arguments": c.arguments,
                    "result": c.result,
                    "error": c.error,
                })
            })
            .collect();
        response
            .metadata
            .insert("tool_results".to_string(), Value::Array(raw));
        response.tool_calls = Some(calls);
        response
    }
}

/// Replace each placeholder, in order, with its line. Search resumes after
/// the previous replacement so inserted text is never rescanned.
fn splice(text: &str, replacements: &[(String, String)]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    for (placeholder, line) in replacements {
        match rest.find(placeholder.as_str()) {
            Some(pos) => {
                out.push_str(&rest[..pos]);
                out.push_str(line);
                rest = &rest[pos + placeholder.len()..];
            }
            None => debug!("Placeholder '{}' not found in reply", placeholder),
        }
    }
    out.push_str(rest);
    out
}
