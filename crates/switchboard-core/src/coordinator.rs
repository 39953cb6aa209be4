//! Coordinator: the entry point for messages and workflows
//!
//! One turn runs classify, then policy evaluation, then either a delegation
//! to the chosen agent or a local answer from the coordinator's own persona.
//! Workflows replace the policy decision with an ordered loop over steps,
//! each routed through the same [`DelegationManager`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agents::{Agent, AgentDescriptor};
use crate::classify::{Classification, Classifier};
use crate::context::{
    ContextSnapshot, ContextSummary, ConversationStats, ConversationStore, DelegationRecordView,
};
use crate::delegation::{DelegationContext, DelegationManager};
use crate::error::{Result, SwitchboardError, with_timeout};
use crate::memory::MemoryStore;
use crate::policy::{DelegationPolicy, PolicyDecision};
use crate::prompt::build_coordinator_prompt;
use crate::providers::{ChatMessage, GenerateOptions, ModelBackend};
use crate::requirements::RequirementInferrer;
use crate::tools::ToolRegistry;
use crate::types::{Message, Response};
use crate::workflow::{Workflow, WorkflowExecution, WorkflowStatus, WorkflowStep, render_template};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Recorded as `from_agent_id` on delegations and as the agent id of local answers
    #[serde(default = "default_coordinator_id")]
    pub coordinator_id: String,
    /// Model for classification, local answers, synthesis and agents without their own
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Deadline for every model call and tool execution
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Delegations per conversation before the coordinator answers locally
    #[serde(default = "default_max_delegations")]
    pub max_delegations: usize,
    /// Prior turns sent along with each message
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Persona for local answers; built from the team roster when unset
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Per-step cap on output fed into workflow synthesis
    #[serde(default = "default_synthesis_max_chars")]
    pub synthesis_max_chars: usize,
}

fn default_coordinator_id() -> String {
    "coordinator".to_string()
}
fn default_model() -> String {
    "claude-opus-4-6".to_string()
}
fn default_timeout_ms() -> u64 {
    60_000
}
fn default_max_delegations() -> usize {
    50
}
fn default_history_window() -> usize {
    10
}
fn default_synthesis_max_chars() -> usize {
    4_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            coordinator_id: default_coordinator_id(),
            default_model: default_model(),
            timeout_ms: default_timeout_ms(),
            max_delegations: default_max_delegations(),
            history_window: default_history_window(),
            system_prompt: None,
            synthesis_max_chars: default_synthesis_max_chars(),
        }
    }
}

/// Aggregate delegation counters across every tracked conversation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DelegationStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub by_target: BTreeMap<String, usize>,
    pub conversations: usize,
}

struct ActiveExecution {
    snapshot: WorkflowExecution,
    cancel: CancellationToken,
}

pub struct Coordinator {
    config: CoordinatorConfig,
    backend: Arc<dyn ModelBackend>,
    agents: Vec<Arc<Agent>>,
    workflows: HashMap<String, Workflow>,
    policy: DelegationPolicy,
    delegation: DelegationManager,
    classifier: Classifier,
    conversations: Arc<ConversationStore>,
    memory: Option<Arc<dyn MemoryStore>>,
    active: RwLock<HashMap<String, ActiveExecution>>,
}

impl Coordinator {
    /// Coordinator with the built-in policy rules and built-in tools
    pub fn new(backend: Arc<dyn ModelBackend>, config: CoordinatorConfig) -> Self {
        let conversations = Arc::new(ConversationStore::new());
        let delegation = DelegationManager::new(
            Arc::new(ToolRegistry::with_builtins(Vec::new())),
            conversations.clone(),
        )
        .with_timeout_ms(config.timeout_ms)
        .with_history_window(config.history_window);
        let classifier = Classifier::new(
            backend.clone(),
            config.default_model.clone(),
            config.timeout_ms,
        );

        Self {
            config,
            backend,
            agents: Vec::new(),
            workflows: HashMap::new(),
            policy: DelegationPolicy::new(),
            delegation,
            classifier,
            conversations,
            memory: None,
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the tool registry. Agents added earlier keep the tool list
    /// they were given at registration.
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.delegation = DelegationManager::new(Arc::new(tools), self.conversations.clone())
            .with_timeout_ms(self.config.timeout_ms)
            .with_history_window(self.config.history_window);
        self
    }

    pub fn with_inferrer(mut self, inferrer: Arc<dyn RequirementInferrer>) -> Self {
        self.delegation = self.delegation.with_inferrer(inferrer);
        self
    }

    pub fn with_policy(mut self, policy: DelegationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    // ── Registries ──

    /// Register an agent, replacing any agent with the same id
    pub fn add_agent(&mut self, descriptor: AgentDescriptor) {
        let tools = self.delegation.tools().filter_tools(
            &descriptor.allowed_tools().into_iter().collect::<Vec<_>>(),
        );
        let agent = Agent::new(descriptor, self.backend.clone(), &self.config.default_model)
            .with_tools(tools)
            .with_timeout_ms(self.config.timeout_ms)
            .with_history_window(self.config.history_window);

        if let Some(existing) = self.agents.iter_mut().find(|a| a.id() == agent.id()) {
            warn!("Replacing existing agent: {}", agent.id());
            *existing = Arc::new(agent);
        } else {
            info!("Registered agent: {}", agent.id());
            self.agents.push(Arc::new(agent));
        }
    }

    pub fn remove_agent(&mut self, agent_id: &str) -> bool {
        let before = self.agents.len();
        self.agents.retain(|a| a.id() != agent_id);
        let removed = self.agents.len() != before;
        if removed {
            info!("Removed agent: {}", agent_id);
        }
        removed
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<AgentDescriptor> {
        self.find_agent(agent_id).map(|a| a.descriptor().clone())
    }

    /// Copies of the registered descriptors, in registration order
    pub fn agents(&self) -> Vec<AgentDescriptor> {
        self.agents.iter().map(|a| a.descriptor().clone()).collect()
    }

    fn find_agent(&self, agent_id: &str) -> Option<Arc<Agent>> {
        self.agents.iter().find(|a| a.id() == agent_id).cloned()
    }

    pub fn add_workflow(&mut self, workflow: Workflow) -> Result<()> {
        workflow.validate()?;
        if self.workflows.contains_key(&workflow.id) {
            warn!("Replacing existing workflow: {}", workflow.id);
        } else {
            info!("Registered workflow: {} ({} steps)", workflow.id, workflow.steps.len());
        }
        self.workflows.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    pub fn remove_workflow(&mut self, workflow_id: &str) -> bool {
        self.workflows.remove(workflow_id).is_some()
    }

    pub fn get_workflow(&self, workflow_id: &str) -> Option<Workflow> {
        self.workflows.get(workflow_id).cloned()
    }

    /// Copies of the registered workflows, sorted by id
    pub fn workflows(&self) -> Vec<Workflow> {
        let mut workflows: Vec<Workflow> = self.workflows.values().cloned().collect();
        workflows.sort_by(|a, b| a.id.cmp(&b.id));
        workflows
    }

    pub fn policy(&self) -> &DelegationPolicy {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut DelegationPolicy {
        &mut self.policy
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    // ── Read-only views ──

    pub async fn context_summary(&self, conversation_id: &str) -> Option<ContextSummary> {
        self.conversations
            .read(conversation_id, |c| c.get_context_summary())
            .await
    }

    pub async fn conversation_stats(&self, conversation_id: &str) -> Option<ConversationStats> {
        self.conversations
            .read(conversation_id, |c| c.get_conversation_stats())
            .await
    }

    pub async fn delegation_history(&self, conversation_id: &str) -> Vec<DelegationRecordView> {
        self.conversations
            .read(conversation_id, |c| {
                c.get_delegation_history()
                    .iter()
                    .map(|r| r.to_view())
                    .collect()
            })
            .await
            .unwrap_or_default()
    }

    pub async fn export_context(&self, conversation_id: &str) -> Option<ContextSnapshot> {
        self.conversations.export(conversation_id).await
    }

    pub async fn import_context(&self, snapshot: ContextSnapshot) {
        self.conversations.import(snapshot).await
    }

    pub async fn get_delegation_stats(&self) -> DelegationStats {
        let records = self.conversations.all_delegations().await;
        let successful = records.iter().filter(|r| r.success).count();
        let mut by_target = BTreeMap::new();
        for record in &records {
            *by_target.entry(record.to_agent_id.clone()).or_insert(0) += 1;
        }
        DelegationStats {
            total: records.len(),
            successful,
            failed: records.len() - successful,
            success_rate: if records.is_empty() {
                0.0
            } else {
                successful as f64 / records.len() as f64
            },
            by_target,
            conversations: self.conversations.len().await,
        }
    }

    /// Snapshots of executions that are still running
    pub async fn get_active_workflows(&self) -> Vec<WorkflowExecution> {
        let mut active: Vec<WorkflowExecution> = self
            .active
            .read()
            .await
            .values()
            .map(|a| a.snapshot.clone())
            .collect();
        active.sort_by_key(|e| e.started_at);
        active
    }

    /// Stop tracking a running execution. The step in progress finishes;
    /// no further steps start and the execution ends as cancelled.
    pub async fn cancel_workflow(&self, execution_id: &str) -> bool {
        match self.active.write().await.remove(execution_id) {
            Some(active) => {
                info!("Cancelling workflow execution {}", execution_id);
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    // ── Message handling ──

    pub async fn classify(&self, message: &Message) -> Classification {
        self.classifier.classify(&message.content).await
    }

    /// Decide without acting
    pub async fn evaluate(&self, message: &Message, classification: &Classification) -> PolicyDecision {
        let agents = self.agents();
        self.conversations
            .with_context(&message.conversation_id, |ctx| {
                self.policy.evaluate(message, classification, &agents, ctx)
            })
            .await
    }

    /// Handle one turn: classify, decide, then delegate or answer locally
    pub async fn handle_message(&self, message: Message) -> Result<Response> {
        info!(
            "Handling message {} in conversation {}",
            message.id, message.conversation_id
        );
        self.remember(&message).await;

        let classification = self.classify(&message).await;
        let decision = self.evaluate(&message, &classification).await;
        let delegations_so_far = self
            .conversations
            .read(&message.conversation_id, |c| c.delegation_count())
            .await
            .unwrap_or(0);

        let response = match decision.target_agent_id.as_deref() {
            Some(target) if decision.should_delegate => {
                if delegations_so_far >= self.config.max_delegations {
                    info!(
                        "Delegation limit ({}) reached in conversation {}, answering locally",
                        self.config.max_delegations, message.conversation_id
                    );
                    self.answer_locally(&message, &classification).await?
                } else {
                    self.delegate_turn(&message, target, &decision, &classification)
                        .await?
                }
            }
            _ => {
                debug!("Not delegating: {}", decision.reason);
                self.answer_locally(&message, &classification).await?
            }
        };

        self.remember(&Message::agent(&message.conversation_id, response.content.clone()))
            .await;
        Ok(response)
    }

    async fn delegate_turn(
        &self,
        message: &Message,
        target: &str,
        decision: &PolicyDecision,
        classification: &Classification,
    ) -> Result<Response> {
        let agent = self
            .find_agent(target)
            .ok_or_else(|| SwitchboardError::AgentNotFound(target.to_string()))?;

        let context = self.delegation_context(message).await;
        let mut response = self.delegation.delegate(&agent, message, &context).await?;

        response.content = format!(
            "{}\n\n[Delegated to {}: {}]",
            response.content,
            agent.descriptor().name,
            decision.reason
        );
        response.metadata.insert(
            "delegation".to_string(),
            serde_json::to_value(decision).unwrap_or(Value::Null),
        );
        response.metadata.insert(
            "classification".to_string(),
            serde_json::to_value(classification).unwrap_or(Value::Null),
        );

        let last = serde_json::json!({
            "agent_id": target,
            "rule_id": decision.rule_id,
            "confidence": decision.confidence,
            "message_id": message.id,
        });
        let turn = (message.clone(), response.clone());
        self.conversations
            .with_context(&message.conversation_id, |ctx| {
                ctx.set_shared_knowledge("last_delegation", last);
                ctx.add_message(turn.0, turn.1, target)
            })
            .await?;
        Ok(response)
    }

    async fn delegation_context(&self, message: &Message) -> DelegationContext {
        let (shared, history) = self
            .conversations
            .read(&message.conversation_id, |c| {
                (c.shared_knowledge(), c.get_delegation_history())
            })
            .await
            .unwrap_or_default();
        DelegationContext::new(self.config.coordinator_id.clone(), message.clone())
            .with_shared_context(shared)
            .with_history(history)
    }

    async fn answer_locally(
        &self,
        message: &Message,
        classification: &Classification,
    ) -> Result<Response> {
        let system = self
            .config
            .system_prompt
            .clone()
            .unwrap_or_else(|| build_coordinator_prompt(&self.agents()));
        let history = self
            .conversations
            .read(&message.conversation_id, |c| {
                c.recent_history(self.config.history_window)
            })
            .await
            .unwrap_or_default();

        let mut messages = vec![ChatMessage::system(system)];
        for entry in history {
            messages.push(ChatMessage::user(entry.message.content));
            messages.push(ChatMessage::assistant(entry.response.content));
        }
        messages.push(ChatMessage::user(message.content.clone()));

        let content = self.complete("local answer", &messages).await?;
        let response = Response::new(content)
            .with_metadata("agent_id", self.config.coordinator_id.clone().into())
            .with_metadata("handled_locally", true.into())
            .with_metadata(
                "classification",
                serde_json::to_value(classification).unwrap_or(Value::Null),
            );

        let turn = (message.clone(), response.clone());
        let coordinator_id = self.config.coordinator_id.clone();
        self.conversations
            .with_context(&message.conversation_id, |ctx| {
                ctx.add_participant(message.sender.to_string());
                ctx.add_message(turn.0, turn.1, coordinator_id)
            })
            .await?;
        Ok(response)
    }

    /// One model call on the coordinator's default model, under the deadline
    async fn complete(&self, operation: &str, messages: &[ChatMessage]) -> Result<String> {
        let options = GenerateOptions::default();
        let generation = with_timeout(operation, self.config.timeout_ms, async {
            self.backend
                .generate(messages, &self.config.default_model, &options)
                .await
                .map_err(SwitchboardError::ModelBackend)
        })
        .await?;
        Ok(generation.content)
    }

    async fn remember(&self, message: &Message) {
        if let Some(memory) = &self.memory {
            if let Err(e) = memory.save_message(message).await {
                warn!("Failed to save message {} to memory: {}", message.id, e);
            }
        }
    }

    // ── Workflows ──

    /// Run a registered workflow to completion and return the final execution.
    ///
    /// Only an unknown workflow id or an invalid entry point is returned as an
    /// error; step failures are reported through the execution's status and
    /// error map.
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        input: &str,
        conversation_id: &str,
    ) -> Result<WorkflowExecution> {
        let workflow = self
            .workflows
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| SwitchboardError::WorkflowNotFound(workflow_id.to_string()))?;
        let start = workflow.start_index()?;

        let mut execution = WorkflowExecution::start(&workflow.id);
        execution.set_metadata("conversation_id", conversation_id.into());
        execution.set_metadata("input", input.into());
        let cancel = CancellationToken::new();
        self.active.write().await.insert(
            execution.id.clone(),
            ActiveExecution {
                snapshot: execution.clone(),
                cancel: cancel.clone(),
            },
        );
        info!(
            "Starting workflow {} (execution {}, {} steps)",
            workflow.id,
            execution.id,
            workflow.steps.len() - start
        );

        let mut previous: Option<String> = None;
        for step in &workflow.steps[start..] {
            if cancel.is_cancelled() {
                break;
            }
            execution.current_step = Some(step.id.clone());
            self.publish(&execution).await;

            if let Some(missing) = step.unmet_dependency(&execution.results) {
                let err = SwitchboardError::WorkflowDependency {
                    step_id: step.id.clone(),
                    missing: missing.to_string(),
                };
                warn!("Workflow {} stopped: {}", workflow.id, err);
                execution.fail(&step.id, &err);
                break;
            }

            debug!("Workflow {} running step {}", workflow.id, step.id);
            let result = self
                .run_step(step, input, previous.as_deref(), &execution.results, conversation_id)
                .await;
            match result {
                Ok(output) => {
                    execution.record_result(&step.id, output.clone());
                    let exit = workflow.exit_triggered(&output).map(str::to_string);
                    previous = Some(output);
                    if let Some(phrase) = exit {
                        info!(
                            "Workflow {} exit condition '{}' met at step {}",
                            workflow.id, phrase, step.id
                        );
                        execution.set_metadata("exit_condition", phrase.into());
                        break;
                    }
                }
                Err(e) if cancel.is_cancelled() => {
                    warn!("Workflow {} step {} failed after cancel: {}", workflow.id, step.id, e);
                    execution.errors.insert(step.id.clone(), e.to_string());
                    execution.finish(WorkflowStatus::Cancelled);
                    break;
                }
                Err(e) => {
                    warn!("Workflow {} step {} failed: {}", workflow.id, step.id, e);
                    execution.fail(&step.id, &e);
                    break;
                }
            }
        }

        if !execution.status.is_terminal() {
            if cancel.is_cancelled() {
                execution.finish(WorkflowStatus::Cancelled);
            } else {
                let synthesis = self.synthesize(&workflow, &execution, input).await;
                match synthesis {
                    // Cancelled while synthesis was in flight
                    _ if cancel.is_cancelled() => {
                        execution.finish(WorkflowStatus::Cancelled);
                    }
                    Ok(output) => {
                        execution.complete(output);
                    }
                    Err(e) => {
                        warn!("Workflow {} synthesis failed: {}", workflow.id, e);
                        execution.fail("synthesis", &e);
                    }
                }
            }
        }

        self.active.write().await.remove(&execution.id);
        let summary = serde_json::json!({
            "execution_id": execution.id,
            "status": execution.status,
        });
        self.conversations
            .with_context(conversation_id, |ctx| {
                ctx.set_shared_knowledge(format!("workflow:{}", workflow.id), summary)
            })
            .await;
        info!(
            "Workflow {} finished as {} (execution {})",
            workflow.id, execution.status, execution.id
        );
        Ok(execution)
    }

    /// Update the active-set snapshot, unless the execution was cancelled
    async fn publish(&self, execution: &WorkflowExecution) {
        if let Some(active) = self.active.write().await.get_mut(&execution.id) {
            active.snapshot = execution.clone();
        }
    }

    async fn run_step(
        &self,
        step: &WorkflowStep,
        input: &str,
        previous: Option<&str>,
        results: &BTreeMap<String, String>,
        conversation_id: &str,
    ) -> Result<String> {
        let agent = self
            .find_agent(&step.agent_id)
            .ok_or_else(|| SwitchboardError::AgentNotFound(step.agent_id.clone()))?;

        let effective_input = match &step.input {
            Some(template) => render_template(template, input, previous, results),
            None => previous.unwrap_or(input).to_string(),
        };
        let mut content = String::new();
        if !step.task.is_empty() {
            content.push_str(&step.task);
            content.push_str("\n\n");
        }
        content.push_str(&effective_input);
        if let Some(expected) = &step.expected_output {
            content.push_str(&format!("\n\nExpected output: {}", expected));
        }

        let message = Message::agent(conversation_id, content)
            .with_metadata("step_id", step.id.clone().into());
        let context = self
            .delegation_context(&message)
            .await
            .with_required_tools(step.required_tools.iter().cloned())
            .with_permission_scope(step_permission_scope(step, input, previous));
        let response = self.delegation.delegate(&agent, &message, &context).await?;
        Ok(response.content)
    }

    async fn synthesize(
        &self,
        workflow: &Workflow,
        execution: &WorkflowExecution,
        input: &str,
    ) -> Result<Response> {
        let mut prompt = format!(
            "Combine the results of the workflow \"{}\" into one final answer.\n\n\
             ## Original request\n\n{}\n\n## Step results\n\n",
            workflow.name, input
        );
        for step in &workflow.steps {
            if let Some(output) = execution.results.get(&step.id) {
                prompt.push_str(&format!(
                    "### {} ({})\n\n{}\n\n",
                    step.id,
                    step.agent_id,
                    truncate(output, self.config.synthesis_max_chars)
                ));
            }
        }

        let messages = [
            ChatMessage::system(
                "You synthesise the outputs of several specialist agents into a single coherent reply.",
            ),
            ChatMessage::user(prompt),
        ];
        let content = self.complete("workflow synthesis", &messages).await?;
        Ok(Response::new(content)
            .with_metadata("workflow_id", workflow.id.clone().into())
            .with_metadata("execution_id", execution.id.clone().into())
            .with_metadata("steps", execution.results.len().into()))
    }
}

/// Text a step is permission-checked against: its task and declared input,
/// plus the workflow input when that is what the step receives. Upstream
/// step outputs are left out.
fn step_permission_scope(step: &WorkflowStep, input: &str, previous: Option<&str>) -> String {
    let declared = match &step.input {
        Some(template) => render_template(template, input, Some(""), &BTreeMap::new()),
        None if previous.is_none() => input.to_string(),
        None => String::new(),
    };
    format!("{}\n{}", step.task, declared)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("\n[truncated]");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::testing::MockBackend;

    fn backend() -> Arc<MockBackend> {
        Arc::new(
            MockBackend::new()
                .with_responder(|msgs| {
                    msgs[0]
                        .content
                        .contains("message classifier")
                        .then(|| r#"{"type":"general","complexity":"simple"}"#.to_string())
                })
                .with_default_reply("reply"),
        )
    }

    #[tokio::test]
    async fn test_local_answer_without_agents() {
        let backend = backend();
        let memory = Arc::new(InMemoryStore::new());
        let coordinator =
            Coordinator::new(backend.clone(), CoordinatorConfig::default()).with_memory(memory.clone());

        let response = coordinator
            .handle_message(Message::user("c1", "calculate 2+2"))
            .await
            .unwrap();
        assert_eq!(response.content, "reply");
        assert_eq!(response.metadata["handled_locally"], true);
        // classification + local answer
        assert_eq!(backend.calls(), 2);

        let summary = coordinator.context_summary("c1").await.unwrap();
        assert_eq!(summary.message_count, 1);
        assert_eq!(summary.delegation_count, 0);
        assert!(summary.participants.contains(&"coordinator".to_string()));
        assert_eq!(memory.message_count().await, 2);
    }

    #[tokio::test]
    async fn test_delegation_limit_answers_locally() {
        let config = CoordinatorConfig {
            max_delegations: 0,
            ..Default::default()
        };
        let mut coordinator = Coordinator::new(backend(), config);
        coordinator.add_agent(
            AgentDescriptor::new("calc", "Calculator")
                .with_role("math")
                .with_tools(["math.calculate"]),
        );
        let response = coordinator
            .handle_message(Message::user("c1", "calculate 2+2"))
            .await
            .unwrap();
        assert_eq!(response.metadata["handled_locally"], true);
        assert_eq!(coordinator.get_delegation_stats().await.total, 0);
    }

    #[tokio::test]
    async fn test_add_and_remove_registries() {
        let mut coordinator = Coordinator::new(backend(), CoordinatorConfig::default());
        coordinator.add_agent(AgentDescriptor::new("a", "First"));
        coordinator.add_agent(AgentDescriptor::new("a", "Replacement"));
        coordinator.add_agent(AgentDescriptor::new("b", "Second"));
        let names: Vec<String> = coordinator.agents().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["Replacement", "Second"]);
        assert!(coordinator.remove_agent("a"));
        assert!(!coordinator.remove_agent("a"));

        let invalid = Workflow::new("empty", "Empty");
        assert!(coordinator.add_workflow(invalid).is_err());
        let wf = Workflow::new("wf", "WF").with_step(WorkflowStep::new("s1", "b", "do"));
        coordinator.add_workflow(wf).unwrap();
        assert_eq!(coordinator.workflows().len(), 1);
        assert!(coordinator.remove_workflow("wf"));
        assert!(coordinator.get_workflow("wf").is_none());
    }

    #[tokio::test]
    async fn test_unknown_workflow_and_entry_point() {
        let mut coordinator = Coordinator::new(backend(), CoordinatorConfig::default());
        let err = coordinator.execute_workflow("nope", "x", "c1").await.unwrap_err();
        assert_eq!(err.kind(), "workflow_not_found");

        let wf = Workflow::new("wf", "WF").with_step(WorkflowStep::new("s1", "a", "do"));
        coordinator.add_workflow(wf).unwrap();
        // Entry point is validated on registration, so bypass it here
        coordinator
            .workflows
            .get_mut("wf")
            .unwrap()
            .entry_point = Some("ghost".to_string());
        let err = coordinator.execute_workflow("wf", "x", "c1").await.unwrap_err();
        assert_eq!(err.kind(), "invalid_workflow");
        assert!(coordinator.get_active_workflows().await.is_empty());
    }

    #[tokio::test]
    async fn test_step_with_unknown_agent_fails_execution() {
        let mut coordinator = Coordinator::new(backend(), CoordinatorConfig::default());
        coordinator
            .add_workflow(Workflow::new("wf", "WF").with_step(WorkflowStep::new("s1", "ghost", "do")))
            .unwrap();
        let execution = coordinator.execute_workflow("wf", "x", "c1").await.unwrap();
        assert_eq!(execution.status, WorkflowStatus::Failed);
        assert!(execution.errors["s1"].contains("ghost"));
    }

    #[tokio::test]
    async fn test_cancel_workflow_between_steps() {
        let backend = Arc::new(
            MockBackend::new()
                .with_default_reply("step output")
                .with_delay(std::time::Duration::from_millis(100)),
        );
        let mut coordinator = Coordinator::new(backend, CoordinatorConfig::default());
        coordinator.add_agent(AgentDescriptor::new("a", "A"));
        coordinator.add_agent(AgentDescriptor::new("b", "B"));
        coordinator
            .add_workflow(
                Workflow::new("wf", "WF")
                    .with_step(WorkflowStep::new("s1", "a", "one"))
                    .with_step(WorkflowStep::new("s2", "b", "two")),
            )
            .unwrap();
        let coordinator = Arc::new(coordinator);

        let run = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.execute_workflow("wf", "go", "c1").await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        let active = coordinator.get_active_workflows().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].current_step.as_deref(), Some("s1"));
        assert!(coordinator.cancel_workflow(&active[0].id).await);
        assert!(coordinator.get_active_workflows().await.is_empty());

        let execution = run.await.unwrap().unwrap();
        assert_eq!(execution.status, WorkflowStatus::Cancelled);
        // s1 was already in flight and finished; s2 never started
        assert!(execution.results.contains_key("s1"));
        assert!(!execution.results.contains_key("s2"));
        assert!(execution.output.is_none());
        assert!(!coordinator.cancel_workflow(&execution.id).await);
    }

    #[tokio::test]
    async fn test_cancel_during_synthesis_finishes_cancelled() {
        let backend = Arc::new(
            MockBackend::new()
                .with_default_reply("step output")
                .with_delay(std::time::Duration::from_millis(150)),
        );
        let mut coordinator = Coordinator::new(backend.clone(), CoordinatorConfig::default());
        coordinator.add_agent(AgentDescriptor::new("a", "A"));
        coordinator
            .add_workflow(Workflow::new("wf", "WF").with_step(WorkflowStep::new("s1", "a", "one")))
            .unwrap();
        let coordinator = Arc::new(coordinator);

        let run = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.execute_workflow("wf", "go", "c1").await })
        };
        // s1 takes 150ms, synthesis runs from then until about 300ms
        tokio::time::sleep(std::time::Duration::from_millis(220)).await;
        let active = coordinator.get_active_workflows().await;
        assert_eq!(active.len(), 1);
        assert!(coordinator.cancel_workflow(&active[0].id).await);

        let execution = run.await.unwrap().unwrap();
        assert_eq!(backend.calls(), 2);
        assert_eq!(execution.status, WorkflowStatus::Cancelled);
        assert_eq!(execution.results["s1"], "step output");
        assert!(execution.output.is_none());
        assert!(execution.completed_at.is_some());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc\n[truncated]");
    }

    #[test]
    fn test_config_defaults_from_empty_toml() {
        let config: CoordinatorConfig = toml::from_str("").unwrap();
        assert_eq!(config.coordinator_id, "coordinator");
        assert_eq!(config.history_window, 10);
        assert!(config.system_prompt.is_none());
    }
}
