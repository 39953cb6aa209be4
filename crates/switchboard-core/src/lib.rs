//! switchboard-core - multi-agent delegation and workflow coordination
//!
//! This crate provides:
//! - A coordinator that classifies messages and delegates them to specialised agents
//! - A prioritised rule engine deciding whether and to whom to delegate
//! - Permission-gated delegation with inline `@tool(json)` call execution
//! - Per-conversation shared context with full message and delegation history
//! - Ordered multi-step workflows with dependency checks and synthesis
//! - Anthropic and OpenAI-compatible model backends

pub mod agents;
pub mod classify;
pub mod context;
pub mod coordinator;
pub mod delegation;
pub mod error;
pub mod memory;
pub mod policy;
pub mod prompt;
pub mod providers;
pub mod requirements;
pub mod testing;
pub mod tool_call;
pub mod tools;
pub mod types;
pub mod workflow;

// Re-export main types for convenience
pub use agents::{Agent, AgentContext, AgentDescriptor, AgentStyle, PermissionSet};
pub use classify::{Classification, Classifier, Complexity};
pub use context::{
    ContextSnapshot, ContextSummary, ConversationContext, ConversationStats, ConversationStore,
    DelegationRecord, DelegationRecordView, DelegationStatus, HistoryEntry,
};
pub use coordinator::{Coordinator, CoordinatorConfig, DelegationStats};
pub use delegation::{AgentToolExecutor, DelegationContext, DelegationManager};
pub use error::{Result, SwitchboardError};
pub use memory::{InMemoryStore, MemoryStore};
pub use policy::{
    Condition, ConditionOperator, ConditionType, ConditionValue, DelegationPolicy, PolicyDecision,
    PolicyRule,
};
pub use providers::{AnthropicBackend, ModelBackend, OpenAiCompatBackend};
pub use requirements::{KeywordRequirementInferrer, RequirementInferrer, Requirements};
pub use tool_call::{ParsedToolCall, parse_tool_calls};
pub use tools::{ToolExecutor, ToolHandler, ToolRegistry, ToolSecurity};
pub use types::{Message, Response, Sender, ToolCall};
pub use workflow::{Workflow, WorkflowExecution, WorkflowStatus, WorkflowStep};
