//! Error taxonomy for delegation and workflow execution

use thiserror::Error;

/// Errors surfaced by the coordination core
#[derive(Error, Debug)]
pub enum SwitchboardError {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Permission denied for agent '{agent_id}': {reason}")]
    PermissionDenied { agent_id: String, reason: String },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Step '{step_id}' has unmet dependency '{missing}'")]
    WorkflowDependency { step_id: String, missing: String },

    #[error("Invalid workflow '{workflow_id}': {reason}")]
    InvalidWorkflow { workflow_id: String, reason: String },

    #[error("Invalid rule '{rule_id}': {reason}")]
    InvalidRule { rule_id: String, reason: String },

    #[error("Message belongs to conversation '{actual}', not '{expected}'")]
    ConversationMismatch { expected: String, actual: String },

    #[error("Model backend error: {0}")]
    ModelBackend(#[source] anyhow::Error),

    #[error("Agent '{0}' is already processing a message")]
    AgentBusy(String),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
}

impl SwitchboardError {
    pub fn permission_denied(agent_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            agent_id: agent_id.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AgentNotFound(_) => "agent_not_found",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::ToolNotFound(_) => "tool_not_found",
            Self::ToolExecution { .. } => "tool_execution",
            Self::WorkflowNotFound(_) => "workflow_not_found",
            Self::WorkflowDependency { .. } => "workflow_dependency",
            Self::InvalidWorkflow { .. } => "invalid_workflow",
            Self::InvalidRule { .. } => "invalid_rule",
            Self::ConversationMismatch { .. } => "conversation_mismatch",
            Self::ModelBackend(_) => "model_backend",
            Self::AgentBusy(_) => "agent_busy",
            Self::Timeout { .. } => "timeout",
        }
    }
}

/// Result type alias for coordination operations
pub type Result<T> = std::result::Result<T, SwitchboardError>;

/// Run a future under a deadline, mapping expiry to [`SwitchboardError::Timeout`].
pub(crate) async fn with_timeout<T, F>(operation: &str, timeout_ms: u64, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(SwitchboardError::Timeout {
            operation: operation.to_string(),
            timeout_ms,
        }),
    }
}
