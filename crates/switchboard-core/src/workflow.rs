//! Workflow definitions and execution state
//!
//! A [`Workflow`] is an ordered list of [`WorkflowStep`]s, each naming the
//! agent that performs it and the steps whose results it depends on. Steps run
//! strictly in declared order; see `Coordinator::execute_workflow`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use crate::error::{Result, SwitchboardError};
use crate::types::{Metadata, Response};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStep {
    pub id: String,
    pub agent_id: String,
    /// What the step should accomplish
    #[serde(default)]
    pub task: String,
    /// Templated input. Supports `{{input}}`, `{{previous}}` and `{{steps.<id>}}`.
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub required_tools: Vec<String>,
    #[serde(default)]
    pub expected_output: Option<String>,
}

impl WorkflowStep {
    pub fn new(id: impl Into<String>, agent_id: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            task: task.into(),
            input: None,
            depends_on: Vec::new(),
            required_tools: Vec::new(),
            expected_output: None,
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
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

    pub fn with_expected_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = Some(expected.into());
        self
    }

    /// First dependency without a stored result
    pub fn unmet_dependency(&self, results: &BTreeMap<String, String>) -> Option<&str> {
        self.depends_on
            .iter()
            .find(|dep| !results.contains_key(dep.as_str()))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<WorkflowStep>,
    /// Step to start from; defaults to the first step
    #[serde(default)]
    pub entry_point: Option<String>,
    /// Case-insensitive phrases that end the workflow early when a step's
    /// output contains one
    #[serde(default)]
    pub exit_conditions: Vec<String>,
}

impl Workflow {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            steps: Vec::new(),
            entry_point: None,
            exit_conditions: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_entry_point(mut self, step_id: impl Into<String>) -> Self {
        self.entry_point = Some(step_id.into());
        self
    }

    pub fn with_exit_condition(mut self, phrase: impl Into<String>) -> Self {
        self.exit_conditions.push(phrase.into());
        self
    }

    /// Structural checks: at least one step, unique step ids, known entry point
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| SwitchboardError::InvalidWorkflow {
            workflow_id: self.id.clone(),
            reason,
        };
        if self.steps.is_empty() {
            return Err(invalid("workflow has no steps".to_string()));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(invalid(format!("duplicate step id '{}'", step.id)));
            }
        }
        self.start_index()?;
        Ok(())
    }

    /// Index of the step execution starts at
    pub fn start_index(&self) -> Result<usize> {
        match &self.entry_point {
            None => Ok(0),
            Some(entry) => self
                .steps
                .iter()
                .position(|s| &s.id == entry)
                .ok_or_else(|| SwitchboardError::InvalidWorkflow {
                    workflow_id: self.id.clone(),
                    reason: format!("entry point '{}' is not a step", entry),
                }),
        }
    }

    /// The exit phrase contained in `output`, if any
    pub fn exit_triggered(&self, output: &str) -> Option<&str> {
        let lower = output.to_lowercase();
        self.exit_conditions
            .iter()
            .find(|c| !c.is_empty() && lower.contains(&c.to_lowercase()))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// State of one workflow run. Leaves `running` at most once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub current_step: Option<String>,
    pub results: BTreeMap<String, String>,
    pub errors: BTreeMap<String, String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Metadata,
    /// Synthesised final reply, present once completed
    #[serde(default)]
    pub output: Option<Response>,
}

impl WorkflowExecution {
    pub fn start(workflow_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            status: WorkflowStatus::Running,
            current_step: None,
            results: BTreeMap::new(),
            errors: BTreeMap::new(),
            started_at: Utc::now(),
            completed_at: None,
            metadata: Metadata::new(),
            output: None,
        }
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        if !self.status.is_terminal() {
            self.metadata.insert(key.into(), value);
        }
    }

    /// Store a step result. Ignored once the execution has finished.
    pub fn record_result(&mut self, step_id: &str, output: String) {
        if !self.status.is_terminal() {
            self.results.insert(step_id.to_string(), output);
        }
    }

    /// Transition out of `running`. Returns false if already terminal.
    pub fn finish(&mut self, status: WorkflowStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
        true
    }

    /// Record an error against `key` (a step id or `synthesis`) and fail
    pub fn fail(&mut self, key: &str, error: impl std::fmt::Display) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.errors.insert(key.to_string(), error.to_string());
        self.finish(WorkflowStatus::Failed)
    }

    pub fn complete(&mut self, output: Response) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.output = Some(output);
        self.finish(WorkflowStatus::Completed)
    }
}

/// Fill `{{input}}`, `{{previous}}` and `{{steps.<id>}}` placeholders.
/// Unknown placeholders are left as written.
pub fn render_template(
    template: &str,
    input: &str,
    previous: Option<&str>,
    results: &BTreeMap<String, String>,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        let Some(close) = rest[open + 2..].find("}}") else {
            break;
        };
        let key = rest[open + 2..open + 2 + close].trim();
        let value = match key {
            "input" => Some(input),
            "previous" => Some(previous.unwrap_or(input)),
            _ => key
                .strip_prefix("steps.")
                .and_then(|id| results.get(id))
                .map(String::as_str),
        };
        out.push_str(&rest[..open]);
        match value {
            Some(v) => out.push_str(v),
            None => out.push_str(&rest[open..open + 4 + close]),
        }
        rest = &rest[open + 4 + close..];
    }
    out.push_str(rest);
    out
}
