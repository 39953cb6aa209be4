//! Agent descriptor: identity, model, goals, tools and permissions

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::tools::ToolSecurity;

/// What an agent is allowed to touch
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionSet {
    #[serde(default)]
    pub network: bool,
    #[serde(default)]
    pub filesystem: bool,
    #[serde(default)]
    pub tools: BTreeSet<String>,
}

impl PermissionSet {
    /// Whether this permission set covers a tool's declared security profile
    pub fn covers(&self, security: &ToolSecurity) -> bool {
        (!security.needs_network || self.network) && (!security.needs_filesystem || self.filesystem)
    }
}

/// Tone and language an agent answers in
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentStyle {
    #[serde(default = "default_tone")]
    pub tone: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_tone() -> String {
    "professional".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for AgentStyle {
    fn default() -> Self {
        Self {
            tone: default_tone(),
            language: default_language(),
        }
    }
}

/// A configured agent persona. Immutable once registered; looked up by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub permissions: PermissionSet,
    #[serde(default)]
    pub knowledge_packs: Vec<String>,
    #[serde(default)]
    pub style: AgentStyle,
}

impl AgentDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            role: String::new(),
            goals: Vec::new(),
            tools: Vec::new(),
            model: None,
            permissions: PermissionSet::default(),
            knowledge_packs: Vec::new(),
            style: AgentStyle::default(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goals.push(goal.into());
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools.extend(tools.into_iter().map(Into::into));
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_network(mut self) -> Self {
        self.permissions.network = true;
        self
    }

    pub fn with_filesystem(mut self) -> Self {
        self.permissions.filesystem = true;
        self
    }

    /// A tool is allowed if it is listed in either the agent's tool list or
    /// its permission set's tool grants
    pub fn is_tool_allowed(&self, tool_name: &str) -> bool {
        self.tools.iter().any(|t| t == tool_name) || self.permissions.tools.contains(tool_name)
    }

    /// All tool names this agent may call, sorted
    pub fn allowed_tools(&self) -> BTreeSet<String> {
        self.tools
            .iter()
            .cloned()
            .chain(self.permissions.tools.iter().cloned())
            .collect()
    }

    /// Case-insensitive check against role, name and description
    pub fn matches_role(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.role.to_lowercase().contains(&needle)
            || self.name.to_lowercase().contains(&needle)
            || self.description.to_lowercase().contains(&needle)
    }
}
