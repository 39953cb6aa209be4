//! Requirement inference for the delegation permission gate
//!
//! Before a delegated agent is invoked, the manager asks a
//! [`RequirementInferrer`] what the message will need (network, filesystem,
//! specific tools) and checks the agent's permissions against that.

use std::collections::BTreeSet;

/// Access a message is expected to need
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirements {
    pub needs_network: bool,
    pub needs_filesystem: bool,
    pub tools: BTreeSet<String>,
}

impl Requirements {
    pub fn is_empty(&self) -> bool {
        !self.needs_network && !self.needs_filesystem && self.tools.is_empty()
    }
}

pub trait RequirementInferrer: Send + Sync {
    fn infer(&self, content: &str) -> Requirements;
}

const NETWORK_KEYWORDS: &[&str] = &[
    "web", "http", "url", "internet", "online", "website", "browse", "fetch", "download",
];

const FILESYSTEM_KEYWORDS: &[&str] = &["file", "directory", "folder", "path", "disk"];

const TOOL_KEYWORDS: &[(&str, &str)] = &[
    ("search", "rag.search"),
    ("file", "fs.read_file"),
    ("calculat", "math.calculate"),
];

/// Lower-cased substring matching against fixed keyword lists
#[derive(Debug, Clone)]
pub struct KeywordRequirementInferrer {
    network: Vec<String>,
    filesystem: Vec<String>,
    tools: Vec<(String, String)>,
}

impl Default for KeywordRequirementInferrer {
    fn default() -> Self {
        Self {
            network: NETWORK_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            filesystem: FILESYSTEM_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            tools: TOOL_KEYWORDS
                .iter()
                .map(|(k, t)| (k.to_string(), t.to_string()))
                .collect(),
        }
    }
}

impl KeywordRequirementInferrer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map an extra keyword to a required tool
    pub fn with_tool_keyword(mut self, keyword: &str, tool: &str) -> Self {
        self.tools.push((keyword.to_lowercase(), tool.to_string()));
        self
    }
}

impl RequirementInferrer for KeywordRequirementInferrer {
    fn infer(&self, content: &str) -> Requirements {
        let lower = content.to_lowercase();
        Requirements {
            needs_network: self.network.iter().any(|k| lower.contains(k.as_str())),
            needs_filesystem: self.filesystem.iter().any(|k| lower.contains(k.as_str())),
            tools: self
                .tools
                .iter()
                .filter(|(k, _)| lower.contains(k.as_str()))
                .map(|(_, t)| t.clone())
                .collect(),
        }
    }
}
