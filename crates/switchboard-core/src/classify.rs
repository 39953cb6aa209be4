//! Message classification
//!
//! The coordinator asks the model to label each incoming message with a task
//! type, a complexity and the tools it expects to need. Classification never
//! fails a turn: any backend error, timeout or unparseable reply yields
//! [`Classification::default`] (`general` / `moderate`).

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{SwitchboardError, with_timeout};
use crate::providers::{ChatMessage, GenerateOptions, ModelBackend};

/// Coarse difficulty of a message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    /// simple=1, moderate=2, complex=3
    pub fn level(&self) -> u8 {
        match self {
            Self::Simple => 1,
            Self::Moderate => 2,
            Self::Complex => 3,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "simple" | "low" | "1" => Some(Self::Simple),
            "moderate" | "medium" | "2" => Some(Self::Moderate),
            "complex" | "high" | "3" => Some(Self::Complex),
            _ => None,
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple => write!(f, "simple"),
            Self::Moderate => write!(f, "moderate"),
            Self::Complex => write!(f, "complex"),
        }
    }
}

/// Structured label for one message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    #[serde(rename = "type")]
    pub task_type: String,
    pub complexity: Complexity,
    #[serde(default)]
    pub required_tools: Vec<String>,
}

impl Default for Classification {
    fn default() -> Self {
        Self {
            task_type: "general".to_string(),
            complexity: Complexity::Moderate,
            required_tools: Vec::new(),
        }
    }
}

impl Classification {
    pub fn new(task_type: impl Into<String>, complexity: Complexity) -> Self {
        Self {
            task_type: task_type.into(),
            complexity,
            required_tools: Vec::new(),
        }
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_tools.extend(tools.into_iter().map(Into::into));
        self
    }
}

const CLASSIFIER_SYSTEM_PROMPT: &str =
    "You are a message classifier. Respond with a single JSON object and nothing else.";

fn classification_prompt(content: &str) -> String {
    format!(
        "Classify the following message.\n\
         Respond with JSON of the form \
         {{\"type\": \"<technical|research|creative|mathematical|support|general>\", \
         \"complexity\": \"<simple|moderate|complex>\", \
         \"required_tools\": [\"<tool name>\", ...]}}\n\n\
         Message: {}",
        content
    )
}

/// Lenient shape accepted from the model
#[derive(Deserialize)]
struct RawClassification {
    #[serde(alias = "task_type", alias = "taskType")]
    r#type: Option<String>,
    complexity: Option<serde_json::Value>,
    #[serde(default, alias = "requiredTools", alias = "tools")]
    required_tools: Vec<String>,
}

/// Parse a model reply into a classification. Tolerates code fences and
/// surrounding prose; missing fields take their defaults.
pub fn parse_classification(text: &str) -> Option<Classification> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    let raw: RawClassification = serde_json::from_str(&text[start..=end]).ok()?;

    let defaults = Classification::default();
    let complexity = match raw.complexity {
        Some(serde_json::Value::String(s)) => Complexity::parse(&s),
        Some(serde_json::Value::Number(n)) => Complexity::parse(&n.to_string()),
        _ => None,
    }
    .unwrap_or(defaults.complexity);

    Some(Classification {
        task_type: raw
            .r#type
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .unwrap_or(defaults.task_type),
        complexity,
        required_tools: raw.required_tools,
    })
}

/// Model-backed message classifier
pub struct Classifier {
    backend: Arc<dyn ModelBackend>,
    model: String,
    timeout_ms: u64,
}

impl Classifier {
    pub fn new(backend: Arc<dyn ModelBackend>, model: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            backend,
            model: model.into(),
            timeout_ms,
        }
    }

    /// Classify `content`, falling back to the default on any failure
    pub async fn classify(&self, content: &str) -> Classification {
        let messages = [
            ChatMessage::system(CLASSIFIER_SYSTEM_PROMPT),
            ChatMessage::user(classification_prompt(content)),
        ];
        let options = GenerateOptions {
            temperature: Some(0.0),
            ..Default::default()
        };

        let result = with_timeout("classification", self.timeout_ms, async {
            self.backend
                .generate(&messages, &self.model, &options)
                .await
                .map_err(SwitchboardError::ModelBackend)
        })
        .await;

        match result {
            Ok(generation) => match parse_classification(&generation.content) {
                Some(classification) => {
                    debug!(
                        "Classified message as {} / {}",
                        classification.task_type, classification.complexity
                    );
                    classification
                }
                None => {
                    warn!("Unparseable classification reply, using default");
                    Classification::default()
                }
            },
            Err(e) => {
                warn!("Classification failed, using default: {}", e);
                Classification::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;

    #[test]
    fn test_parse_plain_json() {
        let c = parse_classification(
            r#"{"type": "Mathematical", "complexity": "simple", "required_tools": ["math.calculate"]}"#,
        )
        .unwrap();
        assert_eq!(c.task_type, "mathematical");
        assert_eq!(c.complexity, Complexity::Simple);
        assert_eq!(c.required_tools, vec!["math.calculate"]);
    }

    #[test]
    fn test_parse_fenced_json_with_prose() {
        let text = "Sure!\n```json\n{\"type\": \"technical\", \"complexity\": 3}\n```";
        let c = parse_classification(text).unwrap();
        assert_eq!(c.task_type, "technical");
        assert_eq!(c.complexity, Complexity::Complex);
        assert!(c.required_tools.is_empty());
    }

    #[test]
    fn test_parse_missing_fields_default() {
        let c = parse_classification("{}").unwrap();
        assert_eq!(c, Classification::default());
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_classification("no json here").is_none());
        assert!(parse_classification("} backwards {").is_none());
        assert!(parse_classification("{not json}").is_none());
    }

    #[test]
    fn test_complexity_levels() {
        assert_eq!(Complexity::Simple.level(), 1);
        assert_eq!(Complexity::Moderate.level(), 2);
        assert_eq!(Complexity::Complex.level(), 3);
        assert_eq!(Complexity::parse("HIGH"), Some(Complexity::Complex));
        assert_eq!(Complexity::parse("extreme"), None);
    }

    #[tokio::test]
    async fn test_classifier_falls_back_on_failure() {
        let backend = Arc::new(MockBackend::new().with_failure("down"));
        let classifier = Classifier::new(backend, "m", 1_000);
        assert_eq!(classifier.classify("hi").await, Classification::default());
    }

    #[tokio::test]
    async fn test_classifier_falls_back_on_prose() {
        let backend = Arc::new(MockBackend::new().with_reply("I think it is technical"));
        let classifier = Classifier::new(backend, "m", 1_000);
        assert_eq!(classifier.classify("hi").await, Classification::default());
    }

    #[tokio::test]
    async fn test_classifier_parses_reply() {
        let backend = Arc::new(
            MockBackend::new().with_reply(r#"{"type":"research","complexity":"complex"}"#),
        );
        let classifier = Classifier::new(backend, "m", 1_000);
        let c = classifier.classify("survey the literature").await;
        assert_eq!(c.task_type, "research");
        assert_eq!(c.complexity, Complexity::Complex);
    }
}
