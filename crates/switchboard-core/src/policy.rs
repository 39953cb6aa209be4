//! Delegation policy: a prioritised rule engine
//!
//! Every rule is a list of conditions evaluated with AND semantics. Among the
//! rules that match, the one with the highest priority wins; ties go to the
//! rule declared first. The winning rule's selector then picks a target agent
//! from the agents currently available.

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::agents::AgentDescriptor;
use crate::classify::{Classification, Complexity};
use crate::context::ConversationContext;
use crate::error::{Result, SwitchboardError};
use crate::types::Message;

/// Picks a target agent id from the available agents
pub type AgentSelector =
    Arc<dyn Fn(&[AgentDescriptor], &ConversationContext) -> Option<String> + Send + Sync>;

/// Arbitrary predicate for `custom` conditions
pub type ConditionPredicate =
    Arc<dyn Fn(&Message, &Classification, &ConversationContext) -> bool + Send + Sync>;

/// What a condition inspects
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    /// Lower-cased message content
    Keyword,
    /// Classification complexity as simple=1, moderate=2, complex=3
    Complexity,
    /// Classification's required tools
    Tool,
    /// Classification's task type
    Domain,
    Custom,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    Contains,
    GreaterThan,
    LessThan,
    Regex,
    Function,
}

#[derive(Clone)]
pub enum ConditionValue {
    Text(String),
    List(Vec<String>),
    Number(f64),
    Predicate(ConditionPredicate),
}

impl std::fmt::Debug for ConditionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Self::List(l) => f.debug_tuple("List").field(l).finish(),
            Self::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl ConditionValue {
    /// Text and list values as a lower-cased list
    fn terms(&self) -> Vec<String> {
        match self {
            Self::Text(s) => vec![s.to_lowercase()],
            Self::List(l) => l.iter().map(|s| s.to_lowercase()).collect(),
            Self::Number(n) => vec![n.to_string()],
            Self::Predicate(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub kind: ConditionType,
    pub operator: ConditionOperator,
    pub value: ConditionValue,
    /// Case-insensitive pattern for `regex` conditions, built once
    compiled: Option<Regex>,
}

fn compile_pattern(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

impl Condition {
    pub fn new(kind: ConditionType, operator: ConditionOperator, value: ConditionValue) -> Self {
        let compiled = match (operator, &value) {
            (ConditionOperator::Regex, ConditionValue::Text(pattern)) => {
                compile_pattern(pattern).ok()
            }
            _ => None,
        };
        Self {
            kind,
            operator,
            value,
            compiled,
        }
    }

    /// Content contains any of `keywords`
    pub fn keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            ConditionType::Keyword,
            ConditionOperator::Contains,
            ConditionValue::List(keywords.into_iter().map(Into::into).collect()),
        )
    }

    /// Content matches `pattern`
    pub fn regex(pattern: impl Into<String>) -> Self {
        Self::new(
            ConditionType::Keyword,
            ConditionOperator::Regex,
            ConditionValue::Text(pattern.into()),
        )
    }

    pub fn complexity_above(threshold: u8) -> Self {
        Self::new(
            ConditionType::Complexity,
            ConditionOperator::GreaterThan,
            ConditionValue::Number(threshold as f64),
        )
    }

    pub fn complexity_below(threshold: u8) -> Self {
        Self::new(
            ConditionType::Complexity,
            ConditionOperator::LessThan,
            ConditionValue::Number(threshold as f64),
        )
    }

    /// Classification requires at least one of `tools`
    pub fn tools<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            ConditionType::Tool,
            ConditionOperator::Contains,
            ConditionValue::List(tools.into_iter().map(Into::into).collect()),
        )
    }

    /// Classification task type is one of `domains`
    pub fn domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            ConditionType::Domain,
            ConditionOperator::Equals,
            ConditionValue::List(domains.into_iter().map(Into::into).collect()),
        )
    }

    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&Message, &Classification, &ConversationContext) -> bool + Send + Sync + 'static,
    {
        Self::new(
            ConditionType::Custom,
            ConditionOperator::Function,
            ConditionValue::Predicate(Arc::new(predicate)),
        )
    }

    pub fn matches(
        &self,
        message: &Message,
        classification: &Classification,
        context: &ConversationContext,
    ) -> bool {
        if let (ConditionOperator::Function, ConditionValue::Predicate(predicate)) =
            (self.operator, &self.value)
        {
            return predicate(message, classification, context);
        }

        match self.kind {
            ConditionType::Keyword => self.match_text(&message.content.to_lowercase()),
            ConditionType::Domain => self.match_text(&classification.task_type.to_lowercase()),
            ConditionType::Complexity => self.match_complexity(classification.complexity),
            ConditionType::Tool => self.match_tools(&classification.required_tools),
            // Custom conditions only match through a predicate
            ConditionType::Custom => false,
        }
    }

    fn match_text(&self, subject: &str) -> bool {
        match self.operator {
            ConditionOperator::Equals => self.value.terms().iter().any(|t| subject.trim() == t),
            ConditionOperator::Contains => {
                self.value.terms().iter().any(|t| subject.contains(t.as_str()))
            }
            ConditionOperator::Regex => match &self.compiled {
                Some(re) => re.is_match(subject),
                None => {
                    warn!("Invalid regex {:?} in policy condition", self.value);
                    false
                }
            },
            _ => false,
        }
    }

    fn match_complexity(&self, complexity: Complexity) -> bool {
        let level = complexity.level() as f64;
        let threshold = match &self.value {
            ConditionValue::Number(n) => Some(*n),
            ConditionValue::Text(s) => Complexity::parse(s).map(|c| c.level() as f64),
            _ => None,
        };
        match (self.operator, threshold) {
            (ConditionOperator::Equals, Some(t)) => (level - t).abs() < f64::EPSILON,
            (ConditionOperator::GreaterThan, Some(t)) => level > t,
            (ConditionOperator::LessThan, Some(t)) => level < t,
            (ConditionOperator::Contains, _) => self
                .value
                .terms()
                .iter()
                .filter_map(|t| Complexity::parse(t))
                .any(|c| c == complexity),
            _ => false,
        }
    }

    fn match_tools(&self, required: &[String]) -> bool {
        let wanted = self.value.terms();
        let required: Vec<String> = required.iter().map(|t| t.to_lowercase()).collect();
        match self.operator {
            ConditionOperator::Contains => wanted.iter().any(|t| required.contains(t)),
            ConditionOperator::Equals => {
                let mut a = wanted;
                let mut b = required;
                a.sort();
                a.dedup();
                b.sort();
                b.dedup();
                a == b
            }
            _ => false,
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match (&self.operator, &self.value) {
            (ConditionOperator::Regex, ConditionValue::Text(pattern)) => match &self.compiled {
                Some(_) => Ok(()),
                None => compile_pattern(pattern)
                    .map(|_| ())
                    .map_err(|e| format!("invalid regex '{}': {}", pattern, e)),
            },
            (ConditionOperator::Regex, _) => Err("regex operator needs a text pattern".to_string()),
            (ConditionOperator::Function, ConditionValue::Predicate(_)) => Ok(()),
            (ConditionOperator::Function, _) => {
                Err("function operator needs a predicate".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// A named, prioritised predicate that nominates a delegation target
#[derive(Clone)]
pub struct PolicyRule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub conditions: Vec<Condition>,
    pub priority: u32,
    pub selector: AgentSelector,
}

impl std::fmt::Debug for PolicyRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyRule")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("conditions", &self.conditions)
            .finish()
    }
}

impl PolicyRule {
    pub fn new<F>(id: impl Into<String>, name: impl Into<String>, priority: u32, selector: F) -> Self
    where
        F: Fn(&[AgentDescriptor], &ConversationContext) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            conditions: Vec::new(),
            priority,
            selector: Arc::new(selector),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// All conditions hold. A rule without conditions never matches.
    pub fn matches(
        &self,
        message: &Message,
        classification: &Classification,
        context: &ConversationContext,
    ) -> bool {
        !self.conditions.is_empty()
            && self
                .conditions
                .iter()
                .all(|c| c.matches(message, classification, context))
    }

    pub fn summary(&self) -> RuleSummary {
        RuleSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            priority: self.priority,
            conditions: self
                .conditions
                .iter()
                .map(|c| (c.kind, c.operator))
                .collect(),
        }
    }
}

/// Serialisable description of a rule
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RuleSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub priority: u32,
    pub conditions: Vec<(ConditionType, ConditionOperator)>,
}

/// Selector that returns the first agent whose role matches one of `roles`
/// or that is allowed one of `tools`
pub fn select_by_role_or_tool(roles: &[&str], tools: &[&str]) -> AgentSelector {
    let roles: Vec<String> = roles.iter().map(|s| s.to_string()).collect();
    let tools: Vec<String> = tools.iter().map(|s| s.to_string()).collect();
    Arc::new(move |agents: &[AgentDescriptor], _ctx: &ConversationContext| {
        agents
            .iter()
            .find(|a| roles.iter().any(|r| a.matches_role(r)))
            .or_else(|| {
                agents
                    .iter()
                    .find(|a| tools.iter().any(|t| a.is_tool_allowed(t)))
            })
            .map(|a| a.id.clone())
    })
}

/// Outcome of a policy evaluation
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PolicyDecision {
    pub should_delegate: bool,
    pub target_agent_id: Option<String>,
    pub rule_id: Option<String>,
    pub reason: String,
    pub confidence: f64,
    pub matched_rule_ids: Vec<String>,
}

impl PolicyDecision {
    fn decline(reason: impl Into<String>, matched_rule_ids: Vec<String>) -> Self {
        Self {
            should_delegate: false,
            target_agent_id: None,
            rule_id: None,
            reason: reason.into(),
            confidence: 0.0,
            matched_rule_ids,
        }
    }
}

pub const NO_SUITABLE_AGENT: &str = "no suitable target agent";

/// Confidence for a decision won by `best` among `matched` rule priorities
fn confidence(best_index: usize, matched: &[u32]) -> f64 {
    let best = matched[best_index] as f64;
    let mut score = (best / 10.0).min(1.0);
    if matched.len() > 1 {
        score += 0.1;
    }
    let near_tie = matched
        .iter()
        .enumerate()
        .any(|(i, p)| i != best_index && (*p as f64) >= 0.8 * best);
    if near_tie {
        score -= 0.2;
    }
    score.clamp(0.0, 1.0)
}

/// Ordered, mutable collection of [`PolicyRule`]s
#[derive(Debug, Clone)]
pub struct DelegationPolicy {
    rules: Vec<PolicyRule>,
}

impl Default for DelegationPolicy {
    fn default() -> Self {
        Self {
            rules: builtin_rules(),
        }
    }
}

impl DelegationPolicy {
    /// Policy with the built-in rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy with no rules at all
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: PolicyRule) -> Result<()> {
        if self.rules.iter().any(|r| r.id == rule.id) {
            return Err(SwitchboardError::InvalidRule {
                rule_id: rule.id,
                reason: "a rule with this id already exists".to_string(),
            });
        }
        for condition in &rule.conditions {
            condition
                .validate()
                .map_err(|reason| SwitchboardError::InvalidRule {
                    rule_id: rule.id.clone(),
                    reason,
                })?;
        }
        debug!("Added policy rule '{}' (priority {})", rule.id, rule.priority);
        self.rules.push(rule);
        Ok(())
    }

    pub fn remove_rule(&mut self, rule_id: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.id != rule_id);
        self.rules.len() != before
    }

    /// Copies of the rules in declaration order
    pub fn list_rules(&self) -> Vec<PolicyRule> {
        self.rules.clone()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn evaluate(
        &self,
        message: &Message,
        classification: &Classification,
        agents: &[AgentDescriptor],
        context: &ConversationContext,
    ) -> PolicyDecision {
        if agents.is_empty() {
            return PolicyDecision::decline("no agents available", Vec::new());
        }

        let matched: Vec<&PolicyRule> = self
            .rules
            .iter()
            .filter(|r| r.matches(message, classification, context))
            .collect();
        let matched_ids: Vec<String> = matched.iter().map(|r| r.id.clone()).collect();

        // Strictly greater priority replaces, so the first-declared rule wins ties
        let Some(best_index) = (0..matched.len()).fold(None, |best: Option<usize>, i| match best {
            Some(b) if matched[i].priority <= matched[b].priority => Some(b),
            _ => Some(i),
        }) else {
            debug!("No policy rule matched");
            return PolicyDecision::decline("no matching rule", matched_ids);
        };
        let best = matched[best_index];

        let target = (best.selector)(agents, context)
            .filter(|id| agents.iter().any(|a| &a.id == id));
        let Some(target) = target else {
            debug!("Rule '{}' matched but found no target agent", best.id);
            return PolicyDecision {
                rule_id: Some(best.id.clone()),
                ..PolicyDecision::decline(NO_SUITABLE_AGENT, matched_ids)
            };
        };

        let priorities: Vec<u32> = matched.iter().map(|r| r.priority).collect();
        let confidence = confidence(best_index, &priorities);
        debug!(
            "Rule '{}' selected agent '{}' (confidence {:.2}, {} rules matched)",
            best.id,
            target,
            confidence,
            matched.len()
        );

        PolicyDecision {
            should_delegate: true,
            target_agent_id: Some(target),
            rule_id: Some(best.id.clone()),
            reason: format!("matched rule '{}'", best.name),
            confidence,
            matched_rule_ids: matched_ids,
        }
    }
}

/// The five default rules: math > technical > research > creative > support
pub fn builtin_rules() -> Vec<PolicyRule> {
    fn rule(
        id: &str,
        name: &str,
        description: &str,
        priority: u32,
        keywords: &[&str],
        roles: &[&str],
        tools: &[&str],
    ) -> PolicyRule {
        PolicyRule {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            conditions: vec![Condition::keywords(keywords.iter().copied())],
            priority,
            selector: select_by_role_or_tool(roles, tools),
        }
    }

    vec![
        rule(
            "technical",
            "Technical",
            "Programming, debugging and infrastructure questions",
            8,
            &[
                "code", "debug", "program", "compile", "bug", "function", "api", "deploy",
                "script", "stack trace", "compute",
            ],
            &["technical", "developer", "engineer", "code"],
            &["code.run"],
        ),
        rule(
            "research",
            "Research",
            "Looking things up and summarising sources",
            7,
            &[
                "research", "investigate", "find information", "sources", "literature",
                "look up", "compare", "analyze", "analyse",
            ],
            &["research", "analyst"],
            &["rag.search", "web.search"],
        ),
        rule(
            "creative",
            "Creative",
            "Writing, brainstorming and design",
            6,
            &["story", "poem", "creative", "brainstorm", "slogan", "design", "lyrics"],
            &["creative", "writer", "designer"],
            &[],
        ),
        rule(
            "mathematical",
            "Mathematical",
            "Arithmetic and mathematical problem solving",
            9,
            &[
                "calculate", "compute", "solve", "equation", "math", "arithmetic",
                "integral", "derivative",
            ],
            &["math"],
            &["math.calculate"],
        ),
        rule(
            "support",
            "Support",
            "Account, troubleshooting and customer support",
            5,
            &["help", "support", "issue", "problem", "refund", "account", "troubleshoot"],
            &["support"],
            &[],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ConversationContext {
        ConversationContext::new("conv-1")
    }

    fn agents() -> Vec<AgentDescriptor> {
        vec![
            AgentDescriptor::new("dev", "Developer").with_role("developer"),
            AgentDescriptor::new("calc", "Calculator").with_role("math specialist"),
            AgentDescriptor::new("helper", "Helpdesk").with_role("support"),
        ]
    }

    fn fixed(id: &str, priority: u32, target: &'static str, keyword: &str) -> PolicyRule {
        PolicyRule::new(id, id, priority, move |_: &[AgentDescriptor], _: &ConversationContext| {
            Some(target.to_string())
        })
        .with_condition(Condition::keywords([keyword]))
    }

    fn evaluate(policy: &DelegationPolicy, content: &str) -> PolicyDecision {
        policy.evaluate(
            &Message::user("conv-1", content),
            &Classification::default(),
            &agents(),
            &ctx(),
        )
    }

    #[test]
    fn test_builtin_math_beats_technical() {
        let decision = evaluate(&DelegationPolicy::new(), "Please compute the answer");
        assert!(decision.should_delegate);
        assert_eq!(decision.rule_id.as_deref(), Some("mathematical"));
        assert_eq!(decision.target_agent_id.as_deref(), Some("calc"));
        assert!(decision.matched_rule_ids.contains(&"technical".to_string()));
        // 0.9 + 0.1 - 0.2 near-tie with technical (8 >= 7.2)
        assert!((decision.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_equal_priority_first_declared_wins() {
        let mut policy = DelegationPolicy::empty();
        policy.add_rule(fixed("first", 8, "dev", "deploy")).unwrap();
        policy.add_rule(fixed("second", 8, "helper", "deploy")).unwrap();
        let decision = evaluate(&policy, "deploy the app");
        assert_eq!(decision.rule_id.as_deref(), Some("first"));
        assert_eq!(decision.target_agent_id.as_deref(), Some("dev"));
    }

    #[test]
    fn test_zero_agents_never_delegates() {
        let decision = DelegationPolicy::new().evaluate(
            &Message::user("conv-1", "calculate 2+2"),
            &Classification::default(),
            &[],
            &ctx(),
        );
        assert!(!decision.should_delegate);
        assert!(decision.target_agent_id.is_none());
    }

    #[test]
    fn test_no_match() {
        let decision = evaluate(&DelegationPolicy::new(), "good morning");
        assert!(!decision.should_delegate);
        assert!(decision.matched_rule_ids.is_empty());
    }

    #[test]
    fn test_selector_without_candidate() {
        let mut policy = DelegationPolicy::empty();
        policy
            .add_rule(
                PolicyRule::new("poet", "Poetry", 6, |_: &[AgentDescriptor], _: &ConversationContext| None)
                    .with_condition(Condition::keywords(["poem"])),
            )
            .unwrap();
        let decision = evaluate(&policy, "write a poem");
        assert!(!decision.should_delegate);
        assert_eq!(decision.reason, NO_SUITABLE_AGENT);
        assert_eq!(decision.rule_id.as_deref(), Some("poet"));
    }

    #[test]
    fn test_selector_returning_unknown_agent() {
        let mut policy = DelegationPolicy::empty();
        policy.add_rule(fixed("ghost", 6, "nobody", "haunt")).unwrap();
        let decision = evaluate(&policy, "haunt the house");
        assert!(!decision.should_delegate);
        assert_eq!(decision.reason, NO_SUITABLE_AGENT);
    }

    #[test]
    fn test_confidence_clamped() {
        let mut policy = DelegationPolicy::empty();
        policy.add_rule(fixed("top", 10, "dev", "deploy")).unwrap();
        assert!((evaluate(&policy, "deploy").confidence - 1.0).abs() < 1e-9);

        policy.add_rule(fixed("low", 2, "helper", "deploy")).unwrap();
        let decision = evaluate(&policy, "deploy");
        assert_eq!(decision.matched_rule_ids.len(), 2);
        assert!((decision.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_helper() {
        assert!((confidence(0, &[5]) - 0.5).abs() < 1e-9);
        assert!((confidence(0, &[5, 1]) - 0.6).abs() < 1e-9);
        assert!((confidence(1, &[4, 5]) - 0.4).abs() < 1e-9);
        assert!((confidence(0, &[0]) - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_and_semantics() {
        let mut policy = DelegationPolicy::empty();
        policy
            .add_rule(
                fixed("hard-code", 8, "dev", "code").with_condition(Condition::complexity_above(2)),
            )
            .unwrap();
        let message = Message::user("conv-1", "review this code");

        let simple = Classification::new("technical", Complexity::Moderate);
        assert!(!policy.evaluate(&message, &simple, &agents(), &ctx()).should_delegate);

        let complex = Classification::new("technical", Complexity::Complex);
        assert!(policy.evaluate(&message, &complex, &agents(), &ctx()).should_delegate);
    }

    #[test]
    fn test_tool_and_domain_conditions() {
        let message = Message::user("conv-1", "anything");
        let classification =
            Classification::new("Mathematical", Complexity::Simple).with_tools(["math.calculate"]);

        assert!(Condition::tools(["math.calculate", "rag.search"]).matches(&message, &classification, &ctx()));
        assert!(!Condition::tools(["rag.search"]).matches(&message, &classification, &ctx()));
        let equal = Condition::new(
            ConditionType::Tool,
            ConditionOperator::Equals,
            ConditionValue::List(vec!["math.calculate".to_string()]),
        );
        assert!(equal.matches(&message, &classification, &ctx()));

        assert!(Condition::domains(["mathematical"]).matches(&message, &classification, &ctx()));
        assert!(!Condition::domains(["creative"]).matches(&message, &classification, &ctx()));
        assert!(Condition::complexity_below(2).matches(&message, &classification, &ctx()));
    }

    #[test]
    fn test_regex_and_custom_conditions() {
        let message = Message::user("conv-1", "Ticket #4521 is broken");
        let classification = Classification::default();
        assert!(Condition::regex(r"#\d+").matches(&message, &classification, &ctx()));
        assert!(!Condition::regex("[unclosed").matches(&message, &classification, &ctx()));
        assert!(Condition::regex(r"^Ticket #\d+").matches(&message, &classification, &ctx()));
        assert!(Condition::regex("BROKEN$").matches(&message, &classification, &ctx()));

        let with_topic = Condition::custom(|_, _, c| c.get_context_summary().topic.is_some());
        assert!(!with_topic.matches(&message, &classification, &ctx()));
        let mut topical = ctx();
        topical.set_topic("billing");
        assert!(with_topic.matches(&message, &classification, &topical));
    }

    #[test]
    fn test_add_rule_validation() {
        let mut policy = DelegationPolicy::new();
        let duplicate = policy.add_rule(fixed("support", 1, "helper", "x"));
        assert!(matches!(duplicate, Err(SwitchboardError::InvalidRule { .. })));

        let bad_regex = PolicyRule::new("bad", "Bad", 1, |_: &[AgentDescriptor], _: &ConversationContext| None)
            .with_condition(Condition::regex("(oops"));
        assert!(policy.add_rule(bad_regex).is_err());
        assert_eq!(policy.len(), 5);
    }

    #[test]
    fn test_remove_and_list_rules() {
        let mut policy = DelegationPolicy::new();
        let ids: Vec<String> = policy.list_rules().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["technical", "research", "creative", "mathematical", "support"]);
        assert!(policy.remove_rule("creative"));
        assert!(!policy.remove_rule("creative"));
        assert_eq!(policy.len(), 4);
        assert_eq!(policy.list_rules()[0].summary().priority, 8);
    }
}
