//! Per-conversation shared state
//!
//! A [`ConversationContext`] accumulates everything a conversation has seen:
//! participants, goals and constraints, a shared key/value knowledge store,
//! the full message history and every delegation attempt. Readers hand out
//! owned copies so callers can never mutate context state through a return
//! value.
//!
//! [`ConversationStore`] keeps one context per conversation id, created on
//! first access and kept until removed explicitly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, SwitchboardError};
use crate::types::{Message, Response};

/// One completed turn: the message, the reply and who produced it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub message: Message,
    pub response: Response,
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
}

/// UI-facing status of a delegation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DelegationStatus {
    Completed,
    Failed,
}

impl std::fmt::Display for DelegationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One delegation attempt. Appended exactly once per attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DelegationRecord {
    pub from_agent_id: String,
    pub to_agent_id: String,
    pub message: Message,
    pub response: Option<Response>,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

impl DelegationRecord {
    pub fn status(&self) -> DelegationStatus {
        if self.success {
            DelegationStatus::Completed
        } else {
            DelegationStatus::Failed
        }
    }

    pub fn to_view(&self) -> DelegationRecordView {
        DelegationRecordView {
            from_agent_id: self.from_agent_id.clone(),
            to_agent_id: self.to_agent_id.clone(),
            message_id: self.message.id.clone(),
            content: self.message.content.clone(),
            response: self.response.as_ref().map(|r| r.content.clone()),
            timestamp: self.timestamp,
            status: self.status(),
            error: self.error.clone(),
        }
    }
}

/// Flattened delegation record for transport layers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DelegationRecordView {
    pub from_agent_id: String,
    pub to_agent_id: String,
    pub message_id: String,
    pub content: String,
    pub response: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status: DelegationStatus,
    pub error: Option<String>,
}

/// Compact description of a conversation's state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextSummary {
    pub conversation_id: String,
    pub topic: Option<String>,
    pub participants: Vec<String>,
    pub goals: Vec<String>,
    pub constraints: Vec<String>,
    pub shared_knowledge: BTreeMap<String, Value>,
    pub metadata: BTreeMap<String, Value>,
    pub message_count: usize,
    pub delegation_count: usize,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Aggregate counters over a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationStats {
    pub message_count: usize,
    pub delegation_count: usize,
    pub successful_delegations: usize,
    pub failed_delegations: usize,
    pub delegation_success_rate: f64,
    pub participant_count: usize,
    pub messages_by_agent: BTreeMap<String, usize>,
    pub delegations_by_target: BTreeMap<String, usize>,
    pub first_message_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
}

/// Flat, serialisable copy of a whole context
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextSnapshot {
    pub conversation_id: String,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub shared_knowledge: BTreeMap<String, Value>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub delegations: Vec<DelegationRecord>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// Mutable state for a single conversation
#[derive(Debug, Clone)]
pub struct ConversationContext {
    conversation_id: String,
    participants: BTreeSet<String>,
    topic: Option<String>,
    goals: Vec<String>,
    constraints: Vec<String>,
    shared_knowledge: BTreeMap<String, Value>,
    history: Vec<HistoryEntry>,
    delegations: Vec<DelegationRecord>,
    metadata: BTreeMap<String, Value>,
}

impl ConversationContext {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            participants: BTreeSet::new(),
            topic: None,
            goals: Vec::new(),
            constraints: Vec::new(),
            shared_knowledge: BTreeMap::new(),
            history: Vec::new(),
            delegations: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Returns false if the participant was already present
    pub fn add_participant(&mut self, participant: impl Into<String>) -> bool {
        self.participants.insert(participant.into())
    }

    pub fn set_topic(&mut self, topic: impl Into<String>) {
        self.topic = Some(topic.into());
    }

    pub fn add_goal(&mut self, goal: impl Into<String>) {
        let goal = goal.into();
        if !self.goals.contains(&goal) {
            self.goals.push(goal);
        }
    }

    pub fn remove_goal(&mut self, goal: &str) -> bool {
        let before = self.goals.len();
        self.goals.retain(|g| g != goal);
        self.goals.len() != before
    }

    pub fn add_constraint(&mut self, constraint: impl Into<String>) {
        let constraint = constraint.into();
        if !self.constraints.contains(&constraint) {
            self.constraints.push(constraint);
        }
    }

    pub fn remove_constraint(&mut self, constraint: &str) -> bool {
        let before = self.constraints.len();
        self.constraints.retain(|c| c != constraint);
        self.constraints.len() != before
    }

    pub fn set_shared_knowledge(&mut self, key: impl Into<String>, value: Value) {
        self.shared_knowledge.insert(key.into(), value);
    }

    pub fn remove_shared_knowledge(&mut self, key: &str) -> Option<Value> {
        self.shared_knowledge.remove(key)
    }

    pub fn get_shared_knowledge(&self, key: &str) -> Option<Value> {
        self.shared_knowledge.get(key).cloned()
    }

    /// Copy of the whole shared knowledge map
    pub fn shared_knowledge(&self) -> BTreeMap<String, Value> {
        self.shared_knowledge.clone()
    }

    /// Record a completed turn. The message must belong to this conversation.
    pub fn add_message(
        &mut self,
        message: Message,
        response: Response,
        agent_id: impl Into<String>,
    ) -> Result<()> {
        if message.conversation_id != self.conversation_id {
            return Err(SwitchboardError::ConversationMismatch {
                expected: self.conversation_id.clone(),
                actual: message.conversation_id,
            });
        }
        let agent_id = agent_id.into();
        self.participants.insert(agent_id.clone());
        self.history.push(HistoryEntry {
            message,
            response,
            timestamp: Utc::now(),
            agent_id,
        });
        Ok(())
    }

    pub fn add_delegation(&mut self, record: DelegationRecord) {
        debug!(
            "Conversation {}: delegation {} -> {} ({})",
            self.conversation_id,
            record.from_agent_id,
            record.to_agent_id,
            record.status()
        );
        self.delegations.push(record);
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    pub fn message_count(&self) -> usize {
        self.history.len()
    }

    pub fn delegation_count(&self) -> usize {
        self.delegations.len()
    }

    /// The last `limit` turns, oldest first
    pub fn recent_history(&self, limit: usize) -> Vec<HistoryEntry> {
        let start = self.history.len().saturating_sub(limit);
        self.history[start..].to_vec()
    }

    pub fn get_delegation_history(&self) -> Vec<DelegationRecord> {
        self.delegations.clone()
    }

    pub fn get_context_summary(&self) -> ContextSummary {
        ContextSummary {
            conversation_id: self.conversation_id.clone(),
            topic: self.topic.clone(),
            participants: self.participants.iter().cloned().collect(),
            goals: self.goals.clone(),
            constraints: self.constraints.clone(),
            shared_knowledge: self.shared_knowledge.clone(),
            metadata: self.metadata.clone(),
            message_count: self.history.len(),
            delegation_count: self.delegations.len(),
            last_activity: self.history.last().map(|h| h.timestamp),
        }
    }

    pub fn get_conversation_stats(&self) -> ConversationStats {
        let successful = self.delegations.iter().filter(|d| d.success).count();
        let failed = self.delegations.len() - successful;

        let mut messages_by_agent = BTreeMap::new();
        for entry in &self.history {
            *messages_by_agent.entry(entry.agent_id.clone()).or_insert(0) += 1;
        }
        let mut delegations_by_target = BTreeMap::new();
        for record in &self.delegations {
            *delegations_by_target
                .entry(record.to_agent_id.clone())
                .or_insert(0) += 1;
        }

        let first = self.history.first().map(|h| h.timestamp);
        let last = self.history.last().map(|h| h.timestamp);

        ConversationStats {
            message_count: self.history.len(),
            delegation_count: self.delegations.len(),
            successful_delegations: successful,
            failed_delegations: failed,
            delegation_success_rate: if self.delegations.is_empty() {
                0.0
            } else {
                successful as f64 / self.delegations.len() as f64
            },
            participant_count: self.participants.len(),
            messages_by_agent,
            delegations_by_target,
            first_message_at: first,
            last_message_at: last,
            duration_secs: first.zip(last).map(|(f, l)| (l - f).num_seconds()),
        }
    }

    pub fn export(&self) -> ContextSnapshot {
        ContextSnapshot {
            conversation_id: self.conversation_id.clone(),
            participants: self.participants.iter().cloned().collect(),
            topic: self.topic.clone(),
            goals: self.goals.clone(),
            constraints: self.constraints.clone(),
            shared_knowledge: self.shared_knowledge.clone(),
            history: self.history.clone(),
            delegations: self.delegations.clone(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn import(snapshot: ContextSnapshot) -> Self {
        Self {
            conversation_id: snapshot.conversation_id,
            participants: snapshot.participants.into_iter().collect(),
            topic: snapshot.topic,
            goals: snapshot.goals,
            constraints: snapshot.constraints,
            shared_knowledge: snapshot.shared_knowledge,
            history: snapshot.history,
            delegations: snapshot.delegations,
            metadata: snapshot.metadata,
        }
    }

    /// Clear everything except the conversation id
    pub fn reset(&mut self) {
        *self = Self::new(std::mem::take(&mut self.conversation_id));
    }
}

/// One [`ConversationContext`] per conversation id.
///
/// Locks are only held for the duration of a synchronous closure, never across
/// an await point, so two overlapping turns on the same conversation can
/// interleave their mutations.
#[derive(Default)]
pub struct ConversationStore {
    contexts: RwLock<HashMap<String, ConversationContext>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the context for `conversation_id`, creating it if needed
    pub async fn with_context<R>(
        &self,
        conversation_id: &str,
        f: impl FnOnce(&mut ConversationContext) -> R,
    ) -> R {
        let mut contexts = self.contexts.write().await;
        let context = contexts
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                debug!("Creating conversation context '{}'", conversation_id);
                ConversationContext::new(conversation_id)
            });
        f(context)
    }

    /// Read-only access to an existing context
    pub async fn read<R>(
        &self,
        conversation_id: &str,
        f: impl FnOnce(&ConversationContext) -> R,
    ) -> Option<R> {
        let contexts = self.contexts.read().await;
        contexts.get(conversation_id).map(f)
    }

    pub async fn export(&self, conversation_id: &str) -> Option<ContextSnapshot> {
        self.read(conversation_id, |c| c.export()).await
    }

    /// Replace (or create) a context from a snapshot
    pub async fn import(&self, snapshot: ContextSnapshot) {
        let mut contexts = self.contexts.write().await;
        contexts.insert(
            snapshot.conversation_id.clone(),
            ConversationContext::import(snapshot),
        );
    }

    pub async fn remove(&self, conversation_id: &str) -> bool {
        self.contexts.write().await.remove(conversation_id).is_some()
    }

    pub async fn conversation_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.contexts.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Copy of every delegation record across all conversations
    pub async fn all_delegations(&self) -> Vec<DelegationRecord> {
        self.contexts
            .read()
            .await
            .values()
            .flat_map(|c| c.delegations.iter().cloned())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.contexts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.contexts.read().await.is_empty()
    }
}
