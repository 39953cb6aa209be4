//! Test doubles for the model backend
//!
//! [`MockBackend`] answers from a scripted queue, counts every call and keeps
//! the last prompt it was sent. Used by unit tests, integration tests and the
//! CLI's dry-run mode.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::providers::{ChatMessage, GenerateOptions, Generation, ModelBackend};

type Responder = Box<dyn Fn(&[ChatMessage]) -> Option<String> + Send + Sync>;

enum Scripted {
    Reply(String),
    Failure(String),
}

/// Scripted [`ModelBackend`]
pub struct MockBackend {
    script: Mutex<VecDeque<Scripted>>,
    responder: Option<Responder>,
    default_reply: String,
    delay: Option<Duration>,
    calls: AtomicUsize,
    last_messages: Mutex<Option<Vec<ChatMessage>>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            responder: None,
            default_reply: "ok".to_string(),
            delay: None,
            calls: AtomicUsize::new(0),
            last_messages: Mutex::new(None),
        }
    }

    /// Queue a reply. Queued entries are consumed in order.
    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        self.push(Scripted::Reply(reply.into()));
        self
    }

    /// Queue a failing call
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.push(Scripted::Failure(message.into()));
        self
    }

    /// Reply used once the queue is empty
    pub fn with_default_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = reply.into();
        self
    }

    /// Consulted before the queue; returning `None` falls through to it
    pub fn with_responder<F>(mut self, f: F) -> Self
    where
        F: Fn(&[ChatMessage]) -> Option<String> + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(f));
        self
    }

    /// Sleep before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push(&self, entry: Scripted) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(entry);
        }
    }

    /// Number of `generate` calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Messages passed to the most recent `generate` call
    pub fn last_messages(&self) -> Option<Vec<ChatMessage>> {
        self.last_messages.lock().ok().and_then(|m| m.clone())
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    fn provider_name(&self) -> &str {
        "mock"
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        _model: &str,
        _options: &GenerateOptions,
    ) -> Result<Generation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_messages.lock() {
            *last = Some(messages.to_vec());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(reply) = self.responder.as_ref().and_then(|f| f(messages)) {
            return Ok(Generation::text(reply));
        }

        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(Scripted::Reply(reply)) => Ok(Generation::text(reply)),
            Some(Scripted::Failure(message)) => Err(anyhow!(message)),
            None => Ok(Generation::text(self.default_reply.clone())),
        }
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec!["mock-model".to_string()])
    }
}
