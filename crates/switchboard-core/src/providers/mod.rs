//! Model backend abstraction
//!
//! The coordination core only talks to language models through the
//! [`ModelBackend`] trait. Two HTTP implementations ship with the crate:
//! Anthropic's Messages API and any OpenAI-compatible chat endpoint.

pub mod anthropic;
pub mod openai_compat;
pub mod types;

pub use anthropic::AnthropicBackend;
pub use openai_compat::OpenAiCompatBackend;
pub use types::{
    ChatMessage, ChatRole, GenerateOptions, Generation, ModelBackend, NativeToolCall, TokenUsage,
};
