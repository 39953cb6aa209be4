//! Agents: configured personas and their runtime shell
//!
//! An [`AgentDescriptor`] is the static description of an agent (identity,
//! model, goals, tools, permissions). An [`Agent`] binds a descriptor to a
//! model backend and enforces one in-flight call at a time.

pub mod agent;
pub mod profile;

pub use agent::{Agent, AgentContext};
pub use profile::{AgentDescriptor, AgentStyle, PermissionSet};
