//! Streaming chat sessions against OpenAI-compatible endpoints.
//!
//! This module provides the session core and the pieces the REPL binary needs:
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`session`]: transcript ownership, request lifecycle, and persistence
//! - [`commands`]: slash command parsing

mod commands;
mod config;
mod session;

pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{
    API_KEY_ENV, ChatArgs, ChatConfig, DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_PROVIDER,
    MESSAGES_KEY,
};
pub use session::{
    ChatSession, ListenerId, Outcome, SessionListener, SessionStats, SessionStatus, Submission,
};
