// Public modules
pub mod chat;
pub mod client;
pub mod error;
pub mod observability;
pub mod render;
pub mod session_logger;
pub mod sse;
pub mod store;
pub mod types;
pub mod utils;

// Re-exports
pub use chat::{ChatSession, Outcome, SessionListener, SessionStatus};
pub use client::{ByteStream, InferenceClient, Transport};
pub use error::{Error, Result};
pub use observability::register_biometrics;
pub use render::TranscriptPrinter;
pub use session_logger::{NoopLogger, SessionLogger, StderrLogger};
pub use sse::{Frame, FrameDecoder};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use types::*;
