// Public modules
pub mod chat_completion_chunk;
pub mod chat_completion_request;
pub mod message;
pub mod message_role;

// Re-exports
pub use chat_completion_chunk::{ChatCompletionChunk, ChunkChoice, ChunkDelta};
pub use chat_completion_request::{ChatCompletionRequest, ChatMessageParam};
pub use message::Message;
pub use message_role::MessageRole;
