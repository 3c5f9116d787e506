// Public modules
pub mod chunk;
pub mod message;
pub mod request;

// Re-exports
pub use chunk::{ChatCompletionChunk, ChunkChoice, ChunkDelta};
pub use message::{Message, Role};
pub use request::{ChatCompletionRequest, ReasoningEffort, RequestConfig};
