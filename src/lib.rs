// Public modules
pub mod chat;
pub mod client;
pub mod conversation;
pub mod decoder;
pub mod error;
pub mod persistence;
pub mod render;
pub mod types;

mod observability;

// Re-exports
pub use client::{ChatClient, ChunkStream, CompletionBackend};
pub use conversation::ConversationStore;
pub use decoder::{DoneMarker, StreamDecoder, decode_stream};
pub use error::{Error, Result};
pub use observability::register_biometrics;
pub use persistence::{
    FileStore, KeyValueStore, MemoryStore, PersistenceGateway, Preferences, StateKey,
};
pub use render::{PlainTextRenderer, TranscriptBuffer, TranscriptEntry, TranscriptRenderer};
pub use types::*;
