//! Interactive chat built on the parley client library.
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`session`]: the turn loop, preferences and conversation lifecycle
//! - [`commands`]: slash command parsing

mod commands;
mod config;
mod session;

pub use crate::render::{PlainTextRenderer, TranscriptBuffer, TranscriptEntry, TranscriptRenderer};
pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{API_KEY_ENV, ChatArgs, ChatArgsError, ChatConfig, DEFAULT_MODEL};
pub use session::{ChatSession, MISSING_API_KEY, SessionStats, TurnOutcome};
