use serde::{Deserialize, Serialize};

/// One `data:` record of a streamed chat-completion response.
///
/// Only the fields the client reads are modelled; everything else in the
/// record is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionChunk {
    /// Candidate continuations; the client only reads the first.
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

/// A single choice within a [`ChatCompletionChunk`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkChoice {
    /// The incremental update for this choice.
    #[serde(default)]
    pub delta: ChunkDelta,
}

/// Incremental content for a choice.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkDelta {
    /// Text fragment, if this record carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    /// Returns `choices[0].delta.content` when it is present and non-empty.
    pub fn delta_text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
            .filter(|text| !text.is_empty())
    }
}
