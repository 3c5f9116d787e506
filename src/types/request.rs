use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::Message;

/// Reasoning effort requested from the model.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    /// Minimal effort - as little reasoning as the model allows
    Minimal,
    /// Low effort - light reasoning for simple tasks
    Low,
    /// Medium effort - moderate reasoning (default)
    #[default]
    Medium,
    /// High effort - thorough reasoning for complex tasks
    High,
}

impl ReasoningEffort {
    /// All levels, lowest first.
    pub const ALL: [ReasoningEffort; 4] = [
        ReasoningEffort::Minimal,
        ReasoningEffort::Low,
        ReasoningEffort::Medium,
        ReasoningEffort::High,
    ];

    /// The wire value of this level.
    pub fn as_str(self) -> &'static str {
        match self {
            ReasoningEffort::Minimal => "minimal",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

impl fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasoningEffort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|effort| effort.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!("unknown reasoning effort '{s}' (use minimal, low, medium or high)")
            })
    }
}

/// Per-request settings taken from the user's preferences.
#[derive(Clone, PartialEq, Eq)]
pub struct RequestConfig {
    /// Model identifier sent as `model`.
    pub model_id: String,

    /// Requested reasoning effort.
    pub reasoning_effort: ReasoningEffort,

    /// Bearer token for the endpoint.
    pub credential: String,
}

impl RequestConfig {
    /// Create a new request configuration.
    pub fn new(
        model_id: impl Into<String>,
        reasoning_effort: ReasoningEffort,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            reasoning_effort,
            credential: credential.into(),
        }
    }

    /// Whether the model accepts `reasoning_effort`.
    ///
    /// Search variants reject the parameter; any model id containing
    /// "search" (in any case) is treated as one.
    pub fn supports_reasoning_effort(&self) -> bool {
        !self.model_id.to_ascii_lowercase().contains("search")
    }
}

impl fmt::Debug for RequestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestConfig")
            .field("model_id", &self.model_id)
            .field("reasoning_effort", &self.reasoning_effort)
            .field("credential", &"<redacted>")
            .finish()
    }
}

/// Body of a streaming chat-completion request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionRequest {
    /// Model identifier.
    pub model: String,

    /// The full conversation, system message first when present.
    pub messages: Vec<Message>,

    /// Always true; the client only speaks the streaming protocol.
    pub stream: bool,

    /// Reasoning effort; omitted for models that reject it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
}

impl ChatCompletionRequest {
    /// Build the request for `messages` under `config`.
    pub fn new(config: &RequestConfig, messages: Vec<Message>) -> Self {
        let reasoning_effort = if config.supports_reasoning_effort() {
            Some(config.reasoning_effort)
        } else {
            None
        };
        Self {
            model: config.model_id.clone(),
            messages,
            stream: true,
            reasoning_effort,
        }
    }
}
