//! Configuration types for the chat application.
//!
//! CLI arguments are parsed with `arrrg` into [`ChatArgs`] and resolved into a
//! [`ChatConfig`].  Preferences resolve as: CLI flag, then persisted value,
//! then built-in default.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use arrrg_derive::CommandLine;

use crate::client::DEFAULT_ENDPOINT;
use crate::decoder::DoneMarker;
use crate::persistence::Preferences;
use crate::types::ReasoningEffort;

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Environment variable consulted for the API key.
pub const API_KEY_ENV: &str = "PARLEY_API_KEY";

/// Default connect and response-header timeout, in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Directory name used under the platform data directory.
const STATE_DIR_NAME: &str = "parley";

/// Command-line arguments for the parley-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Chat-completion endpoint URL.
    #[arrrg(optional, "Chat completion endpoint URL", "URL")]
    pub endpoint: Option<String>,

    /// Model to use for chat.
    #[arrrg(optional, "Model to use (default: gpt-4o-mini)", "MODEL")]
    pub model: Option<String>,

    /// Reasoning effort hint.
    #[arrrg(optional, "Reasoning effort: minimal, low, medium, high", "EFFORT")]
    pub effort: Option<String>,

    /// System prompt to seed new conversations.
    #[arrrg(optional, "System prompt for new conversations", "PROMPT")]
    pub system: Option<String>,

    /// Directory holding persisted state.
    #[arrrg(optional, "Directory for persisted state", "DIR")]
    pub state_dir: Option<String>,

    /// Connect and response-header timeout.
    #[arrrg(optional, "Request timeout in seconds (default: 120)", "SECS")]
    pub timeout_secs: Option<u64>,

    /// Stop reading the stream at the `[DONE]` marker.
    #[arrrg(flag, "Stop reading the response at the [DONE] marker")]
    pub stop_at_done: bool,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// Errors produced while resolving [`ChatArgs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatArgsError {
    /// `--effort` named no known level.
    InvalidEffort(String),
    /// `--timeout-secs` was zero.
    ZeroTimeout,
}

impl fmt::Display for ChatArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatArgsError::InvalidEffort(msg) => write!(f, "--effort: {msg}"),
            ChatArgsError::ZeroTimeout => write!(f, "--timeout-secs must be positive"),
        }
    }
}

impl std::error::Error for ChatArgsError {}

/// Configuration for a chat session.
#[derive(Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Endpoint requests are sent to.
    pub endpoint: String,

    /// Model override from the command line.
    pub model: Option<String>,

    /// Reasoning effort override from the command line.
    pub reasoning_effort: Option<ReasoningEffort>,

    /// System prompt override from the command line.
    pub system_prompt: Option<String>,

    /// API key from the environment.
    pub api_key: Option<String>,

    /// Directory holding persisted state.
    pub state_dir: PathBuf,

    /// Connect and response-header timeout.
    pub timeout: Duration,

    /// Policy for the `[DONE]` marker.
    pub done_marker: DoneMarker,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values and no overrides.
    pub fn new() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: None,
            reasoning_effort: None,
            system_prompt: None,
            api_key: None,
            state_dir: default_state_dir(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            done_marker: DoneMarker::Ignore,
            use_color: true,
        }
    }

    /// Sets the endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Overrides the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Overrides the reasoning effort.
    pub fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }

    /// Overrides the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Sets the API key.  Blank keys are ignored.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.trim().is_empty());
        self
    }

    /// Sets the state directory.
    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = state_dir.into();
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the `[DONE]` policy.
    pub fn with_done_marker(mut self, done_marker: DoneMarker) -> Self {
        self.done_marker = done_marker;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// Reads the API key from [`API_KEY_ENV`].
    pub fn api_key_from_env() -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    /// Preferences used when nothing has been persisted.
    pub fn default_preferences() -> Preferences {
        Preferences {
            api_key: None,
            system_prompt: String::new(),
            model: DEFAULT_MODEL.to_string(),
            reasoning_effort: ReasoningEffort::default(),
        }
    }

    /// Layers the overrides in this config over `persisted`.
    pub fn resolve_preferences(&self, persisted: Preferences) -> Preferences {
        Preferences {
            api_key: self.api_key.clone().or(persisted.api_key),
            system_prompt: self
                .system_prompt
                .clone()
                .unwrap_or(persisted.system_prompt),
            model: self.model.clone().unwrap_or(persisted.model),
            reasoning_effort: self.reasoning_effort.unwrap_or(persisted.reasoning_effort),
        }
    }
}

impl fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("reasoning_effort", &self.reasoning_effort)
            .field("system_prompt", &self.system_prompt)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("state_dir", &self.state_dir)
            .field("timeout", &self.timeout)
            .field("done_marker", &self.done_marker)
            .field("use_color", &self.use_color)
            .finish()
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<ChatArgs> for ChatConfig {
    type Error = ChatArgsError;

    fn try_from(args: ChatArgs) -> Result<Self, Self::Error> {
        let reasoning_effort = args
            .effort
            .map(|s| s.parse::<ReasoningEffort>())
            .transpose()
            .map_err(ChatArgsError::InvalidEffort)?;
        let timeout = match args.timeout_secs {
            Some(0) => return Err(ChatArgsError::ZeroTimeout),
            Some(secs) => Duration::from_secs(secs),
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };
        let defaults = ChatConfig::new();

        Ok(ChatConfig {
            endpoint: args.endpoint.unwrap_or(defaults.endpoint),
            model: args.model.filter(|m| !m.trim().is_empty()),
            reasoning_effort,
            system_prompt: args.system,
            api_key: None,
            state_dir: args.state_dir.map(PathBuf::from).unwrap_or(defaults.state_dir),
            timeout,
            done_marker: if args.stop_at_done {
                DoneMarker::Terminate
            } else {
                DoneMarker::Ignore
            },
            use_color: !args.no_color,
        })
    }
}

fn default_state_dir() -> PathBuf {
    match dirs::data_dir() {
        Some(dir) => dir.join(STATE_DIR_NAME),
        None => PathBuf::from(".parley"),
    }
}
