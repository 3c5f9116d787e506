//! Slash command parsing for the chat application.
//!
//! Input that starts with `/` controls the session and is never sent to the
//! endpoint.

use crate::types::ReasoningEffort;

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Start a new conversation.
    New,

    /// Change the model.
    Model(String),

    /// Change the reasoning effort.
    Effort(ReasoningEffort),

    /// Set or clear the system prompt.
    /// `None` clears the current system prompt.
    System(Option<String>),

    /// Store the API key.
    /// `None` forgets the stored key.
    Key(Option<String>),

    /// Replay the conversation.
    History,

    /// Show the current configuration.
    ShowConfig,

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command, or `None` if it
/// should be treated as a regular message.
///
/// # Examples
///
/// ```
/// # use parley::chat::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/model gpt-4o").is_some());
/// assert!(parse_command("Hello there!").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default().to_lowercase();
    let argument = parts.next().map(str::trim).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "new" | "clear" => ChatCommand::New,
        "model" => match argument {
            Some(model) => ChatCommand::Model(model.to_string()),
            None => ChatCommand::Invalid("/model requires a model name".to_string()),
        },
        "effort" => match argument {
            Some(arg) => match arg.parse::<ReasoningEffort>() {
                Ok(effort) => ChatCommand::Effort(effort),
                Err(err) => ChatCommand::Invalid(format!("/effort: {err}")),
            },
            None => ChatCommand::Invalid(
                "/effort requires one of minimal, low, medium, high".to_string(),
            ),
        },
        "system" => ChatCommand::System(argument.map(|s| s.to_string())),
        "key" => match argument {
            Some(arg) if arg.eq_ignore_ascii_case("clear") => ChatCommand::Key(None),
            Some(arg) => ChatCommand::Key(Some(arg.to_string())),
            None => ChatCommand::Invalid("/key requires a token (or 'clear')".to_string()),
        },
        "history" => ChatCommand::History,
        "config" => ChatCommand::ShowConfig,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        _ => ChatCommand::Invalid(format!("Unknown command: /{command}")),
    };

    Some(result)
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Commands:
  /new              Start a new conversation (alias: /clear)
  /model <id>       Change the model
  /effort <level>   Set reasoning effort: minimal, low, medium, high
  /system [text]    Set the system prompt (no text clears it)
  /key <token>      Store the API key (/key clear forgets it)
  /history          Replay the conversation
  /config           Show the current configuration
  /help             Show this help message
  /quit             Exit (aliases: /exit, /q)

The system prompt seeds new conversations; changing it mid-conversation
takes effect at the next /new."#
}
