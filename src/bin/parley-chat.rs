//! Interactive chat against an OpenAI-compatible chat-completion endpoint.
//!
//! # Usage
//!
//! ```bash
//! # Basic usage; the API key comes from PARLEY_API_KEY or a stored /key
//! parley-chat
//!
//! # Pick a model and reasoning effort
//! parley-chat --model o3-mini --effort high
//!
//! # Talk to a local server and keep state somewhere else
//! parley-chat --endpoint http://localhost:8080/v1/chat/completions --state-dir ./state
//!
//! # Disable colors (useful for piping output)
//! parley-chat --no-color
//! ```
//!
//! Diagnostics go to stderr, filtered by `PARLEY_LOG` (default `warn`).

use std::sync::Arc;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use parley::chat::{
    ChatArgs, ChatCommand, ChatConfig, ChatSession, PlainTextRenderer, TranscriptRenderer,
    help_text, parse_command,
};
use parley::{ChatClient, FileStore, PersistenceGateway};

/// Main entry point for the parley-chat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("PARLEY_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let (args, _) = ChatArgs::from_command_line_relaxed("parley-chat [OPTIONS]");
    let config = ChatConfig::try_from(args)?.with_api_key(ChatConfig::api_key_from_env());

    let store = FileStore::open(config.state_dir.clone())?;
    let gateway = PersistenceGateway::with_background_writes(Arc::new(store));
    let preferences =
        config.resolve_preferences(gateway.load_preferences(&ChatConfig::default_preferences()));
    tracing::debug!(?config, ?preferences, "starting chat");

    let client = ChatClient::with_options(Some(&config.endpoint), Some(config.timeout))?;
    let mut session = ChatSession::new(client, gateway.clone(), preferences)
        .with_done_marker(config.done_marker);
    let mut renderer = PlainTextRenderer::with_color(config.use_color);
    let mut rl = DefaultEditor::new()?;

    println!(
        "parley (model: {}, effort: {})",
        session.preferences().model,
        session.preferences().reasoning_effort
    );
    println!("Type /help for commands, /quit to exit\n");
    session.render_history(&mut renderer);

    loop {
        let readline = rl.readline("> ");

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                if let Some(command) = parse_command(line) {
                    match command {
                        ChatCommand::Quit => {
                            println!("Goodbye!");
                            break;
                        }
                        ChatCommand::Help => {
                            println!("{}", help_text());
                        }
                        ChatCommand::New => {
                            session.new_chat(&mut renderer);
                        }
                        ChatCommand::Model(model) => {
                            session.set_model(model);
                            println!("    Model set to: {}", session.preferences().model);
                        }
                        ChatCommand::Effort(effort) => {
                            session.set_reasoning_effort(effort);
                            println!("    Reasoning effort set to: {effort}");
                        }
                        ChatCommand::System(prompt) => {
                            let cleared = prompt.is_none();
                            let reseeded = session.set_system_prompt(prompt.unwrap_or_default());
                            match (cleared, reseeded) {
                                (true, true) => println!("    System prompt cleared"),
                                (false, true) => println!("    System prompt set"),
                                (_, false) => {
                                    println!("    System prompt saved; it applies after /new")
                                }
                            }
                        }
                        ChatCommand::Key(key) => {
                            let cleared = key.is_none();
                            session.set_api_key(key);
                            if cleared {
                                println!("    API key forgotten");
                            } else {
                                println!("    API key stored");
                            }
                        }
                        ChatCommand::History => {
                            session.render_history(&mut renderer);
                        }
                        ChatCommand::ShowConfig => {
                            print_config(&session, &config);
                        }
                        ChatCommand::Invalid(message) => {
                            renderer.print_body(&message);
                        }
                    }
                    continue;
                }

                session.send(line, &mut renderer).await;
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_body(&format!("Input error: {err}"));
                break;
            }
        }
    }

    gateway.flush().await;
    Ok(())
}

fn print_config(session: &ChatSession, config: &ChatConfig) {
    let stats = session.stats();
    println!("    Current Configuration:");
    println!("      Endpoint: {}", config.endpoint);
    println!("      Model: {}", stats.model);
    if stats.sends_reasoning_effort {
        println!("      Reasoning effort: {}", stats.reasoning_effort);
    } else {
        println!(
            "      Reasoning effort: {} (not sent for this model)",
            stats.reasoning_effort
        );
    }
    if stats.system_prompt.is_empty() {
        println!("      System prompt: (none)");
    } else {
        println!("      System prompt: {}", stats.system_prompt);
    }
    println!(
        "      API key: {}",
        if stats.has_api_key { "set" } else { "(missing)" }
    );
    println!("      Messages: {}", stats.message_count);
    println!("      [DONE] handling: {:?}", stats.done_marker);
    println!("      State directory: {}", config.state_dir.display());
}
