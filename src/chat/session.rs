//! Core chat session management.
//!
//! [`ChatSession`] ties the conversation, the user's preferences and a
//! [`CompletionBackend`] together and drives one turn at a time.  Every error
//! a turn can meet is rendered inline and reported through [`TurnOutcome`];
//! none escape `send`.

use futures::StreamExt;

use crate::client::{ChatClient, CompletionBackend};
use crate::conversation::ConversationStore;
use crate::decoder::{DoneMarker, decode_stream};
use crate::error::{Error, Result};
use crate::persistence::{PersistenceGateway, Preferences, StateKey};
use crate::render::TranscriptRenderer;
use crate::types::{ChatCompletionRequest, ReasoningEffort, RequestConfig, Role};

/// Shown when a turn is attempted without a credential.
pub const MISSING_API_KEY: &str = "Missing API key. Set one with /key <token>.";

/// How a call to [`ChatSession::send`] ended.
#[derive(Debug)]
pub enum TurnOutcome {
    /// The input was blank; nothing happened.
    Skipped,
    /// The user turn was recorded but no credential is configured.
    MissingCredential,
    /// The user turn was recorded but the request or stream failed.
    Failed(Error),
    /// The assistant reply was streamed and recorded.
    Completed {
        /// The full assistant reply.
        content: String,
    },
}

impl TurnOutcome {
    /// Returns true when an assistant reply was recorded.
    pub fn is_completed(&self) -> bool {
        matches!(self, TurnOutcome::Completed { .. })
    }
}

/// A snapshot of session settings for display.
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// The selected model.
    pub model: String,
    /// The selected reasoning effort.
    pub reasoning_effort: ReasoningEffort,
    /// Whether the effort is actually sent for the selected model.
    pub sends_reasoning_effort: bool,
    /// The number of messages in the conversation.
    pub message_count: usize,
    /// The system prompt preference; empty means none.
    pub system_prompt: String,
    /// Whether a credential is configured.
    pub has_api_key: bool,
    /// Policy for the `[DONE]` marker.
    pub done_marker: DoneMarker,
}

/// A chat session: one conversation, one backend, one turn at a time.
///
/// `send` takes `&mut self`, so a session can never have two turns in flight.
pub struct ChatSession<B: CompletionBackend = ChatClient> {
    backend: B,
    store: ConversationStore,
    gateway: PersistenceGateway,
    preferences: Preferences,
    done_marker: DoneMarker,
}

impl<B: CompletionBackend> ChatSession<B> {
    /// Creates a session, restoring the persisted conversation when there is
    /// one and otherwise seeding from the system prompt preference.
    pub fn new(backend: B, gateway: PersistenceGateway, preferences: Preferences) -> Self {
        let store = ConversationStore::restore(gateway.clone(), &preferences.system_prompt);
        Self {
            backend,
            store,
            gateway,
            preferences,
            done_marker: DoneMarker::default(),
        }
    }

    /// Sets the `[DONE]` policy.
    pub fn with_done_marker(mut self, done_marker: DoneMarker) -> Self {
        self.done_marker = done_marker;
        self
    }

    /// Sends one user turn and streams the reply into `renderer`.
    pub async fn send(
        &mut self,
        user_text: &str,
        renderer: &mut dyn TranscriptRenderer,
    ) -> TurnOutcome {
        let text = user_text.trim();
        if text.is_empty() {
            return TurnOutcome::Skipped;
        }

        self.store.append(Role::User, text);
        render_message(renderer, Role::User, text);

        let outcome = match self.request_config() {
            None => {
                tracing::debug!("turn skipped: no API key configured");
                renderer.print_body(MISSING_API_KEY);
                TurnOutcome::MissingCredential
            }
            Some(config) => {
                tracing::debug!(
                    model = %config.model_id,
                    messages = self.store.len(),
                    "turn started"
                );
                match self.stream_reply(&config, renderer).await {
                    Ok(content) => {
                        tracing::debug!(chars = content.len(), "turn completed");
                        self.store.append(Role::Assistant, content.clone());
                        TurnOutcome::Completed { content }
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "turn failed");
                        render_error(renderer, &err);
                        TurnOutcome::Failed(err)
                    }
                }
            }
        };

        renderer.print_body("");
        outcome
    }

    async fn stream_reply(
        &self,
        config: &RequestConfig,
        renderer: &mut dyn TranscriptRenderer,
    ) -> Result<String> {
        let request = ChatCompletionRequest::new(config, self.store.snapshot());
        let chunks = self.backend.open_stream(&request, &config.credential).await?;

        renderer.print_header(Role::Assistant.label());
        let tokens = decode_stream(chunks, self.done_marker);
        let mut tokens = std::pin::pin!(tokens);
        let mut content = String::new();
        while let Some(token) = tokens.next().await {
            let token = token?;
            renderer.print_token(&token);
            content.push_str(&token);
        }
        Ok(content)
    }

    /// Renders every stored message as header, body and divider.
    pub fn render_history(&self, renderer: &mut dyn TranscriptRenderer) {
        for message in self.store.messages() {
            render_message(renderer, message.role, &message.content);
        }
    }

    /// Clears the transcript and starts over from the system prompt.
    pub fn new_chat(&mut self, renderer: &mut dyn TranscriptRenderer) {
        renderer.clear();
        self.store.reset(&self.preferences.system_prompt);
        self.render_history(renderer);
    }

    /// Selects the model for subsequent turns.
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.preferences.model = model.into();
        self.gateway.save_text(StateKey::Model, &self.preferences.model);
    }

    /// Selects the reasoning effort for subsequent turns.
    pub fn set_reasoning_effort(&mut self, effort: ReasoningEffort) {
        self.preferences.reasoning_effort = effort;
        self.gateway.save_text(StateKey::ReasoningEffort, effort.as_str());
    }

    /// Stores the credential.  `None` or a blank key forgets it.
    pub fn set_api_key(&mut self, api_key: Option<String>) {
        self.preferences.api_key = api_key.filter(|key| !key.trim().is_empty());
        match &self.preferences.api_key {
            Some(key) => self.gateway.save_text(StateKey::ApiKey, key),
            None => self.gateway.remove(StateKey::ApiKey),
        }
    }

    /// Stores the system prompt.
    ///
    /// A conversation that has not started is re-seeded at once; otherwise
    /// the prompt applies from the next [`new_chat`](Self::new_chat).
    /// Returns true when the conversation was re-seeded.
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) -> bool {
        self.preferences.system_prompt = prompt.into();
        self.gateway
            .save_text(StateKey::SystemPrompt, &self.preferences.system_prompt);
        if self.store.has_started() {
            return false;
        }
        self.store.reset(&self.preferences.system_prompt);
        true
    }

    /// The conversation.
    pub fn conversation(&self) -> &ConversationStore {
        &self.store
    }

    /// The preferences in effect.
    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    /// Settings for display.
    pub fn stats(&self) -> SessionStats {
        let probe = RequestConfig::new(
            self.preferences.model.as_str(),
            self.preferences.reasoning_effort,
            "",
        );
        SessionStats {
            model: self.preferences.model.clone(),
            reasoning_effort: self.preferences.reasoning_effort,
            sends_reasoning_effort: probe.supports_reasoning_effort(),
            message_count: self.store.len(),
            system_prompt: self.preferences.system_prompt.clone(),
            has_api_key: self.preferences.api_key.is_some(),
            done_marker: self.done_marker,
        }
    }

    fn request_config(&self) -> Option<RequestConfig> {
        let credential = self.preferences.api_key.as_deref()?;
        Some(RequestConfig::new(
            self.preferences.model.as_str(),
            self.preferences.reasoning_effort,
            credential,
        ))
    }
}

fn render_message(renderer: &mut dyn TranscriptRenderer, role: Role, content: &str) {
    renderer.print_header(role.label());
    renderer.print_body(content);
    renderer.print_divider();
}

fn render_error(renderer: &mut dyn TranscriptRenderer, err: &Error) {
    match err {
        Error::Api {
            status_code,
            status_text,
            body,
            ..
        } => {
            let line = match status_text {
                Some(text) => format!("Request failed: {status_code} {text}"),
                None => format!("Request failed: {status_code}"),
            };
            renderer.print_body(&line);
            let body = body.trim();
            if !body.is_empty() {
                renderer.print_body(body);
            }
        }
        other => renderer.print_body(&format!("Error: {other}")),
    }
}
