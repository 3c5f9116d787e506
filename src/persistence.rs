//! Durable key/value persistence for the conversation and user preferences.
//!
//! [`PersistenceGateway`] sits in front of any [`KeyValueStore`] backend and
//! makes persistence best-effort: loads fall back to a caller-provided value
//! when a key is absent or its payload cannot be decoded, and saves swallow
//! every failure after logging it.  Nothing here can interrupt a chat turn.
//!
//! A gateway built with [`PersistenceGateway::with_background_writes`] applies
//! saves and removes on a single blocking task, in the order they were issued,
//! so a slow disk never stalls the stream that triggered the write.  Loads
//! always read the store directly; call [`PersistenceGateway::flush`] first
//! when a read must observe earlier writes.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::observability::{PERSIST_FAILURES, PERSIST_SAVES};
use crate::types::ReasoningEffort;

/// Logical names under which state is stored.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StateKey {
    /// Bearer credential for the endpoint.
    ApiKey,
    /// System prompt text.
    SystemPrompt,
    /// Selected model id.
    Model,
    /// Selected reasoning effort.
    ReasoningEffort,
    /// The conversation, as a JSON array of messages.
    Conversation,
}

impl StateKey {
    /// The storage key for this entry.
    pub fn as_str(self) -> &'static str {
        match self {
            StateKey::ApiKey => "api_key",
            StateKey::SystemPrompt => "system_prompt",
            StateKey::Model => "model",
            StateKey::ReasoningEffort => "reasoning_effort",
            StateKey::Conversation => "conversation",
        }
    }
}

/// A host-provided string key/value store.
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`, or `None` when absent.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `key`.  Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

///////////////////////////////////////////// MemoryStore ////////////////////////////////////////////

/// In-process store; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

////////////////////////////////////////////// FileStore //////////////////////////////////////////////

/// Directory-backed store holding one file per key.
///
/// Writes go to a temporary sibling and are renamed into place, so a reader
/// sees either the old or the new value.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens the store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| {
            Error::io(
                format!("failed to create state directory {}", root.display()),
                err,
            )
        })?;
        Ok(Self { root })
    }

    /// The directory holding the store's files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(Error::validation(
                format!("invalid storage key '{key}'"),
                Some("key".to_string()),
            ));
        }
        Ok(self.root.join(key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::io(format!("failed to read {}", path.display()), err)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = self.root.join(format!(".{key}.tmp"));
        let mut file = fs::File::create(&tmp)
            .map_err(|err| Error::io(format!("failed to create {}", tmp.display()), err))?;
        file.write_all(value.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|err| Error::io(format!("failed to write {}", tmp.display()), err))?;
        fs::rename(&tmp, &path)
            .map_err(|err| Error::io(format!("failed to replace {}", path.display()), err))
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::io(format!("failed to remove {}", path.display()), err)),
        }
    }
}

////////////////////////////////////////// PersistenceGateway /////////////////////////////////////////

/// A write waiting for the background writer.
enum WriteOp {
    Set { key: StateKey, value: String },
    Remove { key: StateKey },
    Flush(oneshot::Sender<()>),
}

impl WriteOp {
    fn apply(self, store: &dyn KeyValueStore) {
        match self {
            WriteOp::Set { key, value } => {
                PERSIST_SAVES.click();
                if let Err(err) = store.set(key.as_str(), &value) {
                    PERSIST_FAILURES.click();
                    tracing::warn!(key = key.as_str(), error = %err, "failed to persist state");
                }
            }
            WriteOp::Remove { key } => {
                if let Err(err) = store.remove(key.as_str()) {
                    PERSIST_FAILURES.click();
                    tracing::warn!(key = key.as_str(), error = %err, "failed to remove persisted state");
                }
            }
            WriteOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// Best-effort typed access to a [`KeyValueStore`].
#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn KeyValueStore>,
    writer: Option<mpsc::UnboundedSender<WriteOp>>,
}

impl PersistenceGateway {
    /// Wraps `store`; writes happen inline on the caller's thread.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            writer: None,
        }
    }

    /// Wraps `store`, applying writes on a background blocking task.
    ///
    /// Outside a Tokio runtime this is the same as [`PersistenceGateway::new`].
    pub fn with_background_writes(store: Arc<dyn KeyValueStore>) -> Self {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no tokio runtime; persistence writes run inline");
            return Self::new(store);
        };
        let (tx, mut rx) = mpsc::unbounded_channel::<WriteOp>();
        let writer_store = Arc::clone(&store);
        runtime.spawn_blocking(move || {
            while let Some(op) = rx.blocking_recv() {
                op.apply(writer_store.as_ref());
            }
            tracing::debug!("persistence writer stopped");
        });
        Self {
            store,
            writer: Some(tx),
        }
    }

    /// Waits until every write issued before this call has been applied.
    pub async fn flush(&self) {
        let Some(writer) = &self.writer else {
            return;
        };
        let (done, applied) = oneshot::channel();
        if writer.send(WriteOp::Flush(done)).is_ok() {
            let _ = applied.await;
        }
    }

    fn submit(&self, op: WriteOp) {
        let op = match &self.writer {
            Some(writer) => match writer.send(op) {
                Ok(()) => return,
                Err(mpsc::error::SendError(op)) => {
                    tracing::warn!("persistence writer is gone; writing inline");
                    op
                }
            },
            None => op,
        };
        op.apply(self.store.as_ref());
    }

    /// A gateway over a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Returns the text stored under `key`, or `None` if absent or unreadable.
    pub fn load_raw(&self, key: StateKey) -> Option<String> {
        match self.store.get(key.as_str()) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key = key.as_str(), error = %err, "failed to read persisted state");
                None
            }
        }
    }

    /// Returns the text stored under `key`, or `fallback`.
    pub fn load_text(&self, key: StateKey, fallback: &str) -> String {
        self.load_raw(key).unwrap_or_else(|| fallback.to_string())
    }

    /// Parses the text stored under `key`; absent or unparsable values yield `fallback`.
    pub fn load_parsed<T: FromStr>(&self, key: StateKey, fallback: T) -> T {
        let Some(raw) = self.load_raw(key) else {
            return fallback;
        };
        match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key = key.as_str(), "ignoring unparsable persisted value");
                fallback
            }
        }
    }

    /// Decodes the JSON stored under `key`; absent or malformed payloads yield `fallback`.
    pub fn load_json<T: DeserializeOwned>(&self, key: StateKey, fallback: T) -> T {
        let Some(raw) = self.load_raw(key) else {
            return fallback;
        };
        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key = key.as_str(), error = %err, "ignoring malformed persisted value");
                fallback
            }
        }
    }

    /// Stores `value` under `key`.  Failures are logged and dropped.
    pub fn save_text(&self, key: StateKey, value: &str) {
        self.submit(WriteOp::Set {
            key,
            value: value.to_string(),
        });
    }

    /// Stores `value` as JSON under `key`.  Failures are logged and dropped.
    pub fn save_json<T: Serialize + ?Sized>(&self, key: StateKey, value: &T) {
        match serde_json::to_string(value) {
            Ok(json) => self.save_text(key, &json),
            Err(err) => {
                PERSIST_FAILURES.click();
                tracing::warn!(key = key.as_str(), error = %err, "failed to serialize state");
            }
        }
    }

    /// Removes `key`.  Failures are logged and dropped.
    pub fn remove(&self, key: StateKey) {
        self.submit(WriteOp::Remove { key });
    }

    /// Loads the user's preferences, taking missing entries from `defaults`.
    pub fn load_preferences(&self, defaults: &Preferences) -> Preferences {
        let api_key = self
            .load_raw(StateKey::ApiKey)
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .or_else(|| defaults.api_key.clone());
        Preferences {
            api_key,
            system_prompt: self.load_text(StateKey::SystemPrompt, &defaults.system_prompt),
            model: self.load_text(StateKey::Model, &defaults.model),
            reasoning_effort: self
                .load_parsed(StateKey::ReasoningEffort, defaults.reasoning_effort),
        }
    }
}

impl std::fmt::Debug for PersistenceGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceGateway")
            .field("background_writes", &self.writer.is_some())
            .finish_non_exhaustive()
    }
}

/// User preferences that survive restarts.
#[derive(Clone, PartialEq, Eq)]
pub struct Preferences {
    /// Bearer credential, if one has been configured.
    pub api_key: Option<String>,
    /// System prompt; empty means none.
    pub system_prompt: String,
    /// Selected model id.
    pub model: String,
    /// Selected reasoning effort.
    pub reasoning_effort: ReasoningEffort,
}

impl std::fmt::Debug for Preferences {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preferences")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("system_prompt", &self.system_prompt)
            .field("model", &self.model)
            .field("reasoning_effort", &self.reasoning_effort)
            .finish()
    }
}
