use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Upper bound on persisted conversation length. Oldest messages are evicted first.
pub const MAX_HISTORY: usize = 50;

// --- 1. Message Structures ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Image payload attached to a vision turn. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    mime_type: String,
    data: Vec<u8>,
}

impl Attachment {
    pub const DEFAULT_MIME_TYPE: &'static str = "image/jpeg";

    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    pub fn jpeg(data: Vec<u8>) -> Self {
        Self::new(Self::DEFAULT_MIME_TYPE, data)
    }

    /// Decodes a base64 frame as sent by the presentation layer. Accepts either a bare
    /// payload or a `data:<mime>;base64,<payload>` URL.
    pub fn from_base64(encoded: &str) -> Result<Self, base64::DecodeError> {
        let encoded = encoded.trim();
        let (mime_type, payload) = match encoded
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(";base64,"))
        {
            Some((mime, payload)) if !mime.is_empty() => (mime, payload),
            Some((_, payload)) => (Self::DEFAULT_MIME_TYPE, payload),
            None => (Self::DEFAULT_MIME_TYPE, encoded),
        };
        let data = BASE64.decode(payload)?;
        Ok(Self::new(mime_type, data))
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.data)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// One conversational turn. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    content: String,
    #[serde(skip)]
    attachment: Option<Attachment>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            attachment: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }
}

// --- 2. Conversation History ---

/// Ordered conversation, oldest first. Serializes as a bare JSON array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    /// The newest `max` messages in their original order.
    pub fn recent(&self, max: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(max);
        &self.messages[start..]
    }

    /// Drops the oldest messages until at most `max` remain. Returns how many were evicted.
    pub fn truncate_to_recent(&mut self, max: usize) -> usize {
        let excess = self.messages.len().saturating_sub(max);
        if excess > 0 {
            self.messages.drain(..excess);
        }
        excess
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

// --- 3. Store Errors ---

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read conversation history {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse conversation history {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to serialize conversation history: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to write conversation history {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

// --- 4. Core Store Trait ---

/// Persistence for the conversation history. Both operations absorb their own
/// failures; the session keeps running whether or not the disk cooperates.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Returns the persisted snapshot, capped at [`MAX_HISTORY`]. Missing or malformed
    /// data yields an empty history.
    async fn load(&self) -> ConversationHistory;

    /// Persists the newest [`MAX_HISTORY`] messages, replacing the previous snapshot.
    async fn save(&self, history: &ConversationHistory);
}

// --- 5. File-backed Implementation ---

/// JSON snapshot on disk, overwritten wholesale on every save.
///
/// Writes go to a uniquely named temp file that is then renamed over the target, so
/// a reader never observes a half-written document. Concurrent `save` calls are not
/// ordered relative to each other: whichever rename lands last wins.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("desktop-companion")
            .join("chat_history.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when there is no snapshot yet (missing or blank file).
    pub async fn read_snapshot(&self) -> Result<Option<ConversationHistory>, StoreError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if raw.trim().is_empty() {
            return Ok(None);
        }

        let history = serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(history))
    }

    pub async fn write_snapshot(&self, history: &ConversationHistory) -> Result<(), StoreError> {
        let raw = serde_json::to_string_pretty(history.recent(MAX_HISTORY))
            .map_err(StoreError::Serialize)?;

        let dir = self
            .path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::Write {
                path: dir.clone(),
                source,
            })?;

        let tmp_path = dir.join(format!(
            ".chat_history.json.tmp-{}",
            uuid::Uuid::new_v4()
        ));
        if let Err(source) = tokio::fs::write(&tmp_path, raw).await {
            return Err(StoreError::Write {
                path: tmp_path,
                source,
            });
        }

        if let Err(source) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(StoreError::Write {
                path: self.path.clone(),
                source,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl ConversationStore for JsonFileStore {
    async fn load(&self) -> ConversationHistory {
        match self.read_snapshot().await {
            Ok(Some(mut history)) => {
                let evicted = history.truncate_to_recent(MAX_HISTORY);
                if evicted > 0 {
                    tracing::info!(
                        path = %self.path.display(),
                        evicted = evicted,
                        "Oversized conversation history truncated on load"
                    );
                }
                tracing::info!(
                    path = %self.path.display(),
                    history_len = history.len(),
                    "Loaded conversation history"
                );
                history
            }
            Ok(None) => {
                tracing::warn!(
                    path = %self.path.display(),
                    "No conversation history on disk, starting empty"
                );
                ConversationHistory::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Conversation history unreadable, starting empty");
                ConversationHistory::new()
            }
        }
    }

    async fn save(&self, history: &ConversationHistory) {
        match self.write_snapshot(history).await {
            Ok(()) => tracing::debug!(
                path = %self.path.display(),
                history_len = history.len().min(MAX_HISTORY),
                "Conversation history saved"
            ),
            Err(e) => tracing::error!(error = %e, "Failed to save conversation history"),
        }
    }
}

// --- 6. In-process Implementation ---

/// Non-persistent store for embedding the controller without touching the disk.
#[derive(Debug, Default, Clone)]
pub struct MemoryConversationStore {
    snapshot: Arc<RwLock<ConversationHistory>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(history: ConversationHistory) -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(history)),
        }
    }

    pub async fn snapshot(&self) -> ConversationHistory {
        self.snapshot.read().await.clone()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn load(&self) -> ConversationHistory {
        let mut history = self.snapshot.read().await.clone();
        history.truncate_to_recent(MAX_HISTORY);
        history
    }

    async fn save(&self, history: &ConversationHistory) {
        let recent = ConversationHistory::from_messages(history.recent(MAX_HISTORY).to_vec());
        *self.snapshot.write().await = recent;
    }
}
