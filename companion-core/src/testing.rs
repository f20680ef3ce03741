//! In-process fakes shared by the unit tests.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::backend::{BackendError, ChunkStream, LanguageBackend};
use crate::collaborators::{AppLauncher, ImageCapture, SpeechOutput};
use crate::history::{Attachment, ConversationHistory, ConversationStore, MemoryConversationStore};
use crate::session::Session;

/// Backend that replays canned replies and records what it was asked.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    reply: Option<String>,
    vision_reply: Option<String>,
    stream: Option<Vec<Result<String, BackendError>>>,
    failure: Option<BackendError>,
    generate_calls: AtomicUsize,
    vision_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    history_lens: Mutex<Vec<usize>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(mut self, reply: &str) -> Self {
        self.reply = Some(reply.to_string());
        self
    }

    pub fn with_vision_reply(mut self, reply: &str) -> Self {
        self.vision_reply = Some(reply.to_string());
        self
    }

    pub fn with_stream(mut self, chunks: Vec<Result<&str, BackendError>>) -> Self {
        self.stream = Some(
            chunks
                .into_iter()
                .map(|chunk| chunk.map(str::to_string))
                .collect(),
        );
        self
    }

    pub fn failing(mut self, error: BackendError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn vision_calls(&self) -> usize {
        self.vision_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// Session history length seen by each history-bound call.
    pub fn history_lens(&self) -> Vec<usize> {
        self.history_lens.lock().unwrap().clone()
    }

    fn record(&self, prompt: &str, session: Option<&Session>) -> Result<(), BackendError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(session) = session {
            self.history_lens
                .lock()
                .unwrap()
                .push(session.history().len());
        }
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LanguageBackend for ScriptedBackend {
    async fn generate(&self, session: &Session, prompt: &str) -> Result<String, BackendError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.record(prompt, Some(session))?;
        Ok(self.reply.clone().unwrap_or_else(|| "ok".to_string()))
    }

    async fn generate_with_image(
        &self,
        _persona: &str,
        prompt: &str,
        _image: &Attachment,
    ) -> Result<String, BackendError> {
        self.vision_calls.fetch_add(1, Ordering::SeqCst);
        self.record(prompt, None)?;
        Ok(self
            .vision_reply
            .clone()
            .unwrap_or_else(|| "I see a screen".to_string()))
    }

    async fn stream_chunks(
        &self,
        session: &Session,
        prompt: &str,
    ) -> Result<ChunkStream, BackendError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.record(prompt, Some(session))?;
        let chunks = match &self.stream {
            Some(chunks) => chunks.clone(),
            None => vec![Ok(self.reply.clone().unwrap_or_else(|| "ok".to_string()))],
        };
        Ok(futures::stream::iter(chunks).boxed())
    }
}

/// Memory store that counts how often it is touched.
#[derive(Default)]
pub(crate) struct CountingStore {
    inner: MemoryConversationStore,
    loads: AtomicUsize,
    saves: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(history: ConversationHistory) -> Self {
        Self {
            inner: MemoryConversationStore::with_history(history),
            ..Self::default()
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.loads() + self.saves()
    }

    pub async fn snapshot(&self) -> ConversationHistory {
        self.inner.snapshot().await
    }
}

#[async_trait]
impl ConversationStore for CountingStore {
    async fn load(&self) -> ConversationHistory {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load().await
    }

    async fn save(&self, history: &ConversationHistory) {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(history).await
    }
}

#[derive(Default)]
pub(crate) struct RecordingSpeech {
    spoken: Mutex<Vec<String>>,
    stops: AtomicUsize,
}

impl RecordingSpeech {
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl SpeechOutput for RecordingSpeech {
    fn speak(&self, text: &str) {
        self.spoken.lock().unwrap().push(text.to_string());
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct RecordingLauncher {
    opened: Mutex<Vec<String>>,
}

impl RecordingLauncher {
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl AppLauncher for RecordingLauncher {
    async fn open_app(&self, name: &str) -> String {
        self.opened.lock().unwrap().push(name.to_string());
        format!("Opening {name}...")
    }
}

/// Capture source that hands out a fixed frame, or fails when it has none.
pub(crate) struct FixedCapture {
    frame: Option<Attachment>,
}

impl FixedCapture {
    pub fn frame(frame: Attachment) -> Self {
        Self { frame: Some(frame) }
    }

    pub fn broken() -> Self {
        Self { frame: None }
    }
}

#[async_trait]
impl ImageCapture for FixedCapture {
    async fn capture_image(&self) -> anyhow::Result<Attachment> {
        self.frame
            .clone()
            .ok_or_else(|| anyhow::anyhow!("camera unavailable"))
    }
}
