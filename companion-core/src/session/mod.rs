use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::backend::{BackendError, ChunkCallback, LanguageBackend};
use crate::collaborators::{AppLauncher, ImageCapture, SpeechOutput};
use crate::command::{CommandAction, VISION_PROMPT};
use crate::history::{Attachment, ConversationHistory, ConversationStore, Message, MAX_HISTORY};
use crate::mood::{Mood, MoodEngine, MoodState};
use crate::persona::COMPANION_PERSONA;

/// Returned in place of a reply whenever the backend fails, whatever the cause.
pub const FALLBACK_REPLY: &str =
    "I'm feeling a bit disconnected right now. Maybe check my API setup?";

pub const MISSED_CAPTURE_REPLY: &str = "I couldn't get a look at that.";

pub const NO_LAUNCHER_REPLY: &str = "I can't open apps from here.";

// --- Session ---

/// One continuous conversation, from start or reset to the next reset.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    history: ConversationHistory,
    created_at: DateTime<Utc>,
    persona: Arc<str>,
}

impl Session {
    /// Seeds a session with the given history, keeping only the newest [`MAX_HISTORY`].
    pub fn new(mut history: ConversationHistory, persona: impl Into<Arc<str>>) -> Self {
        history.truncate_to_recent(MAX_HISTORY);
        Self {
            id: Uuid::new_v4(),
            history,
            created_at: Utc::now(),
            persona: persona.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn persona(&self) -> &str {
        &self.persona
    }

    fn record_exchange(&mut self, prompt: &str, reply: &str) {
        self.history.push(Message::user(prompt));
        self.history.push(Message::assistant(reply));
        self.history.truncate_to_recent(MAX_HISTORY);
    }
}

#[derive(Debug)]
enum SessionState {
    Uninitialized,
    Active(Session),
}

/// What a dispatched [`CommandAction`] produced, for the presentation layer to render.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Reply(String),
    AppLaunch(String),
    MoodChanged(MoodState),
}

// --- Controller ---

/// Owns the single active session and mediates between UI input and the backend.
///
/// No method returns an error: backend failures become [`FALLBACK_REPLY`], store
/// failures are logged by the store. Methods take `&mut self`, so overlapping
/// requests have to be serialized by the caller.
pub struct SessionController {
    backend: Arc<dyn LanguageBackend>,
    store: Arc<dyn ConversationStore>,
    persona: Arc<str>,
    state: SessionState,
    mood: MoodEngine,
    launcher: Option<Arc<dyn AppLauncher>>,
    capture: Option<Arc<dyn ImageCapture>>,
    speech: Option<Arc<dyn SpeechOutput>>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.state)
            .field("mood", &self.mood.state())
            .field("launcher", &self.launcher.is_some())
            .field("capture", &self.capture.is_some())
            .field("speech", &self.speech.is_some())
            .finish_non_exhaustive()
    }
}

impl SessionController {
    pub fn new(backend: Arc<dyn LanguageBackend>, store: Arc<dyn ConversationStore>) -> Self {
        Self {
            backend,
            store,
            persona: Arc::from(COMPANION_PERSONA),
            state: SessionState::Uninitialized,
            mood: MoodEngine::new(),
            launcher: None,
            capture: None,
            speech: None,
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn AppLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn with_capture(mut self, capture: Arc<dyn ImageCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn with_speech(mut self, speech: Arc<dyn SpeechOutput>) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn with_mood_engine(mut self, mood: MoodEngine) -> Self {
        self.mood = mood;
        self
    }

    /// Loads the persisted history and opens a session. No-op when already active.
    pub async fn start(&mut self) {
        if let SessionState::Active(_) = self.state {
            return;
        }

        let history = self.store.load().await;
        let session = Session::new(history, Arc::clone(&self.persona));
        tracing::info!(
            session_id = %session.id(),
            history_len = session.history().len(),
            "Companion session started"
        );
        self.state = SessionState::Active(session);
    }

    /// Runs one chat turn and returns the reply text.
    ///
    /// With an `attachment` the turn goes to the multimodal endpoint and leaves the
    /// session and the store untouched. Otherwise the reply is streamed through
    /// `on_chunk` when one is given, and a successful exchange is appended and saved.
    pub async fn send_message(
        &mut self,
        text: &str,
        attachment: Option<Attachment>,
        on_chunk: Option<&mut ChunkCallback<'_>>,
    ) -> String {
        if let Some(image) = attachment {
            let reply = match self
                .backend
                .generate_with_image(&self.persona, text, &image)
                .await
            {
                Ok(reply) => reply,
                Err(e) => {
                    log_backend_failure(&e, "vision");
                    FALLBACK_REPLY.to_string()
                }
            };
            self.speak(&reply);
            return reply;
        }

        self.start().await;
        let SessionState::Active(session) = &mut self.state else {
            return FALLBACK_REPLY.to_string();
        };

        let result = match on_chunk {
            Some(on_chunk) => self.backend.generate_stream(session, text, on_chunk).await,
            None => self.backend.generate(session, text).await,
        };

        let reply = match result {
            Ok(reply) => {
                session.record_exchange(text, &reply);
                tracing::debug!(
                    session_id = %session.id(),
                    history_len = session.history().len(),
                    "Exchange recorded"
                );
                self.store.save(session.history()).await;
                reply
            }
            Err(e) => {
                log_backend_failure(&e, "chat");
                FALLBACK_REPLY.to_string()
            }
        };

        self.speak(&reply);
        reply
    }

    /// Captures a frame and asks about it. Defaults to [`VISION_PROMPT`].
    pub async fn analyze_screen(&mut self, prompt: Option<&str>) -> String {
        let Some(capture) = self.capture.clone() else {
            tracing::warn!("Vision check requested without a capture source");
            return MISSED_CAPTURE_REPLY.to_string();
        };

        match capture.capture_image().await {
            Ok(frame) => {
                self.send_message(prompt.unwrap_or(VISION_PROMPT), Some(frame), None)
                    .await
            }
            Err(e) => {
                tracing::warn!(error = %e, "Image capture failed");
                MISSED_CAPTURE_REPLY.to_string()
            }
        }
    }

    /// Flushes the current history and starts over with a fresh session id.
    pub async fn reset(&mut self) {
        if let Some(speech) = &self.speech {
            speech.stop();
        }

        if let SessionState::Active(session) =
            std::mem::replace(&mut self.state, SessionState::Uninitialized)
        {
            self.store.save(session.history()).await;
            tracing::info!(session_id = %session.id(), "Companion session closed");
        }

        self.start().await;
    }

    pub async fn execute(&mut self, action: CommandAction) -> ActionOutcome {
        match action {
            CommandAction::Chat { text, attachment } => {
                ActionOutcome::Reply(self.send_message(&text, attachment, None).await)
            }
            CommandAction::OpenApp { name } => {
                let status = match &self.launcher {
                    Some(launcher) => launcher.open_app(&name).await,
                    None => NO_LAUNCHER_REPLY.to_string(),
                };
                tracing::info!(app = %name, status = %status, "App launch requested");
                ActionOutcome::AppLaunch(status)
            }
            CommandAction::VisionCheck { prompt } => {
                ActionOutcome::Reply(self.analyze_screen(Some(&prompt)).await)
            }
            CommandAction::ModeSwitch { mood } => ActionOutcome::MoodChanged(self.set_mood(mood)),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active(_))
    }

    pub fn session(&self) -> Option<&Session> {
        match &self.state {
            SessionState::Active(session) => Some(session),
            SessionState::Uninitialized => None,
        }
    }

    /// Working copy of the active history; empty before `start`.
    pub fn history(&self) -> ConversationHistory {
        self.session()
            .map(|s| s.history().clone())
            .unwrap_or_default()
    }

    pub fn mood_state(&self) -> MoodState {
        self.mood.state()
    }

    pub fn set_mood(&mut self, mood: Mood) -> MoodState {
        self.mood.set_mood(mood)
    }

    pub fn refresh_energy(&mut self) -> bool {
        self.mood.refresh_energy()
    }

    fn speak(&self, text: &str) {
        if let Some(speech) = &self.speech {
            speech.speak(text);
        }
    }
}

fn log_backend_failure(error: &BackendError, turn: &'static str) {
    match error {
        BackendError::Unavailable => {
            tracing::warn!(turn = turn, "Backend unavailable, replying with fallback")
        }
        BackendError::Failed { message } => {
            tracing::error!(turn = turn, error = %message, "Backend call failed, replying with fallback")
        }
    }
}
