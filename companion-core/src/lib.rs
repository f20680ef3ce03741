//! companion-core
//!
//! Session logic for the desktop companion overlay: bounded conversation memory,
//! the language-model backend contract (single-shot, multimodal and streaming),
//! the session controller, the mood/energy state machine and the voice/menu
//! command router.
//!
//! Rendering, window chrome, speech and capture live outside this crate and are
//! reached through the traits in [`collaborators`].

pub mod backend;
pub mod collaborators;
pub mod command;
pub mod config;
pub mod history;
pub mod mood;
pub mod persona;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{
    gemini::GeminiClient, BackendError, ChunkCallback, ChunkStream, Credential, LanguageBackend,
};
pub use collaborators::{AppLauncher, ImageCapture, SpeechOutput};
pub use command::{CommandAction, CommandRouter, CommandRule, Matcher};
pub use config::CompanionConfig;
pub use history::{
    Attachment, ConversationHistory, ConversationStore, JsonFileStore, MemoryConversationStore,
    Message, Role, StoreError, MAX_HISTORY,
};
pub use mood::{apply_mood, energy_for_hour, EnergyTier, Mood, MoodEngine, MoodState};
pub use session::{
    ActionOutcome, Session, SessionController, FALLBACK_REPLY, MISSED_CAPTURE_REPLY,
    NO_LAUNCHER_REPLY,
};
