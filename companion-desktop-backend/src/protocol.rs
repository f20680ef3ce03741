use companion_core::{EnergyTier, Mood, MoodState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn default_stream() -> bool {
    true
}

// --- 1. Requests from the overlay ---
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Typed chat input. `image` is a base64 frame (bare or data URL).
    Chat {
        message: String,
        #[serde(default)]
        image: Option<String>,
        #[serde(default = "default_stream")]
        stream: bool,
    },
    AnalyzeScreen {
        image: String,
        #[serde(default)]
        prompt: Option<String>,
    },
    /// Already-transcribed speech. Unmatched transcripts are dropped.
    VoiceCommand {
        transcript: String,
        #[serde(default)]
        image: Option<String>,
    },
    MenuSelect {
        id: String,
    },
    OpenApp {
        name: String,
    },
    SetMood {
        mood: Mood,
    },
    Reset,
    GetMood,
}

// --- 2. Events to every connected overlay ---
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "message_chunk")]
    MessageChunk { id: Uuid, content_chunk: String },

    #[serde(rename = "complete_message")]
    CompleteMessage {
        id: Uuid,
        content: String,
        latency_ms: u64,
    },

    #[serde(rename = "mood_update")]
    MoodUpdate {
        mood: Mood,
        energy: EnergyTier,
        status: String,
    },

    #[serde(rename = "app_launch")]
    AppLaunch { status: String },

    #[serde(rename = "speak")]
    Speak { text: String },

    #[serde(rename = "stop_speaking")]
    StopSpeaking,

    // e.g. invalid JSON, session reset
    #[serde(rename = "status_update")]
    StatusUpdate {
        status: String,
        details: Option<String>,
    },
}

impl ServerEvent {
    pub fn mood(state: MoodState) -> Self {
        Self::MoodUpdate {
            mood: state.mood,
            energy: state.energy,
            status: state.to_string(),
        }
    }

    pub fn status(status: &str, details: Option<String>) -> Self {
        Self::StatusUpdate {
            status: status.to_string(),
            details,
        }
    }

    /// Tells an overlay that fell behind the event stream that `skipped` events were
    /// dropped. The `complete_message` of a turn still carries its full text.
    pub fn lagged(skipped: u64) -> Self {
        Self::status("lagged", Some(format!("{skipped} events skipped")))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            "{\"type\":\"status_update\",\"status\":\"serialization_error\"}".to_string()
        })
    }
}
