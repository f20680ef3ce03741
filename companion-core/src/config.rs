use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::history::JsonFileStore;

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 150;

/// Runtime settings for the session core, read from the environment.
#[derive(Clone)]
pub struct CompanionConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub api_base_url: String,
    pub max_output_tokens: u32,
    pub history_path: PathBuf,
}

impl std::fmt::Debug for CompanionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompanionConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("api_base_url", &self.api_base_url)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("history_path", &self.history_path)
            .finish()
    }
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            history_path: JsonFileStore::default_path(),
        }
    }
}

impl CompanionConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let max_output_tokens = match get("COMPANION_MAX_OUTPUT_TOKENS") {
            Some(raw) => raw.parse::<u32>().unwrap_or_else(|e| {
                warn!(
                    value = %raw,
                    error = %e,
                    "Invalid COMPANION_MAX_OUTPUT_TOKENS; falling back to {}",
                    DEFAULT_MAX_OUTPUT_TOKENS
                );
                DEFAULT_MAX_OUTPUT_TOKENS
            }),
            None => defaults.max_output_tokens,
        };

        Self {
            api_key: get("GEMINI_API_KEY"),
            model: get("COMPANION_MODEL").unwrap_or(defaults.model),
            api_base_url: get("COMPANION_API_BASE_URL").unwrap_or(defaults.api_base_url),
            max_output_tokens,
            history_path: get("COMPANION_HISTORY_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.history_path),
        }
    }
}

/// Loads the first `.env` found among the usual candidates. Missing files are fine;
/// the process environment is used as-is.
pub fn load_dotenv() {
    let mut candidates = vec![PathBuf::from(".env")];
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("desktop-companion").join(".env"));
    }

    for candidate in candidates {
        if !candidate.exists() {
            continue;
        }

        match dotenvy::from_path(&candidate) {
            Ok(_) => {
                info!(path = %candidate.display(), "Loaded .env");
                return;
            }
            Err(e) => {
                warn!(path = %candidate.display(), error = %e, "Failed to load .env");
            }
        }
    }

    info!(
        cwd = %env::current_dir().map(|p| p.display().to_string()).unwrap_or_else(|_| "<unknown>".to_string()),
        "No .env file loaded; relying on process environment"
    );
}
