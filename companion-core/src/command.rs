//! Voice transcript and menu-id routing.
//!
//! Rules are checked in table order and the first rule whose matcher fires decides
//! the outcome. Anything unmatched is ignored.

use crate::history::Attachment;
use crate::mood::Mood;

/// Prompt used for vision checks triggered by voice or the proactive timer.
pub const VISION_PROMPT: &str = "Briefly describe what you see on screen.";

#[derive(Debug, Clone, PartialEq)]
pub enum CommandAction {
    Chat {
        text: String,
        attachment: Option<Attachment>,
    },
    OpenApp {
        name: String,
    },
    VisionCheck {
        prompt: String,
    },
    ModeSwitch {
        mood: Mood,
    },
}

impl CommandAction {
    /// Typed input bypasses keyword routing.
    pub fn chat(text: impl Into<String>, attachment: Option<Attachment>) -> Self {
        Self::Chat {
            text: text.into(),
            attachment,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Matcher {
    /// Fires when any keyword occurs anywhere in the transcript.
    Contains(&'static [&'static str]),
    /// Fires when the transcript starts with one of the prefixes; the builder gets the rest.
    Prefix(&'static [&'static str]),
}

impl Matcher {
    /// The argument handed to the rule builder when the matcher fires.
    fn matches<'a>(&self, transcript: &'a str) -> Option<&'a str> {
        match self {
            Matcher::Contains(keywords) => keywords
                .iter()
                .any(|kw| transcript.contains(kw))
                .then_some(transcript),
            Matcher::Prefix(prefixes) => prefixes
                .iter()
                .find_map(|prefix| transcript.strip_prefix(prefix)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandRule {
    pub name: &'static str,
    pub matcher: Matcher,
    pub build: fn(&str) -> Option<CommandAction>,
}

fn mode(mood: Mood) -> Option<CommandAction> {
    Some(CommandAction::ModeSwitch { mood })
}

fn open_app(rest: &str) -> Option<CommandAction> {
    let name = rest.trim();
    (!name.is_empty()).then(|| CommandAction::OpenApp {
        name: name.to_string(),
    })
}

/// Talk > work > normal > hide > vision > open/launch.
pub fn default_rules() -> Vec<CommandRule> {
    vec![
        CommandRule {
            name: "talk",
            matcher: Matcher::Contains(&["talk", "chat"]),
            build: |_| mode(Mood::Talk),
        },
        CommandRule {
            name: "work",
            matcher: Matcher::Contains(&["work", "focus", "quiet"]),
            build: |_| mode(Mood::Work),
        },
        CommandRule {
            name: "normal",
            matcher: Matcher::Contains(&["normal", "idle"]),
            build: |_| mode(Mood::Normal),
        },
        CommandRule {
            name: "hide",
            matcher: Matcher::Contains(&["hide", "minimize"]),
            build: |_| mode(Mood::Hide),
        },
        CommandRule {
            name: "vision",
            matcher: Matcher::Contains(&["look", "see", "vision", "watch"]),
            build: |_| {
                Some(CommandAction::VisionCheck {
                    prompt: VISION_PROMPT.to_string(),
                })
            },
        },
        CommandRule {
            name: "open",
            matcher: Matcher::Prefix(&["open ", "launch "]),
            build: open_app,
        },
    ]
}

#[derive(Debug, Clone)]
pub struct CommandRouter {
    rules: Vec<CommandRule>,
}

impl Default for CommandRouter {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl CommandRouter {
    pub fn new(rules: Vec<CommandRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[CommandRule] {
        &self.rules
    }

    /// Routes a voice transcript or menu id. `None` means "not a command".
    pub fn route(&self, transcript: &str) -> Option<CommandAction> {
        let normalized = transcript.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }

        for rule in &self.rules {
            if let Some(argument) = rule.matcher.matches(&normalized) {
                let action = (rule.build)(argument);
                tracing::debug!(
                    rule = rule.name,
                    transcript = %normalized,
                    action = ?action,
                    "Command rule matched"
                );
                return action;
            }
        }

        tracing::debug!(transcript = %normalized, "No command rule matched");
        None
    }
}
