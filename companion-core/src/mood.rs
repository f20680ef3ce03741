//! Mood and energy state for the companion.
//!
//! Energy is derived from the wall-clock hour; mood only changes on explicit command.
//! The two are independent.

use chrono::Timelike;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    #[default]
    Idle,
    Work,
    Talk,
    Normal,
    Hide,
    Happy,
    Shy,
    Annoyed,
    Sleepy,
}

impl Mood {
    pub const ALL: [Mood; 9] = [
        Mood::Idle,
        Mood::Work,
        Mood::Talk,
        Mood::Normal,
        Mood::Hide,
        Mood::Happy,
        Mood::Shy,
        Mood::Annoyed,
        Mood::Sleepy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Idle => "idle",
            Mood::Work => "work",
            Mood::Talk => "talk",
            Mood::Normal => "normal",
            Mood::Hide => "hide",
            Mood::Happy => "happy",
            Mood::Shy => "shy",
            Mood::Annoyed => "annoyed",
            Mood::Sleepy => "sleepy",
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown mood: {0}")]
pub struct UnknownMood(pub String);

impl FromStr for Mood {
    type Err = UnknownMood;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Mood::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| UnknownMood(s.to_string()))
    }
}

/// Time-of-day behavioural intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnergyTier {
    #[default]
    Alert,
    Quiet,
    Warm,
    Slow,
}

impl EnergyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnergyTier::Alert => "alert",
            EnergyTier::Quiet => "quiet",
            EnergyTier::Warm => "warm",
            EnergyTier::Slow => "slow",
        }
    }
}

impl fmt::Display for EnergyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 06-12 alert, 12-17 quiet, 17-21 warm, otherwise slow.
pub fn energy_for_hour(hour: u32) -> EnergyTier {
    match hour {
        6..=11 => EnergyTier::Alert,
        12..=16 => EnergyTier::Quiet,
        17..=20 => EnergyTier::Warm,
        _ => EnergyTier::Slow,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MoodState {
    pub mood: Mood,
    pub energy: EnergyTier,
}

impl fmt::Display for MoodState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Energy: {}, Mood: {}", self.energy, self.mood)
    }
}

pub fn apply_mood(state: MoodState, mood: Mood) -> MoodState {
    MoodState { mood, ..state }
}

fn local_hour() -> u32 {
    chrono::Local::now().hour()
}

/// Owns the mood state of one companion window.
#[derive(Debug, Clone)]
pub struct MoodEngine {
    state: MoodState,
    hour_source: fn() -> u32,
}

impl Default for MoodEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MoodEngine {
    pub fn new() -> Self {
        Self::with_hour_source(local_hour)
    }

    pub fn with_hour_source(hour_source: fn() -> u32) -> Self {
        let energy = energy_for_hour(hour_source());
        Self {
            state: MoodState {
                mood: Mood::default(),
                energy,
            },
            hour_source,
        }
    }

    pub fn energy_for_now(&self) -> EnergyTier {
        energy_for_hour((self.hour_source)())
    }

    pub fn state(&self) -> MoodState {
        self.state
    }

    pub fn set_mood(&mut self, mood: Mood) -> MoodState {
        if self.state.mood != mood {
            tracing::debug!(from = %self.state.mood, to = %mood, "Mood changed");
        }
        self.state = apply_mood(self.state, mood);
        self.state
    }

    /// Re-reads the clock. Returns true when the energy tier moved.
    pub fn refresh_energy(&mut self) -> bool {
        let energy = self.energy_for_now();
        if energy == self.state.energy {
            return false;
        }
        tracing::info!(from = %self.state.energy, to = %energy, "Energy tier changed");
        self.state.energy = energy;
        true
    }
}
