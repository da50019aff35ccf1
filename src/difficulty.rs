//! Named difficulty tiers and their fixed engine presets.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    BEGINNER, CASUAL, CHALLENGING, HARD, INSANE, REQUEST_GRACE, THINK_TIME_CAP,
    THINK_TIME_PER_DEPTH,
};

/// Immutable engine parameters for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preset {
    /// Heuristic skill, 1..=20.
    pub skill: u8,
    /// Nominal search depth. Only used for pacing.
    pub depth: u8,
    /// Nominal time per move.
    pub movetime: Duration,
}

impl Preset {
    const fn from_row((skill, depth, movetime_ms): (u8, u8, u64)) -> Self {
        Self {
            skill,
            depth,
            movetime: Duration::from_millis(movetime_ms),
        }
    }

    /// How long the worker waits before replying with a chosen move.
    pub fn think_time(&self) -> Duration {
        self.movetime.min(THINK_TIME_CAP) + THINK_TIME_PER_DEPTH * u32::from(self.depth)
    }

    /// Deadline for a single `bestmove` request, ready handshake included.
    pub fn request_timeout(&self) -> Duration {
        self.think_time() + REQUEST_GRACE
    }
}

/// Difficulty tier, looked up by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Difficulty {
    Beginner,
    #[default]
    Casual,
    Challenging,
    Hard,
    Insane,
}

impl Difficulty {
    pub const ALL: [Difficulty; 5] = [
        Difficulty::Beginner,
        Difficulty::Casual,
        Difficulty::Challenging,
        Difficulty::Hard,
        Difficulty::Insane,
    ];

    pub const fn preset(self) -> Preset {
        match self {
            Difficulty::Beginner => Preset::from_row(BEGINNER),
            Difficulty::Casual => Preset::from_row(CASUAL),
            Difficulty::Challenging => Preset::from_row(CHALLENGING),
            Difficulty::Hard => Preset::from_row(HARD),
            Difficulty::Insane => Preset::from_row(INSANE),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Difficulty::Beginner => "Beginner",
            Difficulty::Casual => "Casual",
            Difficulty::Challenging => "Challenging",
            Difficulty::Hard => "Hard",
            Difficulty::Insane => "Insane",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown difficulty: {0}")]
pub struct UnknownDifficulty(pub String);

impl FromStr for Difficulty {
    type Err = UnknownDifficulty;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Difficulty::ALL
            .into_iter()
            .find(|d| d.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownDifficulty(s.to_string()))
    }
}
