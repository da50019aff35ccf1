//! Constants for difficulty tiers, clocks, and move-scoring weights.
//!
//! This module contains the compile-time configuration for the engine and
//! the game orchestrator. Runtime choices (which tier, which variant, who
//! the engine plays) live in [`crate::game::GameConfig`]; everything here is
//! fixed and never mutated.

use std::time::Duration;

// =============================================================================
// Difficulty Presets
// =============================================================================

/// `(skill, depth, movetime_ms)` for the Beginner tier.
pub const BEGINNER: (u8, u8, u64) = (1, 2, 150);

/// `(skill, depth, movetime_ms)` for the Casual tier.
pub const CASUAL: (u8, u8, u64) = (5, 6, 300);

/// `(skill, depth, movetime_ms)` for the Challenging tier.
pub const CHALLENGING: (u8, u8, u64) = (10, 10, 500);

/// `(skill, depth, movetime_ms)` for the Hard tier.
pub const HARD: (u8, u8, u64) = (15, 14, 800);

/// `(skill, depth, movetime_ms)` for the Insane tier.
pub const INSANE: (u8, u8, u64) = (20, 18, 1200);

/// Lowest accepted skill value.
pub const MIN_SKILL: u8 = 1;

/// Highest accepted skill value.
pub const MAX_SKILL: u8 = 20;

// =============================================================================
// Worker Pacing and Request Deadlines
// =============================================================================

/// Upper bound on the movetime part of the worker's think delay.
pub const THINK_TIME_CAP: Duration = Duration::from_millis(2000);

/// Extra think delay per unit of search depth.
pub const THINK_TIME_PER_DEPTH: Duration = Duration::from_millis(5);

/// Slack added on top of the think delay before a request times out.
pub const REQUEST_GRACE: Duration = Duration::from_secs(5);

// =============================================================================
// Clocks
// =============================================================================

/// Default time budget per side (5 minutes).
pub const DEFAULT_CLOCK: Duration = Duration::from_secs(5 * 60);

/// Period of the clock ticker.
pub const TICK_PERIOD: Duration = Duration::from_millis(250);

// =============================================================================
// Move Scoring Weights
// =============================================================================

/// Material values in the order pawn, knight, bishop, rook, queen, king.
pub const PIECE_VALUES: [f64; 6] = [1.0, 3.0, 3.0, 5.0, 9.0, 0.0];

/// Bonus for a move that gives check, scaled by `skill / 10`.
pub const CHECK_BONUS: f64 = 3.0;

/// Bonus for a move that gives mate. Dominates every other term.
pub const MATE_BONUS: f64 = 1000.0;

/// Bonus for landing on d4/d5/e4/e5, scaled by `skill / 10`.
pub const CENTER_BONUS: f64 = 2.0;

/// Bonus for developing a minor piece off the back rank, scaled by `skill / 10`.
pub const DEVELOPMENT_BONUS: f64 = 1.5;

/// Penalty for a move that leaves the mover's own king attacked.
pub const SAFETY_PENALTY: f64 = 5.0;

/// Skill above which the centre bonus applies.
pub const CENTER_SKILL: u8 = 5;

/// Skill above which the development bonus applies.
pub const DEVELOPMENT_SKILL: u8 = 8;

/// Skill above which the safety penalty is evaluated.
pub const SAFETY_SKILL: u8 = 10;

/// Noise ceiling: base noise is `random * max(1, NOISE_CEILING - skill)`.
pub const NOISE_CEILING: u8 = 21;

/// Pick-window ceiling: the window is `max(0, PICK_CEILING - skill) + 1` moves wide.
pub const PICK_CEILING: u8 = 20;
