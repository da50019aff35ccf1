//! Chess-Arena: play chess against a skill-tiered heuristic engine.
//!
//! The engine is not a searcher. It scores legal moves with a handful of
//! heuristics plus skill-scaled noise and picks from the top of the list,
//! so lower tiers play plausibly weaker moves instead of random ones.
//!
//! ## Modules
//!
//! - [`constants`] - Difficulty presets, clock defaults and heuristic weights
//! - [`difficulty`] - Named tiers and their presets
//! - [`rules`] - Legality, FEN, PGN and game-over detection over `shakmaty`
//! - [`selector`] - Weighted move scoring and skill-based picking
//! - [`protocol`] - Messages between an engine session and its worker
//! - [`worker`] - The background worker and its hosts
//! - [`engine`] - Async engine sessions with ready gating and single-flight
//! - [`clock`] - Game clocks and the owned ticker that drives them
//! - [`aids`] - Hints and capture lists
//! - [`game`] - The orchestrator tying it all together
//!
//! ## Example
//!
//! ```
//! use chess_arena::engine::{Engine, NoThreads};
//! use chess_arena::difficulty::Difficulty;
//! use chess_arena::rules::{Variant, START_FEN};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let engine = Engine::spawn_with(Difficulty::Hard, Variant::Standard, &NoThreads);
//! let reply = engine.best_move(START_FEN).await.unwrap();
//! println!("engine plays {}", reply.san);
//! # });
//! ```

pub mod aids;
pub mod clock;
pub mod constants;
pub mod difficulty;
pub mod engine;
pub mod game;
pub mod protocol;
pub mod rules;
pub mod selector;
pub mod worker;
