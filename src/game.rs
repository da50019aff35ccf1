//! The game orchestrator.
//!
//! [`Game`] owns the authoritative position, the clocks and the current
//! engine session. Position and clock live behind one lock, so a reader of
//! [`Game::snapshot`] never sees a move without its clock change.
//!
//! A human move goes through [`Game::make_move`]:
//!
//! 1. Apply it. Illegal moves are ignored.
//! 2. Flip the clock to the side now to move (the first move starts it).
//! 3. If the game is over, stop the clocks and return.
//! 4. If the engine plays the side to move, ask it for a reply and apply it.
//!    `NO_MOVE` and `CANCELLED` are absorbed; anything else stops the clocks
//!    and is returned to the caller.
//!
//! Moves for the engine's side are refused. The engine call runs without the
//! lock held. Its reply is applied only if the game has not been reset or
//! replaced in the meantime and no flag has fallen. Dropping the future of a
//! turn in progress releases the turn and stops the clocks.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use shakmaty::{Color, Role, Square};
use tracing::{debug, info, warn};

use crate::aids::{self, Aids};
use crate::clock::{ClockState, ClockTicker};
use crate::constants::{DEFAULT_CLOCK, TICK_PERIOD};
use crate::difficulty::Difficulty;
use crate::engine::{Engine, MoveFuture, SessionState, Spawn, ThreadSpawner};
use crate::protocol::{EngineError, ErrorCode, SessionId};
use crate::rules::{
    create_rules, promotion_from_san, GameStatus, MoveRecord, Rules, RulesError, StandardRules,
    Variant,
};

/// Errors surfaced to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("engine failure: {0}")]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Rules(#[from] RulesError),
}

impl GameError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            GameError::Engine(err) => Some(err.code),
            GameError::Rules(_) => None,
        }
    }
}

/// Runtime settings for a game.
#[derive(Debug, Clone)]
pub struct GameConfig {
    pub difficulty: Difficulty,
    pub variant: Variant,
    /// Side the engine plays. `None` means human vs human.
    pub engine_side: Option<Color>,
    /// Starting time on each clock.
    pub clock: Duration,
    pub tick: Duration,
    /// Whether engine workers wait out their think time before replying.
    pub pacing: bool,
    /// Overrides the per-request deadline derived from the difficulty.
    pub request_timeout: Option<Duration>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            difficulty: Difficulty::default(),
            variant: Variant::default(),
            engine_side: Some(Color::Black),
            clock: DEFAULT_CLOCK,
            tick: TICK_PERIOD,
            pacing: true,
            request_timeout: None,
        }
    }
}

/// What a call to [`Game::make_move`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Nothing changed: illegal move, engine call pending, or game finished.
    Ignored,
    /// The move was played and the other side is human.
    Played(MoveRecord),
    /// The move was played and ended the game.
    GameOver(MoveRecord),
    /// The move was played and the engine answered.
    Answered { played: MoveRecord, reply: MoveRecord },
    /// The move was played but the engine did not answer (`NO_MOVE` or
    /// `CANCELLED`). Position and clocks are consistent.
    NoReply { played: MoveRecord, reason: ErrorCode },
    /// The move was played but a flag fell before the engine answered. Its
    /// reply was discarded.
    Flagged { played: MoveRecord, side: Color },
}

/// A consistent view of the game at one instant.
#[derive(Debug, Clone)]
pub struct GameSnapshot {
    pub fen: String,
    pub turn: Color,
    pub white_time: Duration,
    pub black_time: Duration,
    pub running: Option<Color>,
    pub flagged: Option<Color>,
    pub pending_engine_call: bool,
    pub status: GameStatus,
    pub in_check: bool,
    /// Bumped on every position change.
    pub version: u64,
    pub history: Vec<String>,
    pub selected: Option<Square>,
    pub legal_targets: Vec<Square>,
    pub difficulty: Difficulty,
    pub variant: Variant,
    pub engine_state: SessionState,
}

struct GameState {
    rules: Box<dyn Rules>,
    clocks: ClockState,
    engine: Engine,
    pending_engine_call: bool,
    /// Bumped whenever an outstanding engine reply must no longer apply.
    generation: u64,
    version: u64,
    selected: Option<Square>,
    legal_targets: Vec<Square>,
    difficulty: Difficulty,
    variant: Variant,
    engine_side: Option<Color>,
    clock_budget: Duration,
    rng: fastrand::Rng,
}

impl GameState {
    fn engine_plays(&self, side: Color) -> bool {
        self.variant.has_engine_opponent() && self.engine_side == Some(side)
    }

    fn accepts_moves(&self) -> bool {
        !self.pending_engine_call && self.clocks.flagged.is_none() && !self.rules.is_game_over()
    }

    fn position_changed(&mut self) {
        self.version += 1;
        self.selected = None;
        self.legal_targets.clear();
    }

    /// Drop any outstanding engine call without touching the position.
    fn supersede(&mut self) {
        self.generation += 1;
        self.pending_engine_call = false;
    }

    /// Claim the engine for the side to move.
    fn dispatch_engine(&mut self) -> (MoveFuture, u64) {
        self.pending_engine_call = true;
        let fen = self.rules.fen();
        debug!(%fen, generation = self.generation, "asking engine");
        (self.engine.best_move(fen), self.generation)
    }
}

/// Outcome of an engine turn that did not fail.
enum Reply {
    Moved(MoveRecord),
    Absorbed(ErrorCode),
    Flagged(Color),
}

/// An engine request in flight for one game generation.
struct EngineTurn {
    request: MoveFuture,
    guard: TurnGuard,
}

/// Releases the game's pending engine call if the turn is dropped before its
/// reply is applied.
struct TurnGuard {
    state: Weak<Mutex<GameState>>,
    generation: u64,
    armed: bool,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut state = state.lock();
        if state.generation == self.generation && state.pending_engine_call {
            state.pending_engine_call = false;
            state.clocks.stop();
            debug!(generation = self.generation, "engine turn abandoned");
        }
    }
}

// =============================================================================
// Game
// =============================================================================

pub struct Game {
    ticker: ClockTicker,
    state: Arc<Mutex<GameState>>,
    spawner: Arc<dyn Spawn>,
    request_timeout: Option<Duration>,
}

impl Game {
    /// Start a game with engine workers on background threads.
    pub fn new(config: GameConfig) -> Result<Self, GameError> {
        let spawner = Arc::new(ThreadSpawner {
            pacing: config.pacing,
        });
        Self::with_spawner(config, spawner)
    }

    pub fn with_spawner(config: GameConfig, spawner: Arc<dyn Spawn>) -> Result<Self, GameError> {
        let mut rng = fastrand::Rng::new();
        let rules = create_rules(config.variant, None, &mut rng)?;
        let engine = start_engine(
            config.difficulty,
            config.variant,
            spawner.as_ref(),
            config.request_timeout,
        );

        let state = Arc::new(Mutex::new(GameState {
            rules,
            clocks: ClockState::new(config.clock),
            engine,
            pending_engine_call: false,
            generation: 0,
            version: 0,
            selected: None,
            legal_targets: Vec::new(),
            difficulty: config.difficulty,
            variant: config.variant,
            engine_side: config.engine_side,
            clock_budget: config.clock,
            rng,
        }));

        let ticker = spawn_ticker(Arc::downgrade(&state), config.tick);
        info!(
            difficulty = %config.difficulty,
            variant = %config.variant,
            engine_side = ?config.engine_side,
            "game created"
        );

        Ok(Self {
            ticker,
            state,
            spawner,
            request_timeout: config.request_timeout,
        })
    }

    /// Play a human move, promoting to a queen where needed.
    pub async fn make_move(&self, from: Square, to: Square) -> Result<TurnOutcome, GameError> {
        self.make_move_with_promotion(from, to, None).await
    }

    pub async fn make_move_with_promotion(
        &self,
        from: Square,
        to: Square,
        promotion: Option<Role>,
    ) -> Result<TurnOutcome, GameError> {
        let (played, request) = {
            let mut state = self.state.lock();
            if !state.accepts_moves() {
                debug!(%from, %to, "move ignored, game not accepting moves");
                return Ok(TurnOutcome::Ignored);
            }
            let turn = state.rules.turn();
            if state.engine_plays(turn) {
                debug!(%from, %to, ?turn, "move ignored, engine's side to move");
                return Ok(TurnOutcome::Ignored);
            }

            // 1. Apply
            let Some(played) = state.rules.play(from, to, promotion) else {
                debug!(%from, %to, "illegal move ignored");
                return Ok(TurnOutcome::Ignored);
            };
            state.position_changed();
            debug!(san = %played.san, "move played");

            // 2. Game over
            if state.rules.is_game_over() {
                state.clocks.stop();
                info!(status = ?state.rules.status(), "game over");
                return Ok(TurnOutcome::GameOver(played));
            }

            // 3. Clock goes to the side to move
            let next = state.rules.turn();
            state.clocks.start(next);

            // 4. Human vs human stops here
            if !state.engine_plays(next) {
                return Ok(TurnOutcome::Played(played));
            }
            (played, self.start_engine_turn(&mut state))
        };

        match self.finish_engine_turn(request).await? {
            Reply::Moved(reply) => Ok(TurnOutcome::Answered { played, reply }),
            Reply::Absorbed(reason) => Ok(TurnOutcome::NoReply { played, reason }),
            Reply::Flagged(side) => Ok(TurnOutcome::Flagged { played, side }),
        }
    }

    /// Let the engine move for the side to move, if it plays that side.
    ///
    /// Used when the engine opens as white, or to resume after a cancelled
    /// engine turn. Returns `None` when there was nothing to do.
    pub async fn engine_move(&self) -> Result<Option<MoveRecord>, GameError> {
        let request = {
            let mut state = self.state.lock();
            let turn = state.rules.turn();
            if !state.accepts_moves() || !state.engine_plays(turn) {
                return Ok(None);
            }
            state.clocks.start(turn);
            self.start_engine_turn(&mut state)
        };

        match self.finish_engine_turn(request).await? {
            Reply::Moved(record) => Ok(Some(record)),
            Reply::Absorbed(_) | Reply::Flagged(_) => Ok(None),
        }
    }

    fn start_engine_turn(&self, state: &mut GameState) -> EngineTurn {
        let (request, generation) = state.dispatch_engine();
        EngineTurn {
            request,
            guard: TurnGuard {
                state: Arc::downgrade(&self.state),
                generation,
                armed: true,
            },
        }
    }

    async fn finish_engine_turn(&self, turn: EngineTurn) -> Result<Reply, GameError> {
        let EngineTurn { request, mut guard } = turn;
        let outcome = request.await;
        guard.armed = false;
        let generation = guard.generation;

        let mut state = self.state.lock();
        if state.generation != generation {
            debug!(generation, current = state.generation, "engine reply for a reset game dropped");
            return Ok(Reply::Absorbed(ErrorCode::Cancelled));
        }
        state.pending_engine_call = false;
        if let Some(side) = state.clocks.flagged {
            debug!(?side, "engine reply after flag fall dropped");
            return Ok(Reply::Flagged(side));
        }

        let err = match outcome {
            Ok(mv) => {
                let promotion = promotion_from_san(&mv.san);
                if let Some(record) = state.rules.play(mv.from, mv.to, promotion) {
                    state.position_changed();
                    if state.rules.is_game_over() {
                        state.clocks.stop();
                        info!(status = ?state.rules.status(), "game over");
                    } else {
                        let next = state.rules.turn();
                        state.clocks.start(next);
                    }
                    debug!(san = %record.san, "engine move played");
                    return Ok(Reply::Moved(record));
                }
                EngineError::new(
                    ErrorCode::IllegalReply,
                    format!("engine proposed illegal move {} ({}{})", mv.san, mv.from, mv.to),
                )
            }
            Err(err) => err,
        };

        match err.code {
            ErrorCode::NoMove => {
                state.clocks.stop();
                info!("engine has no legal move");
                Ok(Reply::Absorbed(ErrorCode::NoMove))
            }
            ErrorCode::Cancelled => {
                debug!(%err, "engine turn cancelled");
                Ok(Reply::Absorbed(ErrorCode::Cancelled))
            }
            _ => {
                state.clocks.stop();
                warn!(%err, "engine turn failed");
                Err(err.into())
            }
        }
    }

    /// Select a square and return its legal targets. `None` clears the selection.
    pub fn select_square(&self, square: Option<Square>) -> Vec<Square> {
        let mut state = self.state.lock();
        match square {
            Some(from) => {
                let targets = state.rules.legal_targets(from);
                state.selected = Some(from);
                state.legal_targets = targets.clone();
                targets
            }
            None => {
                state.selected = None;
                state.legal_targets.clear();
                Vec::new()
            }
        }
    }

    /// Reset to a fresh game of the current variant. An engine call in
    /// flight is cancelled and its reply discarded.
    pub fn new_game(&self) -> Result<(), GameError> {
        let mut state = self.state.lock();
        let GameState { variant, rng, .. } = &mut *state;
        let rules = create_rules(*variant, None, rng)?;

        state.supersede();
        state.engine.new_game();
        state.rules = rules;
        state.clocks = ClockState::new(state.clock_budget);
        state.position_changed();
        info!(variant = %state.variant, "new game");
        Ok(())
    }

    /// Switch difficulty. The current session is disposed (cancelling any
    /// pending call) before its replacement starts. The position is kept.
    pub fn set_difficulty(&self, difficulty: Difficulty) {
        let mut state = self.state.lock();
        if state.difficulty == difficulty {
            return;
        }
        let variant = state.variant;
        self.replace_engine(&mut state, difficulty, variant);
        info!(%difficulty, "difficulty changed");
    }

    /// Switch variant and start a new game in it.
    pub fn set_variant(&self, variant: Variant) -> Result<(), GameError> {
        let mut state = self.state.lock();
        let rules = create_rules(variant, None, &mut state.rng)?;
        let difficulty = state.difficulty;
        self.replace_engine(&mut state, difficulty, variant);
        state.rules = rules;
        state.clocks = ClockState::new(state.clock_budget);
        state.position_changed();
        info!(%variant, "variant changed");
        Ok(())
    }

    fn replace_engine(&self, state: &mut GameState, difficulty: Difficulty, variant: Variant) {
        if state.pending_engine_call {
            state.clocks.stop();
        }
        state.supersede();
        state.engine.dispose();
        state.engine = start_engine(
            difficulty,
            variant,
            self.spawner.as_ref(),
            self.request_timeout,
        );
        state.difficulty = difficulty;
        state.variant = variant;
    }

    /// Choose which side the engine plays. `None` means human vs human.
    pub fn set_engine_side(&self, side: Option<Color>) {
        self.state.lock().engine_side = side;
    }

    /// Take back the last two plies. Ignored while the engine is thinking.
    pub fn undo_pair(&self) -> Vec<MoveRecord> {
        let mut state = self.state.lock();
        if state.pending_engine_call {
            return Vec::new();
        }
        let undone: Vec<MoveRecord> = (0..2).filter_map(|_| state.rules.undo()).collect();
        if !undone.is_empty() {
            state.position_changed();
            if state.clocks.is_running() {
                let turn = state.rules.turn();
                state.clocks.start(turn);
            }
            debug!(plies = undone.len(), "undo");
        }
        undone
    }

    pub fn export_pgn(&self) -> String {
        self.state.lock().rules.pgn()
    }

    /// Replace the game with one loaded from PGN. On error the current game
    /// is left as it was.
    pub fn import_pgn(&self, pgn: &str) -> Result<(), GameError> {
        let mut loaded = StandardRules::new();
        loaded.load_pgn(pgn)?;

        let mut state = self.state.lock();
        state.supersede();
        state.engine.new_game();
        state.rules = Box::new(loaded);
        state.clocks = ClockState::new(state.clock_budget);
        state.position_changed();
        info!(plies = state.rules.history().len(), "game imported");
        Ok(())
    }

    /// Hint and capture list for the current position.
    pub fn aids(&self) -> Result<Aids, GameError> {
        let fen = self.state.lock().rules.fen();
        Ok(aids::analyze(&fen)?)
    }

    pub fn snapshot(&self) -> GameSnapshot {
        let state = self.state.lock();
        GameSnapshot {
            fen: state.rules.fen(),
            turn: state.rules.turn(),
            white_time: state.clocks.white,
            black_time: state.clocks.black,
            running: state.clocks.running,
            flagged: state.clocks.flagged,
            pending_engine_call: state.pending_engine_call,
            status: state.rules.status(),
            in_check: state.rules.in_check(),
            version: state.version,
            history: state.rules.history().into_iter().map(|r| r.san).collect(),
            selected: state.selected,
            legal_targets: state.legal_targets.clone(),
            difficulty: state.difficulty,
            variant: state.variant,
            engine_state: state.engine.state(),
        }
    }

    pub fn engine_session(&self) -> SessionId {
        self.state.lock().engine.session()
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker.is_active()
    }
}

fn start_engine(
    difficulty: Difficulty,
    variant: Variant,
    spawner: &dyn Spawn,
    request_timeout: Option<Duration>,
) -> Engine {
    let engine = Engine::spawn_with(difficulty, variant, spawner);
    match request_timeout {
        Some(timeout) => engine.with_request_timeout(timeout),
        None => engine,
    }
}

fn spawn_ticker(state: Weak<Mutex<GameState>>, period: Duration) -> ClockTicker {
    ClockTicker::spawn(period, move |elapsed| {
        let Some(state) = state.upgrade() else {
            return;
        };
        let mut state = state.lock();
        if !state.clocks.is_running() {
            return;
        }
        if state.rules.is_game_over() {
            state.clocks.stop();
            return;
        }
        if let Some(side) = state.clocks.tick(elapsed) {
            info!(?side, "flag fell");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NoThreads;

    fn sq(name: &str) -> Square {
        name.parse().unwrap()
    }

    fn config(engine_side: Option<Color>) -> GameConfig {
        GameConfig {
            engine_side,
            pacing: false,
            ..GameConfig::default()
        }
    }

    #[tokio::test]
    async fn test_fallback_engine_answers() {
        let game = Game::with_spawner(config(Some(Color::Black)), Arc::new(NoThreads)).unwrap();
        let outcome = game.make_move(sq("e2"), sq("e4")).await.unwrap();
        let TurnOutcome::Answered { played, reply } = outcome else {
            panic!("expected an engine reply, got {outcome:?}");
        };
        assert_eq!(played.san, "e4");

        let snap = game.snapshot();
        assert_eq!(snap.history, vec!["e4".to_string(), reply.san]);
        assert_eq!(snap.turn, Color::White);
        assert_eq!(snap.running, Some(Color::White));
        assert!(!snap.pending_engine_call);
        assert_eq!(snap.version, 2);
    }

    #[tokio::test]
    async fn test_illegal_move_is_a_no_op() {
        let game = Game::with_spawner(config(None), Arc::new(NoThreads)).unwrap();
        let before = game.snapshot();
        let outcome = game.make_move(sq("e2"), sq("e5")).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Ignored);
        let after = game.snapshot();
        assert_eq!(after.fen, before.fen);
        assert_eq!(after.running, None);
        assert_eq!(after.version, before.version);
    }

    #[tokio::test]
    async fn test_selection_and_aids() {
        let game = Game::with_spawner(config(None), Arc::new(NoThreads)).unwrap();
        let mut targets = game.select_square(Some(sq("g1")));
        targets.sort();
        assert_eq!(targets, vec![sq("f3"), sq("h3")]);
        assert_eq!(game.snapshot().selected, Some(sq("g1")));

        game.make_move(sq("g1"), sq("f3")).await.unwrap();
        assert_eq!(game.snapshot().selected, None);
        assert!(game.select_square(None).is_empty());

        let aids = game.aids().unwrap();
        assert!(aids.best_move.is_some());
        assert!(aids.captures.is_empty());
    }

    #[tokio::test]
    async fn test_engine_outside_supported_variants_stays_silent() {
        let cfg = GameConfig {
            variant: Variant::Horde,
            ..config(Some(Color::Black))
        };
        let game = Game::with_spawner(cfg, Arc::new(NoThreads)).unwrap();
        let outcome = game.make_move(sq("e2"), sq("e4")).await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Played(_)));
        assert_eq!(game.snapshot().running, Some(Color::Black));
        assert_eq!(game.engine_move().await.unwrap(), None);
    }

    #[test]
    fn test_game_error_codes() {
        let err: GameError = EngineError::no_move().into();
        assert_eq!(err.code(), Some(ErrorCode::NoMove));
        let err: GameError = RulesError::InvalidPgn("x".into()).into();
        assert_eq!(err.code(), None);
    }
}
