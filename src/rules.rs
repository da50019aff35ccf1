//! Chess rules: legality, FEN, SAN, PGN and game-over detection.
//!
//! Move generation and validation are delegated to `shakmaty`. This module
//! wraps it in the [`Rules`] interface the orchestrator consumes, keeps the
//! move history needed for undo and PGN export, and adds the draw rules that
//! `shakmaty` leaves to the caller (fifty-move rule, threefold repetition).
//!
//! Squares on the UI side are `from`/`to` pairs. Castling is therefore
//! expressed as the king's two-square step (`e1g1`), not king-takes-rook.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::{
    CastlingMode, Chess, Color, EnPassantMode, File, Move, Outcome, Position, Role, Square,
};

/// The standard starting position.
pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Errors raised by the rules layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RulesError {
    #[error("invalid FEN {fen:?}: {reason}")]
    InvalidFen { fen: String, reason: String },
    #[error("invalid square: {0:?}")]
    InvalidSquare(String),
    #[error("invalid PGN: {0}")]
    InvalidPgn(String),
}

// =============================================================================
// Variants
// =============================================================================

/// Rule variant selected for a game.
///
/// Only `Standard` and `Chess960` are played against the engine. The other
/// variants are accepted but fall back to standard rules, human vs human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    #[default]
    Standard,
    Chess960,
    KingOfTheHill,
    ThreeCheck,
    Horde,
}

impl Variant {
    pub const ALL: [Variant; 5] = [
        Variant::Standard,
        Variant::Chess960,
        Variant::KingOfTheHill,
        Variant::ThreeCheck,
        Variant::Horde,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Variant::Standard => "standard",
            Variant::Chess960 => "chess960",
            Variant::KingOfTheHill => "king-of-the-hill",
            Variant::ThreeCheck => "three-check",
            Variant::Horde => "horde",
        }
    }

    /// Whether an engine opponent can be seated for this variant.
    pub const fn has_engine_opponent(self) -> bool {
        matches!(self, Variant::Standard | Variant::Chess960)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant: {0}")]
pub struct UnknownVariant(pub String);

impl FromStr for Variant {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Variant::ALL
            .into_iter()
            .find(|v| v.name() == wanted)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

/// Generate a Chess960 starting FEN.
///
/// Bishops land on opposite colours and the king sits between the rooks.
/// Castling rights are dropped, so standard rules can play the position.
pub fn chess960_start_fen(rng: &mut fastrand::Rng) -> String {
    let mut back = [' '; 8];
    let dark = [0, 2, 4, 6];
    let light = [1, 3, 5, 7];
    back[dark[rng.usize(..dark.len())]] = 'B';
    back[light[rng.usize(..light.len())]] = 'B';

    for piece in ['Q', 'N', 'N'] {
        let free: Vec<usize> = (0..8).filter(|&i| back[i] == ' ').collect();
        back[free[rng.usize(..free.len())]] = piece;
    }

    // The three remaining files, left to right, take R K R.
    let free: Vec<usize> = (0..8).filter(|&i| back[i] == ' ').collect();
    for (&i, piece) in free.iter().zip(['R', 'K', 'R']) {
        back[i] = piece;
    }

    let white: String = back.iter().collect();
    let black = white.to_ascii_lowercase();
    format!("{black}/pppppppp/8/8/8/8/PPPPPPPP/{white} w - - 0 1")
}

// =============================================================================
// Position helpers
// =============================================================================

/// Parse a FEN into a standard-chess position.
pub fn parse_fen(fen: &str) -> Result<Chess, RulesError> {
    let invalid = |reason: String| RulesError::InvalidFen {
        fen: fen.to_string(),
        reason,
    };
    let setup = Fen::from_ascii(fen.trim().as_bytes()).map_err(|e| invalid(e.to_string()))?;
    setup
        .into_position(CastlingMode::Standard)
        .map_err(|e| invalid(e.to_string()))
}

/// Serialize a position as FEN.
pub fn fen_of(pos: &Chess) -> String {
    Fen::from_position(pos.clone(), EnPassantMode::Legal).to_string()
}

/// Parse a square name such as `e4`.
pub fn parse_square(name: &str) -> Result<Square, RulesError> {
    name.trim()
        .parse::<Square>()
        .map_err(|_| RulesError::InvalidSquare(name.to_string()))
}

/// The square the UI shows a move landing on. Castling lands on the king's
/// destination rather than on the rook.
pub fn ui_destination(m: &Move) -> Square {
    match *m {
        Move::Castle { king, rook } => {
            let file = if rook.file() > king.file() { File::G } else { File::C };
            Square::from_coords(file, king.rank())
        }
        _ => m.to(),
    }
}

/// Whether a legal move from the UI's point of view goes `from` -> `to`.
pub fn move_matches(m: &Move, from: Square, to: Square) -> bool {
    m.from() == Some(from) && (ui_destination(m) == to || m.to() == to)
}

/// Extract the promotion piece from SAN such as `e8=N+`.
pub fn promotion_from_san(san: &str) -> Option<Role> {
    let (_, tail) = san.split_once('=')?;
    Role::from_char(tail.chars().next()?.to_ascii_lowercase())
}

/// Describe `m` as played from `pos`.
pub fn describe_move(pos: &Chess, m: &Move) -> MoveRecord {
    let san = SanPlus::from_move(pos.clone(), m).to_string();
    MoveRecord {
        from: m.from().unwrap_or_else(|| m.to()),
        to: ui_destination(m),
        check: san.ends_with('+') || san.ends_with('#'),
        mate: san.ends_with('#'),
        san,
        role: m.role(),
        captured: m.capture(),
        promotion: m.promotion(),
    }
}

// =============================================================================
// Move records and status
// =============================================================================

/// A move as the UI and history see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRecord {
    pub from: Square,
    pub to: Square,
    pub san: String,
    pub role: Role,
    pub captured: Option<Role>,
    pub promotion: Option<Role>,
    pub check: bool,
    pub mate: bool,
}

impl MoveRecord {
    pub fn is_capture(&self) -> bool {
        self.captured.is_some()
    }
}

impl fmt::Display for MoveRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.san)
    }
}

/// Why a game ended in a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawReason {
    Stalemate,
    InsufficientMaterial,
    FiftyMoves,
    Repetition,
}

/// Current state of the game from the rules' point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameStatus {
    Ongoing,
    Checkmate { winner: Color },
    Draw(DrawReason),
}

impl GameStatus {
    pub fn is_over(self) -> bool {
        self != GameStatus::Ongoing
    }

    /// PGN result token.
    pub fn result(self) -> &'static str {
        match self {
            GameStatus::Ongoing => "*",
            GameStatus::Checkmate {
                winner: Color::White,
            } => "1-0",
            GameStatus::Checkmate {
                winner: Color::Black,
            } => "0-1",
            GameStatus::Draw(_) => "1/2-1/2",
        }
    }
}

// =============================================================================
// Rules interface
// =============================================================================

/// The rules provider the orchestrator drives.
///
/// Implementations are synchronous and own the authoritative position.
pub trait Rules: Send {
    fn fen(&self) -> String;
    fn set_fen(&mut self, fen: &str) -> Result<(), RulesError>;
    fn reset(&mut self);
    fn turn(&self) -> Color;
    fn legal_moves(&self) -> Vec<MoveRecord>;
    fn legal_targets(&self, from: Square) -> Vec<Square>;
    /// Play `from` -> `to`. Promotions default to a queen. Returns `None`
    /// when the move is illegal, leaving the position untouched.
    fn play(&mut self, from: Square, to: Square, promotion: Option<Role>) -> Option<MoveRecord>;
    fn undo(&mut self) -> Option<MoveRecord>;
    fn history(&self) -> Vec<MoveRecord>;
    fn status(&self) -> GameStatus;
    fn in_check(&self) -> bool;
    fn load_pgn(&mut self, pgn: &str) -> Result<(), RulesError>;
    fn pgn(&self) -> String;

    fn is_game_over(&self) -> bool {
        self.status().is_over()
    }
}

struct Ply {
    before: Chess,
    record: MoveRecord,
}

/// Standard chess rules backed by `shakmaty`.
pub struct StandardRules {
    start: Chess,
    position: Chess,
    plies: Vec<Ply>,
    /// Repetition keys of every position reached, start included.
    seen: Vec<String>,
}

impl Default for StandardRules {
    fn default() -> Self {
        Self::from_position(Chess::default())
    }
}

impl StandardRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fen(fen: &str) -> Result<Self, RulesError> {
        Ok(Self::from_position(parse_fen(fen)?))
    }

    fn from_position(pos: Chess) -> Self {
        Self {
            seen: vec![repetition_key(&pos)],
            start: pos.clone(),
            position: pos,
            plies: Vec::new(),
        }
    }

    pub fn position(&self) -> &Chess {
        &self.position
    }

    fn push(&mut self, m: &Move) -> MoveRecord {
        let record = describe_move(&self.position, m);
        let before = self.position.clone();
        self.position.play_unchecked(m);
        self.seen.push(repetition_key(&self.position));
        self.plies.push(Ply {
            before,
            record: record.clone(),
        });
        record
    }

    fn repetitions(&self) -> usize {
        match self.seen.last() {
            Some(current) => self.seen.iter().filter(|k| *k == current).count(),
            None => 0,
        }
    }
}

/// FEN without the move counters: placement, turn, castling, en passant.
fn repetition_key(pos: &Chess) -> String {
    fen_of(pos).split(' ').take(4).collect::<Vec<_>>().join(" ")
}

impl Rules for StandardRules {
    fn fen(&self) -> String {
        fen_of(&self.position)
    }

    fn set_fen(&mut self, fen: &str) -> Result<(), RulesError> {
        *self = Self::from_fen(fen)?;
        Ok(())
    }

    fn reset(&mut self) {
        *self = Self::from_position(self.start.clone());
    }

    fn turn(&self) -> Color {
        self.position.turn()
    }

    fn legal_moves(&self) -> Vec<MoveRecord> {
        self.position
            .legal_moves()
            .iter()
            .map(|m| describe_move(&self.position, m))
            .collect()
    }

    fn legal_targets(&self, from: Square) -> Vec<Square> {
        let mut targets: Vec<Square> = self
            .position
            .legal_moves()
            .iter()
            .filter(|m| m.from() == Some(from))
            .map(ui_destination)
            .collect();
        targets.dedup();
        targets
    }

    fn play(&mut self, from: Square, to: Square, promotion: Option<Role>) -> Option<MoveRecord> {
        let wanted = promotion.unwrap_or(Role::Queen);
        let chosen = self
            .position
            .legal_moves()
            .into_iter()
            .filter(|m| move_matches(m, from, to))
            .find(|m| m.promotion().is_none() || m.promotion() == Some(wanted))?;
        Some(self.push(&chosen))
    }

    fn undo(&mut self) -> Option<MoveRecord> {
        let ply = self.plies.pop()?;
        self.seen.pop();
        self.position = ply.before;
        Some(ply.record)
    }

    fn history(&self) -> Vec<MoveRecord> {
        self.plies.iter().map(|p| p.record.clone()).collect()
    }

    fn status(&self) -> GameStatus {
        match self.position.outcome() {
            Some(Outcome::Decisive { winner }) => return GameStatus::Checkmate { winner },
            Some(Outcome::Draw) if self.position.is_stalemate() => {
                return GameStatus::Draw(DrawReason::Stalemate);
            }
            Some(Outcome::Draw) => return GameStatus::Draw(DrawReason::InsufficientMaterial),
            None => {}
        }
        if self.position.halfmoves() >= 100 {
            GameStatus::Draw(DrawReason::FiftyMoves)
        } else if self.repetitions() >= 3 {
            GameStatus::Draw(DrawReason::Repetition)
        } else {
            GameStatus::Ongoing
        }
    }

    fn in_check(&self) -> bool {
        self.position.is_check()
    }

    fn load_pgn(&mut self, pgn: &str) -> Result<(), RulesError> {
        let (tags, movetext) = split_pgn(pgn);
        let mut loaded = match tags.iter().find(|(name, _)| name == "FEN") {
            Some((_, fen)) => Self::from_fen(fen)?,
            None => Self::new(),
        };

        for token in movetext_tokens(&movetext) {
            let san: SanPlus = token
                .parse()
                .map_err(|_| RulesError::InvalidPgn(format!("bad move token {token:?}")))?;
            let m = san.san.to_move(&loaded.position).map_err(|_| {
                RulesError::InvalidPgn(format!(
                    "illegal move {token:?} after {} plies",
                    loaded.plies.len()
                ))
            })?;
            loaded.push(&m);
        }

        *self = loaded;
        Ok(())
    }

    fn pgn(&self) -> String {
        let result = self.status().result();
        let mut out = String::new();
        for (name, value) in [
            ("Event", "Casual game"),
            ("Site", "?"),
            ("Date", "????.??.??"),
            ("Round", "?"),
            ("White", "?"),
            ("Black", "?"),
            ("Result", result),
        ] {
            out.push_str(&format!("[{name} \"{value}\"]\n"));
        }
        let start_fen = fen_of(&self.start);
        if start_fen != START_FEN {
            out.push_str("[SetUp \"1\"]\n");
            out.push_str(&format!("[FEN \"{start_fen}\"]\n"));
        }
        out.push('\n');

        let mut number = self.start.fullmoves().get();
        let mut turn = self.start.turn();
        let mut words: Vec<String> = Vec::with_capacity(self.plies.len() * 3 / 2 + 1);
        for (i, ply) in self.plies.iter().enumerate() {
            match turn {
                Color::White => words.push(format!("{number}.")),
                Color::Black if i == 0 => words.push(format!("{number}...")),
                Color::Black => {}
            }
            words.push(ply.record.san.clone());
            if turn == Color::Black {
                number += 1;
            }
            turn = !turn;
        }
        words.push(result.to_string());
        out.push_str(&words.join(" "));
        out.push('\n');
        out
    }
}

/// Create the rules provider for a variant.
pub fn create_rules(
    variant: Variant,
    initial_fen: Option<&str>,
    rng: &mut fastrand::Rng,
) -> Result<Box<dyn Rules>, RulesError> {
    let rules = match (variant, initial_fen) {
        (_, Some(fen)) => StandardRules::from_fen(fen)?,
        (Variant::Chess960, None) => StandardRules::from_fen(&chess960_start_fen(rng))?,
        (_, None) => StandardRules::new(),
    };
    Ok(Box::new(rules))
}

// =============================================================================
// PGN parsing
// =============================================================================

/// Split a PGN into `(tags, movetext)`.
fn split_pgn(pgn: &str) -> (Vec<(String, String)>, String) {
    let mut tags = Vec::new();
    let mut movetext = String::new();
    for line in pgn.lines() {
        let line = line.split(';').next().unwrap_or_default().trim();
        if let Some(inner) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            if let Some((name, value)) = inner.split_once(' ') {
                tags.push((name.to_string(), value.trim().trim_matches('"').to_string()));
            }
        } else if !line.starts_with('%') {
            movetext.push_str(line);
            movetext.push(' ');
        }
    }
    (tags, movetext)
}

/// SAN tokens of a movetext, with brace comments, variations, NAGs, move numbers
/// and the result token stripped.
fn movetext_tokens(movetext: &str) -> Vec<String> {
    let mut cleaned = String::with_capacity(movetext.len());
    let mut depth = 0usize;
    let mut in_brace = false;
    for c in movetext.chars() {
        match c {
            '{' => in_brace = true,
            '}' if in_brace => in_brace = false,
            '(' if !in_brace => depth += 1,
            ')' if !in_brace => depth = depth.saturating_sub(1),
            _ if in_brace || depth > 0 => {}
            _ => cleaned.push(c),
        }
    }

    cleaned
        .split_whitespace()
        .map(|t| t.trim_start_matches(|c: char| c.is_ascii_digit() || c == '.'))
        .filter(|t| !t.is_empty() && !t.starts_with('$'))
        .filter(|t| !matches!(*t, "1-0" | "0-1" | "1/2-1/2" | "*" | "-0" | "-1" | "/2-1/2"))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sq(name: &str) -> Square {
        parse_square(name).unwrap()
    }

    #[test]
    fn test_start_position_round_trips_fen() {
        let rules = StandardRules::new();
        assert_eq!(rules.fen(), START_FEN);
        assert_eq!(rules.legal_moves().len(), 20);
    }

    #[test]
    fn test_play_and_undo() {
        let mut rules = StandardRules::new();
        let record = rules.play(sq("e2"), sq("e4"), None).unwrap();
        assert_eq!(record.san, "e4");
        assert_eq!(rules.turn(), Color::Black);

        let undone = rules.undo().unwrap();
        assert_eq!(undone, record);
        assert_eq!(rules.fen(), START_FEN);
        assert!(rules.undo().is_none());
    }

    #[test]
    fn test_illegal_move_is_rejected_without_change() {
        let mut rules = StandardRules::new();
        assert!(rules.play(sq("e2"), sq("e5"), None).is_none());
        assert_eq!(rules.fen(), START_FEN);
    }

    #[test]
    fn test_castling_uses_king_destination() {
        let mut rules =
            StandardRules::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        assert!(rules.legal_targets(sq("e1")).contains(&sq("g1")));
        let record = rules.play(sq("e1"), sq("g1"), None).unwrap();
        assert_eq!(record.san, "O-O");
        assert_eq!(record.to, sq("g1"));
    }

    #[test]
    fn test_promotion_defaults_to_queen() {
        let mut rules = StandardRules::from_fen("8/P6k/8/8/8/8/8/K7 w - - 0 1").unwrap();
        let record = rules.play(sq("a7"), sq("a8"), None).unwrap();
        assert_eq!(record.promotion, Some(Role::Queen));

        let mut rules = StandardRules::from_fen("8/P6k/8/8/8/8/8/K7 w - - 0 1").unwrap();
        let record = rules.play(sq("a7"), sq("a8"), Some(Role::Knight)).unwrap();
        assert_eq!(record.san, "a8=N");
        assert_eq!(promotion_from_san(&record.san), Some(Role::Knight));
    }

    #[test]
    fn test_status_detects_mate_and_stalemate() {
        let stalemate = StandardRules::from_fen("7k/5Q2/7K/8/8/8/8/8 b - - 0 1").unwrap();
        assert_eq!(
            stalemate.status(),
            GameStatus::Draw(DrawReason::Stalemate)
        );
        assert!(stalemate.legal_moves().is_empty());

        let mut rules = StandardRules::new();
        for (from, to) in [("f2", "f3"), ("e7", "e5"), ("g2", "g4"), ("d8", "h4")] {
            rules.play(sq(from), sq(to), None).unwrap();
        }
        assert_eq!(
            rules.status(),
            GameStatus::Checkmate {
                winner: Color::Black
            }
        );
        assert!(rules.history().last().unwrap().mate);
    }

    #[test]
    fn test_threefold_repetition() {
        let mut rules = StandardRules::new();
        for _ in 0..2 {
            for (from, to) in [("g1", "f3"), ("g8", "f6"), ("f3", "g1"), ("f6", "g8")] {
                rules.play(sq(from), sq(to), None).unwrap();
            }
        }
        assert_eq!(rules.status(), GameStatus::Draw(DrawReason::Repetition));
    }

    #[test]
    fn test_pgn_round_trip() {
        let mut rules = StandardRules::new();
        for (from, to) in [("e2", "e4"), ("e7", "e5"), ("g1", "f3")] {
            rules.play(sq(from), sq(to), None).unwrap();
        }
        let pgn = rules.pgn();
        assert!(pgn.contains("1. e4 e5 2. Nf3 *"));

        let mut loaded = StandardRules::new();
        loaded.load_pgn(&pgn).unwrap();
        assert_eq!(loaded.fen(), rules.fen());
        assert_eq!(loaded.history().len(), 3);
    }

    #[test]
    fn test_pgn_with_comments_and_setup() {
        let pgn = "[Event \"x\"]\n[FEN \"8/P6k/8/8/8/8/8/K7 w - - 0 1\"]\n\n\
                   1. a8=Q {promote} (1. a8=N) Kg6 $1 *";
        let mut rules = StandardRules::new();
        rules.load_pgn(pgn).unwrap();
        assert_eq!(rules.history().len(), 2);
        assert!(rules.pgn().contains("[FEN \"8/P6k/8/8/8/8/8/K7 w - - 0 1\"]"));
    }

    #[test]
    fn test_bad_pgn_leaves_game_untouched() {
        let mut rules = StandardRules::new();
        rules.play(sq("d2"), sq("d4"), None).unwrap();
        let before = rules.fen();
        assert!(matches!(
            rules.load_pgn("1. e4 Ke3 *"),
            Err(RulesError::InvalidPgn(_))
        ));
        assert_eq!(rules.fen(), before);
    }

    #[test]
    fn test_invalid_fen() {
        assert!(matches!(
            parse_fen("not a fen"),
            Err(RulesError::InvalidFen { .. })
        ));
    }

    #[test]
    fn test_chess960_start_is_playable() {
        let mut rng = fastrand::Rng::with_seed(960);
        for _ in 0..50 {
            let fen = chess960_start_fen(&mut rng);
            let rules = StandardRules::from_fen(&fen).unwrap();
            assert!(rules.legal_moves().len() >= 16, "{fen}");

            let back: Vec<char> = fen.split('/').last().unwrap()[..8].chars().collect();
            let bishops: Vec<usize> = (0..8).filter(|&i| back[i] == 'B').collect();
            assert_eq!(bishops.len(), 2);
            assert_ne!(bishops[0] % 2, bishops[1] % 2, "{fen}");
            let rooks: Vec<usize> = (0..8).filter(|&i| back[i] == 'R').collect();
            let king = (0..8).find(|&i| back[i] == 'K').unwrap();
            assert!(rooks[0] < king && king < rooks[1], "{fen}");
        }
    }

    #[test]
    fn test_variant_names() {
        assert_eq!("king_of_the_hill".parse::<Variant>(), Ok(Variant::KingOfTheHill));
        assert!(Variant::Chess960.has_engine_opponent());
        assert!(!Variant::Horde.has_engine_opponent());
    }
}
