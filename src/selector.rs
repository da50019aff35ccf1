//! Heuristic move selection with skill-controlled randomness.
//!
//! This is not a search. Every legal move gets a score made of:
//! - Noise, `random * max(1, 21 - skill)`: strong tiers get less of it
//! - Material won by a capture, scaled by `skill / 4`
//! - A check bonus and a dominating mate bonus
//! - Centre and development bonuses once the skill is high enough
//! - A king-safety penalty at high skill
//!
//! The scored list is sorted best-first and one entry is picked from a
//! window at the top whose width shrinks as skill grows. Skill 20 always
//! takes the top entry; skill 1 picks among the top twenty-one.
//!
//! Randomness comes through [`RandomSource`] so callers can pin outcomes.

use shakmaty::{Chess, Color, Move, Position, Rank, Role, Square};

use crate::constants::{
    CENTER_BONUS, CENTER_SKILL, CHECK_BONUS, DEVELOPMENT_BONUS, DEVELOPMENT_SKILL, MATE_BONUS,
    NOISE_CEILING, PICK_CEILING, PIECE_VALUES, SAFETY_PENALTY, SAFETY_SKILL,
};
use crate::rules::{describe_move, ui_destination, MoveRecord};

/// Source of uniform random numbers in `[0, 1)`.
pub trait RandomSource {
    fn next_f64(&mut self) -> f64;
}

impl RandomSource for fastrand::Rng {
    fn next_f64(&mut self) -> f64 {
        self.f64()
    }
}

/// A legal move and its heuristic score.
#[derive(Debug, Clone)]
pub struct ScoredMove {
    pub mv: Move,
    pub score: f64,
}

/// The outcome of one selection.
#[derive(Debug, Clone)]
pub struct Selection {
    pub mv: Move,
    pub record: MoveRecord,
    pub score: f64,
    /// Position of the chosen move in the best-first order (0 = top).
    pub rank: usize,
    /// Number of legal moves considered.
    pub candidates: usize,
}

const CENTER: [Square; 4] = [Square::D4, Square::D5, Square::E4, Square::E5];

/// Material value of a piece, king counted as zero.
pub fn piece_value(role: Role) -> f64 {
    let index = match role {
        Role::Pawn => 0,
        Role::Knight => 1,
        Role::Bishop => 2,
        Role::Rook => 3,
        Role::Queen => 4,
        Role::King => 5,
    };
    PIECE_VALUES[index]
}

fn back_rank(color: Color) -> Rank {
    match color {
        Color::White => Rank::First,
        Color::Black => Rank::Eighth,
    }
}

/// Score a single legal move for the side to move in `pos`.
pub fn score_move<R: RandomSource + ?Sized>(pos: &Chess, m: &Move, skill: u8, rng: &mut R) -> f64 {
    let s = f64::from(skill);
    let mover = pos.turn();

    // 1. Noise - inversely tied to skill
    let noise_span = f64::from(NOISE_CEILING.saturating_sub(skill).max(1));
    let mut score = rng.next_f64() * noise_span;

    // 2. Material
    if let Some(captured) = m.capture() {
        score += piece_value(captured) * (s / 4.0);
    }

    let mut after = pos.clone();
    after.play_unchecked(m);

    // 3. Check and mate
    if after.is_check() {
        score += CHECK_BONUS * (s / 10.0);
    }
    if after.is_checkmate() {
        score += MATE_BONUS;
    }

    // 4. Centre control
    if skill > CENTER_SKILL && CENTER.contains(&ui_destination(m)) {
        score += CENTER_BONUS * (s / 10.0);
    }

    // 5. Development - a minor piece leaving the back rank
    let is_minor = matches!(m.role(), Role::Knight | Role::Bishop);
    let from_back_rank = m.from().is_some_and(|from| from.rank() == back_rank(mover));
    if skill > DEVELOPMENT_SKILL && is_minor && from_back_rank {
        score += DEVELOPMENT_BONUS * (s / 10.0);
    }

    // 6. Safety net: never expected to fire for legal moves
    if skill > SAFETY_SKILL {
        let board = after.board();
        if let Some(king) = board.king_of(mover) {
            if after.king_attackers(king, !mover, board.occupied()).any() {
                score -= SAFETY_PENALTY;
            }
        }
    }

    score
}

/// Score every legal move and sort best-first.
pub fn score_moves<R: RandomSource + ?Sized>(pos: &Chess, skill: u8, rng: &mut R) -> Vec<ScoredMove> {
    let mut scored: Vec<ScoredMove> = pos
        .legal_moves()
        .into_iter()
        .map(|mv| {
            let score = score_move(pos, &mv, skill, rng);
            ScoredMove { mv, score }
        })
        .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored
}

/// Pick an index into a best-first list of `len` moves.
///
/// The window is `max(0, 20 - skill) + 1` wide, clamped to the list.
pub fn pick_index<R: RandomSource + ?Sized>(len: usize, skill: u8, rng: &mut R) -> usize {
    if len == 0 {
        return 0;
    }
    let window = usize::from(PICK_CEILING.saturating_sub(skill)) + 1;
    let index = (rng.next_f64() * window as f64).floor() as usize;
    index.min(len - 1)
}

/// Choose a move for the side to move. `None` means there is no legal move.
pub fn select_move<R: RandomSource + ?Sized>(pos: &Chess, skill: u8, rng: &mut R) -> Option<Selection> {
    let scored = score_moves(pos, skill, rng);
    if scored.is_empty() {
        return None;
    }
    let rank = pick_index(scored.len(), skill, rng);
    let candidates = scored.len();
    let ScoredMove { mv, score } = scored.into_iter().nth(rank)?;
    Some(Selection {
        record: describe_move(pos, &mv),
        mv,
        score,
        rank,
        candidates,
    })
}

/// Choose a uniformly random legal move, ignoring skill.
pub fn select_uniform<R: RandomSource + ?Sized>(pos: &Chess, rng: &mut R) -> Option<Selection> {
    let moves = pos.legal_moves();
    if moves.is_empty() {
        return None;
    }
    let rank = ((rng.next_f64() * moves.len() as f64).floor() as usize).min(moves.len() - 1);
    let mv = moves[rank].clone();
    Some(Selection {
        record: describe_move(pos, &mv),
        mv,
        score: 0.0,
        rank,
        candidates: moves.len(),
    })
}
