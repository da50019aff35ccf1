//! Gameplay aids: a quick hint and the list of available captures.
//!
//! The hint is a fixed one-ply evaluation with no randomness, so the same
//! position always gives the same hint.

use serde::Serialize;
use shakmaty::{Position, Rank, Role, Square};

use crate::rules::{describe_move, parse_fen, MoveRecord, RulesError};
use crate::selector::piece_value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hint {
    pub from: String,
    pub to: String,
    pub san: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureHint {
    pub from: String,
    pub to: String,
    /// Letter of the capturing piece, lowercase (`p`, `n`, ...).
    pub piece: char,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Aids {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_move: Option<Hint>,
    pub captures: Vec<CaptureHint>,
}

fn hint_score(record: &MoveRecord) -> f64 {
    let mut score = 0.0;
    if let Some(captured) = record.captured {
        score += piece_value(captured);
    }
    if record.check {
        score += 2.0;
    }
    if [Square::D4, Square::D5, Square::E4, Square::E5].contains(&record.to) {
        score += 1.0;
    }
    let on_back_rank = matches!(record.from.rank(), Rank::First | Rank::Eighth);
    if matches!(record.role, Role::Knight | Role::Bishop) && on_back_rank {
        score += 0.5;
    }
    if record.role == Role::King && !record.san.starts_with("O-O") {
        score -= 0.5;
    }
    score
}

/// Analyze `fen` for the side to move.
pub fn analyze(fen: &str) -> Result<Aids, RulesError> {
    let pos = parse_fen(fen)?;
    let records: Vec<MoveRecord> = pos
        .legal_moves()
        .iter()
        .map(|m| describe_move(&pos, m))
        .collect();

    // Ties go to the later move.
    let best_move = records
        .iter()
        .max_by(|a, b| hint_score(a).total_cmp(&hint_score(b)))
        .map(|r| Hint {
            from: r.from.to_string(),
            to: r.to.to_string(),
            san: r.san.clone(),
        });

    let captures = records
        .iter()
        .filter(|r| r.is_capture())
        .map(|r| CaptureHint {
            from: r.from.to_string(),
            to: r.to.to_string(),
            piece: r.role.char(),
        })
        .collect();

    Ok(Aids {
        best_move,
        captures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::START_FEN;

    #[test]
    fn test_hint_prefers_the_biggest_capture() {
        // The rook can take a queen on a8 or a knight on b1.
        let aids = analyze("q5k1/8/8/8/8/8/8/Rn4K1 w - - 0 1").unwrap();
        let best = aids.best_move.unwrap();
        assert_eq!(best.san, "Rxa8+");
        assert_eq!(aids.captures.len(), 2);
        assert!(aids.captures.iter().all(|c| c.piece == 'r'));
    }

    #[test]
    fn test_start_position_has_no_captures() {
        let aids = analyze(START_FEN).unwrap();
        assert!(aids.captures.is_empty());
        let best = aids.best_move.unwrap();
        // Centre pawn pushes score 1.0, knight development only 0.5.
        assert!(["d4", "e4"].contains(&best.san.as_str()));
        assert_eq!(analyze(START_FEN).unwrap().best_move.unwrap(), best);
    }

    #[test]
    fn test_terminal_and_invalid_positions() {
        let aids = analyze("7k/5Q2/7K/8/8/8/8/8 b - - 0 1").unwrap();
        assert_eq!(aids, Aids::default());
        assert!(analyze("not a fen").is_err());
    }
}
