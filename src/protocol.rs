//! Messages exchanged between an engine session and its background worker.
//!
//! Every message travels in an [`Envelope`] that names the session it
//! belongs to and, for move requests and their replies, the request id.
//! The engine uses both to drop replies that no longer match the single
//! outstanding request: a reply from a disposed session, or one that
//! arrives after its request timed out.
//!
//! The wire form is JSON with a `type` tag, one message per line:
//!
//! ```text
//! -> {"session":1,"type":"setoptions","skill":5,"depth":6,"movetime":300}
//! -> {"session":1,"id":1,"type":"bestmove","fen":"..."}
//! <- {"session":1,"type":"ready"}
//! <- {"session":1,"id":1,"type":"bestmove","from":"e2","to":"e4","san":"e4"}
//! <- {"session":1,"id":2,"type":"error","message":"No legal move","code":"NO_MOVE"}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one engine session.
pub type SessionId = u64;

/// Identifies one `bestmove` request within a session.
pub type RequestId = u64;

/// Messages sent to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Request {
    SetOptions {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        skill: Option<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        depth: Option<u8>,
        /// Milliseconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        movetime: Option<u64>,
    },
    BestMove {
        fen: String,
    },
    NewGame,
}

/// Messages sent by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Response {
    Ready,
    BestMove {
        from: String,
        to: String,
        san: String,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },
}

/// A message tagged with its session and, optionally, its request id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub session: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(flatten)]
    pub message: T,
}

impl<T> Envelope<T> {
    pub fn new(session: SessionId, message: T) -> Self {
        Self {
            session,
            id: None,
            message,
        }
    }

    pub fn with_id(session: SessionId, id: RequestId, message: T) -> Self {
        Self {
            session,
            id: Some(id),
            message,
        }
    }

    /// Wrap a reply so it answers `self`.
    pub fn reply<U>(&self, message: U) -> Envelope<U> {
        Envelope {
            session: self.session,
            id: self.id,
            message,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Machine-readable failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The position has no legal move. Expected at game end.
    NoMove,
    /// The FEN could not be parsed.
    InvalidFen,
    /// Another request is already pending on this session.
    InProgress,
    /// The request was superseded by a reset or session teardown.
    Cancelled,
    /// No reply arrived before the request deadline.
    Timeout,
    /// The worker went away or sent something unintelligible.
    Transport,
    /// The engine replied with a move the rules reject.
    IllegalReply,
    #[serde(other)]
    Other,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NoMove => "NO_MOVE",
            ErrorCode::InvalidFen => "INVALID_FEN",
            ErrorCode::InProgress => "IN_PROGRESS",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Transport => "TRANSPORT",
            ErrorCode::IllegalReply => "ILLEGAL_REPLY",
            ErrorCode::Other => "OTHER",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by engine operations, carrying a code and a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} ({code})")]
pub struct EngineError {
    pub code: ErrorCode,
    pub message: String,
}

impl EngineError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn no_move() -> Self {
        Self::new(ErrorCode::NoMove, "No legal move")
    }

    pub fn in_progress() -> Self {
        Self::new(
            ErrorCode::InProgress,
            "a bestmove request is already pending on this session",
        )
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Transport, message)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// `NO_MOVE` and `CANCELLED` are expected conditions, not faults.
    pub fn is_benign(&self) -> bool {
        matches!(self.code, ErrorCode::NoMove | ErrorCode::Cancelled)
    }
}

impl From<EngineError> for Response {
    fn from(err: EngineError) -> Self {
        Response::Error {
            message: err.message,
            code: Some(err.code),
        }
    }
}
