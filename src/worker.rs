//! The engine's background execution context.
//!
//! A [`Worker`] owns the search options and a bookkeeping copy of the last
//! position it was asked about. It speaks the message protocol defined in
//! [`crate::protocol`]:
//!
//! - `ready` is emitted exactly once, when the worker starts
//! - `setoptions` updates skill, depth and movetime; no reply
//! - `newgame` resets the bookkeeping position; no reply
//! - `bestmove` replies with a move or an error (`INVALID_FEN`, `NO_MOVE`)
//!
//! The same worker runs in two hosts: [`run`] drives it on a thread over
//! channels (used by [`crate::engine::Engine`]), and [`serve`] drives it over
//! JSON lines on stdin/stdout so external front-ends can use it directly.
//!
//! ## Example
//!
//! ```
//! use chess_arena::protocol::{Request, Response};
//! use chess_arena::worker::Worker;
//!
//! let mut worker = Worker::new();
//! assert_eq!(worker.greeting(), Some(Response::Ready));
//! let reply = worker.handle(Request::BestMove {
//!     fen: "7k/5Q2/7K/8/8/8/8/8 b - - 0 1".into(),
//! });
//! assert!(matches!(reply, Some(Response::Error { .. })));
//! ```

use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use shakmaty::Chess;
use tracing::{debug, trace, warn};

use crate::constants::{MAX_SKILL, MIN_SKILL};
use crate::difficulty::{Difficulty, Preset};
use crate::protocol::{EngineError, Envelope, ErrorCode, Request, Response, SessionId};
use crate::rules::parse_fen;
use crate::selector::{select_move, RandomSource};

/// Worker state: current options plus bookkeeping.
pub struct Worker<R: RandomSource = fastrand::Rng> {
    preset: Preset,
    /// Last position a move was chosen for. Never authoritative.
    position: Chess,
    ready_sent: bool,
    rng: R,
}

impl Default for Worker {
    fn default() -> Self {
        Self::new()
    }
}

impl Worker {
    /// Create a worker with Casual options and an unseeded random source.
    pub fn new() -> Self {
        Self::with_rng(fastrand::Rng::new())
    }
}

impl<R: RandomSource> Worker<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            preset: Difficulty::default().preset(),
            position: Chess::default(),
            ready_sent: false,
            rng,
        }
    }

    pub fn preset(&self) -> Preset {
        self.preset
    }

    /// Last position handed to `bestmove`, or the start position after `newgame`.
    pub fn position(&self) -> &Chess {
        &self.position
    }

    /// Delay before a chosen move is sent back.
    pub fn think_time(&self) -> Duration {
        self.preset.think_time()
    }

    /// The `ready` announcement, produced only the first time this is called.
    pub fn greeting(&mut self) -> Option<Response> {
        if self.ready_sent {
            return None;
        }
        self.ready_sent = true;
        Some(Response::Ready)
    }

    /// Handle one request and return the reply, if the message has one.
    pub fn handle(&mut self, request: Request) -> Option<Response> {
        match request {
            Request::SetOptions {
                skill,
                depth,
                movetime,
            } => {
                if let Some(skill) = skill {
                    self.preset.skill = skill.clamp(MIN_SKILL, MAX_SKILL);
                }
                if let Some(depth) = depth {
                    self.preset.depth = depth;
                }
                if let Some(ms) = movetime {
                    self.preset.movetime = Duration::from_millis(ms);
                }
                debug!(preset = ?self.preset, "worker options updated");
                None
            }

            Request::NewGame => {
                self.position = Chess::default();
                None
            }

            Request::BestMove { fen } => Some(self.best_move(&fen)),
        }
    }

    fn best_move(&mut self, fen: &str) -> Response {
        let pos = match parse_fen(fen) {
            Ok(pos) => pos,
            Err(err) => {
                return EngineError::new(ErrorCode::InvalidFen, err.to_string()).into();
            }
        };

        let Some(chosen) = select_move(&pos, self.preset.skill, &mut self.rng) else {
            return EngineError::no_move().into();
        };
        trace!(
            san = %chosen.record.san,
            rank = chosen.rank,
            candidates = chosen.candidates,
            "move selected"
        );

        self.position = pos;
        Response::BestMove {
            from: chosen.record.from.to_string(),
            to: chosen.record.to.to_string(),
            san: chosen.record.san,
        }
    }
}

// =============================================================================
// Hosts
// =============================================================================

/// Drive a worker over channels until the request side disconnects.
///
/// `ready` is sent first. With `pacing` on, move replies are held back for
/// the configured think time.
pub fn run<R: RandomSource>(
    mut worker: Worker<R>,
    session: SessionId,
    requests: Receiver<Envelope<Request>>,
    responses: Sender<Envelope<Response>>,
    pacing: bool,
) {
    if let Some(ready) = worker.greeting() {
        if responses.send(Envelope::new(session, ready)).is_err() {
            return;
        }
    }

    for envelope in requests.iter() {
        let Some(reply) = worker.handle(envelope.message.clone()) else {
            continue;
        };
        if pacing && matches!(reply, Response::BestMove { .. }) {
            thread::sleep(worker.think_time());
        }
        if responses.send(envelope.reply(reply)).is_err() {
            break;
        }
    }
    debug!(session, "worker stopped");
}

/// Serve the worker protocol as JSON lines over stdin/stdout.
pub fn serve(pacing: bool) -> io::Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    serve_on(Worker::new(), stdin.lock(), stdout.lock(), pacing)
}

/// Serve the worker protocol over any line reader and writer.
pub fn serve_on<R: RandomSource>(
    mut worker: Worker<R>,
    input: impl BufRead,
    mut output: impl Write,
    pacing: bool,
) -> io::Result<()> {
    if let Some(ready) = worker.greeting() {
        write_line(&mut output, &Envelope::new(0, ready))?;
    }

    for line in input.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let envelope: Envelope<Request> = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(%err, "malformed request");
                let reply = Response::Error {
                    message: format!("malformed request: {err}"),
                    code: None,
                };
                write_line(&mut output, &Envelope::new(0, reply))?;
                continue;
            }
        };

        if let Some(reply) = worker.handle(envelope.message.clone()) {
            if pacing && matches!(reply, Response::BestMove { .. }) {
                thread::sleep(worker.think_time());
            }
            write_line(&mut output, &envelope.reply(reply))?;
        }
    }
    Ok(())
}

fn write_line(output: &mut impl Write, envelope: &Envelope<Response>) -> io::Result<()> {
    let line = serde_json::to_string(envelope).map_err(io::Error::other)?;
    writeln!(output, "{line}")?;
    output.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{START_FEN, StandardRules, Rules, parse_square};

    const STALEMATE_FEN: &str = "7k/5Q2/7K/8/8/8/8/8 b - - 0 1";

    #[test]
    fn test_ready_is_sent_once() {
        let mut worker = Worker::new();
        assert_eq!(worker.greeting(), Some(Response::Ready));
        assert_eq!(worker.greeting(), None);
    }

    #[test]
    fn test_newgame_and_setoptions_are_silent() {
        let mut worker = Worker::new();
        assert_eq!(worker.handle(Request::NewGame), None);
        let reply = worker.handle(Request::SetOptions {
            skill: Some(15),
            depth: Some(14),
            movetime: Some(800),
        });
        assert_eq!(reply, None);
        assert_eq!(worker.preset(), Difficulty::Hard.preset());
    }

    #[test]
    fn test_skill_is_clamped() {
        let mut worker = Worker::new();
        worker.handle(Request::SetOptions {
            skill: Some(99),
            depth: None,
            movetime: None,
        });
        assert_eq!(worker.preset().skill, MAX_SKILL);
    }

    #[test]
    fn test_bestmove_is_legal() {
        let mut worker = Worker::with_rng(fastrand::Rng::with_seed(5));
        let Some(Response::BestMove { from, to, san }) = worker.handle(Request::BestMove {
            fen: START_FEN.into(),
        }) else {
            panic!("expected a move");
        };

        let mut rules = StandardRules::new();
        let played = rules
            .play(parse_square(&from).unwrap(), parse_square(&to).unwrap(), None)
            .expect("worker move must be legal");
        assert_eq!(played.san, san);
    }

    #[test]
    fn test_no_move_and_invalid_fen() {
        let mut worker = Worker::new();
        let reply = worker.handle(Request::BestMove {
            fen: STALEMATE_FEN.into(),
        });
        assert!(matches!(
            reply,
            Some(Response::Error {
                code: Some(ErrorCode::NoMove),
                ..
            })
        ));

        let reply = worker.handle(Request::BestMove {
            fen: "rnbqkbnr/pppppppp w".into(),
        });
        assert!(matches!(
            reply,
            Some(Response::Error {
                code: Some(ErrorCode::InvalidFen),
                ..
            })
        ));
    }

    #[test]
    fn test_serve_on_json_lines() {
        let input = format!(
            "{}\n# comment\n{}\nnot json\n{}\n",
            r#"{"type":"setoptions","skill":20}"#,
            r#"{"type":"newgame"}"#,
            serde_json::json!({"session": 2, "id": 7, "type": "bestmove", "fen": STALEMATE_FEN}),
        );
        let mut output = Vec::new();
        serve_on(Worker::new(), input.as_bytes(), &mut output, false).unwrap();

        let lines: Vec<serde_json::Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["type"], "ready");
        assert_eq!(lines[1]["type"], "error");
        assert!(lines[1].get("code").is_none());
        assert_eq!(lines[2]["code"], "NO_MOVE");
        assert_eq!(lines[2]["session"], 2);
        assert_eq!(lines[2]["id"], 7);
    }

    #[test]
    fn test_run_over_channels() {
        let (req_tx, req_rx) = crossbeam_channel::unbounded();
        let (resp_tx, resp_rx) = crossbeam_channel::unbounded();
        let handle = thread::spawn(move || run(Worker::new(), 8, req_rx, resp_tx, false));

        assert_eq!(resp_rx.recv().unwrap(), Envelope::new(8, Response::Ready));
        req_tx
            .send(Envelope::with_id(
                8,
                1,
                Request::BestMove {
                    fen: START_FEN.into(),
                },
            ))
            .unwrap();
        let reply = resp_rx.recv().unwrap();
        assert_eq!((reply.session, reply.id), (8, Some(1)));
        assert!(matches!(reply.message, Response::BestMove { .. }));

        drop(req_tx);
        handle.join().unwrap();
    }
}
