//! Test doubles for the engine's background worker.

#![allow(dead_code)]

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use chess_arena::engine::{Spawn, WorkerLink};
use chess_arena::protocol::{Envelope, Request, Response, SessionId};
use chess_arena::worker::Worker;

pub const STALEMATE_FEN: &str = "7k/5Q2/7K/8/8/8/8/8 b - - 0 1";
pub const CHECKMATE_FEN: &str = "R5k1/5ppp/8/8/8/8/8/6K1 b - - 0 1";

const RECV_LIMIT: Duration = Duration::from_secs(5);

// =============================================================================
// Manual harness: the test plays the worker by hand
// =============================================================================

/// The worker side of one spawned session.
pub struct Harness {
    pub session: SessionId,
    pub requests: Receiver<Envelope<Request>>,
    pub responses: Sender<Envelope<Response>>,
}

impl Harness {
    pub fn ready(&self) {
        self.send(Envelope::new(self.session, Response::Ready));
    }

    pub fn send(&self, envelope: Envelope<Response>) {
        self.responses.send(envelope).expect("engine dispatcher gone");
    }

    pub fn reply(&self, request: &Envelope<Request>, response: Response) {
        self.send(request.reply(response));
    }

    pub fn recv(&self) -> Envelope<Request> {
        self.requests
            .recv_timeout(RECV_LIMIT)
            .expect("expected a request from the engine")
    }

    pub fn assert_quiet(&self) {
        let got = self.requests.recv_timeout(Duration::from_millis(50));
        assert!(got.is_err(), "unexpected request: {got:?}");
    }
}

pub fn move_reply(from: &str, to: &str, san: &str) -> Response {
    Response::BestMove {
        from: from.into(),
        to: to.into(),
        san: san.into(),
    }
}

/// Hands the worker ends of each spawned session to the test.
#[derive(Default)]
pub struct ManualSpawner {
    spawned: Mutex<Vec<Harness>>,
}

impl ManualSpawner {
    /// Worker side of the oldest session not yet taken.
    pub fn take(&self) -> Harness {
        let mut spawned = self.spawned.lock();
        assert!(!spawned.is_empty(), "no session was spawned");
        spawned.remove(0)
    }
}

impl Spawn for ManualSpawner {
    fn spawn(&self, session: SessionId) -> io::Result<WorkerLink> {
        let (req_tx, req_rx) = crossbeam_channel::unbounded();
        let (resp_tx, resp_rx) = crossbeam_channel::unbounded();
        self.spawned.lock().push(Harness {
            session,
            requests: req_rx,
            responses: resp_tx,
        });
        Ok(WorkerLink {
            requests: req_tx,
            responses: resp_rx,
        })
    }
}

// =============================================================================
// Scripted worker: a real worker whose move replies can be overridden
// =============================================================================

/// How the scripted worker answers `bestmove`.
#[derive(Debug, Clone)]
pub enum Script {
    /// Choose a real move.
    Play,
    /// Answer with this response instead.
    Answer(Response),
    /// Never answer.
    Silent,
}

#[derive(Clone)]
pub struct ScriptedSpawner {
    script: Arc<Mutex<Script>>,
    log: Arc<Mutex<Vec<Envelope<Request>>>>,
}

impl ScriptedSpawner {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock() = script;
    }

    /// Every request any spawned worker has received so far.
    pub fn log(&self) -> Vec<Envelope<Request>> {
        self.log.lock().clone()
    }
}

impl Spawn for ScriptedSpawner {
    fn spawn(&self, session: SessionId) -> io::Result<WorkerLink> {
        let (req_tx, req_rx) = crossbeam_channel::unbounded::<Envelope<Request>>();
        let (resp_tx, resp_rx) = crossbeam_channel::unbounded();
        let script = Arc::clone(&self.script);
        let log = Arc::clone(&self.log);

        thread::Builder::new()
            .name(format!("scripted-worker-{session}"))
            .spawn(move || {
                let mut worker = Worker::with_rng(fastrand::Rng::with_seed(session));
                if resp_tx.send(Envelope::new(session, Response::Ready)).is_err() {
                    return;
                }
                for envelope in req_rx.iter() {
                    log.lock().push(envelope.clone());
                    let reply = match (&envelope.message, script.lock().clone()) {
                        (Request::BestMove { .. }, Script::Answer(response)) => Some(response),
                        (Request::BestMove { .. }, Script::Silent) => None,
                        _ => worker.handle(envelope.message.clone()),
                    };
                    if let Some(reply) = reply {
                        if resp_tx.send(envelope.reply(reply)).is_err() {
                            break;
                        }
                    }
                }
            })?;

        Ok(WorkerLink {
            requests: req_tx,
            responses: resp_rx,
        })
    }
}
