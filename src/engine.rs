//! Engine sessions: an asynchronous `bestmove` front for a background worker.
//!
//! An [`Engine`] is one session bound to one difficulty and one variant. It
//! goes through `AwaitingReady -> Ready -> (Busy -> Ready)* -> Disposed`:
//!
//! - Requests made before the worker says `ready` are held back; on `ready`
//!   the session first sends `setoptions`, then the held requests.
//! - At most one `bestmove` is outstanding. A second call fails at once with
//!   `IN_PROGRESS` and leaves the first untouched.
//! - `new_game` and disposal reject the outstanding call with `CANCELLED`.
//! - Replies are matched by session and request id. Anything else is stale
//!   and dropped.
//! - Every call is bounded by the preset's think time plus a grace period
//!   and fails with `TIMEOUT` past it, freeing the slot.
//!
//! When no worker thread can be started the session runs in fallback mode:
//! a uniformly random legal move is chosen inline, with the same error codes.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use shakmaty::Square;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::difficulty::Difficulty;
use crate::protocol::{
    EngineError, Envelope, ErrorCode, Request, RequestId, Response, SessionId,
};
use crate::rules::{parse_fen, parse_square, Variant};
use crate::selector::select_uniform;
use crate::worker::{self, Worker};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// A move chosen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineMove {
    pub from: Square,
    pub to: Square,
    pub san: String,
}

/// Future returned by [`Engine::best_move`].
pub type MoveFuture = Pin<Box<dyn Future<Output = Result<EngineMove, EngineError>> + Send>>;

/// Observable lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingReady,
    Ready,
    Busy,
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingReady,
    Ready,
    Disposed,
}

// =============================================================================
// Spawning background workers
// =============================================================================

/// Both ends of a freshly spawned worker, seen from the engine.
pub struct WorkerLink {
    pub requests: Sender<Envelope<Request>>,
    pub responses: Receiver<Envelope<Response>>,
}

/// Starts the background execution context for a session.
pub trait Spawn: Send + Sync {
    fn spawn(&self, session: SessionId) -> io::Result<WorkerLink>;
}

/// Runs each worker on its own OS thread.
#[derive(Debug, Clone, Copy)]
pub struct ThreadSpawner {
    /// Hold move replies back for the preset's think time.
    pub pacing: bool,
}

impl Default for ThreadSpawner {
    fn default() -> Self {
        Self { pacing: true }
    }
}

impl Spawn for ThreadSpawner {
    fn spawn(&self, session: SessionId) -> io::Result<WorkerLink> {
        let (req_tx, req_rx) = crossbeam_channel::unbounded();
        let (resp_tx, resp_rx) = crossbeam_channel::unbounded();
        let pacing = self.pacing;
        thread::Builder::new()
            .name(format!("engine-worker-{session}"))
            .spawn(move || worker::run(Worker::new(), session, req_rx, resp_tx, pacing))?;
        Ok(WorkerLink {
            requests: req_tx,
            responses: resp_rx,
        })
    }
}

/// A spawner for environments without background threads. Every session it
/// backs runs in fallback mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoThreads;

impl Spawn for NoThreads {
    fn spawn(&self, _session: SessionId) -> io::Result<WorkerLink> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "background threads are not available",
        ))
    }
}

// =============================================================================
// Session plumbing
// =============================================================================

struct Pending {
    id: RequestId,
    reply: oneshot::Sender<Result<EngineMove, EngineError>>,
}

struct Link {
    phase: Phase,
    requests: Option<Sender<Envelope<Request>>>,
    /// Requests waiting for `ready`.
    backlog: Vec<Envelope<Request>>,
    pending: Option<Pending>,
    next_id: RequestId,
}

/// State shared between the engine handle and its response dispatcher.
struct Channel {
    session: SessionId,
    options: Request,
    link: Mutex<Link>,
    phase: watch::Sender<Phase>,
}

impl Channel {
    fn set_phase(&self, link: &mut Link, phase: Phase) {
        link.phase = phase;
        self.phase.send_replace(phase);
    }

    /// Send now, or queue until the worker is ready.
    fn post(&self, link: &mut Link, envelope: Envelope<Request>) -> Result<(), EngineError> {
        match link.phase {
            Phase::AwaitingReady => {
                link.backlog.push(envelope);
                Ok(())
            }
            Phase::Ready => {
                let Some(requests) = &link.requests else {
                    return Err(EngineError::transport("engine worker is gone"));
                };
                requests
                    .send(envelope)
                    .map_err(|_| EngineError::transport("engine worker is gone"))
            }
            Phase::Disposed => Err(EngineError::cancelled("engine session disposed")),
        }
    }

    /// Reserve the single request slot and post the request.
    fn begin(
        &self,
        fen: String,
    ) -> Result<(RequestId, oneshot::Receiver<Result<EngineMove, EngineError>>), EngineError> {
        let mut link = self.link.lock();
        if link.phase == Phase::Disposed {
            return Err(EngineError::cancelled("engine session disposed"));
        }
        if link.pending.is_some() {
            return Err(EngineError::in_progress());
        }

        let id = link.next_id;
        link.next_id += 1;
        self.post(
            &mut link,
            Envelope::with_id(self.session, id, Request::BestMove { fen }),
        )?;

        let (tx, rx) = oneshot::channel();
        link.pending = Some(Pending { id, reply: tx });
        debug!(session = self.session, id, "bestmove posted");
        Ok((id, rx))
    }

    /// Free the slot held by `id`, if it still holds it.
    fn abandon(&self, id: RequestId) {
        let mut link = self.link.lock();
        if link.pending.as_ref().is_some_and(|p| p.id == id) {
            link.pending = None;
            debug!(session = self.session, id, "bestmove abandoned");
        }
        link.backlog.retain(|e| e.id != Some(id));
    }

    /// Reject the outstanding request, if any.
    fn cancel_pending(&self, link: &mut Link, reason: &str) {
        link.backlog
            .retain(|e| !matches!(e.message, Request::BestMove { .. }));
        if let Some(pending) = link.pending.take() {
            debug!(session = self.session, id = pending.id, reason, "bestmove cancelled");
            let _ = pending.reply.send(Err(EngineError::cancelled(reason)));
        }
    }

    fn on_ready(&self) {
        let mut link = self.link.lock();
        if link.phase != Phase::AwaitingReady {
            debug!(session = self.session, "ignoring repeated ready");
            return;
        }
        self.set_phase(&mut link, Phase::Ready);
        info!(session = self.session, "engine ready");

        let mut outgoing = Vec::with_capacity(link.backlog.len() + 1);
        outgoing.push(Envelope::new(self.session, self.options.clone()));
        outgoing.append(&mut link.backlog);
        for envelope in outgoing {
            if let Err(err) = self.post(&mut link, envelope) {
                warn!(session = self.session, %err, "failed to flush request");
                self.fail_pending(&mut link, err);
                break;
            }
        }
    }

    fn settle(&self, id: Option<RequestId>, outcome: Result<EngineMove, EngineError>) {
        let mut link = self.link.lock();
        match link.pending.take() {
            Some(pending) if Some(pending.id) == id => {
                debug!(session = self.session, id = pending.id, ok = outcome.is_ok(), "bestmove settled");
                let _ = pending.reply.send(outcome);
            }
            other => {
                link.pending = other;
                debug!(session = self.session, ?id, "dropping stale response");
            }
        }
    }

    fn fail_pending(&self, link: &mut Link, err: EngineError) {
        if let Some(pending) = link.pending.take() {
            let _ = pending.reply.send(Err(err));
        }
    }

    fn on_disconnect(&self) {
        let mut link = self.link.lock();
        if link.phase == Phase::Disposed {
            return;
        }
        warn!(session = self.session, "engine worker terminated");
        self.fail_pending(&mut link, EngineError::transport("engine worker terminated"));
        link.requests = None;
        link.backlog.clear();
        self.set_phase(&mut link, Phase::Disposed);
    }

    fn dispose(&self) {
        let mut link = self.link.lock();
        if link.phase == Phase::Disposed {
            return;
        }
        self.cancel_pending(&mut link, "engine session disposed");
        link.backlog.clear();
        // Dropping the sender stops the worker loop.
        link.requests = None;
        self.set_phase(&mut link, Phase::Disposed);
        info!(session = self.session, "engine session disposed");
    }
}

/// Route worker responses to the outstanding request.
fn dispatch(channel: Arc<Channel>, responses: Receiver<Envelope<Response>>) {
    for envelope in responses.iter() {
        if envelope.session != channel.session {
            debug!(
                session = channel.session,
                from = envelope.session,
                "dropping response from another session"
            );
            continue;
        }
        match envelope.message {
            Response::Ready => channel.on_ready(),
            Response::BestMove { from, to, san } => {
                let outcome = match (parse_square(&from), parse_square(&to)) {
                    (Ok(from), Ok(to)) => Ok(EngineMove { from, to, san }),
                    _ => Err(EngineError::transport(format!(
                        "malformed move reply {from}{to}"
                    ))),
                };
                channel.settle(envelope.id, outcome);
            }
            Response::Error { message, code } => {
                let err = EngineError::new(code.unwrap_or(ErrorCode::Other), message);
                channel.settle(envelope.id, Err(err));
            }
        }
    }
    channel.on_disconnect();
}

/// Frees the request slot if the request future is dropped early.
struct SlotGuard {
    channel: Arc<Channel>,
    id: RequestId,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.channel.abandon(self.id);
    }
}

/// Fallback session state: the selector runs on the caller's task.
struct Inline {
    rng: Mutex<fastrand::Rng>,
    disposed: AtomicBool,
}

enum Backend {
    Worker(Arc<Channel>),
    Inline(Inline),
}

// =============================================================================
// Engine
// =============================================================================

/// One engine session.
pub struct Engine {
    session: SessionId,
    difficulty: Difficulty,
    variant: Variant,
    request_timeout: Duration,
    backend: Backend,
    phase: watch::Receiver<Phase>,
}

impl Engine {
    /// Start a session on a worker thread, falling back to inline mode if the
    /// thread cannot be started.
    pub fn new(difficulty: Difficulty, variant: Variant) -> Self {
        Self::spawn_with(difficulty, variant, &ThreadSpawner::default())
    }

    /// Start a session using `spawner` for the background context.
    pub fn spawn_with(difficulty: Difficulty, variant: Variant, spawner: &dyn Spawn) -> Self {
        let session = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
        let preset = difficulty.preset();
        let request_timeout = preset.request_timeout();

        let backend = match spawner.spawn(session).and_then(|link| start_dispatch(session, difficulty, link)) {
            Ok(channel) => {
                info!(session, %difficulty, %variant, "engine session created");
                Backend::Worker(channel)
            }
            Err(err) => {
                warn!(session, %err, "no background worker, using inline fallback");
                Backend::Inline(Inline {
                    rng: Mutex::new(fastrand::Rng::new()),
                    disposed: AtomicBool::new(false),
                })
            }
        };

        let phase = match &backend {
            Backend::Worker(channel) => channel.phase.subscribe(),
            Backend::Inline(_) => watch::channel(Phase::Ready).1,
        };

        Self {
            session,
            difficulty,
            variant,
            request_timeout,
            backend,
            phase,
        }
    }

    /// Override the per-request deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Whether this session runs the selector inline instead of on a worker.
    pub fn is_fallback(&self) -> bool {
        matches!(self.backend, Backend::Inline(_))
    }

    pub fn state(&self) -> SessionState {
        match &self.backend {
            Backend::Inline(inline) if inline.disposed.load(Ordering::Acquire) => {
                SessionState::Disposed
            }
            Backend::Inline(_) => SessionState::Ready,
            Backend::Worker(channel) => {
                let link = channel.link.lock();
                match (link.phase, link.pending.is_some()) {
                    (Phase::Disposed, _) => SessionState::Disposed,
                    (Phase::AwaitingReady, _) => SessionState::AwaitingReady,
                    (Phase::Ready, true) => SessionState::Busy,
                    (Phase::Ready, false) => SessionState::Ready,
                }
            }
        }
    }

    /// Wait for the worker's `ready`. Fails with `CANCELLED` if the session
    /// is disposed first.
    pub async fn ready(&self) -> Result<(), EngineError> {
        if let Backend::Inline(inline) = &self.backend {
            if inline.disposed.load(Ordering::Acquire) {
                return Err(EngineError::cancelled("engine session disposed"));
            }
            return Ok(());
        }
        let mut phase = self.phase.clone();
        let reached = *phase
            .wait_for(|p| *p != Phase::AwaitingReady)
            .await
            .map_err(|_| EngineError::cancelled("engine session disposed"))?;
        match reached {
            Phase::Disposed => Err(EngineError::cancelled("engine session disposed")),
            _ => Ok(()),
        }
    }

    /// Ask for a move in `fen`.
    ///
    /// The request slot is claimed synchronously: a call made while another
    /// is pending returns a future that fails with `IN_PROGRESS` straight away.
    pub fn best_move(&self, fen: impl Into<String>) -> MoveFuture {
        let fen = fen.into();
        let channel = match &self.backend {
            Backend::Worker(channel) => Arc::clone(channel),
            Backend::Inline(inline) => {
                let outcome = if inline.disposed.load(Ordering::Acquire) {
                    Err(EngineError::cancelled("engine session disposed"))
                } else {
                    inline_best_move(&fen, &mut inline.rng.lock())
                };
                return Box::pin(async move { outcome });
            }
        };

        let begun = channel.begin(fen);
        let guard = begun.as_ref().ok().map(|(id, _)| SlotGuard {
            channel: Arc::clone(&channel),
            id: *id,
        });
        let timeout = self.request_timeout;
        let session = self.session;

        Box::pin(async move {
            let _guard = guard;
            let (id, reply) = begun?;
            match tokio::time::timeout(timeout, reply).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => Err(EngineError::transport("engine dropped the request")),
                Err(_) => {
                    warn!(session, id, ?timeout, "bestmove timed out");
                    channel.abandon(id);
                    Err(EngineError::new(
                        ErrorCode::Timeout,
                        format!("no reply within {timeout:?}"),
                    ))
                }
            }
        })
    }

    /// Start a new game: cancel the outstanding request and tell the worker
    /// to reset its bookkeeping.
    pub fn new_game(&self) {
        let Backend::Worker(channel) = &self.backend else {
            return;
        };
        let mut link = channel.link.lock();
        channel.cancel_pending(&mut link, "new game started");
        if let Err(err) = channel.post(&mut link, Envelope::new(self.session, Request::NewGame)) {
            debug!(session = self.session, %err, "newgame not delivered");
        }
    }

    /// Tear the session down. Idempotent; also runs on drop.
    pub fn dispose(&self) {
        match &self.backend {
            Backend::Worker(channel) => channel.dispose(),
            Backend::Inline(inline) => inline.disposed.store(true, Ordering::Release),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn start_dispatch(
    session: SessionId,
    difficulty: Difficulty,
    link: WorkerLink,
) -> io::Result<Arc<Channel>> {
    let preset = difficulty.preset();
    let options = Request::SetOptions {
        skill: Some(preset.skill),
        depth: Some(preset.depth),
        movetime: Some(preset.movetime.as_millis() as u64),
    };
    let (phase, _) = watch::channel(Phase::AwaitingReady);
    let channel = Arc::new(Channel {
        session,
        options,
        link: Mutex::new(Link {
            phase: Phase::AwaitingReady,
            requests: Some(link.requests),
            backlog: Vec::new(),
            pending: None,
            next_id: 1,
        }),
        phase,
    });

    let dispatcher = Arc::clone(&channel);
    let responses = link.responses;
    thread::Builder::new()
        .name(format!("engine-dispatch-{session}"))
        .spawn(move || dispatch(dispatcher, responses))?;
    Ok(channel)
}

fn inline_best_move(fen: &str, rng: &mut fastrand::Rng) -> Result<EngineMove, EngineError> {
    let pos = parse_fen(fen).map_err(|e| EngineError::new(ErrorCode::InvalidFen, e.to_string()))?;
    let chosen = select_uniform(&pos, rng).ok_or_else(EngineError::no_move)?;
    Ok(EngineMove {
        from: chosen.record.from,
        to: chosen.record.to,
        san: chosen.record.san,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::START_FEN;

    #[tokio::test]
    async fn test_fallback_mode_contract() {
        let engine = Engine::spawn_with(Difficulty::Insane, Variant::Standard, &NoThreads);
        assert!(engine.is_fallback());
        engine.ready().await.unwrap();
        assert_eq!(engine.state(), SessionState::Ready);

        let mv = engine.best_move(START_FEN).await.unwrap();
        assert!(!mv.san.is_empty());

        let err = engine
            .best_move("7k/5Q2/7K/8/8/8/8/8 b - - 0 1")
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NoMove);

        let err = engine.best_move("garbage").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFen);
    }

    #[tokio::test]
    async fn test_disposed_fallback_session_rejects_calls() {
        let engine = Engine::spawn_with(Difficulty::Casual, Variant::Standard, &NoThreads);
        engine.dispose();
        assert_eq!(engine.state(), SessionState::Disposed);

        let err = engine.best_move(START_FEN).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Cancelled);
        assert_eq!(engine.ready().await.unwrap_err().code, ErrorCode::Cancelled);

        // Idempotent.
        engine.dispose();
        assert_eq!(engine.state(), SessionState::Disposed);
    }

    #[tokio::test]
    async fn test_thread_session_lifecycle() {
        let engine = Engine::spawn_with(
            Difficulty::Beginner,
            Variant::Standard,
            &ThreadSpawner { pacing: false },
        );
        assert!(!engine.is_fallback());
        engine.ready().await.unwrap();

        let mv = engine.best_move(START_FEN).await.unwrap();
        assert_ne!(mv.from, mv.to);
        assert_eq!(engine.state(), SessionState::Ready);

        engine.dispose();
        assert_eq!(engine.state(), SessionState::Disposed);
        let err = engine.best_move(START_FEN).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Cancelled);
        assert!(engine.ready().await.is_err());
    }

    #[test]
    fn test_sessions_are_distinct() {
        let a = Engine::spawn_with(Difficulty::Casual, Variant::Standard, &NoThreads);
        let b = Engine::spawn_with(Difficulty::Casual, Variant::Standard, &NoThreads);
        assert_ne!(a.session(), b.session());
    }
}
