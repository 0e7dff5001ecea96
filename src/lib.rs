//! Server-side core of a two-player checkers service (spec §1).
//!
//! The owner-task-per-connection loop and CLI live in `src/bin/server.rs`;
//! this crate exposes everything that loop needs: the wire codec, the
//! rules engine, the session/room/registry data model, the dispatcher, and
//! the heartbeat/reconnect controllers.

pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod logger;
pub mod reconnect;
pub mod registry;
pub mod room;
pub mod rules;
pub mod session;

use crate::codec::FrameReader;
use crate::config::Config;
use crate::error::CoreError;
use crate::logger::Logger;
use crate::registry::Registry;
use crate::session::Session;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

/// Process-wide registry handle, shared by every owner task and the
/// heartbeat task (spec §3 "Ownership").
pub type Shared = Arc<Registry>;

enum Event {
    Listening { addr: std::net::SocketAddr },
    Accepted { addr: std::net::SocketAddr },
    ConnectionClosed { addr: std::net::SocketAddr, reason: &'static str },
    Violation { addr: std::net::SocketAddr, reason: String },
    ShuttingDown,
    ShutdownSummary { sessions: usize, rooms: usize },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Listening { addr } => write!(f, "listening on {addr}"),
            Event::Accepted { addr } => write!(f, "accepted connection from {addr}"),
            Event::ConnectionClosed { addr, reason } => write!(f, "connection from {addr} closed: {reason}"),
            Event::Violation { addr, reason } => write!(f, "connection from {addr}: {reason}"),
            Event::ShuttingDown => write!(f, "shutting down, draining active sessions"),
            Event::ShutdownSummary { sessions, rooms } => {
                write!(f, "shutdown complete: {sessions} session(s), {rooms} room(s) still live at exit")
            }
        }
    }
}

/// Binds `bind_address:port` and serves it until `shutdown` fires. A thin
/// wrapper around [`serve`] for callers that don't need the bound address
/// (tests bind with port 0 and call [`serve`] directly to learn it).
pub async fn run_server(
    bind_address: &str,
    port: u16,
    config: Config,
    logger: Arc<Logger>,
    shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind((bind_address, port)).await?;
    serve(listener, config, logger, shutdown).await
}

/// Spawns the heartbeat task and serves `listener` until `shutdown` fires
/// (spec §5 "Cancellation"). Returns once the listener is closed and the
/// heartbeat task has exited.
pub async fn serve(
    listener: TcpListener,
    config: Config,
    logger: Arc<Logger>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let registry = Arc::new(Registry::new(config));
    logger.info(Event::Listening { addr: listener.local_addr()? });

    let heartbeat_registry = registry.clone();
    let heartbeat_logger = logger.clone();
    let heartbeat_shutdown = shutdown.clone();
    let heartbeat_task = tokio::spawn(async move {
        heartbeat::run(heartbeat_registry, heartbeat_logger, heartbeat_shutdown).await;
    });

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(_) => continue,
                };
                if !registry.try_acquire_connection().await {
                    logger.verbose(Event::ConnectionClosed { addr, reason: "server at max_clients capacity" });
                    continue;
                }
                logger.info(Event::Accepted { addr });
                let registry = registry.clone();
                let logger = logger.clone();
                tokio::spawn(async move {
                    serve_connection(registry.clone(), logger.clone(), stream, addr).await;
                    registry.release_connection();
                });
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    logger.info(Event::ShuttingDown);
                    break;
                }
            }
        }
    }

    let _ = heartbeat_task.await;
    let sessions_left = registry.session_names().await.len();
    let rooms_left = registry.list_rooms().await.len();
    logger.info(Event::ShutdownSummary { sessions: sessions_left, rooms: rooms_left });
    Ok(())
}

/// Owner task for one accepted transport (spec §2 "Control flow"): reads
/// framed lines, feeds them to the codec, asks the dispatcher to route the
/// decoded message, and writes replies back — first in the pre-login phase
/// (no registered [`Session`] yet), then, once `LOGIN`/`RECONNECT_REQUEST`
/// succeeds, against the established session.
async fn serve_connection(registry: Shared, logger: Arc<Logger>, stream: TcpStream, addr: std::net::SocketAddr) {
    let (max_frame, connect_deadline) = {
        let config = registry.config.read().await;
        (config.max_frame, config.connect_deadline())
    };
    let (mut reader_half, mut writer_half) = stream.into_split();
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<String>();

    let writer_task = tokio::spawn(async move {
        while let Some(line) = outbox_rx.recv().await {
            if writer_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut frame_reader = FrameReader::new(max_frame);
    let mut buf = [0u8; 4096];
    let mut session: Option<Arc<Session>> = None;
    // Cleared once LOGIN/RECONNECT_REQUEST succeeds; a transport that never
    // gets past the pre-login phase within this window is dropped (spec §5
    // "Timeouts").
    let mut login_deadline = Some(tokio::time::Instant::now() + connect_deadline);

    let close_reason: &'static str = loop {
        let read_result = match login_deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, reader_half.read(&mut buf)).await {
                Ok(result) => result,
                Err(_) => break "connect deadline exceeded",
            },
            None => reader_half.read(&mut buf).await,
        };
        let n = match read_result {
            Ok(0) => break "eof",
            Ok(n) => n,
            Err(_) => break "read error",
        };

        match frame_reader.push(&buf[..n]) {
            Ok(None) => continue,
            Ok(Some(line)) => {
                if !process_line(&registry, &logger, &outbox_tx, &mut session, &line, addr).await {
                    break "force closed";
                }
                if session.is_some() {
                    login_deadline = None;
                }
            }
            Err(_) => break "buffer overflow",
        }
    };

    if let Some(session) = &session {
        let was_connected = {
            let mut state = session.state.lock().await;
            if state.conn == session::ConnectionState::Connected {
                state.conn = session::ConnectionState::Disconnected;
                state.disconnect_time = Some(std::time::Instant::now());
                true
            } else {
                false
            }
        };
        if was_connected {
            heartbeat::escalate_disconnect(&registry, &logger, session).await;
        }
    }
    logger.verbose(Event::ConnectionClosed { addr, reason: close_reason });
    drop(outbox_tx);
    let _ = writer_task.await;
}

/// Parses and dispatches one logical line. Returns `false` when the session
/// crossed its violation threshold and the transport should be closed.
async fn process_line(
    registry: &Shared,
    logger: &Logger,
    outbox: &mpsc::UnboundedSender<String>,
    session: &mut Option<Arc<Session>>,
    line: &str,
    addr: std::net::SocketAddr,
) -> bool {
    let frame = match codec::parse(line) {
        Ok(frame) => frame,
        Err(reason) => return !charge_violation_and_maybe_close(registry, logger, &*session, outbox, reason, addr).await,
    };

    let result = match session.clone() {
        Some(existing) => dispatcher::dispatch(registry, logger, &existing, frame).await,
        None => match dispatcher::dispatch_pre_login(registry, logger, frame, outbox).await {
            Ok(dispatcher::PreLoginOutcome::Continue) => Ok(()),
            Ok(dispatcher::PreLoginOutcome::LoggedIn(new_session))
            | Ok(dispatcher::PreLoginOutcome::Reconnected(new_session)) => {
                *session = Some(new_session);
                Ok(())
            }
            Err(err) => Err(err),
        },
    };

    match result {
        Ok(()) => true,
        Err(CoreError::ProtocolViolation(reason)) => {
            !charge_violation_and_maybe_close(registry, logger, &*session, outbox, reason, addr).await
        }
        // RECONNECT_FAIL was already sent; spec requires the transport itself
        // be dropped, without touching the session the reconnect attempt
        // failed to rebind onto.
        Err(CoreError::ReconnectFailed(_)) => false,
        Err(_) => true, // InvalidMove/RoomError/AuthError/etc.: already replied, never fatal
    }
}

/// Increments the session's (or, pre-login, a throwaway) violation counter
/// and reports the reason; returns `true` once the threshold is crossed and
/// the caller should close the transport (spec §4.3 "Violation accounting").
async fn charge_violation_and_maybe_close(
    registry: &Shared,
    logger: &Logger,
    session: &Option<Arc<Session>>,
    outbox: &mpsc::UnboundedSender<String>,
    reason: error::ViolationReason,
    addr: std::net::SocketAddr,
) -> bool {
    logger.verbose(Event::Violation { addr, reason: reason.to_string() });
    let is_codec_reason = !matches!(reason, error::ViolationReason::PhaseRejected);
    let config = registry.config.read().await;
    let limit = if is_codec_reason { config.violation_limit_codec } else { config.violation_limit_phase };
    drop(config);

    let count = match session {
        Some(session) => {
            let mut state = session.state.lock().await;
            let now = std::time::Instant::now();
            if is_codec_reason { state.codec_violations.record(now) } else { state.phase_violations.record(now) }
        }
        None => 1, // no session yet: a single pre-login violation always closes
    };

    let line = codec::serialize(codec::OpCode::Error, &reason.to_string()).unwrap_or_default();
    let _ = outbox.send(line);

    if count >= limit {
        if let Some(session) = session {
            session.state.lock().await.conn = session::ConnectionState::Removed;
            registry.remove_session(&session.name).await;
        }
        true
    } else {
        false
    }
}

/// Drops every session whose login name is free for re-use and every
/// finished room, intended to be run periodically or on a milestone such as
/// shutdown (spec §3 Session invariants, supplemented feature "Graceful
/// LOGIN re-use").
pub async fn sweep(registry: &Registry) -> (usize, usize) {
    let removed_rooms = registry.sweep_finished_rooms().await.len();
    let mut removed_sessions = 0usize;
    for name in registry.session_names().await {
        if let Some(session) = registry.get_session(&name).await {
            let conn = session.state.lock().await.conn;
            if conn == session::ConnectionState::TimedOut || conn == session::ConnectionState::Removed {
                registry.remove_session(&name).await;
                removed_sessions += 1;
            }
        }
    }
    (removed_sessions, removed_rooms)
}
