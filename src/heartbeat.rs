//! Heartbeat and disconnect controller (spec §4.6).
//!
//! One periodic task scans every session in the registry: sends `PING` to
//! anything `connected`, escalates missed pongs or a stale `last_pong` into
//! `disconnected` (pausing the session's room if it was active), and turns
//! a `disconnected` session into `timed_out` once the long-disconnect
//! threshold passes, forfeiting its room to the surviving peer. Shaped
//! after the teacher's periodic `cleanup_dead_rooms` watchdog task, scaled
//! from "remove dead rooms" up to the full pause/forfeit state machine.

use crate::codec::OpCode;
use crate::config::Config;
use crate::logger::Logger;
use crate::registry::Registry;
use crate::room::RoomState;
use crate::session::{ConnectionState, Phase, Session};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;

enum Event {
    Pinged { count: usize },
    Disconnected { player: String },
    Paused { room: String, player: String },
    Resumed { room: String },
    TimedOut { player: String },
    Forfeited { room: String, winner: String },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Pinged { count } => write!(f, "pinged {count} connected session(s)"),
            Event::Disconnected { player } => write!(f, "{player} marked disconnected"),
            Event::Paused { room, player } => write!(f, "room {room} paused ({player} disconnected)"),
            Event::Resumed { room } => write!(f, "room {room} auto-resumed"),
            Event::TimedOut { player } => write!(f, "{player} timed out (long disconnect)"),
            Event::Forfeited { room, winner } => write!(f, "room {room} forfeited to {winner}"),
        }
    }
}

fn send(outbox: &UnboundedSender<String>, op: OpCode, data: &str) {
    if let Ok(line) = crate::codec::serialize(op, data) {
        let _ = outbox.send(line);
    }
}

async fn reply(session: &Session, op: OpCode, data: &str) {
    if let Ok(line) = crate::codec::serialize(op, data) {
        session.send_line(line).await;
    }
}

/// Runs the periodic sweep loop until cancelled (spec §5 "Cancellation").
/// Intended to be spawned once as its own task alongside the accept loop.
pub async fn run(registry: Arc<Registry>, logger: Arc<Logger>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let ping_interval = registry.config.read().await.ping_interval();
    let mut ticker = tokio::time::interval(ping_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep(&registry, &logger).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

/// One pass over every known session: ping the live ones, escalate the
/// overdue ones. Exposed separately from [`run`] so tests can drive it
/// deterministically instead of waiting on real timers.
pub async fn sweep(registry: &Registry, logger: &Logger) {
    let config = registry.config.read().await.clone();
    let names = registry.session_names().await;
    let mut pinged = 0usize;

    for name in names {
        let Some(session) = registry.get_session(&name).await else { continue };
        process_session(registry, logger, &config, &session, &mut pinged).await;
    }

    if pinged > 0 {
        logger.trace(Event::Pinged { count: pinged });
    }
}

async fn process_session(
    registry: &Registry,
    logger: &Logger,
    config: &Config,
    session: &Arc<Session>,
    pinged: &mut usize,
) {
    let now = Instant::now();
    let action = {
        let mut state = session.state.lock().await;
        match state.conn {
            ConnectionState::Connected => {
                if now.duration_since(state.last_pong) > config.connection_timeout() {
                    state.conn = ConnectionState::Disconnected;
                    state.disconnect_time = Some(now);
                    Action::Escalate
                } else if state.waiting_for_pong {
                    state.missed_pongs += 1;
                    if state.missed_pongs >= config.missed_pong_threshold {
                        state.conn = ConnectionState::Disconnected;
                        state.disconnect_time = Some(now);
                        Action::Escalate
                    } else {
                        state.waiting_for_pong = false;
                        send(&state.outbox, OpCode::Ping, "");
                        state.waiting_for_pong = true;
                        Action::Pinged
                    }
                } else {
                    send(&state.outbox, OpCode::Ping, "");
                    state.waiting_for_pong = true;
                    Action::Pinged
                }
            }
            ConnectionState::Disconnected => {
                let elapsed = state.disconnect_time.map(|t| now.duration_since(t)).unwrap_or_default();
                if elapsed > config.long_disconnect() {
                    state.conn = ConnectionState::TimedOut;
                    Action::TimedOut
                } else {
                    Action::None
                }
            }
            _ => Action::None,
        }
    };

    match action {
        Action::Pinged => *pinged += 1,
        Action::None => {}
        Action::Escalate => escalate_disconnect(registry, logger, session).await,
        Action::TimedOut => forfeit(registry, logger, session).await,
    }
}

enum Action {
    Pinged,
    Escalate,
    TimedOut,
    None,
}

/// A session just crossed into `disconnected`; if it held a slot in an
/// active room, pause the room and notify the surviving peer (spec §4.6
/// "Escalation"). Called both from the periodic sweep (missed-pong/stale
/// escalation) and directly from the connection's read loop when the
/// transport closes cleanly, so both paths notify the peer the same way.
pub(crate) async fn escalate_disconnect(registry: &Registry, logger: &Logger, session: &Arc<Session>) {
    logger.info(Event::Disconnected { player: session.name.clone() });
    let Some(room_name) = session.state.lock().await.current_room.clone() else {
        return;
    };

    let opponent = registry
        .with_room(&room_name, |r| {
            if r.state != RoomState::Active {
                return None;
            }
            r.pause(&session.name).ok()?;
            r.opponent_of(&session.name).map(str::to_string)
        })
        .await
        .flatten();

    let Some(opponent_name) = opponent else {
        return;
    };
    logger.info(Event::Paused { room: room_name.clone(), player: session.name.clone() });
    if let Some(peer) = registry.get_session(&opponent_name).await {
        reply(&peer, OpCode::PlayerDisconnected, &format!("{room_name},{}", session.name)).await;
        reply(&peer, OpCode::GamePaused, &room_name).await;
    }
}

/// A session's long-disconnect window expired: it becomes `timed_out`, its
/// room (if any) is finished with the surviving peer as winner, and the
/// session is scheduled for removal (spec §4.6 "Timeout").
async fn forfeit(registry: &Registry, logger: &Logger, session: &Arc<Session>) {
    logger.info(Event::TimedOut { player: session.name.clone() });
    let room_name = session.state.lock().await.current_room.clone();

    if let Some(room_name) = room_name {
        let winner = registry
            .with_room(&room_name, |r| {
                let winner = r.opponent_of(&session.name).map(str::to_string);
                r.finish();
                winner
            })
            .await
            .flatten();

        if let Some(winner_name) = winner {
            logger.info(Event::Forfeited { room: room_name.clone(), winner: winner_name.clone() });
            if let Some(winner_session) = registry.get_session(&winner_name).await {
                reply(&winner_session, OpCode::GameEnd, &format!("{winner_name},opponent_timeout")).await;
                let mut state = winner_session.state.lock().await;
                state.phase = Phase::InLobby;
                state.current_room = None;
            }
        }
    }

    registry.remove_session(&session.name).await;
}
