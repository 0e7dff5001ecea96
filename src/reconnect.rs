//! Reconnect controller (spec §4.7).
//!
//! A freshly accepted transport that hasn't logged in yet may claim an
//! existing `disconnected` session by name instead of sending `LOGIN`.
//! Concurrent claims against the same session are serialized by its
//! `identity_lock` (held across the whole validate-and-swap sequence) so
//! exactly one attempt wins; later callers observe the session already
//! `connected` and fail.

use crate::codec::OpCode;
use crate::error::{CoreError, CoreResult};
use crate::logger::Logger;
use crate::registry::Registry;
use crate::room::RoomState;
use crate::session::{ConnectionState, Session};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;

enum Event {
    Resumed { player: String, room: Option<String> },
    Rejected { player: String, reason: &'static str },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Resumed { player, room: Some(room) } => write!(f, "{player} reconnected into room {room}"),
            Event::Resumed { player, room: None } => write!(f, "{player} reconnected"),
            Event::Rejected { player, reason } => write!(f, "reconnect rejected for {player}: {reason}"),
        }
    }
}

/// Parses `player` or `room,player` (spec §6 `RECONNECT_REQUEST` payload).
fn parse_payload(data: &str) -> Option<(Option<&str>, &str)> {
    let fields: Vec<&str> = data.split(',').collect();
    match fields.as_slice() {
        [player] if !player.is_empty() => Some((None, player)),
        [room, player] if !room.is_empty() && !player.is_empty() => Some((Some(room), player)),
        _ => None,
    }
}

async fn reply(session: &Session, op: OpCode, data: &str) {
    if let Ok(line) = crate::codec::serialize(op, data) {
        session.send_line(line).await;
    }
}

/// Attempts to rebind `new_outbox` onto the session named in `data`.
/// Returns the resumed session on success — the caller (dispatcher) treats
/// it as this transport's identity from here on, inheriting its phase
/// (spec §4.7 "the new connection inherits the session's phase").
///
/// The `CoreError` returned on failure is used only for its `wire_reason`
/// text (sent back as `RECONNECT_FAIL`); none of these rejections are the
/// fatal kind of internal error spec §7 describes for `Internal`. The
/// dispatcher still wraps every failure in `CoreError::ReconnectFailed`
/// before propagating it, so the transport is dropped even though the
/// rejection itself isn't treated as an internal-error condition.
pub async fn attempt(
    registry: &Registry,
    logger: &Logger,
    data: &str,
    new_outbox: UnboundedSender<String>,
) -> CoreResult<Arc<Session>> {
    let Some((claimed_room, player)) = parse_payload(data) else {
        return Err(CoreError::Internal("malformed reconnect payload"));
    };

    let Some(session) = registry.get_session(player).await else {
        logger.verbose(Event::Rejected { player: player.to_string(), reason: "no such session" });
        return Err(CoreError::Internal("no such session"));
    };

    let _identity_guard = session.identity_lock.lock().await;

    let long_disconnect = registry.config.read().await.long_disconnect();
    {
        let state = session.state.lock().await;
        if state.conn != ConnectionState::Disconnected {
            logger.verbose(Event::Rejected { player: player.to_string(), reason: "not disconnected" });
            return Err(CoreError::Internal("session is not disconnected"));
        }
        let elapsed = state.disconnect_time.map(|t| t.elapsed()).unwrap_or_default();
        if elapsed > long_disconnect {
            logger.verbose(Event::Rejected { player: player.to_string(), reason: "reconnect window expired" });
            return Err(CoreError::Internal("reconnect window expired"));
        }
    }

    if let Some(room_name) = claimed_room {
        let holds_player = registry.with_room(room_name, |r| r.contains(player)).await.unwrap_or(false);
        if !holds_player {
            logger.verbose(Event::Rejected { player: player.to_string(), reason: "room does not hold this player" });
            return Err(CoreError::Internal("claimed room does not hold this player"));
        }
    }

    let resumed_room = {
        let mut state = session.state.lock().await;
        state.outbox = new_outbox;
        state.conn = ConnectionState::Connected;
        state.missed_pongs = 0;
        state.waiting_for_pong = false;
        state.disconnect_time = None;
        state.last_pong = Instant::now();
        state.current_room.clone()
    };

    reply(&session, OpCode::ReconnectOk, resumed_room.as_deref().unwrap_or("")).await;

    if let Some(room_name) = &resumed_room {
        let opponent = registry
            .with_room(room_name, |r| {
                if r.state != RoomState::Paused {
                    return None;
                }
                r.resume().ok()?;
                Some(r.opponent_of(player).map(str::to_string))
            })
            .await
            .flatten()
            .flatten();

        if let Some(opponent) = opponent {
            let payload = format!("{room_name},{player}");
            reply(&session, OpCode::PlayerReconnected, &payload).await;
            reply(&session, OpCode::GameResumed, room_name).await;
            if let Some(peer) = registry.get_session(&opponent).await {
                reply(&peer, OpCode::PlayerReconnected, &payload).await;
                reply(&peer, OpCode::GameResumed, room_name).await;
            }
        }
    }

    logger.info(Event::Resumed { player: player.to_string(), room: resumed_room });
    Ok(session)
}
