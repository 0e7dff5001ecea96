//! Phase-gated message routing and per-opcode handlers (spec §4.4 behavior
//! half).
//!
//! Two entry points mirror the two connection stages: [`dispatch_pre_login`]
//! runs before a transport has an identity (no [`Session`] exists yet —
//! `name` is assigned at `LOGIN`, so there is nothing to register until
//! then); [`dispatch`] runs once a `Session` is registered in the
//! [`Registry`] and routes by the session's current [`Phase`].

use crate::codec::{self, Frame, OpCode};
use crate::error::{AuthError, CoreError, CoreResult, RoomError, ViolationReason};
use crate::logger::Logger;
use crate::registry::Registry;
use crate::room::RoomState;
use crate::rules::Square;
use crate::session::{is_allowed, Phase, Session};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// What a pre-login frame did to the connection that sent it.
pub enum PreLoginOutcome {
    /// Still waiting for a `LOGIN` or successful `RECONNECT_REQUEST`.
    Continue,
    /// `LOGIN` succeeded; the owner task should switch to [`dispatch`] using
    /// this session from now on.
    LoggedIn(Arc<Session>),
    /// `RECONNECT_REQUEST` rebound an existing session onto this transport.
    Reconnected(Arc<Session>),
}

enum Event {
    LoggedIn { name: String },
    LoginRejected { name: String, reason: AuthError },
    RoomCreated { owner: String, room: String },
    RoomJoined { player: String, room: String, occupants: usize },
    GameStarted { room: String },
    MoveApplied { room: String, player: String },
    MoveRejected { room: String, player: String, reason: &'static str },
    GameOver { room: String, winner: String },
    RoomLeft { room: String, player: String },
    PhaseViolation { session: String, op: OpCode },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::LoggedIn { name } => write!(f, "{name} logged in"),
            Event::LoginRejected { name, reason } => {
                write!(f, "login rejected for {name:?}: {reason}")
            }
            Event::RoomCreated { owner, room } => write!(f, "{owner} created room {room}"),
            Event::RoomJoined { player, room, occupants } => {
                write!(f, "{player} joined room {room} ({occupants} occupant(s))")
            }
            Event::GameStarted { room } => write!(f, "room {room}: game started"),
            Event::MoveApplied { room, player } => write!(f, "room {room}: {player} moved"),
            Event::MoveRejected { room, player, reason } => {
                write!(f, "room {room}: {player}'s move rejected: {reason}")
            }
            Event::GameOver { room, winner } => write!(f, "room {room}: game over, {winner} wins"),
            Event::RoomLeft { room, player } => write!(f, "room {room}: {player} left"),
            Event::PhaseViolation { session, op } => {
                write!(f, "{session}: {op:?} rejected by phase whitelist")
            }
        }
    }
}

#[derive(Serialize)]
struct GameStateWire<'a> {
    board: Vec<Vec<u8>>,
    current_turn: &'a str,
    player1: &'a str,
    player2: &'a str,
}

fn send_raw(outbox: &UnboundedSender<String>, op: OpCode, data: &str) {
    if let Ok(line) = codec::serialize(op, data) {
        let _ = outbox.send(line);
    }
}

async fn reply(session: &Session, op: OpCode, data: &str) {
    if let Ok(line) = codec::serialize(op, data) {
        session.send_line(line).await;
    }
}

fn split_csv(data: &str) -> Vec<&str> {
    if data.is_empty() {
        Vec::new()
    } else {
        data.split(',').collect()
    }
}

// ── Pre-login ────────────────────────────────────────────────────────────

/// Routes one frame from a transport that has not yet logged in. Only
/// `LOGIN`, `PING`, `PONG`, `RECONNECT_REQUEST`, and `ERROR` are whitelisted
/// in [`Phase::NotLoggedIn`] (spec §4.3); everything else is a violation the
/// caller charges against its own pre-login counter.
pub async fn dispatch_pre_login(
    registry: &Registry,
    logger: &Logger,
    frame: Frame,
    outbox: &UnboundedSender<String>,
) -> CoreResult<PreLoginOutcome> {
    if !is_allowed(Phase::NotLoggedIn, frame.op) {
        return Err(CoreError::ProtocolViolation(ViolationReason::PhaseRejected));
    }

    match frame.op {
        OpCode::Login => handle_login(registry, logger, &frame.data, outbox).await,
        OpCode::Ping => {
            send_raw(outbox, OpCode::Pong, "");
            Ok(PreLoginOutcome::Continue)
        }
        OpCode::Pong => Ok(PreLoginOutcome::Continue),
        OpCode::ReconnectRequest => {
            match crate::reconnect::attempt(registry, logger, &frame.data, outbox.clone()).await {
                Ok(session) => Ok(PreLoginOutcome::Reconnected(session)),
                Err(err) => {
                    send_raw(outbox, OpCode::ReconnectFail, &err.wire_reason());
                    Err(CoreError::ReconnectFailed(err.wire_reason()))
                }
            }
        }
        OpCode::Error => Ok(PreLoginOutcome::Continue),
        other => unreachable!("phase whitelist let an unhandled opcode through: {other:?}"),
    }
}

async fn handle_login(
    registry: &Registry,
    logger: &Logger,
    data: &str,
    outbox: &UnboundedSender<String>,
) -> CoreResult<PreLoginOutcome> {
    let name = data.to_string();
    let violation_reset = registry.config.read().await.violation_reset();
    let session = Arc::new(Session::new(name.clone(), outbox.clone(), violation_reset));

    match registry.login(&name, session.clone()).await {
        Ok(()) => {
            {
                let mut state = session.state.lock().await;
                state.phase = Phase::InLobby;
            }
            reply(&session, OpCode::LoginOk, &name).await;
            logger.info(Event::LoggedIn { name });
            Ok(PreLoginOutcome::LoggedIn(session))
        }
        Err(auth_err) => {
            logger.verbose(Event::LoginRejected { name, reason: auth_err.clone() });
            send_raw(outbox, OpCode::LoginFail, &CoreError::from(auth_err).wire_reason());
            Ok(PreLoginOutcome::Continue)
        }
    }
}

// ── Post-login ───────────────────────────────────────────────────────────

/// Routes one frame from a registered, logged-in session, gating on its
/// current phase (spec §4.3 table) before running the opcode's handler.
pub async fn dispatch(
    registry: &Registry,
    logger: &Logger,
    session: &Arc<Session>,
    frame: Frame,
) -> CoreResult<()> {
    let phase = session.phase().await;
    if !is_allowed(phase, frame.op) {
        logger.verbose(Event::PhaseViolation { session: session.name.clone(), op: frame.op });
        return Err(CoreError::ProtocolViolation(ViolationReason::PhaseRejected));
    }

    match frame.op {
        OpCode::CreateRoom => handle_create_room(registry, logger, session, &frame.data).await,
        OpCode::JoinRoom => handle_join_room(registry, logger, session, &frame.data).await,
        OpCode::ListRooms => handle_list_rooms(registry, session).await,
        OpCode::Move => handle_move(registry, logger, session, &frame.data).await,
        OpCode::MultiMove => handle_multi_move(registry, logger, session, &frame.data).await,
        OpCode::LeaveRoom => handle_leave_room(registry, logger, session, &frame.data).await,
        OpCode::Ping => {
            reply(session, OpCode::Pong, "").await;
            Ok(())
        }
        OpCode::Pong => {
            let mut state = session.state.lock().await;
            state.last_pong = std::time::Instant::now();
            state.missed_pongs = 0;
            state.waiting_for_pong = false;
            Ok(())
        }
        OpCode::ReconnectRequest => {
            // Already connected and logged in: the named session (almost
            // always this one) cannot be `disconnected`, so this always
            // fails. Kept in the whitelist for symmetry with the other
            // phases (spec §4.3 table lists it in every phase).
            reply(session, OpCode::ReconnectFail, "not disconnected").await;
            Ok(())
        }
        OpCode::Error => Ok(()),
        other => unreachable!("phase whitelist let an unhandled opcode through: {other:?}"),
    }
}

async fn handle_create_room(
    registry: &Registry,
    logger: &Logger,
    session: &Arc<Session>,
    data: &str,
) -> CoreResult<()> {
    let fields = split_csv(data);
    let [player, room] = fields[..] else {
        let err = RoomError::NotFound;
        reply(session, OpCode::RoomFail, &err.to_string()).await;
        return Err(CoreError::from(err));
    };
    if player != session.name {
        let err = RoomError::NotInRoom;
        reply(session, OpCode::RoomFail, &err.to_string()).await;
        return Err(CoreError::from(err));
    }

    match registry.create_room(&session.name, room).await {
        Ok(()) => {
            {
                let mut state = session.state.lock().await;
                state.phase = Phase::InRoomWaiting;
                state.current_room = Some(room.to_string());
            }
            reply(session, OpCode::RoomCreated, room).await;
            logger.info(Event::RoomCreated { owner: session.name.clone(), room: room.to_string() });
            Ok(())
        }
        Err(room_err) => {
            reply(session, OpCode::RoomFail, &room_err.to_string()).await;
            Err(CoreError::from(room_err))
        }
    }
}

async fn handle_join_room(
    registry: &Registry,
    logger: &Logger,
    session: &Arc<Session>,
    data: &str,
) -> CoreResult<()> {
    let fields = split_csv(data);
    let [player, room] = fields[..] else {
        let err = RoomError::NotFound;
        reply(session, OpCode::RoomFail, &err.to_string()).await;
        return Err(CoreError::from(err));
    };
    if player != session.name {
        let err = RoomError::NotInRoom;
        reply(session, OpCode::RoomFail, &err.to_string()).await;
        return Err(CoreError::from(err));
    }
    if session.state.lock().await.current_room.is_some() {
        let err = RoomError::AlreadyInRoom;
        reply(session, OpCode::RoomFail, &err.to_string()).await;
        return Err(CoreError::from(err));
    }

    let outcome = registry
        .with_room(room, |r| {
            if r.is_full() {
                return Err(RoomError::Full);
            }
            if r.contains(&session.name) {
                return Err(RoomError::AlreadyInRoom);
            }
            r.join(session.name.clone()).map_err(|_| RoomError::Full)?;
            Ok(r.occupant_count())
        })
        .await;

    match outcome {
        None => {
            let err = RoomError::NotFound;
            reply(session, OpCode::RoomFail, &err.to_string()).await;
            Err(CoreError::from(err))
        }
        Some(Err(room_err)) => {
            let op = if matches!(room_err, RoomError::Full) { OpCode::RoomFull } else { OpCode::RoomFail };
            let payload = if matches!(room_err, RoomError::Full) { room.to_string() } else { room_err.to_string() };
            reply(session, op, &payload).await;
            Err(CoreError::from(room_err))
        }
        Some(Ok(occupants)) => {
            {
                let mut state = session.state.lock().await;
                state.current_room = Some(room.to_string());
                state.phase = if occupants == 2 { Phase::InGame } else { Phase::InRoomWaiting };
            }
            logger.info(Event::RoomJoined { player: session.name.clone(), room: room.to_string(), occupants });

            if occupants < 2 {
                reply(session, OpCode::RoomJoined, &format!("{room},{occupants}")).await;
                return Ok(());
            }

            // Second join: the game just started. Broadcast GAME_START and
            // the initial GAME_STATE to both peers.
            let (p1, p2, owner_name) = match registry
                .with_room(room, |r| {
                    let game = r.game.as_ref().expect("second join always seeds a game");
                    (game.player1.clone(), game.player2.clone(), r.owner.clone())
                })
                .await
            {
                Some(v) => v,
                None => return Err(CoreError::Room(RoomError::NotFound)),
            };

            let start_payload = format!("{room},{p1},{p2},{p1}");
            if let Some(owner) = registry.get_session(&owner_name).await {
                reply(&owner, OpCode::GameStart, &start_payload).await;
            }
            reply(session, OpCode::GameStart, &start_payload).await;
            logger.info(Event::GameStarted { room: room.to_string() });

            broadcast_game_state(registry, room).await?;
            Ok(())
        }
    }
}

async fn handle_list_rooms(registry: &Registry, session: &Arc<Session>) -> CoreResult<()> {
    let rooms = registry.list_rooms().await;
    let body = serde_json::to_string(&rooms).map_err(|_| CoreError::Internal("room list encoding"))?;
    reply(session, OpCode::RoomsList, &body).await;
    Ok(())
}

/// Serializes the named room's current board and broadcasts `GAME_STATE`
/// to both occupants (spec §4.4 "broadcasts the new GAME_STATE").
async fn broadcast_game_state(registry: &Registry, room_name: &str) -> CoreResult<()> {
    let wire = registry
        .with_room(room_name, |r| {
            let game = r.game.as_ref()?;
            Some((
                serde_json::to_string(&GameStateWire {
                    board: game.board.encode_rows(),
                    current_turn: &game.current_turn,
                    player1: &game.player1,
                    player2: &game.player2,
                })
                .ok()?,
                r.players.clone(),
            ))
        })
        .await
        .flatten();

    let Some((body, players)) = wire else {
        return Err(CoreError::Room(RoomError::NotFound));
    };
    for name in players {
        if let Some(peer) = registry.get_session(&name).await {
            reply(&peer, OpCode::GameState, &body).await;
        }
    }
    Ok(())
}

/// A move can be rejected either at the room level (wrong turn, paused,
/// missing room) or by the rules engine itself; kept distinct so each gets
/// its exact wire reason instead of a re-derived guess.
enum MoveFailure {
    Room(RoomError),
    Invalid(&'static str),
}

async fn handle_move(
    registry: &Registry,
    logger: &Logger,
    session: &Arc<Session>,
    data: &str,
) -> CoreResult<()> {
    let fields = split_csv(data);
    let [room, player, r1, c1, r2, c2] = fields[..] else {
        let reason = "malformed move payload";
        reply(session, OpCode::InvalidMove, reason).await;
        return Err(CoreError::InvalidMove(reason));
    };
    if player != session.name {
        let reason = "player field does not match session";
        reply(session, OpCode::InvalidMove, reason).await;
        return Err(CoreError::InvalidMove(reason));
    }
    let (r1, c1, r2, c2) = match (r1.parse(), c1.parse(), r2.parse(), c2.parse()) {
        (Ok(r1), Ok(c1), Ok(r2), Ok(c2)) => (r1, c1, r2, c2),
        _ => {
            let reason = "coordinates must be integers";
            reply(session, OpCode::InvalidMove, reason).await;
            return Err(CoreError::InvalidMove(reason));
        }
    };

    let result = registry
        .with_room(room, |r| {
            if r.state == RoomState::Paused {
                return Err(MoveFailure::Room(RoomError::Paused));
            }
            if r.state != RoomState::Active {
                return Err(MoveFailure::Room(RoomError::NotFound));
            }
            let game = r.game.as_mut().ok_or(MoveFailure::Room(RoomError::NotFound))?;
            if !game.is_current_mover(&session.name) {
                return Err(MoveFailure::Room(RoomError::NotYourTurn));
            }
            game.commit_step(Square::new(r1, c1), Square::new(r2, c2), &session.name)
                .map_err(MoveFailure::Invalid)
        })
        .await;

    apply_move_outcome(registry, logger, session, room, player, result).await
}

/// Shared tail of `handle_move`/`handle_multi_move`: replies with the
/// appropriate wire opcode and, on success, broadcasts the updated state
/// and checks for game-over.
async fn apply_move_outcome(
    registry: &Registry,
    logger: &Logger,
    session: &Arc<Session>,
    room: &str,
    player: &str,
    result: Option<Result<(), MoveFailure>>,
) -> CoreResult<()> {
    match result {
        None => Err(CoreError::Room(RoomError::NotFound)),
        Some(Err(MoveFailure::Room(room_err))) => {
            reply(session, OpCode::InvalidMove, &room_err.to_string()).await;
            Ok(())
        }
        Some(Err(MoveFailure::Invalid(reason))) => {
            reply(session, OpCode::InvalidMove, reason).await;
            logger.verbose(Event::MoveRejected { room: room.to_string(), player: player.to_string(), reason });
            Ok(())
        }
        Some(Ok(())) => {
            logger.verbose(Event::MoveApplied { room: room.to_string(), player: player.to_string() });
            broadcast_game_state(registry, room).await?;
            finish_if_game_over(registry, logger, room).await
        }
    }
}

async fn handle_multi_move(
    registry: &Registry,
    logger: &Logger,
    session: &Arc<Session>,
    data: &str,
) -> CoreResult<()> {
    let fields = split_csv(data);
    if fields.len() < 3 {
        let reason = "malformed multi-move payload";
        reply(session, OpCode::InvalidMove, reason).await;
        return Err(CoreError::InvalidMove(reason));
    }
    let room = fields[0];
    let player = fields[1];
    if player != session.name {
        let reason = "player field does not match session";
        reply(session, OpCode::InvalidMove, reason).await;
        return Err(CoreError::InvalidMove(reason));
    }
    let k: usize = match fields[2].parse() {
        Ok(k) => k,
        Err(_) => {
            let reason = "k must be an integer";
            reply(session, OpCode::InvalidMove, reason).await;
            return Err(CoreError::InvalidMove(reason));
        }
    };
    if k < 2 || fields.len() != 3 + 2 * k {
        let reason = "step count does not match payload length";
        reply(session, OpCode::InvalidMove, reason).await;
        return Err(CoreError::InvalidMove(reason));
    }
    let mut steps = Vec::with_capacity(k);
    for i in 0..k {
        let row: i32 = match fields[3 + 2 * i].parse() {
            Ok(v) => v,
            Err(_) => {
                let reason = "coordinates must be integers";
                reply(session, OpCode::InvalidMove, reason).await;
                return Err(CoreError::InvalidMove(reason));
            }
        };
        let col: i32 = match fields[3 + 2 * i + 1].parse() {
            Ok(v) => v,
            Err(_) => {
                let reason = "coordinates must be integers";
                reply(session, OpCode::InvalidMove, reason).await;
                return Err(CoreError::InvalidMove(reason));
            }
        };
        steps.push(Square::new(row, col));
    }

    let result = registry
        .with_room(room, |r| {
            if r.state == RoomState::Paused {
                return Err(MoveFailure::Room(RoomError::Paused));
            }
            if r.state != RoomState::Active {
                return Err(MoveFailure::Room(RoomError::NotFound));
            }
            let game = r.game.as_mut().ok_or(MoveFailure::Room(RoomError::NotFound))?;
            if !game.is_current_mover(&session.name) {
                return Err(MoveFailure::Room(RoomError::NotYourTurn));
            }
            game.commit_multi_capture(&steps, &session.name).map_err(MoveFailure::Invalid)
        })
        .await;

    apply_move_outcome(registry, logger, session, room, player, result).await
}

/// Transitions a room to `finished` and broadcasts `GAME_END` if the just
/// -applied move ended the game (spec §4.4 "checks termination").
async fn finish_if_game_over(registry: &Registry, logger: &Logger, room: &str) -> CoreResult<()> {
    let outcome = registry
        .with_room(room, |r| {
            let winner = r.game.as_ref()?.winner().map(str::to_string);
            if let Some(winner) = &winner {
                r.finish();
                let players = r.players.clone();
                return Some((winner.clone(), players));
            }
            None
        })
        .await
        .flatten();

    let Some((winner, players)) = outcome else {
        return Ok(());
    };
    let payload = format!("{winner},game_over");
    for name in &players {
        if let Some(peer) = registry.get_session(name).await {
            reply(&peer, OpCode::GameEnd, &payload).await;
            let mut state = peer.state.lock().await;
            state.phase = Phase::InLobby;
            state.current_room = None;
        }
    }
    logger.info(Event::GameOver { room: room.to_string(), winner });
    Ok(())
}

async fn handle_leave_room(
    registry: &Registry,
    logger: &Logger,
    session: &Arc<Session>,
    data: &str,
) -> CoreResult<()> {
    let fields = split_csv(data);
    let [room, player] = fields[..] else {
        let err = RoomError::NotFound;
        reply(session, OpCode::RoomFail, &err.to_string()).await;
        return Err(CoreError::from(err));
    };
    if player != session.name {
        let err = RoomError::NotInRoom;
        reply(session, OpCode::RoomFail, &err.to_string()).await;
        return Err(CoreError::from(err));
    }

    let opponent = registry.with_room(room, |r| r.opponent_of(&session.name).map(str::to_string)).await.flatten();
    registry.remove_room(room).await;

    {
        let mut state = session.state.lock().await;
        state.phase = Phase::InLobby;
        state.current_room = None;
    }
    reply(session, OpCode::RoomLeft, &format!("{room},{player}")).await;

    if let Some(opponent_name) = opponent {
        if let Some(peer) = registry.get_session(&opponent_name).await {
            reply(&peer, OpCode::RoomLeft, &format!("{room},{player}")).await;
            let mut state = peer.state.lock().await;
            state.phase = Phase::InLobby;
            state.current_room = None;
        }
    }
    logger.info(Event::RoomLeft { room: room.to_string(), player: player.to_string() });
    Ok(())
}
