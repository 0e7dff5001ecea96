//! Per-connection session state and the phase whitelist (spec §4.3).
//!
//! A [`Session`] is shared (`Arc<Session>`) between its owner task, the
//! heartbeat task, and any dispatcher handler that touches it; every field
//! that changes after construction lives behind `state`, a single
//! `tokio::sync::Mutex<SessionState>`. The identity lock that arbitrates
//! concurrent `RECONNECT_REQUEST`s (spec §4.7) is deliberately a separate
//! lock so a reconnect attempt can hold it across an `.await` without
//! blocking ordinary phase/violation reads.

use crate::codec::OpCode;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex as AsyncMutex;

/// The logical state of a session with respect to game flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotLoggedIn,
    InLobby,
    InRoomWaiting,
    InGame,
}

/// Transport-level connection state (spec §3 "Session").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Reconnecting,
    TimedOut,
    Removed,
}

/// Whether `op` is permitted while a session is in `phase` (spec §4.3 table).
pub fn is_allowed(phase: Phase, op: OpCode) -> bool {
    use OpCode::*;
    let whitelist: &[OpCode] = match phase {
        Phase::NotLoggedIn => &[Login, Ping, Pong, ReconnectRequest, Error],
        Phase::InLobby => &[CreateRoom, JoinRoom, ListRooms, Ping, Pong, ReconnectRequest, Error],
        Phase::InRoomWaiting => &[LeaveRoom, JoinRoom, ListRooms, Ping, Pong, ReconnectRequest, Error],
        Phase::InGame => &[
            Move,
            MultiMove,
            LeaveRoom,
            ListRooms,
            Ping,
            Pong,
            ReconnectRequest,
            Error,
        ],
    };
    whitelist.contains(&op)
}

/// Accumulates codec/whitelist violations and decays them after an idle
/// window (spec §4.3 "Violation accounting").
#[derive(Debug, Clone)]
pub struct ViolationTracker {
    count: u32,
    last_violation: Option<Instant>,
    reset_after: std::time::Duration,
}

impl ViolationTracker {
    pub fn new(reset_after: std::time::Duration) -> Self {
        Self {
            count: 0,
            last_violation: None,
            reset_after,
        }
    }

    /// Records one violation, first decaying if the idle window has
    /// elapsed, and returns the post-increment count.
    pub fn record(&mut self, now: Instant) -> u32 {
        if let Some(last) = self.last_violation {
            if now.duration_since(last) >= self.reset_after {
                self.count = 0;
            }
        }
        self.count += 1;
        self.last_violation = Some(now);
        self.count
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Everything about a session that changes after construction.
pub struct SessionState {
    pub conn: ConnectionState,
    pub phase: Phase,
    /// Empty when not in a room.
    pub current_room: Option<String>,
    pub last_pong: Instant,
    pub missed_pongs: u32,
    pub waiting_for_pong: bool,
    pub disconnect_time: Option<Instant>,
    pub codec_violations: ViolationTracker,
    pub phase_violations: ViolationTracker,
    /// Outbound line sender for the transport currently bound to this
    /// session; swapped out wholesale on reconnect (spec §4.7).
    pub outbox: UnboundedSender<String>,
}

/// Per-connection identity, phase, violation counters, and heartbeat state
/// (spec §3 "Session"). Owned exclusively by the [`crate::registry::Registry`];
/// handlers only ever hold transient borrows under the registry's locks.
pub struct Session {
    /// Assigned at LOGIN, immutable thereafter.
    pub name: String,
    pub state: AsyncMutex<SessionState>,
    /// Serializes concurrent RECONNECT_REQUEST attempts against this session
    /// (spec §4.7 "Identity rebinding").
    pub identity_lock: AsyncMutex<()>,
}

impl Session {
    pub fn new(
        name: String,
        outbox: UnboundedSender<String>,
        violation_reset: std::time::Duration,
    ) -> Self {
        Self {
            name,
            state: AsyncMutex::new(SessionState {
                conn: ConnectionState::Connected,
                phase: Phase::NotLoggedIn,
                current_room: None,
                last_pong: Instant::now(),
                missed_pongs: 0,
                waiting_for_pong: false,
                disconnect_time: None,
                codec_violations: ViolationTracker::new(violation_reset),
                phase_violations: ViolationTracker::new(violation_reset),
                outbox,
            }),
            identity_lock: AsyncMutex::new(()),
        }
    }

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase
    }

    pub async fn is_logged_in(&self) -> bool {
        self.state.lock().await.phase != Phase::NotLoggedIn
    }

    /// Sends one already-framed line to whichever transport currently owns
    /// this session. A closed receiver means the owner task already tore
    /// the transport down; callers don't need to treat that as fatal here,
    /// the heartbeat/dispatcher observes disconnects through other means.
    pub async fn send_line(&self, line: String) {
        let _ = self.state.lock().await.outbox.send(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn not_logged_in_whitelist() {
        assert!(is_allowed(Phase::NotLoggedIn, OpCode::Login));
        assert!(is_allowed(Phase::NotLoggedIn, OpCode::ReconnectRequest));
        assert!(!is_allowed(Phase::NotLoggedIn, OpCode::CreateRoom));
        assert!(!is_allowed(Phase::NotLoggedIn, OpCode::Move));
    }

    #[test]
    fn lobby_whitelist() {
        assert!(is_allowed(Phase::InLobby, OpCode::CreateRoom));
        assert!(is_allowed(Phase::InLobby, OpCode::JoinRoom));
        assert!(is_allowed(Phase::InLobby, OpCode::ListRooms));
        assert!(!is_allowed(Phase::InLobby, OpCode::Move));
        assert!(!is_allowed(Phase::InLobby, OpCode::Login));
    }

    #[test]
    fn room_waiting_whitelist() {
        assert!(is_allowed(Phase::InRoomWaiting, OpCode::LeaveRoom));
        assert!(is_allowed(Phase::InRoomWaiting, OpCode::JoinRoom));
        assert!(!is_allowed(Phase::InRoomWaiting, OpCode::CreateRoom));
        assert!(!is_allowed(Phase::InRoomWaiting, OpCode::Move));
    }

    #[test]
    fn in_game_whitelist() {
        assert!(is_allowed(Phase::InGame, OpCode::Move));
        assert!(is_allowed(Phase::InGame, OpCode::MultiMove));
        assert!(is_allowed(Phase::InGame, OpCode::LeaveRoom));
        assert!(!is_allowed(Phase::InGame, OpCode::CreateRoom));
        assert!(!is_allowed(Phase::InGame, OpCode::JoinRoom));
    }

    #[test]
    fn violation_counter_increments_by_one() {
        let mut tracker = ViolationTracker::new(Duration::from_secs(60));
        let t0 = Instant::now();
        assert_eq!(tracker.record(t0), 1);
        assert_eq!(tracker.record(t0), 2);
    }

    #[test]
    fn violation_counter_decays_after_idle_window() {
        let mut tracker = ViolationTracker::new(Duration::from_millis(10));
        let t0 = Instant::now();
        tracker.record(t0);
        tracker.record(t0);
        assert_eq!(tracker.count(), 2);
        let later = t0 + Duration::from_millis(50);
        assert_eq!(tracker.record(later), 1);
    }

    #[tokio::test]
    async fn send_line_reaches_outbox() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let session = Session::new("john".into(), tx, Duration::from_secs(60));
        session.send_line("hello".into()).await;
        assert_eq!(rx.recv().await, Some("hello".to_string()));
    }
}
