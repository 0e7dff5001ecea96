//! Typed error hierarchy for the core (spec §7).
//!
//! Every failure path either turns into a wire reply for the peer or is
//! logged and the session force-closed — nothing is ever silently dropped.

use std::fmt;

/// One codec parse failure, charged to the session's violation counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationReason {
    InvalidPrefix,
    InvalidFormat,
    InvalidOpcode,
    InvalidLength,
    DataMismatch,
    BufferOverflow,
    /// The operation is not in the whitelist of the session's current phase.
    PhaseRejected,
}

impl fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ViolationReason::InvalidPrefix => "invalid_prefix",
            ViolationReason::InvalidFormat => "invalid_format",
            ViolationReason::InvalidOpcode => "invalid_opcode",
            ViolationReason::InvalidLength => "invalid_length",
            ViolationReason::DataMismatch => "data_mismatch",
            ViolationReason::BufferOverflow => "buffer_overflow",
            ViolationReason::PhaseRejected => "phase_rejected",
        };
        write!(f, "{text}")
    }
}

/// Room-level failures (spec §4.4): duplicate name, full room, wrong room,
/// not-in-room, already-in-room.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RoomError {
    #[error("room name already in use")]
    NameTaken,
    #[error("room does not exist")]
    NotFound,
    #[error("room is full")]
    Full,
    #[error("player is not in this room")]
    NotInRoom,
    #[error("player is already in a room")]
    AlreadyInRoom,
    #[error("room is paused")]
    Paused,
    #[error("it is not your turn")]
    NotYourTurn,
    #[error("server room capacity reached")]
    ServerAtCapacity,
}

/// Login-time failures (spec §7).
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("client id already in use")]
    NameTaken,
    #[error("name must not be empty")]
    EmptyName,
}

/// The single typed error enumeration carried as a return value by every
/// handler (spec §7).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("protocol violation: {0}")]
    ProtocolViolation(ViolationReason),

    #[error("invalid move: {0}")]
    InvalidMove(&'static str),

    #[error("room error: {0}")]
    Room(#[from] RoomError),

    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("transport lost")]
    TransportLost,

    #[error("internal error: {0}")]
    Internal(&'static str),

    /// A `RECONNECT_REQUEST` failed after `RECONNECT_FAIL` was already sent.
    /// Kept distinct from the other variants so `process_line` can close the
    /// transport for this case specifically (spec §4.7 "transport is dropped
    /// without altering the existing session") without treating it as a
    /// codec/phase violation or as one of the reply-and-continue cases.
    #[error("reconnect failed: {0}")]
    ReconnectFailed(String),
}

impl CoreError {
    /// The opcode-appropriate reason string to echo back to the peer,
    /// per the wire grammars in spec §6.
    pub fn wire_reason(&self) -> String {
        match self {
            CoreError::ProtocolViolation(r) => r.to_string(),
            CoreError::InvalidMove(r) => r.to_string(),
            CoreError::Room(r) => r.to_string(),
            CoreError::Auth(r) => r.to_string(),
            CoreError::TransportLost => "transport lost".to_string(),
            CoreError::Internal(r) => r.to_string(),
            CoreError::ReconnectFailed(r) => r.clone(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
