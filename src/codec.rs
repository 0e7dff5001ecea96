//! The DENTCP wire protocol (spec §4.1).
//!
//! Frame shape: `DENTCP|OP|LEN|DATA\n` where `OP` is exactly two decimal
//! digits, `LEN` is exactly four decimal digits, `DATA` is `LEN` bytes with
//! no embedded newline, and `\n` is the single-byte delimiter. Maximum
//! encoded frame (including the delimiter) is 8192 bytes.

use crate::error::ViolationReason;
use std::fmt;

pub const PREFIX: &str = "DENTCP";
pub const MAX_FRAME_LEN: usize = 8192;
/// `MAX_FRAME_LEN` minus the fixed frame overhead: `"DENTCP|"` (7) + 2-digit
/// OP + `"|"` (3) + 4-digit LEN + `"|"` (5) + the `"\n"` terminator (1) = 16.
pub const MAX_DATA_LEN: usize = MAX_FRAME_LEN - 16;

/// The closed enumeration of operation codes (spec §6 opcode table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Login,
    LoginOk,
    LoginFail,
    CreateRoom,
    JoinRoom,
    RoomJoined,
    RoomFull,
    RoomFail,
    GameStart,
    Move,
    InvalidMove,
    GameState,
    GameEnd,
    LeaveRoom,
    RoomLeft,
    Ping,
    Pong,
    ListRooms,
    RoomsList,
    RoomCreated,
    MultiMove,
    PlayerDisconnected,
    PlayerReconnecting,
    PlayerReconnected,
    ReconnectRequest,
    ReconnectOk,
    ReconnectFail,
    GamePaused,
    GameResumed,
    Error,
}

impl OpCode {
    pub fn code(self) -> u16 {
        match self {
            OpCode::Login => 1,
            OpCode::LoginOk => 2,
            OpCode::LoginFail => 3,
            OpCode::CreateRoom => 4,
            OpCode::JoinRoom => 5,
            OpCode::RoomJoined => 6,
            OpCode::RoomFull => 7,
            OpCode::RoomFail => 8,
            OpCode::GameStart => 9,
            OpCode::Move => 10,
            OpCode::InvalidMove => 11,
            OpCode::GameState => 12,
            OpCode::GameEnd => 13,
            OpCode::LeaveRoom => 14,
            OpCode::RoomLeft => 15,
            OpCode::Ping => 16,
            OpCode::Pong => 17,
            OpCode::ListRooms => 18,
            OpCode::RoomsList => 19,
            OpCode::RoomCreated => 20,
            OpCode::MultiMove => 21,
            OpCode::PlayerDisconnected => 22,
            OpCode::PlayerReconnecting => 23,
            OpCode::PlayerReconnected => 24,
            OpCode::ReconnectRequest => 25,
            OpCode::ReconnectOk => 26,
            OpCode::ReconnectFail => 27,
            OpCode::GamePaused => 28,
            OpCode::GameResumed => 29,
            OpCode::Error => 500,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            1 => OpCode::Login,
            2 => OpCode::LoginOk,
            3 => OpCode::LoginFail,
            4 => OpCode::CreateRoom,
            5 => OpCode::JoinRoom,
            6 => OpCode::RoomJoined,
            7 => OpCode::RoomFull,
            8 => OpCode::RoomFail,
            9 => OpCode::GameStart,
            10 => OpCode::Move,
            11 => OpCode::InvalidMove,
            12 => OpCode::GameState,
            13 => OpCode::GameEnd,
            14 => OpCode::LeaveRoom,
            15 => OpCode::RoomLeft,
            16 => OpCode::Ping,
            17 => OpCode::Pong,
            18 => OpCode::ListRooms,
            19 => OpCode::RoomsList,
            20 => OpCode::RoomCreated,
            21 => OpCode::MultiMove,
            22 => OpCode::PlayerDisconnected,
            23 => OpCode::PlayerReconnecting,
            24 => OpCode::PlayerReconnected,
            25 => OpCode::ReconnectRequest,
            26 => OpCode::ReconnectOk,
            27 => OpCode::ReconnectFail,
            28 => OpCode::GamePaused,
            29 => OpCode::GameResumed,
            500 => OpCode::Error,
            _ => return None,
        })
    }
}

/// A single parsed line, prior to any payload-grammar interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub op: OpCode,
    pub data: String,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.op, self.data)
    }
}

/// Encodes `(op, data)` into a canonical frame, including the terminator.
/// Refuses payloads that would not round-trip within `LEN`'s four digits or
/// the 8192-byte frame cap.
pub fn serialize(op: OpCode, data: &str) -> Result<String, ViolationReason> {
    if data.len() > MAX_DATA_LEN || data.len() > 9999 {
        return Err(ViolationReason::InvalidLength);
    }
    if data.contains('\n') {
        return Err(ViolationReason::DataMismatch);
    }
    let frame = format!("{PREFIX}|{:02}|{:04}|{}\n", op.code(), data.len(), data);
    if frame.len() > MAX_FRAME_LEN {
        return Err(ViolationReason::InvalidLength);
    }
    Ok(frame)
}

/// Parses one logical line (the caller has already stripped the `\n`
/// terminator). Never panics on malformed input; every failure mode maps to
/// a [`ViolationReason`].
pub fn parse(line: &str) -> Result<Frame, ViolationReason> {
    let rest = line
        .strip_prefix(PREFIX)
        .ok_or(ViolationReason::InvalidPrefix)?;
    let rest = rest.strip_prefix('|').ok_or(ViolationReason::InvalidFormat)?;

    let mut parts = rest.splitn(3, '|');
    let op_field = parts.next().ok_or(ViolationReason::InvalidFormat)?;
    let len_field = parts.next().ok_or(ViolationReason::InvalidFormat)?;
    let data_field = parts.next().ok_or(ViolationReason::InvalidFormat)?;

    if op_field.len() != 2 || !op_field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ViolationReason::InvalidFormat);
    }
    if len_field.len() != 4 || !len_field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ViolationReason::InvalidFormat);
    }

    let op_num: u16 = op_field.parse().map_err(|_| ViolationReason::InvalidFormat)?;
    let op = OpCode::from_code(op_num).ok_or(ViolationReason::InvalidOpcode)?;

    let len: usize = len_field.parse().map_err(|_| ViolationReason::InvalidFormat)?;
    if len > MAX_DATA_LEN {
        return Err(ViolationReason::InvalidLength);
    }
    if data_field.len() != len {
        return Err(ViolationReason::DataMismatch);
    }

    Ok(Frame {
        op,
        data: data_field.to_string(),
    })
}

/// Bounded per-connection line accumulator (spec §4.1 "Reader loop").
///
/// Bytes are pushed in as they arrive off the socket; [`FrameReader::push`]
/// returns a completed line whenever a `\n` is seen. If the internal buffer
/// fills without ever seeing a terminator the buffer is cleared and a
/// `buffer_overflow` violation is reported instead of a partial frame.
pub struct FrameReader {
    buf: Vec<u8>,
    max_frame: usize,
}

impl FrameReader {
    pub fn new(max_frame: usize) -> Self {
        Self {
            buf: Vec::with_capacity(256),
            max_frame,
        }
    }

    /// Feeds newly-read bytes in. Returns at most one completed line per
    /// call; callers should call again with an empty slice (or just call in
    /// a loop) to drain multiple frames buffered from one `read()`.
    ///
    /// Returns `Ok(None)` when no complete line is present yet,
    /// `Ok(Some(line))` for a completed line (sans terminator), and
    /// `Err(BufferOverflow)` when the buffer filled without a terminator —
    /// in that case the buffer has already been cleared.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Option<String>, ViolationReason> {
        self.buf.extend_from_slice(bytes);

        if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line_bytes = self.buf.drain(..=pos).collect::<Vec<u8>>();
            let line = &line_bytes[..line_bytes.len() - 1];
            let line = String::from_utf8_lossy(line).into_owned();
            return Ok(Some(line));
        }

        if self.buf.len() >= self.max_frame {
            self.buf.clear();
            return Err(ViolationReason::BufferOverflow);
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let frame = serialize(OpCode::Login, "john").unwrap();
        assert_eq!(frame, "DENTCP|01|0004|john\n");
        let parsed = parse(frame.trim_end_matches('\n')).unwrap();
        assert_eq!(parsed.op, OpCode::Login);
        assert_eq!(parsed.data, "john");
    }

    #[test]
    fn round_trip_empty_payload() {
        let frame = serialize(OpCode::Ping, "").unwrap();
        assert_eq!(frame, "DENTCP|16|0000|\n");
        let parsed = parse(frame.trim_end_matches('\n')).unwrap();
        assert_eq!(parsed.op, OpCode::Ping);
        assert_eq!(parsed.data, "");
    }

    #[test]
    fn bad_prefix() {
        assert_eq!(parse("NOPE|01|0004|john"), Err(ViolationReason::InvalidPrefix));
    }

    #[test]
    fn bad_format_missing_separator() {
        assert_eq!(parse("DENTCP|01|0004john"), Err(ViolationReason::InvalidFormat));
    }

    #[test]
    fn bad_opcode() {
        assert_eq!(parse("DENTCP|99|0004|john"), Err(ViolationReason::InvalidOpcode));
    }

    #[test]
    fn non_numeric_op() {
        assert_eq!(parse("DENTCP|ab|0004|john"), Err(ViolationReason::InvalidFormat));
    }

    #[test]
    fn length_mismatch() {
        assert_eq!(parse("DENTCP|01|0005|john"), Err(ViolationReason::DataMismatch));
    }

    #[test]
    fn length_out_of_range() {
        // LEN field can't even express more than 4 digits, but a well-formed
        // 4-digit LEN at the boundary of MAX_DATA_LEN must still be rejected
        // cleanly rather than panic.
        let huge_data = "x".repeat(9000);
        let line = format!("DENTCP|01|9000|{huge_data}");
        assert_eq!(parse(&line), Err(ViolationReason::InvalidLength));
    }

    #[test]
    fn parse_rejects_total_frame_over_max_frame_len() {
        // A 4-digit LEN field can express up to 9999, but the reconstructed
        // frame (prefix + op + len + data + terminator) must still fit
        // within MAX_FRAME_LEN; MAX_DATA_LEN must leave room for that
        // overhead rather than just the terminator byte.
        let data = "x".repeat(8191);
        let line = format!("DENTCP|01|8191|{data}");
        assert_eq!(parse(&line), Err(ViolationReason::InvalidLength));
    }

    #[test]
    fn serialize_rejects_embedded_newline() {
        assert_eq!(serialize(OpCode::Login, "a\nb"), Err(ViolationReason::DataMismatch));
    }

    #[test]
    fn serialize_rejects_oversized_payload() {
        let data = "x".repeat(10_000);
        assert_eq!(serialize(OpCode::Login, &data), Err(ViolationReason::InvalidLength));
    }

    #[test]
    fn frame_reader_splits_multiple_lines() {
        let mut r = FrameReader::new(8192);
        let res = r.push(b"DENTCP|16|0000|\nDENTCP|17|0000|\n").unwrap();
        assert_eq!(res, Some("DENTCP|16|0000|".to_string()));
        let res2 = r.push(b"").unwrap();
        assert_eq!(res2, Some("DENTCP|17|0000|".to_string()));
        let res3 = r.push(b"").unwrap();
        assert_eq!(res3, None);
    }

    #[test]
    fn frame_reader_overflow_clears_buffer() {
        let mut r = FrameReader::new(16);
        let err = r.push(b"0123456789abcdef").unwrap_err();
        assert_eq!(err, ViolationReason::BufferOverflow);
        // Buffer was cleared; a fresh line still parses.
        let res = r.push(b"hi\n").unwrap();
        assert_eq!(res, Some("hi".to_string()));
    }

    #[test]
    fn parse_never_panics_on_random_mutations() {
        let base = serialize(OpCode::Move, "r1,john,5,1,3,3").unwrap();
        let base = base.trim_end_matches('\n');
        // Byte flip.
        let mut flipped = base.as_bytes().to_vec();
        flipped[0] ^= 0xFF;
        let _ = parse(&String::from_utf8_lossy(&flipped));
        // Separator drop.
        let dropped = base.replacen('|', "", 1);
        assert!(parse(&dropped).is_err());
        // Length inflation.
        let inflated = base.replacen("0015", "9999", 1);
        assert!(parse(&inflated).is_err());
    }
}
