use checkers_server::codec::{self, OpCode};
use checkers_server::config::Config;
use checkers_server::logger::Logger;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

async fn spawn_server(config: Config) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let logger = Arc::new(Logger::new(0));
    let (_tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = checkers_server::serve(listener, config, logger, rx).await;
    });
    addr
}

struct Peer {
    reader: BufReader<OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Peer {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (r, w) = stream.into_split();
        Self { reader: BufReader::new(r), writer: w }
    }

    async fn send(&mut self, op: OpCode, data: &str) {
        let line = codec::serialize(op, data).unwrap();
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> codec::Frame {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        codec::parse(line.trim_end_matches('\n')).unwrap()
    }

    /// Reads frames until one with `op` is seen (auto-replying to any PING),
    /// returning it. Lets tests skip heartbeat chatter interleaved with the
    /// frame under test.
    async fn recv_skip_pings(&mut self, op: OpCode) -> codec::Frame {
        loop {
            let frame = self.recv().await;
            if frame.op == OpCode::Ping {
                self.send(OpCode::Pong, "").await;
                continue;
            }
            if frame.op == op {
                return frame;
            }
        }
    }

    async fn login(&mut self, name: &str) {
        self.send(OpCode::Login, name).await;
        let frame = self.recv_skip_pings(OpCode::LoginOk).await;
        assert_eq!(frame.data, name);
    }
}

fn test_config() -> Config {
    let mut c = Config::default();
    c.ping_interval_s = 3600; // heartbeat noise would otherwise interleave with assertions below
    c
}

#[tokio::test]
async fn login_then_duplicate_login_is_rejected() {
    let addr = spawn_server(test_config()).await;

    let mut john = Peer::connect(addr).await;
    john.login("john").await;

    let mut impostor = Peer::connect(addr).await;
    impostor.send(OpCode::Login, "john").await;
    let frame = impostor.recv().await;
    assert_eq!(frame.op, OpCode::LoginFail);
}

#[tokio::test]
async fn create_and_join_starts_game_and_broadcasts_state() {
    let addr = spawn_server(test_config()).await;

    let mut john = Peer::connect(addr).await;
    john.login("john").await;
    john.send(OpCode::CreateRoom, "john,r1").await;
    let created = john.recv().await;
    assert_eq!(created.op, OpCode::RoomCreated);
    assert_eq!(created.data, "r1");

    let mut ann = Peer::connect(addr).await;
    ann.login("ann").await;
    ann.send(OpCode::JoinRoom, "ann,r1").await;

    let ann_start = ann.recv().await;
    assert_eq!(ann_start.op, OpCode::GameStart);
    assert_eq!(ann_start.data, "r1,john,ann,john");
    let ann_state = ann.recv().await;
    assert_eq!(ann_state.op, OpCode::GameState);

    let john_start = john.recv().await;
    assert_eq!(john_start.op, OpCode::GameStart);
    let john_state = john.recv().await;
    assert_eq!(john_state.op, OpCode::GameState);
}

async fn start_game(addr: SocketAddr) -> (Peer, Peer) {
    let mut john = Peer::connect(addr).await;
    john.login("john").await;
    john.send(OpCode::CreateRoom, "john,r1").await;
    let _ = john.recv().await; // ROOM_CREATED

    let mut ann = Peer::connect(addr).await;
    ann.login("ann").await;
    ann.send(OpCode::JoinRoom, "ann,r1").await;

    let _ = ann.recv().await; // GAME_START
    let _ = ann.recv().await; // GAME_STATE
    let _ = john.recv().await; // GAME_START
    let _ = john.recv().await; // GAME_STATE
    (john, ann)
}

#[tokio::test]
async fn illegal_move_is_rejected_and_turn_is_preserved() {
    let addr = spawn_server(test_config()).await;
    let (mut john, mut ann) = start_game(addr).await;

    // white man at (5,1) moving sideways to (5,3) is not diagonal.
    john.send(OpCode::Move, "r1,john,5,1,5,3").await;
    let reply = john.recv().await;
    assert_eq!(reply.op, OpCode::InvalidMove);

    // ann never sees a GAME_STATE broadcast for the rejected move.
    john.send(OpCode::ListRooms, "").await;
    let rooms = john.recv().await;
    assert_eq!(rooms.op, OpCode::RoomsList);
    let _ = ann; // turn is still john's; no broadcast was sent to ann
}

#[tokio::test]
async fn legal_capture_updates_board_and_flips_turn() {
    let addr = spawn_server(test_config()).await;
    let (mut john, mut ann) = start_game(addr).await;

    // john steps a man to (4,0); ann walks a man into the jumpable midpoint
    // at (3,1); john then captures it by landing on (2,2).
    john.send(OpCode::Move, "r1,john,5,1,4,0").await;
    let _ = john.recv().await; // GAME_STATE after john's move
    let _ = ann.recv().await; // GAME_STATE mirrored to ann

    ann.send(OpCode::Move, "r1,ann,2,2,3,1").await;
    let state_after_ann = ann.recv().await;
    assert_eq!(state_after_ann.op, OpCode::GameState);
    let _ = john.recv().await;

    john.send(OpCode::Move, "r1,john,4,0,2,2").await;
    let capture_state = john.recv().await;
    assert_eq!(capture_state.op, OpCode::GameState);
    assert!(capture_state.data.contains("\"current_turn\":\"ann\""));
    let _ = ann.recv().await;
}

#[tokio::test]
async fn disconnect_pauses_room_and_reconnect_resumes_it() {
    let mut config = test_config();
    config.ping_interval_s = 1;
    config.missed_pong_threshold = 1;
    config.long_disconnect_s = 30;
    let addr = spawn_server(config).await;

    let (john, mut ann) = start_game(addr).await;
    drop(john); // simulate a dead transport without a clean LEAVE_ROOM

    let disconnected = ann.recv_skip_pings(OpCode::PlayerDisconnected).await;
    assert_eq!(disconnected.data, "r1,john");
    let paused = ann.recv_skip_pings(OpCode::GamePaused).await;
    assert_eq!(paused.data, "r1");

    let mut reconnecting_john = Peer::connect(addr).await;
    reconnecting_john.send(OpCode::ReconnectRequest, "r1,john").await;
    let ok = reconnecting_john.recv_skip_pings(OpCode::ReconnectOk).await;
    assert_eq!(ok.data, "r1");

    let resumed = reconnecting_john.recv_skip_pings(OpCode::GameResumed).await;
    assert_eq!(resumed.data, "r1");
    let ann_resumed = ann.recv_skip_pings(OpCode::GameResumed).await;
    assert_eq!(ann_resumed.data, "r1");
}

#[tokio::test]
async fn join_full_room_returns_room_name_as_payload() {
    let addr = spawn_server(test_config()).await;
    let (_john, _ann) = start_game(addr).await;

    let mut carl = Peer::connect(addr).await;
    carl.login("carl").await;
    carl.send(OpCode::JoinRoom, "carl,r1").await;
    let full = carl.recv().await;
    assert_eq!(full.op, OpCode::RoomFull);
    assert_eq!(full.data, "r1");
}

#[tokio::test]
async fn malformed_create_room_payload_gets_a_reply() {
    let addr = spawn_server(test_config()).await;
    let mut john = Peer::connect(addr).await;
    john.login("john").await;

    john.send(OpCode::CreateRoom, "only_one_field").await;
    let reply = john.recv().await;
    assert_eq!(reply.op, OpCode::RoomFail);
}

#[tokio::test]
async fn failed_reconnect_sends_fail_and_closes_transport() {
    let addr = spawn_server(test_config()).await;
    let mut ghost = Peer::connect(addr).await;
    ghost.send(OpCode::ReconnectRequest, "nobody").await;

    let fail = ghost.recv().await;
    assert_eq!(fail.op, OpCode::ReconnectFail);

    let mut line = String::new();
    let n = ghost.reader.read_line(&mut line).await.unwrap();
    assert_eq!(n, 0, "transport should be dropped after a failed reconnect");
}

#[tokio::test]
async fn max_clients_drops_connections_past_the_cap() {
    let mut config = test_config();
    config.max_clients = 1;
    let addr = spawn_server(config).await;

    let mut first = Peer::connect(addr).await;
    first.login("john").await;

    let mut second = Peer::connect(addr).await;
    let mut line = String::new();
    let n = second.reader.read_line(&mut line).await.unwrap();
    assert_eq!(n, 0, "a connection past max_clients should be dropped immediately");
}

#[tokio::test]
async fn connect_deadline_closes_connections_that_never_log_in() {
    let mut config = test_config();
    config.connect_deadline_s = 0;
    let addr = spawn_server(config).await;

    let mut idle = Peer::connect(addr).await;
    let mut line = String::new();
    let n = tokio::time::timeout(std::time::Duration::from_secs(2), idle.reader.read_line(&mut line))
        .await
        .expect("server should have closed the idle connection well within 2s")
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn long_disconnect_forfeits_to_survivor() {
    let mut config = test_config();
    config.ping_interval_s = 1;
    config.missed_pong_threshold = 1;
    config.long_disconnect_s = 1;
    let addr = spawn_server(config).await;

    let (john, mut ann) = start_game(addr).await;
    drop(john);

    let end = ann.recv_skip_pings(OpCode::GameEnd).await;
    assert_eq!(end.data, "ann,opponent_timeout");
}
