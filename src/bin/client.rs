use checkers_server::codec::{self, OpCode};
use checkers_server::logger::Logger;
use clap::{ArgAction, Parser};
use std::fmt;
use std::io::{self, Write as _};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[command(
    name = "client",
    version,
    about = "Checkers — terminal test client",
    long_about = "Connects to a running checkers server and drives it interactively.\n\
                  Commands:\n  \
                    login <name>\n  \
                    create <room>\n  \
                    join <room>\n  \
                    list\n  \
                    move <room> <r1> <c1> <r2> <c2>\n  \
                    multimove <room> <r1> <c1> <r2> <c2> [<r3> <c3> ...]\n  \
                    leave <room>\n  \
                    reconnect <name> [room]"
)]
struct Args {
    /// Server address to connect to.
    #[arg(default_value = "127.0.0.1:7878")]
    addr: String,

    /// Increase output verbosity (-v verbose, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

enum ClientEvent<'a> {
    Connecting { addr: &'a str },
    Connected { addr: &'a str },
    Sending { frame: &'a str },
    Received { frame: &'a str },
    Disconnected,
}

impl fmt::Display for ClientEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientEvent::Connecting { addr } => write!(f, "Connecting to {addr}…"),
            ClientEvent::Connected { addr } => write!(f, "Connected to {addr}"),
            ClientEvent::Sending { frame } => write!(f, "→ {frame}"),
            ClientEvent::Received { frame } => write!(f, "← {frame}"),
            ClientEvent::Disconnected => write!(f, "Connection closed by server"),
        }
    }
}

/// A validated command ready to become a DENTCP frame.
enum Cmd {
    Login { name: String },
    Create { room: String },
    Join { room: String },
    List,
    Move { room: String, r1: i32, c1: i32, r2: i32, c2: i32 },
    MultiMove { room: String, squares: Vec<(i32, i32)> },
    Leave { room: String },
    Reconnect { room: Option<String>, name: String },
}

impl Cmd {
    fn parse(raw: &str) -> Result<Self, String> {
        let mut t = raw.split_whitespace();
        match t.next().unwrap_or("").to_ascii_lowercase().as_str() {
            "login" => Ok(Self::Login { name: t.next().ok_or("usage: login <name>")?.to_string() }),
            "create" => Ok(Self::Create { room: t.next().ok_or("usage: create <room>")?.to_string() }),
            "join" => Ok(Self::Join { room: t.next().ok_or("usage: join <room>")?.to_string() }),
            "list" => Ok(Self::List),
            "leave" => Ok(Self::Leave { room: t.next().ok_or("usage: leave <room>")?.to_string() }),
            "move" => {
                let room = t.next().ok_or("usage: move <room> <r1> <c1> <r2> <c2>")?.to_string();
                let r1 = parse_i32(&mut t, "r1")?;
                let c1 = parse_i32(&mut t, "c1")?;
                let r2 = parse_i32(&mut t, "r2")?;
                let c2 = parse_i32(&mut t, "c2")?;
                Ok(Self::Move { room, r1, c1, r2, c2 })
            }
            "multimove" => {
                let room = t.next().ok_or("usage: multimove <room> <r1> <c1> <r2> <c2> ...")?.to_string();
                let rest: Vec<&str> = t.collect();
                if rest.len() < 4 || rest.len() % 2 != 0 {
                    return Err("multimove needs at least two row,col pairs".to_string());
                }
                let mut squares = Vec::new();
                for pair in rest.chunks(2) {
                    let r: i32 = pair[0].parse().map_err(|_| "row must be a number".to_string())?;
                    let c: i32 = pair[1].parse().map_err(|_| "col must be a number".to_string())?;
                    squares.push((r, c));
                }
                Ok(Self::MultiMove { room, squares })
            }
            "reconnect" => {
                let name = t.next().ok_or("usage: reconnect <name> [room]")?.to_string();
                let room = t.next().map(str::to_string);
                Ok(Self::Reconnect { room, name })
            }
            "" => Err("empty input".into()),
            kw => Err(format!("unknown command '{kw}'")),
        }
    }

    /// `my_name` is required for every op whose payload embeds the sender's
    /// own name (everything but `LOGIN`, `LIST_ROOMS`, and `RECONNECT_REQUEST`).
    fn to_frame(&self, my_name: Option<&str>) -> Result<String, String> {
        let need_name = || my_name.ok_or_else(|| "log in first".to_string());
        let (op, data) = match self {
            Self::Login { name } => (OpCode::Login, name.clone()),
            Self::Create { room } => (OpCode::CreateRoom, format!("{},{room}", need_name()?)),
            Self::Join { room } => (OpCode::JoinRoom, format!("{},{room}", need_name()?)),
            Self::List => (OpCode::ListRooms, String::new()),
            Self::Leave { room } => (OpCode::LeaveRoom, format!("{room},{}", need_name()?)),
            Self::Move { room, r1, c1, r2, c2 } => {
                (OpCode::Move, format!("{room},{},{r1},{c1},{r2},{c2}", need_name()?))
            }
            Self::MultiMove { room, squares } => {
                let mut parts = vec![room.clone(), need_name()?.to_string(), squares.len().to_string()];
                for (r, c) in squares {
                    parts.push(r.to_string());
                    parts.push(c.to_string());
                }
                (OpCode::MultiMove, parts.join(","))
            }
            Self::Reconnect { room, name } => match room {
                Some(room) => (OpCode::ReconnectRequest, format!("{room},{name}")),
                None => (OpCode::ReconnectRequest, name.clone()),
            },
        };
        codec::serialize(op, &data).map_err(|e| e.to_string())
    }
}

fn parse_i32<'a>(t: &mut impl Iterator<Item = &'a str>, name: &str) -> Result<i32, String> {
    t.next().ok_or_else(|| format!("missing {name}"))?.parse().map_err(|_| format!("{name} must be a whole number"))
}

fn render_frame(frame: &codec::Frame) -> String {
    match frame.op {
        OpCode::GameState => match serde_json::from_str::<serde_json::Value>(&frame.data) {
            Ok(value) => render_board(&value),
            Err(_) => format!("GAME_STATE (unparsable): {}", frame.data),
        },
        OpCode::RoomsList => format!("ROOMS_LIST: {}", frame.data),
        _ => format!("{:?}: {}", frame.op, frame.data),
    }
}

fn render_board(value: &serde_json::Value) -> String {
    let Some(rows) = value.get("board").and_then(|b| b.as_array()) else {
        return format!("GAME_STATE: {value}");
    };
    let mut out = String::from("Board:\n");
    for row in rows {
        let Some(cells) = row.as_array() else { continue };
        for cell in cells {
            let symbol = match cell.as_u64() {
                Some(0) => '.',
                Some(1) => 'w',
                Some(2) => 'W',
                Some(3) => 'b',
                Some(4) => 'B',
                _ => '?',
            };
            out.push(symbol);
            out.push(' ');
        }
        out.push('\n');
    }
    if let Some(turn) = value.get("current_turn").and_then(|v| v.as_str()) {
        out.push_str(&format!("turn: {turn}\n"));
    }
    out
}

fn print_prompt() {
    print!("> ");
    io::stdout().flush().ok();
}

fn print_help() {
    println!("  Commands:");
    println!("    login <name>");
    println!("    create <room>");
    println!("    join <room>");
    println!("    list");
    println!("    move <room> <r1> <c1> <r2> <c2>");
    println!("    multimove <room> <r1> <c1> <r2> <c2> [<r3> <c3> ...]");
    println!("    leave <room>");
    println!("    reconnect <name> [room]");
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let log = Logger::new(args.verbose);

    log.info(ClientEvent::Connecting { addr: &args.addr });
    let stream = match TcpStream::connect(&args.addr).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to connect to {}: {e}", args.addr);
            std::process::exit(1);
        }
    };
    log.info(ClientEvent::Connected { addr: &args.addr });

    let (reader, mut writer) = stream.into_split();
    let mut frame_reader = codec::FrameReader::new(codec::MAX_FRAME_LEN);
    let mut read_buf = [0u8; 4096];
    let mut server_reader = reader;
    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();
    let mut my_name: Option<String> = None;

    print_help();
    print_prompt();

    loop {
        tokio::select! {
            result = server_reader.read(&mut read_buf) => {
                let n = match result {
                    Ok(0) | Err(_) => {
                        log.info(ClientEvent::Disconnected);
                        println!("\nDisconnected from server.");
                        break;
                    }
                    Ok(n) => n,
                };
                let mut chunk: &[u8] = &read_buf[..n];
                loop {
                    match frame_reader.push(chunk) {
                        Ok(Some(line)) => {
                            chunk = b""; // any further frames were already buffered
                            log.trace(ClientEvent::Received { frame: &line });
                            match codec::parse(&line) {
                                Ok(frame) => {
                                    if frame.op == OpCode::Ping {
                                        if let Ok(pong) = codec::serialize(OpCode::Pong, "") {
                                            let _ = writer.write_all(pong.as_bytes()).await;
                                        }
                                        continue;
                                    }
                                    println!("\n{}", render_frame(&frame));
                                }
                                Err(reason) => println!("\n(malformed frame: {reason})"),
                            }
                        }
                        Ok(None) => break,
                        Err(reason) => {
                            println!("\n(frame reader error: {reason})");
                            break;
                        }
                    }
                }
                print_prompt();
            }

            result = stdin_lines.next_line() => {
                let raw = match result {
                    Ok(Some(l)) => l,
                    _ => {
                        println!("\nInput closed.");
                        break;
                    }
                };
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    print_prompt();
                    continue;
                }
                if matches!(trimmed.to_ascii_lowercase().as_str(), "help" | "?") {
                    print_help();
                    print_prompt();
                    continue;
                }
                match Cmd::parse(trimmed) {
                    Ok(cmd) => match cmd.to_frame(my_name.as_deref()) {
                        Ok(frame) => {
                            if let Cmd::Login { name } | Cmd::Reconnect { name, .. } = &cmd {
                                my_name = Some(name.clone());
                            }
                            log.verbose(ClientEvent::Sending { frame: frame.trim_end() });
                            if writer.write_all(frame.as_bytes()).await.is_err() {
                                eprintln!("Failed to send command.");
                                break;
                            }
                        }
                        Err(reason) => {
                            println!("  ? {reason}");
                            print_prompt();
                        }
                    },
                    Err(reason) => {
                        println!("  ? {reason}");
                        print_prompt();
                    }
                }
            }
        }
    }
}
