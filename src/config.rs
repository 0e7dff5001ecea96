//! Server-wide configuration (spec §6 "Configuration").
//!
//! Follows the teacher's CLI-first style (`clap::Parser` derive, same as
//! `src/bin/server.rs`/`src/bin/client.rs`) and adds an optional TOML
//! override file for the knobs that aren't worth a dedicated flag.

use clap::{ArgAction, Parser};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// `serve <port> [bind_address]` — spec §6 "CLI".
#[derive(Parser, Debug)]
#[command(
    name = "server",
    version,
    about = "Checkers — dedicated multiplayer server",
    long_about = "Accepts many concurrent TCP clients, pairs them into rooms, \
                  and referees turn-based checkers games. \
                  Protocol is the line-framed DENTCP wire format; see src/codec.rs."
)]
pub struct Args {
    /// Port to listen on.
    pub port: u16,

    /// Address to bind to.
    #[arg(default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Increase output verbosity (-v verbose, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Optional TOML file overriding the tuning defaults below.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// All tunables named in spec §6's "Configuration" paragraph.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_clients: usize,
    pub max_rooms: usize,
    pub max_frame: usize,
    pub ping_interval_s: u64,
    pub pong_timeout_s: u64,
    pub missed_pong_threshold: u32,
    pub short_disconnect_s: u64,
    pub long_disconnect_s: u64,
    /// Connection-dead timeout when not even a single PONG is seen.
    pub connection_timeout_s: u64,
    /// Violations-to-kick threshold for codec failures.
    pub violation_limit_codec: u32,
    /// Violations-to-kick threshold for phase-whitelist rejections.
    pub violation_limit_phase: u32,
    pub violation_reset_s: u64,
    /// Deadline for completing the initial accept/handshake (spec §5 "Timeouts").
    pub connect_deadline_s: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_clients: 100,
            max_rooms: 50,
            max_frame: 8192,
            ping_interval_s: 5,
            pong_timeout_s: 3,
            missed_pong_threshold: 3,
            short_disconnect_s: 40,
            long_disconnect_s: 80,
            connection_timeout_s: 100,
            violation_limit_codec: 1,
            violation_limit_phase: 3,
            violation_reset_s: 60,
            connect_deadline_s: 5,
        }
    }
}

impl Config {
    /// Loads defaults, then overlays a TOML file if one was given.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, String> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
        toml::from_str(&raw).map_err(|e| format!("failed to parse {}: {e}", path.display()))
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_s)
    }
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_s)
    }
    pub fn short_disconnect(&self) -> Duration {
        Duration::from_secs(self.short_disconnect_s)
    }
    pub fn long_disconnect(&self) -> Duration {
        Duration::from_secs(self.long_disconnect_s)
    }
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_s)
    }
    pub fn violation_reset(&self) -> Duration {
        Duration::from_secs(self.violation_reset_s)
    }
    pub fn connect_deadline(&self) -> Duration {
        Duration::from_secs(self.connect_deadline_s)
    }
}
