//! Process-wide session and room tables (spec §4.5).
//!
//! Two tables, each guarded by its own lock: discipline is *never* hold the
//! room lock while acquiring the session lock — always release one before
//! taking the other, and re-validate the looked-up entity after
//! reacquiring. This is the same lock-then-clone-then-drop shape the
//! `Carbonfreezer-multiplayer` relay server's `AppState` uses around its
//! `rooms`/`configs` tables.

use crate::config::Config;
use crate::error::{AuthError, RoomError};
use crate::room::Room;
use crate::session::Session;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub struct Registry {
    pub sessions: Mutex<HashMap<String, Arc<Session>>>,
    pub rooms: Mutex<HashMap<String, Room>>,
    pub config: RwLock<Config>,
    /// Live accepted-connection count, tracked independently of `sessions`
    /// since a connection occupies a slot before `LOGIN` ever registers it.
    connections: AtomicUsize,
}

#[derive(Debug, Serialize)]
pub struct RoomSummary {
    pub id: u64,
    pub name: String,
    pub players: usize,
    pub state: &'static str,
}

impl Registry {
    pub fn new(config: Config) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            rooms: Mutex::new(HashMap::new()),
            config: RwLock::new(config),
            connections: AtomicUsize::new(0),
        }
    }

    /// Reserves one connection slot against `max_clients` (spec §6
    /// "server-wide connection cap"). Returns `false` when the server is
    /// already at capacity; the caller must not count that connection and
    /// should close it instead. Pairs with [`Registry::release_connection`].
    pub async fn try_acquire_connection(&self) -> bool {
        let max_clients = self.config.read().await.max_clients;
        loop {
            let current = self.connections.load(Ordering::Acquire);
            if current >= max_clients {
                return false;
            }
            if self
                .connections
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    pub fn release_connection(&self) {
        self.connections.fetch_sub(1, Ordering::AcqRel);
    }

    /// Registers a brand-new session under `name`, failing if the name is
    /// already in use by a session that isn't eligible for cleanup (spec §7
    /// "AuthError").
    pub async fn login(&self, name: &str, session: Arc<Session>) -> Result<(), AuthError> {
        if name.trim().is_empty() {
            return Err(AuthError::EmptyName);
        }
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(name) {
            return Err(AuthError::NameTaken);
        }
        sessions.insert(name.to_string(), session);
        Ok(())
    }

    pub async fn get_session(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(name).cloned()
    }

    pub async fn remove_session(&self, name: &str) {
        self.sessions.lock().await.remove(name);
    }

    /// `create_room` (spec §4.4): registers an owner-only waiting room if
    /// the name is not already taken.
    pub async fn create_room(&self, owner: &str, room_name: &str) -> Result<(), RoomError> {
        let mut rooms = self.rooms.lock().await;
        if rooms.contains_key(room_name) {
            return Err(RoomError::NameTaken);
        }
        let max_rooms = self.config.read().await.max_rooms;
        if rooms.len() >= max_rooms {
            return Err(RoomError::ServerAtCapacity);
        }
        rooms.insert(room_name.to_string(), Room::new(room_name.to_string(), owner.to_string()));
        Ok(())
    }

    /// Snapshot used by `LIST_ROOMS` (spec §4.5): the room table is
    /// snapshotted under the lock, and the JSON-like array is built after
    /// the lock is released.
    pub async fn list_rooms(&self) -> Vec<RoomSummary> {
        let rooms = self.rooms.lock().await;
        let mut id = 0u64;
        let out = rooms
            .values()
            .map(|room| {
                id += 1;
                RoomSummary {
                    id,
                    name: room.name.clone(),
                    players: room.occupant_count(),
                    state: match room.state {
                        crate::room::RoomState::Waiting => "waiting",
                        crate::room::RoomState::Active => "active",
                        crate::room::RoomState::Paused => "paused",
                        crate::room::RoomState::Finished => "finished",
                    },
                }
            })
            .collect();
        drop(rooms);
        out
    }

    /// Runs `f` against the named room under the room lock, re-validating
    /// its existence first — the shape every room-mutating handler uses so
    /// no handler ever reaches across both tables at once.
    pub async fn with_room<R>(&self, room_name: &str, f: impl FnOnce(&mut Room) -> R) -> Option<R> {
        let mut rooms = self.rooms.lock().await;
        rooms.get_mut(room_name).map(f)
    }

    pub async fn remove_room(&self, room_name: &str) {
        self.rooms.lock().await.remove(room_name);
    }

    /// Drops every room whose state is `Finished` (periodic sweep fallback,
    /// mirroring the teacher's `cleanup_dead_rooms` watchdog).
    pub async fn sweep_finished_rooms(&self) -> Vec<String> {
        let mut rooms = self.rooms.lock().await;
        let finished: Vec<String> = rooms
            .iter()
            .filter(|(_, r)| r.state == crate::room::RoomState::Finished)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &finished {
            rooms.remove(name);
        }
        finished
    }

    /// All session names currently known (used by the heartbeat sweep).
    pub async fn session_names(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }
}
