//! Room container and lifecycle (spec §3 "Room", §4.4 data half).

use crate::rules::Game;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    Waiting,
    Active,
    Paused,
    Finished,
}

/// Named container with up to two player slots and an embedded [`Game`].
///
/// Invariants (spec §3): `players.len() <= 2`; `state == Active` implies
/// both slots are filled; `state == Paused` implies the room was active and
/// exactly one occupant is currently disconnected; `Finished` is terminal.
pub struct Room {
    pub name: String,
    pub owner: String,
    pub players: Vec<String>,
    pub state: RoomState,
    pub game: Option<Game>,
    /// Set while paused: the occupant whose disconnect caused the pause.
    pub paused_player: Option<String>,
}

impl Room {
    pub fn new(name: String, owner: String) -> Self {
        Self {
            name,
            owner: owner.clone(),
            players: vec![owner],
            state: RoomState::Waiting,
            game: None,
            paused_player: None,
        }
    }

    pub fn occupant_count(&self) -> usize {
        self.players.len()
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= 2
    }

    pub fn contains(&self, player: &str) -> bool {
        self.players.iter().any(|p| p == player)
    }

    /// Adds the second occupant and seeds the `Game`, transitioning the
    /// room to `Active` (spec §4.4 `join_room`).
    pub fn join(&mut self, player: String) -> Result<(), &'static str> {
        if self.is_full() {
            return Err("room is full");
        }
        if self.contains(&player) {
            return Err("player already in this room");
        }
        self.players.push(player);
        if self.players.len() == 2 {
            let game = Game::new(self.players[0].clone(), self.players[1].clone());
            self.game = Some(game);
            self.state = RoomState::Active;
        }
        Ok(())
    }

    pub fn opponent_of(&self, player: &str) -> Option<&str> {
        self.players.iter().map(String::as_str).find(|p| *p != player)
    }

    /// Marks the room paused because `player` disconnected (spec §4.6 "Escalation").
    pub fn pause(&mut self, player: &str) -> Result<(), &'static str> {
        if self.state != RoomState::Active {
            return Err("room is not active");
        }
        self.state = RoomState::Paused;
        self.paused_player = Some(player.to_string());
        Ok(())
    }

    /// Resumes a paused room (spec §4.6 "Resume" / §4.7 "Resume").
    pub fn resume(&mut self) -> Result<(), &'static str> {
        if self.state != RoomState::Paused {
            return Err("room is not paused");
        }
        self.state = RoomState::Active;
        self.paused_player = None;
        Ok(())
    }

    pub fn finish(&mut self) {
        self.state = RoomState::Finished;
        if let Some(game) = &mut self.game {
            game.active = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waiting_then_active_on_second_join() {
        let mut room = Room::new("r1".into(), "john".into());
        assert_eq!(room.state, RoomState::Waiting);
        assert_eq!(room.occupant_count(), 1);
        room.join("ann".into()).unwrap();
        assert_eq!(room.state, RoomState::Active);
        assert!(room.game.is_some());
    }

    #[test]
    fn cannot_join_a_full_room() {
        let mut room = Room::new("r1".into(), "john".into());
        room.join("ann".into()).unwrap();
        assert!(room.join("bob".into()).is_err());
    }

    #[test]
    fn pause_requires_active_state() {
        let mut room = Room::new("r1".into(), "john".into());
        assert!(room.pause("john").is_err());
        room.join("ann".into()).unwrap();
        room.pause("ann").unwrap();
        assert_eq!(room.state, RoomState::Paused);
        assert_eq!(room.paused_player.as_deref(), Some("ann"));
    }

    #[test]
    fn resume_requires_paused_state() {
        let mut room = Room::new("r1".into(), "john".into());
        room.join("ann".into()).unwrap();
        assert!(room.resume().is_err());
        room.pause("john").unwrap();
        room.resume().unwrap();
        assert_eq!(room.state, RoomState::Active);
        assert!(room.paused_player.is_none());
    }

    #[test]
    fn finish_is_terminal_state() {
        let mut room = Room::new("r1".into(), "john".into());
        room.join("ann".into()).unwrap();
        room.finish();
        assert_eq!(room.state, RoomState::Finished);
        assert!(!room.game.unwrap().active);
    }

    #[test]
    fn room_monotonicity_sequence() {
        let mut room = Room::new("r1".into(), "john".into());
        let mut seen = vec![room.state];
        room.join("ann".into()).unwrap();
        seen.push(room.state);
        room.pause("ann").unwrap();
        seen.push(room.state);
        room.resume().unwrap();
        seen.push(room.state);
        room.finish();
        seen.push(room.state);
        assert_eq!(
            seen,
            vec![
                RoomState::Waiting,
                RoomState::Active,
                RoomState::Paused,
                RoomState::Active,
                RoomState::Finished,
            ]
        );
    }
}
