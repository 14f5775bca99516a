use std::collections::BTreeMap;

use crate::domain::game::GameOrchestrator;
use crate::domain::phase::PhasePlayer;
use crate::error::LobbyError;
use crate::state::events::SessionId;

pub type LobbyToken = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyStatus {
    Ready,
    NotReady,
}

impl ReadyStatus {
    pub fn parse(raw: &str) -> Result<Self, LobbyError> {
        match raw {
            "ready" => Ok(ReadyStatus::Ready),
            "not ready" => Ok(ReadyStatus::NotReady),
            _ => Err(LobbyError::InvalidReadyStatus),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReadyStatus::Ready => "ready",
            ReadyStatus::NotReady => "not ready",
        }
    }
}

/// Lobby state - per-lobby partitioned state
pub struct Lobby {
    pub token: LobbyToken,
    pub name: String,
    pub capacity: usize,
    pub members: BTreeMap<SessionId, String>,
    pub ready: BTreeMap<String, ReadyStatus>,
    pub game: Option<GameOrchestrator>,
    /// Set once the last member left and the lobby was unregistered
    pub closed: bool,
}

impl Lobby {
    pub fn new(token: LobbyToken, name: String, capacity: usize) -> Self {
        Self {
            token,
            name,
            capacity,
            members: BTreeMap::new(),
            ready: BTreeMap::new(),
            game: None,
            closed: false,
        }
    }

    pub fn member_sessions(&self) -> Vec<SessionId> {
        self.members.keys().copied().collect()
    }

    pub fn nicknames(&self) -> Vec<String> {
        self.members.values().cloned().collect()
    }

    pub fn nickname_of(&self, session: SessionId) -> Option<&str> {
        self.members.get(&session).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn in_game(&self) -> bool {
        self.game.is_some()
    }

    pub fn roster(&self) -> Vec<PhasePlayer> {
        self.members
            .iter()
            .map(|(session, nickname)| PhasePlayer::new(*session, nickname.clone()))
            .collect()
    }
}
