use serde_json::{Map, Value};

use crate::error::LobbyError;
use crate::state::events::SessionId;
use crate::state::lobby::{Lobby, ReadyStatus};

/// Add a member to a lobby. Nothing changes on error.
pub fn add_member(lobby: &mut Lobby, session: SessionId, nickname: &str) -> Result<(), LobbyError> {
    if lobby.in_game() {
        return Err(LobbyError::LobbyFull {
            reason: "game already started",
        });
    }
    if lobby.members.len() >= lobby.capacity {
        return Err(LobbyError::LobbyFull {
            reason: "room is full",
        });
    }
    if lobby.members.values().any(|n| n == nickname) {
        return Err(LobbyError::DuplicateNickname);
    }

    lobby.members.insert(session, nickname.to_string());
    lobby.ready.insert(nickname.to_string(), ReadyStatus::NotReady);
    Ok(())
}

/// Remove a member and their ready entry, returning the nickname
pub fn remove_member(lobby: &mut Lobby, session: SessionId) -> Option<String> {
    let nickname = lobby.members.remove(&session)?;
    lobby.ready.remove(&nickname);
    Some(nickname)
}

/// Record a member's status, returning the previous one
pub fn set_ready(
    lobby: &mut Lobby,
    session: SessionId,
    status: ReadyStatus,
) -> Result<Option<ReadyStatus>, LobbyError> {
    let nickname = lobby
        .members
        .get(&session)
        .ok_or(LobbyError::NotInLobby)?
        .clone();
    Ok(lobby.ready.insert(nickname, status))
}

pub fn ready_count(lobby: &Lobby) -> usize {
    lobby
        .ready
        .values()
        .filter(|s| **s == ReadyStatus::Ready)
        .count()
}

/// Full lobby and every member ready
pub fn all_ready(lobby: &Lobby) -> bool {
    lobby.members.len() == lobby.capacity && ready_count(lobby) == lobby.capacity
}

/// `{nickname: status}` as sent in `ready_up` broadcasts
pub fn ready_map(lobby: &Lobby) -> Value {
    let map: Map<String, Value> = lobby
        .ready
        .iter()
        .map(|(nickname, status)| (nickname.clone(), Value::from(status.as_str())))
        .collect();
    Value::Object(map)
}
