use serde::{Deserialize, Serialize};

use crate::state::lobby::Lobby;

/// HTTP Request/Response DTOs

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LobbyInfo {
    pub token: String,
    pub name: String,
    pub player_count: usize,
    pub max_players: usize,
    pub players: Vec<String>,
    pub in_game: bool,
}

impl From<&Lobby> for LobbyInfo {
    fn from(lobby: &Lobby) -> Self {
        Self {
            token: lobby.token.clone(),
            name: lobby.name.clone(),
            player_count: lobby.members.len(),
            max_players: lobby.capacity,
            players: lobby.nicknames(),
            in_game: lobby.in_game(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HealthInfo {
    pub status: String,
    pub lobbies: usize,
    pub connections: usize,
}
