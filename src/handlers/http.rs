use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use std::sync::Arc;

use crate::handlers::models::{HealthInfo, LobbyInfo};
use crate::handlers::ws::ConnectionHub;
use crate::state::server_state::LobbyRegistry;
use crate::utils::config::Config;

/// App state for HTTP and websocket handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<LobbyRegistry>,
    pub hub: Arc<ConnectionHub>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(registry: Arc<LobbyRegistry>, config: Arc<Config>) -> Self {
        Self {
            registry,
            hub: Arc::new(ConnectionHub::new()),
            config,
        }
    }
}

pub async fn health(State(app_state): State<AppState>) -> Json<HealthInfo> {
    Json(HealthInfo {
        status: "ok".to_string(),
        lobbies: app_state.registry.lobby_count(),
        connections: app_state.hub.connection_count(),
    })
}

/// Thin HTTP handler: List all lobbies
pub async fn list_lobbies(State(app_state): State<AppState>) -> Json<Vec<LobbyInfo>> {
    let mut lobbies_info = Vec::new();

    for handle in app_state.registry.lobby_handles() {
        let lobby = handle.read().await;
        if !lobby.closed {
            lobbies_info.push(LobbyInfo::from(&*lobby));
        }
    }
    lobbies_info.sort_by(|a, b| a.name.cmp(&b.name));

    Json(lobbies_info)
}

/// Thin HTTP handler: Get lobby info
pub async fn get_lobby(
    State(app_state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<LobbyInfo>, StatusCode> {
    app_state
        .registry
        .with_lobby(&token, |lobby| LobbyInfo::from(lobby))
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stats::MemoryStatsSink;
    use crate::imaging::MemoryAssetSource;

    fn app_state() -> AppState {
        let config = Arc::new(Config::default());
        let registry = Arc::new(LobbyRegistry::new(
            config.clone(),
            Arc::new(MemoryAssetSource::new()),
            Arc::new(MemoryStatsSink::new()),
        ));
        AppState::new(registry, config)
    }

    #[tokio::test]
    async fn test_list_and_get_lobbies() {
        let app = app_state();
        let (a, b) = (app.registry.connect(), app.registry.connect());
        let (token, _) = app.registry.create_lobby(a, "ana", "Zoo").await.unwrap();
        app.registry.create_lobby(b, "bo", "Arena").await.unwrap();

        let Json(listed) = list_lobbies(State(app.clone())).await;
        let names: Vec<&str> = listed.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["Arena", "Zoo"]);

        let Json(info) = get_lobby(State(app.clone()), Path(token.clone())).await.unwrap();
        assert_eq!(info.token, token);
        assert_eq!(info.players, vec!["ana".to_string()]);
        assert_eq!(info.max_players, 4);
        assert!(!info.in_game);

        let missing = get_lobby(State(app.clone()), Path("nope".to_string())).await;
        assert_eq!(missing.err(), Some(StatusCode::NOT_FOUND));

        let Json(status) = health(State(app)).await;
        assert_eq!(status.lobbies, 2);
    }
}
