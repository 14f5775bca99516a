use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::domain::game::GameOrchestrator;
use crate::domain::lobbies;
use crate::domain::phase::PhaseInput;
use crate::domain::stats::StatsSink;
use crate::error::LobbyError;
use crate::imaging::ImageAssetSource;
use crate::state::events::{Envelope, Outbound, SessionId};
use crate::state::lobby::{Lobby, LobbyToken, ReadyStatus};
use crate::utils::config::Config;
use crate::utils::token::mint_token;

/// What the registry knows about one connection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub lobby: Option<LobbyToken>,
    pub nickname: Option<String>,
}

/// All lobbies and sessions, partitioned by lobby.
///
/// Each lobby sits behind its own lock so operations on different lobbies
/// never contend. DashMap guards are never held across an `.await`: the
/// lobby `Arc` is cloned out first and then locked.
pub struct LobbyRegistry {
    lobbies: DashMap<LobbyToken, Arc<RwLock<Lobby>>>,
    names: DashMap<String, LobbyToken>,
    sessions: DashMap<SessionId, Session>,
    next_session_id: AtomicU64,
    config: Arc<Config>,
    assets: Arc<dyn ImageAssetSource>,
    stats: Arc<dyn StatsSink>,
}

impl LobbyRegistry {
    pub fn new(
        config: Arc<Config>,
        assets: Arc<dyn ImageAssetSource>,
        stats: Arc<dyn StatsSink>,
    ) -> Self {
        Self {
            lobbies: DashMap::new(),
            names: DashMap::new(),
            sessions: DashMap::new(),
            next_session_id: AtomicU64::new(1),
            config,
            assets,
            stats,
        }
    }

    /// Register a new connection (lock-free id)
    pub fn connect(&self) -> SessionId {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        self.sessions.insert(id, Session::default());
        log::info!("Session {} connected", id);
        id
    }

    pub async fn create_lobby(
        &self,
        session: SessionId,
        nickname: &str,
        lobby_name: &str,
    ) -> Result<(LobbyToken, Vec<Outbound>), LobbyError> {
        self.ensure_unbound(session)?;

        // names before lobbies, never the other way round
        let name_slot = match self.names.entry(lobby_name.to_string()) {
            Entry::Occupied(_) => return Err(LobbyError::DuplicateLobbyName),
            Entry::Vacant(slot) => slot,
        };

        let token = loop {
            let candidate = mint_token();
            if let Entry::Vacant(slot) = self.lobbies.entry(candidate.clone()) {
                let mut lobby = Lobby::new(
                    candidate.clone(),
                    lobby_name.to_string(),
                    self.config.lobby_capacity,
                );
                lobbies::add_member(&mut lobby, session, nickname)?;
                slot.insert(Arc::new(RwLock::new(lobby)));
                break candidate;
            }
        };
        name_slot.insert(token.clone());

        self.bind(session, &token, nickname);
        log::info!("Lobby '{}' [{}] created by {}", lobby_name, token, nickname);

        let events = vec![Outbound::to_one(
            session,
            Envelope::new("create_lobby", json!({ "lobby_token": token })),
        )];
        Ok((token, events))
    }

    pub async fn join_lobby(
        &self,
        session: SessionId,
        nickname: &str,
        token: &str,
    ) -> Result<Vec<Outbound>, LobbyError> {
        self.ensure_unbound(session)?;
        let handle = self.handle(token).ok_or(LobbyError::LobbyNotFound {
            field: "lobby_token",
        })?;

        let mut lobby = handle.write().await;
        if lobby.closed {
            return Err(LobbyError::LobbyNotFound {
                field: "lobby_token",
            });
        }
        lobbies::add_member(&mut lobby, session, nickname)?;
        self.bind(session, token, nickname);
        log::debug!("{} joined lobby [{}]", nickname, token);

        let mut joined = serde_json::Map::new();
        joined.insert(nickname.to_string(), Value::from("joined"));
        Ok(vec![
            Outbound::to_many(
                lobby.member_sessions(),
                Envelope::new("join_lobby", Value::Object(joined)),
            ),
            Outbound::to_one(
                session,
                Envelope::new(
                    "join_lobby",
                    json!({ "lobby_token": token, "connected": lobby.nicknames() }),
                ),
            ),
        ])
    }

    /// Join by display name, the way clients address lobbies
    pub async fn join_lobby_by_name(
        &self,
        session: SessionId,
        nickname: &str,
        lobby_name: &str,
    ) -> Result<Vec<Outbound>, LobbyError> {
        let not_found = LobbyError::LobbyNotFound { field: "lobby_name" };
        let token = self
            .names
            .get(lobby_name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| not_found.clone())?;

        self.join_lobby(session, nickname, &token)
            .await
            .map_err(|e| match e {
                LobbyError::LobbyNotFound { .. } => not_found,
                other => other,
            })
    }

    pub async fn leave_lobby(&self, session: SessionId) -> Result<Vec<Outbound>, LobbyError> {
        let token = self.session_lobby(session).ok_or(LobbyError::NotInLobby)?;
        let Some(handle) = self.handle(&token) else {
            self.unbind(session);
            return Err(LobbyError::NotInLobby);
        };

        let mut lobby = handle.write().await;
        let nickname = lobbies::remove_member(&mut lobby, session);
        self.unbind(session);
        let Some(nickname) = nickname else {
            return Err(LobbyError::NotInLobby);
        };
        log::debug!("{} left lobby [{}]", nickname, token);

        if lobby.is_empty() {
            lobby.closed = true;
            self.lobbies.remove(&token);
            self.names.remove_if(&lobby.name, |_, owner| *owner == token);
            log::info!("Lobby '{}' [{}] destroyed", lobby.name, token);
            return Ok(Vec::new());
        }

        let mut left = serde_json::Map::new();
        left.insert(nickname, Value::from("left"));
        let mut events = vec![Outbound::to_many(
            lobby.member_sessions(),
            Envelope::new("leave_lobby", Value::Object(left)),
        )];

        if let Some(game) = lobby.game.as_mut() {
            game.remove_player(session);
            events.extend(self.settle_game(&mut lobby));
        }
        Ok(events)
    }

    /// Record a ready status and start the game once every seat is taken
    /// and ready. At most one game is ever created per lobby.
    pub async fn set_ready(
        &self,
        session: SessionId,
        status: &str,
    ) -> Result<Vec<Outbound>, LobbyError> {
        let status = ReadyStatus::parse(status)?;
        let token = self.session_lobby(session).ok_or(LobbyError::NotInLobby)?;
        let handle = self.handle(&token).ok_or(LobbyError::NotInLobby)?;

        let mut lobby = handle.write().await;
        let previous = lobbies::set_ready(&mut lobby, session, status)?;
        log::debug!("Session {} is {} in [{}]", session, status.as_str(), token);

        let mut events = vec![Outbound::to_many(
            lobby.member_sessions(),
            Envelope::new("ready_up", json!({ "ready": lobbies::ready_map(&lobby) })),
        )];

        if lobby.game.is_none() && lobbies::all_ready(&lobby) {
            let mut game =
                GameOrchestrator::standard(lobby.roster(), &self.config, self.assets.clone());
            match game.start() {
                Ok(started) => {
                    log::info!("Lobby [{}] starting game", token);
                    lobby.game = Some(game);
                    events.push(Outbound::to_many(
                        lobby.member_sessions(),
                        Envelope::bare("start"),
                    ));
                    events.extend(started);
                }
                Err(e) => {
                    log::error!("Lobby [{}] could not start game: {}", token, e);
                    restore_ready(&mut lobby, session, previous);
                    return Err(e.into());
                }
            }
        }
        Ok(events)
    }

    /// Forward a phase-scoped message to the lobby's running game
    pub async fn route_game_message(
        &self,
        session: SessionId,
        kind: &str,
        data: &Value,
    ) -> Result<Vec<Outbound>, LobbyError> {
        let token = self.session_lobby(session).ok_or(LobbyError::NoActiveGame)?;
        let handle = self.handle(&token).ok_or(LobbyError::NoActiveGame)?;
        let running = has_running_game(&*handle.read().await);
        if !running {
            return Err(LobbyError::NoActiveGame);
        }

        // decode outside the lobby lock
        let input = PhaseInput::parse(kind, data)?;

        let prepared = {
            let lobby = handle.read().await;
            match lobby.game.as_ref() {
                Some(game) if !game.is_complete() => game.prepare(session, input)?,
                _ => return Err(LobbyError::NoActiveGame),
            }
        };
        // scoring runs with no lobby lock held
        let input = prepared.resolve();

        let mut lobby = handle.write().await;
        let game = match lobby.game.as_mut() {
            Some(game) if !game.is_complete() => game,
            _ => return Err(LobbyError::NoActiveGame),
        };
        let mut events = game.receive(session, input)?;
        events.extend(self.settle_game(&mut lobby));
        Ok(events)
    }

    /// Drop the connection and everything it owns. Safe at any point in the
    /// session's life.
    pub async fn disconnect(&self, session: SessionId) -> Vec<Outbound> {
        let events = match self.leave_lobby(session).await {
            Ok(events) => events,
            Err(LobbyError::NotInLobby) => Vec::new(),
            Err(e) => {
                log::warn!("Session {} left uncleanly: {}", session, e);
                Vec::new()
            }
        };
        self.sessions.remove(&session);
        log::info!("Session {} disconnected", session);
        events
    }

    /// Advance past every finished phase. Reports the summary once the game
    /// completes.
    fn settle_game(&self, lobby: &mut Lobby) -> Vec<Outbound> {
        let mut events = Vec::new();
        let Some(game) = lobby.game.as_mut() else {
            return events;
        };
        let was_complete = game.is_complete();

        while game.active_finished() {
            match game.advance() {
                Ok(advanced) => events.extend(advanced),
                Err(e) => {
                    log::error!("Lobby [{}] could not advance: {}", lobby.token, e);
                    events.push(Outbound::to_many(
                        lobby.members.keys().copied(),
                        Envelope::error("phase_end", "game", &e.to_string()),
                    ));
                    break;
                }
            }
        }

        if !was_complete && game.is_complete() {
            self.stats.record(&lobby.token, &game.summary());
        }
        events
    }

    pub fn session_lobby(&self, session: SessionId) -> Option<LobbyToken> {
        self.sessions
            .get(&session)
            .and_then(|entry| entry.lobby.clone())
    }

    pub fn session(&self, session: SessionId) -> Option<Session> {
        self.sessions.get(&session).map(|entry| entry.value().clone())
    }

    pub fn lobby_token_for(&self, lobby_name: &str) -> Option<LobbyToken> {
        self.names.get(lobby_name).map(|entry| entry.value().clone())
    }

    /// Snapshot of all lobby handles (for listings)
    pub fn lobby_handles(&self) -> Vec<Arc<RwLock<Lobby>>> {
        self.lobbies
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub async fn with_lobby<R>(&self, token: &str, f: impl FnOnce(&Lobby) -> R) -> Option<R> {
        let handle = self.handle(token)?;
        let lobby = handle.read().await;
        Some(f(&lobby))
    }

    pub fn lobby_count(&self) -> usize {
        self.lobbies.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn handle(&self, token: &str) -> Option<Arc<RwLock<Lobby>>> {
        self.lobbies.get(token).map(|entry| entry.value().clone())
    }

    fn ensure_unbound(&self, session: SessionId) -> Result<(), LobbyError> {
        match self.session_lobby(session) {
            Some(_) => Err(LobbyError::AlreadyInLobby),
            None => Ok(()),
        }
    }

    fn bind(&self, session: SessionId, token: &str, nickname: &str) {
        let mut entry = self.sessions.entry(session).or_default();
        entry.lobby = Some(token.to_string());
        entry.nickname = Some(nickname.to_string());
    }

    fn unbind(&self, session: SessionId) {
        if let Some(mut entry) = self.sessions.get_mut(&session) {
            entry.lobby = None;
            entry.nickname = None;
        }
    }
}

fn has_running_game(lobby: &Lobby) -> bool {
    lobby
        .game
        .as_ref()
        .map(|game| !game.is_complete())
        .unwrap_or(false)
}

fn restore_ready(lobby: &mut Lobby, session: SessionId, previous: Option<ReadyStatus>) {
    let Some(nickname) = lobby.nickname_of(session).map(str::to_string) else {
        return;
    };
    match previous {
        Some(status) => lobby.ready.insert(nickname, status),
        None => lobby.ready.remove(&nickname),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stats::MemoryStatsSink;
    use crate::imaging::MemoryAssetSource;
    use image::{DynamicImage, GrayImage, Luma};
    use tokio_test::{assert_err, assert_ok};

    fn assets() -> Arc<MemoryAssetSource> {
        let assets = MemoryAssetSource::new();
        let drawing = GrayImage::from_fn(32, 32, |x, y| {
            if x > 8 && x < 24 && y > 4 && y < 28 {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        assets.insert("assets/drawings/box.png", DynamicImage::ImageLuma8(drawing));
        assets.insert("assets/background.png", DynamicImage::new_rgb8(16, 16));
        Arc::new(assets)
    }

    fn registry_with(capacity: usize) -> LobbyRegistry {
        let config = Config {
            lobby_capacity: capacity,
            ..Config::default()
        };
        LobbyRegistry::new(
            Arc::new(config),
            assets(),
            Arc::new(MemoryStatsSink::new()),
        )
    }

    #[tokio::test]
    async fn test_registry_creation() {
        let registry = registry_with(4);
        assert_eq!(registry.lobby_count(), 0);
        assert_eq!(registry.connect(), 1);
        assert_eq!(registry.connect(), 2);
        assert_eq!(registry.session_count(), 2);
    }

    #[tokio::test]
    async fn test_create_and_duplicate_name() {
        let registry = registry_with(4);
        let (bob, al) = (registry.connect(), registry.connect());

        let (token, events) = assert_ok!(registry.create_lobby(bob, "bob", "Arena").await);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].envelope.data, Some(json!({ "lobby_token": token })));

        let err = assert_err!(registry.create_lobby(al, "al", "Arena").await);
        assert_eq!(err, LobbyError::DuplicateLobbyName);
        assert_eq!(registry.lobby_count(), 1);
        assert_eq!(registry.session_lobby(al), None);
    }

    #[tokio::test]
    async fn test_join_broadcasts_to_everyone() {
        let registry = registry_with(4);
        let (a, b) = (registry.connect(), registry.connect());
        let (token, _) = registry.create_lobby(a, "ana", "Arena").await.unwrap();

        let events = assert_ok!(registry.join_lobby_by_name(b, "bo", "Arena").await);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].to.as_slice(), &[a, b]);
        assert_eq!(events[0].envelope.data, Some(json!({ "bo": "joined" })));
        assert_eq!(events[1].to.as_slice(), &[b]);
        assert_eq!(
            events[1].envelope.data,
            Some(json!({ "lobby_token": token, "connected": ["ana", "bo"] }))
        );
        assert_eq!(registry.session(b).unwrap().nickname.as_deref(), Some("bo"));
    }

    #[tokio::test]
    async fn test_join_errors() {
        let registry = registry_with(4);
        let (a, b) = (registry.connect(), registry.connect());
        registry.create_lobby(a, "ana", "Arena").await.unwrap();

        assert_eq!(
            registry.join_lobby_by_name(b, "bo", "Nowhere").await,
            Err(LobbyError::LobbyNotFound { field: "lobby_name" })
        );
        assert_eq!(
            registry.join_lobby(b, "bo", "no-such-token").await,
            Err(LobbyError::LobbyNotFound { field: "lobby_token" })
        );
        assert_eq!(
            registry.join_lobby_by_name(b, "ana", "Arena").await,
            Err(LobbyError::DuplicateNickname)
        );
        assert_eq!(
            registry.join_lobby_by_name(a, "again", "Arena").await,
            Err(LobbyError::AlreadyInLobby)
        );
    }

    #[tokio::test]
    async fn test_last_leave_destroys_lobby() {
        let registry = registry_with(4);
        let (a, b) = (registry.connect(), registry.connect());
        registry.create_lobby(a, "ana", "Arena").await.unwrap();
        registry.join_lobby_by_name(b, "bo", "Arena").await.unwrap();

        let events = registry.leave_lobby(a).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].to.as_slice(), &[b]);
        assert_eq!(events[0].envelope.data, Some(json!({ "ana": "left" })));

        assert!(registry.disconnect(b).await.is_empty());
        assert_eq!(registry.lobby_count(), 0);
        assert_eq!(registry.lobby_token_for("Arena"), None);
        assert_eq!(registry.session(b), None);

        // name is free again
        let c = registry.connect();
        assert_ok!(registry.create_lobby(c, "cy", "Arena").await);
    }

    #[tokio::test]
    async fn test_leave_without_lobby() {
        let registry = registry_with(4);
        let a = registry.connect();
        assert_eq!(registry.leave_lobby(a).await, Err(LobbyError::NotInLobby));
    }

    #[tokio::test]
    async fn test_invalid_status_leaves_state_alone() {
        let registry = registry_with(4);
        let a = registry.connect();
        let (token, _) = registry.create_lobby(a, "ana", "Arena").await.unwrap();

        assert_eq!(
            registry.set_ready(a, "maybe").await,
            Err(LobbyError::InvalidReadyStatus)
        );
        let ready = registry
            .with_lobby(&token, |lobby| lobby.ready.clone())
            .await
            .unwrap();
        assert_eq!(ready.get("ana"), Some(&ReadyStatus::NotReady));
    }

    #[tokio::test]
    async fn test_phase_message_without_game() {
        let registry = registry_with(4);
        let a = registry.connect();
        assert_eq!(
            registry.route_game_message(a, "phase_2", &json!({ "id": 1 })).await,
            Err(LobbyError::NoActiveGame)
        );
        registry.create_lobby(a, "ana", "Arena").await.unwrap();
        assert_eq!(
            registry.route_game_message(a, "phase_2", &json!({ "id": 1 })).await,
            Err(LobbyError::NoActiveGame)
        );
    }

    #[tokio::test]
    async fn test_ready_threshold_starts_one_game() {
        let registry = registry_with(2);
        let (a, b) = (registry.connect(), registry.connect());
        let (token, _) = registry.create_lobby(a, "ana", "Arena").await.unwrap();
        registry.join_lobby(b, "bo", &token).await.unwrap();

        let events = registry.set_ready(a, "ready").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].envelope.data,
            Some(json!({ "ready": { "ana": "ready", "bo": "not ready" } }))
        );

        let events = registry.set_ready(b, "ready").await.unwrap();
        let kinds: Vec<&str> = events.iter().map(|e| e.envelope.kind.as_str()).collect();
        assert_eq!(kinds, vec!["ready_up", "start", "phase_start", "phase_start"]);
        assert!(events[2].is_for(a) && !events[2].is_for(b));
        assert!(events[3].is_for(b) && !events[3].is_for(a));

        let in_game = registry.with_lobby(&token, Lobby::in_game).await;
        assert_eq!(in_game, Some(true));

        // ready toggles after the start never build another game
        let events = registry.set_ready(a, "not ready").await.unwrap();
        assert_eq!(events.len(), 1);
        let events = registry.set_ready(a, "ready").await.unwrap();
        assert_eq!(events.len(), 1);
        let index = registry
            .with_lobby(&token, |lobby| lobby.game.as_ref().map(|g| g.active_index()))
            .await;
        assert_eq!(index, Some(Some(0)));
    }

    #[tokio::test]
    async fn test_failed_start_restores_ready_state() {
        let config = Config {
            lobby_capacity: 1,
            ..Config::default()
        };
        let registry = LobbyRegistry::new(
            Arc::new(config),
            Arc::new(MemoryAssetSource::new()),
            Arc::new(MemoryStatsSink::new()),
        );
        let a = registry.connect();
        let (token, _) = registry.create_lobby(a, "ana", "Solo").await.unwrap();

        let err = assert_err!(registry.set_ready(a, "ready").await);
        assert!(matches!(err, LobbyError::Game(_)));
        let (ready, in_game) = registry
            .with_lobby(&token, |lobby| (lobby.ready.get("ana").copied(), lobby.in_game()))
            .await
            .unwrap();
        assert_eq!(ready, Some(ReadyStatus::NotReady));
        assert!(!in_game);
    }
}
