use serde_json::Value;

use crate::error::LobbyError;
use crate::state::events::{Outbound, SessionId};
use crate::state::server_state::LobbyRegistry;

/// Action name used for errors on messages with no readable `type`
const UNKNOWN_ACTION: &str = "error";

/// Parse one text frame into a JSON object
pub fn parse_inbound(text: &str) -> Result<Value, LobbyError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|_| LobbyError::UnknownMessageType("invalid json".to_string()))?;
    if !value.is_object() {
        return Err(LobbyError::UnknownMessageType("not an object".to_string()));
    }
    Ok(value)
}

/// Handle one inbound envelope. Failures come back as a single error
/// envelope addressed to the sender.
pub async fn handle_message(
    registry: &LobbyRegistry,
    session: SessionId,
    message: &Value,
) -> Vec<Outbound> {
    let action = message
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN_ACTION);

    match dispatch(registry, session, message).await {
        Ok(events) => events,
        Err(e) => {
            log::debug!("Session {} {} rejected: {:?}", session, action, e);
            vec![Outbound::to_one(session, e.to_envelope(action))]
        }
    }
}

/// Envelope for a frame that never made it to `handle_message`
pub fn rejection(session: SessionId, error: &LobbyError) -> Outbound {
    Outbound::to_one(session, error.to_envelope(UNKNOWN_ACTION))
}

async fn dispatch(
    registry: &LobbyRegistry,
    session: SessionId,
    message: &Value,
) -> Result<Vec<Outbound>, LobbyError> {
    let kind = message
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| LobbyError::MissingField("type".to_string()))?;
    let empty = Value::Null;
    let data = message.get("data").unwrap_or(&empty);

    match kind {
        "create_lobby" => {
            let nickname = field(data, "nickname")?;
            let lobby_name = field(data, "lobby_name")?;
            let (_, events) = registry.create_lobby(session, nickname, lobby_name).await?;
            Ok(events)
        }
        "join_lobby" => {
            let nickname = field(data, "nickname")?;
            match data.get("lobby_token").and_then(Value::as_str) {
                Some(token) => registry.join_lobby(session, nickname, token).await,
                None => {
                    let lobby_name = field(data, "lobby_name")?;
                    registry.join_lobby_by_name(session, nickname, lobby_name).await
                }
            }
        }
        "ready_up" => {
            let status = field(data, "status")?;
            registry.set_ready(session, status).await
        }
        "leave_lobby" => registry.leave_lobby(session).await,
        phase if phase.starts_with("phase_") => {
            registry.route_game_message(session, phase, data).await
        }
        other => Err(LobbyError::UnknownMessageType(other.to_string())),
    }
}

fn field<'a>(data: &'a Value, name: &str) -> Result<&'a str, LobbyError> {
    data.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| LobbyError::MissingField(name.to_string()))
}
