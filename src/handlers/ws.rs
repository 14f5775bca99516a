use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::handlers::http::AppState;
use crate::handlers::messages::{handle_message, parse_inbound, rejection};
use crate::state::events::{deliver, Envelope, SessionId, Transport};

/// Outgoing queues of every open socket
#[derive(Default)]
pub struct ConnectionHub {
    senders: DashMap<SessionId, mpsc::UnboundedSender<String>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: SessionId) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.insert(session, tx);
        rx
    }

    pub fn unregister(&self, session: SessionId) {
        self.senders.remove(&session);
    }

    pub fn connection_count(&self) -> usize {
        self.senders.len()
    }
}

impl Transport for ConnectionHub {
    fn send(&self, recipients: &[SessionId], envelope: &Envelope) {
        let text = match serde_json::to_string(envelope) {
            Ok(text) => text,
            Err(e) => {
                log::error!("Could not serialize {} envelope: {}", envelope.kind, e);
                return;
            }
        };
        for session in recipients {
            match self.senders.get(session) {
                Some(tx) => {
                    if tx.send(text.clone()).is_err() {
                        log::warn!("Session {} is gone, dropping {}", session, envelope.kind);
                    }
                }
                None => log::debug!("No connection for session {}", session),
            }
        }
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(app): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(app, socket))
}

async fn handle_socket(app: AppState, socket: WebSocket) {
    let session = app.registry.connect();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut outbox = app.hub.register(session);

    let writer = tokio::spawn(async move {
        while let Some(text) = outbox.recv().await {
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => {
                let events = match parse_inbound(&text) {
                    Ok(message) => handle_message(&app.registry, session, &message).await,
                    Err(e) => vec![rejection(session, &e)],
                };
                deliver(app.hub.as_ref(), events);
            }
            Message::Close(_) => break,
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    let events = app.registry.disconnect(session).await;
    app.hub.unregister(session);
    deliver(app.hub.as_ref(), events);
    writer.abort();
}
