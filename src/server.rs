use axum::{routing::get, Router};
use log::info;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::handlers::http::{get_lobby, health, list_lobbies, AppState};
use crate::handlers::ws::ws_handler;
use crate::state::server_state::LobbyRegistry;
use crate::utils::config::Config;

/// Build the router: websocket entry point plus read-only HTTP views
pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/lobbies", get(list_lobbies))
        .route("/lobbies/:token", get(get_lobby))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(app_state)
}

/// Start the HTTP/websocket server and wait for it to stop
pub async fn start_servers(
    registry: Arc<LobbyRegistry>,
    config: Arc<Config>,
) -> Result<(), Box<dyn std::error::Error>> {
    let app_state = AppState::new(registry, config.clone());
    let http_server = init_http_server(app_state, config.bind_addr());

    http_server.await?;
    Ok(())
}

/// Initialize HTTP server
fn init_http_server(app_state: AppState, http_addr: String) -> tokio::task::JoinHandle<()> {
    let app = router(app_state);
    info!("Starting HTTP server on {}", http_addr);

    tokio::spawn(async move {
        let listener = match TcpListener::bind(&http_addr).await {
            Ok(listener) => {
                info!("HTTP server successfully bound to {}", http_addr);
                listener
            }
            Err(e) => {
                log::error!("Failed to bind HTTP server to {}: {}", http_addr, e);
                return;
            }
        };

        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
        {
            log::error!("HTTP server error: {}", e);
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
