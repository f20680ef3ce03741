use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use companion_core::{
    config::load_dotenv, CompanionConfig, GeminiClient, JsonFileStore, SessionController,
};
use std::{env, sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

mod collaborators;
mod launcher;
mod protocol;
mod state;

use launcher::DesktopLauncher;
use protocol::{ClientRequest, ServerEvent};
use state::ApiState;

const DEFAULT_BIND: &str = "127.0.0.1:8765";
const DEFAULT_ENERGY_REFRESH_SECS: u64 = 60;

fn energy_refresh_interval() -> Duration {
    let secs = match env::var("COMPANION_ENERGY_REFRESH_SECS") {
        Ok(raw) => raw.trim().parse::<u64>().ok().filter(|s| *s > 0).unwrap_or_else(|| {
            warn!(
                value = %raw,
                "Invalid COMPANION_ENERGY_REFRESH_SECS; falling back to {}",
                DEFAULT_ENERGY_REFRESH_SECS
            );
            DEFAULT_ENERGY_REFRESH_SECS
        }),
        Err(_) => DEFAULT_ENERGY_REFRESH_SECS,
    };
    Duration::from_secs(secs)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "companion_desktop_backend=info,companion_core=info".into()
            }),
        )
        .init();

    load_dotenv();

    let config = CompanionConfig::from_env();
    info!(config = ?config, "Companion configuration loaded");

    let controller = SessionController::new(
        Arc::new(GeminiClient::new(&config)),
        Arc::new(JsonFileStore::new(&config.history_path)),
    )
    .with_launcher(Arc::new(DesktopLauncher));

    let state = Arc::new(ApiState::new(controller));
    state.start().await;

    let refresh_every = energy_refresh_interval();
    let timer_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(refresh_every);
        loop {
            ticker.tick().await;
            timer_state.refresh_energy().await;
        }
    });

    let app = Router::new()
        .route("/api/health", get(health_check))
        .route("/ws/companion", get(ws_handler))
        .with_state(state);

    let bind_addr = env::var("COMPANION_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "Companion desktop backend listening");

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

async fn health_check() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "Companion Desktop Backend Operational")
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<ApiState>) {
    info!("Overlay connected");
    let mut events = state.subscribe();

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientRequest>(&text) {
                        Ok(req) => {
                            // Long-running turns must not stall this socket's event delivery.
                            let request_state = state.clone();
                            tokio::spawn(async move {
                                if let Err(e) = request_state.handle_request(req).await {
                                    error!(error = %e, "Request failed");
                                    request_state.emit(ServerEvent::status(
                                        "request_failed",
                                        Some(format!("{e:#}")),
                                    ));
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "Invalid ClientRequest JSON");
                            let resp = ServerEvent::status("invalid_request", Some(e.to_string()));
                            if socket.send(Message::Text(resp.to_json())).await.is_err() {
                                break;
                            }
                        }
                    },
                    Some(Ok(Message::Close(_))) => {
                        info!("Overlay closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Overlay WS receive error");
                        break;
                    }
                    None => break,
                }
            }
            broadcasted = events.recv() => {
                match broadcasted {
                    Ok(event) => {
                        if let Err(e) = socket.send(Message::Text(event.to_json())).await {
                            warn!(error = %e, "Overlay WS send error");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Overlay WS lagged behind events");
                        let notice = ServerEvent::lagged(skipped);
                        if socket.send(Message::Text(notice.to_json())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    info!("Overlay disconnected");
}
