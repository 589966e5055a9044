#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Forbid unwrap() in production code to prevent panics from corrupt data.
// Test code is allowed to use unwrap() for convenience.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::any,
};
use prost::Message as ProstMessage;
use sampledb::{
    ClientConnection, SamplingService,
    config::ServerConfig,
    proto,
    query::{SessionManager, spawn_sweeper},
    storage::{SystemTimeSource, TimeSource},
    structure::StructureRegistry,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone)]
struct AppState {
    /// Shared by every connection; structures and sessions are global.
    service: Arc<SamplingService>,
}

#[tokio::main]
#[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected for shared state
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sampledb=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Loaded configuration: data_directory={}, listen_port={}, gc_period_secs={}",
        config.data_directory.display(),
        config.listen_port,
        config.gc_period_secs
    );

    if let Err(e) = std::fs::create_dir_all(&config.data_directory) {
        tracing::error!("Failed to create data directory: {e}");
        std::process::exit(1);
    }

    let clock: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);
    let registry = Arc::new(StructureRegistry::new(
        config.registry_config(),
        Arc::clone(&clock),
    ));
    if config.restore {
        match registry.restore_checkpoint() {
            Ok(count) => tracing::info!("Restored {count} structures"),
            Err(e) => {
                tracing::error!("Failed to restore registry checkpoint: {e}");
                std::process::exit(1);
            }
        }
    }

    let sessions = Arc::new(SessionManager::new(clock, config.sessions));
    let _sweeper = spawn_sweeper(
        Arc::downgrade(&sessions),
        Duration::from_secs(config.gc_period_secs),
    );

    let state = AppState {
        service: Arc::new(SamplingService::new(registry, sessions)),
    };

    let app = Router::new()
        .route("/ws", any(ws_handler))
        .with_state(state);

    // Connect to the websocket on ws://127.0.0.1:<port>/ws
    let addr = SocketAddr::from(([127, 0, 0, 1], config.listen_port));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind: {e}");
            std::process::exit(1);
        });

    axum::serve(listener, app).await.unwrap_or_else(|e| {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    });
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    tracing::debug!("got a websocket connection");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let client_connection = ClientConnection::new(state.service);

    loop {
        let msg = match socket.recv().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                tracing::warn!("websocket receive error: {e}");
                return;
            }
            None => {
                tracing::debug!("client disconnected");
                return;
            }
        };

        // Only process binary messages (protobuf)
        let data = match msg {
            Message::Binary(data) => data,
            Message::Text(text) => {
                tracing::debug!("received text message (ignoring): {text}");
                continue;
            }
            Message::Ping(data) => {
                if socket.send(Message::Pong(data)).await.is_err() {
                    return;
                }
                continue;
            }
            Message::Pong(_) => continue,
            Message::Close(_) => {
                tracing::debug!("client sent close");
                return;
            }
        };

        let client_message = match proto::ClientMessage::decode(data.as_ref()) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("failed to decode ClientMessage: {e}");
                if send_error_response(&mut socket, None, &format!("Failed to decode message: {e}"))
                    .await
                    .is_err()
                {
                    return;
                }
                continue;
            }
        };

        tracing::debug!(
            "received ClientMessage with request_id: {:?}",
            client_message.request_id
        );

        let response = client_connection.handle_message(client_message).await;
        let bytes = response.encode_to_vec();
        if socket.send(Message::Binary(bytes.into())).await.is_err() {
            tracing::debug!("client disconnected");
            return;
        }
    }
}

/// Send an error response to the client.
async fn send_error_response(
    socket: &mut WebSocket,
    request_id: Option<u32>,
    message: &str,
) -> Result<(), ()> {
    let error_response = proto::ServerMessage {
        response: Some(proto::ServerResponse {
            request_id,
            status: Some(proto::google::rpc::Status {
                code: proto::google::rpc::Code::InvalidArgument.into(),
                message: message.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
    };
    let response_bytes = error_response.encode_to_vec();
    socket
        .send(Message::Binary(response_bytes.into()))
        .await
        .map_err(|_| ())
}
