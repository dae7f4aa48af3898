//! HTTP route handlers.
//!
//! Devices and administrators share one listener:
//!
//! - `GET /ws` - device WebSocket
//! - `POST /ota/:device_id` - push the request body to a device as firmware
//! - `GET /api/devices` - live and previously seen devices
//! - `GET /health` - liveness probe

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use otalink_core::{DeviceStore, DeviceSummary};
use tracing::{error, warn};

use crate::connection::handle_socket;
use crate::dispatcher::Dispatcher;
use crate::registry::DeviceRegistry;
use crate::server::ServerConfig;
use crate::session::{OtaError, OtaService};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<DeviceRegistry>,
    pub store: Arc<dyn DeviceStore>,
    pub dispatcher: Dispatcher,
    pub ota: OtaService,
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.config.max_image_bytes;
    Router::new()
        .route("/ws", get(device_socket))
        .route("/ota/:device_id", post(upload_firmware))
        .route("/api/devices", get(list_devices))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn device_socket(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}

/// Push the uploaded image to a device.
///
/// The transfer runs in its own task so that a client hanging up does not
/// cut the stream to the device short.
async fn upload_firmware(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    body: Bytes,
) -> (StatusCode, String) {
    let ota = state.ota.clone();
    let target = device_id.clone();
    let transfer = tokio::spawn(async move { ota.push_firmware(&target, &body).await });

    match transfer.await {
        Ok(Ok(_report)) => (StatusCode::OK, "sent".to_string()),
        Ok(Err(e)) => error_response(&e),
        Err(e) => {
            error!("OTA task for {} panicked: {}", device_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            )
        }
    }
}

fn error_response(e: &OtaError) -> (StatusCode, String) {
    match e {
        OtaError::DeviceUnreachable { .. } => (StatusCode::NOT_FOUND, "device offline".to_string()),
        OtaError::TransferInProgress { .. } => (
            StatusCode::CONFLICT,
            "update already in progress".to_string(),
        ),
        OtaError::Transport { .. } => (StatusCode::BAD_GATEWAY, format!("transfer failed: {e}")),
        OtaError::InvalidState(_) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Registered devices first, then devices only known to the store.
async fn list_devices(State(state): State<AppState>) -> Json<Vec<DeviceSummary>> {
    let mut devices: BTreeMap<String, DeviceSummary> = state
        .registry
        .snapshot()
        .into_iter()
        .map(|d| (d.device_id.clone(), d))
        .collect();

    match state.store.list() {
        Ok(records) => {
            for record in records {
                devices
                    .entry(record.device_id.clone())
                    .or_insert_with(|| DeviceSummary {
                        device_id: record.device_id,
                        online: false,
                        connected_at: None,
                        last_seen: record.last_seen,
                        transfer_active: false,
                    });
            }
        }
        Err(e) => warn!("Device store unavailable: {}", e),
    }

    Json(devices.into_values().collect())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "name": state.config.name,
        "version": state.config.version,
        "devices": state.registry.len(),
    }))
}
