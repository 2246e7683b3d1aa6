//! HTTP control surface and WebSocket stream

use crate::assistant::VisionAssistant;
use crate::broadcaster::StreamMessage;
use crate::error::{CameraError, QueryError, VisionError};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Inbound client messages larger than this close the socket
const MAX_CLIENT_MESSAGE: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub assistant: Arc<VisionAssistant>,
}

pub fn router(assistant: Arc<VisionAssistant>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/camera/start", post(start_camera_handler))
        .route("/api/camera/stop", post(stop_camera_handler))
        .route("/api/camera/info", get(camera_info_handler))
        .route("/api/detection/summary", get(detection_summary_handler))
        .route("/api/stream/stats", get(stream_stats_handler))
        .route("/api/ask", post(ask_handler))
        .route("/api/analyze", post(analyze_handler))
        .route("/api/capture", post(capture_handler))
        .route("/ws", get(websocket_handler))
        .layer(CorsLayer::permissive())
        .with_state(AppState { assistant })
}

/// Bind and serve until `shutdown` resolves
pub async fn serve(
    assistant: Arc<VisionAssistant>,
    address: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(address).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(assistant))
        .with_graceful_shutdown(shutdown)
        .await
}

/// A failed control operation, rendered as `{"success": false, "message": ...}`
pub struct ApiError(VisionError);

impl From<VisionError> for ApiError {
    fn from(err: VisionError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            VisionError::Camera(CameraError::AlreadyRunning) => StatusCode::CONFLICT,
            VisionError::Camera(CameraError::InvalidConfig(_)) | VisionError::Config(_) => StatusCode::BAD_REQUEST,
            VisionError::Camera(_) => StatusCode::SERVICE_UNAVAILABLE,
            VisionError::Query(QueryError::NoFrameAvailable) => StatusCode::CONFLICT,
            VisionError::Query(QueryError::EmptyQuestion) => StatusCode::BAD_REQUEST,
            VisionError::Query(QueryError::Answerer(_)) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        warn!("Request failed: {}", self.0);
        (status, Json(json!({ "success": false, "message": self.0.to_string() }))).into_response()
    }
}

/// `{"success": true}` merged into the serialized body
fn success(body: impl Serialize) -> Response {
    match serde_json::to_value(body) {
        Ok(Value::Object(mut map)) => {
            map.insert("success".to_string(), Value::Bool(true));
            Json(Value::Object(map)).into_response()
        }
        Ok(other) => Json(json!({ "success": true, "data": other })).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "message": e.to_string() })),
        )
            .into_response(),
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "healthy", "version": env!("CARGO_PKG_VERSION") }))
}

async fn start_camera_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    state.assistant.start_capture().await?;
    Ok(success(json!({ "message": "Camera started" })))
}

async fn stop_camera_handler(State(state): State<AppState>) -> Response {
    state.assistant.stop_capture().await;
    success(json!({ "message": "Camera stopped" }))
}

async fn camera_info_handler(State(state): State<AppState>) -> Response {
    success(json!({ "data": state.assistant.camera_info() }))
}

async fn detection_summary_handler(State(state): State<AppState>) -> Response {
    success(state.assistant.detection_summary())
}

async fn stream_stats_handler(State(state): State<AppState>) -> Response {
    success(json!({ "data": state.assistant.broadcast_stats() }))
}

#[derive(Debug, Default, Deserialize)]
pub struct AskRequest {
    #[serde(default)]
    pub question: String,
}

async fn ask_handler(State(state): State<AppState>, Json(request): Json<AskRequest>) -> Result<Response, ApiError> {
    Ok(success(state.assistant.ask_question(&request.question).await?))
}

async fn analyze_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    Ok(success(state.assistant.analyze_scene().await?))
}

async fn capture_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    Ok(success(state.assistant.capture_image().await?))
}

/// Requests a client may send over the socket
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    AskQuestion { question: String },
    AnalyzeScene,
    CaptureImage,
}

/// Run a socket request; the reply goes back on the matching event
async fn handle_client_event(assistant: &VisionAssistant, event: ClientEvent) -> (&'static str, Value) {
    fn reply<T: Serialize>(result: Result<T, VisionError>) -> Value {
        match result.map(serde_json::to_value) {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => json!({ "error": e.to_string() }),
            Err(e) => json!({ "error": e.to_string() }),
        }
    }

    match event {
        ClientEvent::AskQuestion { question } => ("ai_response", reply(assistant.ask_question(&question).await)),
        ClientEvent::AnalyzeScene => ("scene_analysis", reply(assistant.analyze_scene().await)),
        ClientEvent::CaptureImage => ("image_captured", reply(assistant.capture_image().await)),
    }
}

fn event_text(event: &str, data: Value) -> Option<String> {
    match StreamMessage::new(event, data) {
        Ok(message) => Some(message.as_json_text().to_string()),
        Err(e) => {
            warn!("Failed to serialize {} reply: {}", event, e);
            None
        }
    }
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();
    info!("Client {} connected", client_id);

    let mut stream = state.assistant.subscribe();
    let (mut sender, mut receiver) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<String>(8);

    let mut send_task = tokio::spawn(async move {
        if let Some(greeting) = event_text("status", json!({ "message": "Connected" })) {
            if sender.send(Message::Text(greeting)).await.is_err() {
                return;
            }
        }
        loop {
            let text = tokio::select! {
                message = stream.recv() => match message {
                    Ok(message) => message.as_json_text().to_string(),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Client {} lagged, skipped {} messages", client_id, skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(text) => text,
                    None => break,
                },
            };
            if sender.send(Message::Text(text)).await.is_err() {
                debug!("Client {} send failed, closing", client_id);
                break;
            }
        }
    });

    let assistant = state.assistant.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => {
                    if text.len() > MAX_CLIENT_MESSAGE {
                        warn!("Client {} sent {} bytes, closing", client_id, text.len());
                        break;
                    }
                    let (name, data) = match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(event) => handle_client_event(&assistant, event).await,
                        Err(e) => {
                            debug!("Client {} sent an unknown message: {}", client_id, e);
                            ("error", json!({ "message": format!("Unsupported request: {}", e) }))
                        }
                    };
                    if let Some(reply) = event_text(name, data) {
                        if reply_tx.send(reply).await.is_err() {
                            break;
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    info!("Client {} disconnected", client_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_parsing() {
        let ask: ClientEvent =
            serde_json::from_str(r#"{"event": "ask_question", "data": {"question": "What is this?"}}"#).unwrap();
        assert_eq!(ask, ClientEvent::AskQuestion { question: "What is this?".to_string() });

        let analyze: ClientEvent = serde_json::from_str(r#"{"event": "analyze_scene"}"#).unwrap();
        assert_eq!(analyze, ClientEvent::AnalyzeScene);

        assert!(serde_json::from_str::<ClientEvent>(r#"{"event": "reboot"}"#).is_err());
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ApiError(VisionError::Query(QueryError::NoFrameAvailable)).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError(VisionError::Query(QueryError::EmptyQuestion)).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(VisionError::Camera(CameraError::OpenFailed { index: 0, reason: String::new() })).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_event_text() {
        let text = event_text("status", json!({ "message": "Connected" })).unwrap();
        assert_eq!(text, r#"{"event":"status","data":{"message":"Connected"}}"#);
    }
}
