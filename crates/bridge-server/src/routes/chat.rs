use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{http, Json, Router};
use bridge_core::streaming::StreamEvent;
use bytes::Bytes;
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatStreamRequest {
    prompt: String,
    #[allow(dead_code)]
    project_name: Option<String>,
    #[allow(dead_code)]
    session_id: Option<String>,
    dashboard_context: Option<serde_json::Value>,
}

pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx).map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> axum::response::Response {
        let body = axum::body::Body::from_stream(self);
        http::Response::builder()
            .header("Content-Type", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .header("Connection", "keep-alive")
            .body(body)
            .unwrap_or_else(|e| {
                tracing::error!("failed to build chat stream response: {}", e);
                http::Response::builder()
                    .status(http::StatusCode::INTERNAL_SERVER_ERROR)
                    .body(axum::body::Body::from("Internal Server Error"))
                    .unwrap()
            })
    }
}

async fn chat_stream(State(state): State<Arc<AppState>>, Json(req): Json<ChatStreamRequest>) -> SseResponse {
    let (tx, rx) = mpsc::channel(100);
    let (frame_tx, frame_rx) = mpsc::channel::<String>(100);

    let streaming = state.streaming.clone();
    let api_key = std::env::var("GEMINI_API_KEY").unwrap_or_default();

    tokio::spawn(async move {
        streaming.stream_chat(&req.prompt, &api_key, req.dashboard_context, tx).await;
    });

    tokio::spawn(async move {
        let mut rx = rx;
        while let Some(event) = rx.recv().await {
            let frame = match event {
                StreamEvent::Text(text) => json!({"text": text}),
                StreamEvent::Done => json!({"text": "", "done": true}),
                StreamEvent::Error(err) => json!({"error": err}),
            };
            if frame_tx.send(format!("data: {}\n\n", frame)).await.is_err() {
                break;
            }
        }
    });

    SseResponse { rx: ReceiverStream::new(frame_rx) }
}

async fn chat_clear(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.streaming.clear_history();
    Json(json!({"status": "cleared"}))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/chat/stream", post(chat_stream))
        .route("/api/chat/clear", post(chat_clear))
}
