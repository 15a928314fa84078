//! HTTP server implementation for the API

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        DefaultBodyLimit, Multipart, State, WebSocketUpgrade,
    },
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use super::handlers;
use super::models::{ApiError, ApiResponse, ChatRequest, SwitchStrategyRequest, VisualSearchRequest, YouTubeRequest};
use crate::chat::ChatEngine;
use crate::config::Config;
use crate::index::SearchIndex;
use crate::pipeline::Pipeline;
use crate::quota::Scheduler;
use crate::storage::VideoStore;
use crate::youtube::YoutubeClient;

/// Slack on top of the configured upload limit for multipart framing
const BODY_LIMIT_SLACK: u64 = 1024 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<VideoStore>,
    pub index: Arc<SearchIndex>,
    pub scheduler: Arc<Scheduler>,
    pub chat: Arc<ChatEngine>,
    pub pipeline: Arc<Pipeline>,
    pub youtube: Arc<YoutubeClient>,
    pub config: Arc<Config>,
}

/// Configure and start the HTTP server
pub async fn start_http_server(state: AppState, host: &str, port: u16) -> Result<()> {
    info!("🚀 Starting HTTP server on port {}", port);

    let body_limit = (state.config.storage.max_file_size + BODY_LIMIT_SLACK) as usize;
    let enable_cors = state.config.server.enable_cors;

    // Build the application with routes
    let mut app = Router::new()
        // Health check endpoints (both paths for compatibility)
        .route("/health", get(health_handler))
        .route("/api/health", get(health_handler))

        // Quota coordinator endpoints
        .route("/api/videos/quota-status", get(quota_status_handler))
        .route("/api/videos/quota-reset", post(quota_reset_handler))
        .route("/api/videos/switch-strategy", post(switch_strategy_handler))

        // Video management endpoints
        .route("/api/videos", get(list_videos_handler))
        .route("/api/videos/upload", post(upload_handler))
        .route("/api/videos/youtube", post(add_youtube_handler))
        .route("/api/videos/youtube/validate", post(validate_youtube_handler))
        .route("/api/videos/:id", get(get_video_handler).delete(delete_video_handler))
        .route("/api/videos/:id/status", get(video_status_handler))
        .route("/api/videos/:id/outline", get(outline_handler))
        .route("/api/videos/:id/thumbnail", get(thumbnail_handler))
        .route("/api/videos/:id/frame/:frame_id", get(frame_handler))
        .route("/api/videos/:id/process", post(reprocess_handler))

        // Chat and search endpoints
        .route("/api/chat", post(chat_handler))
        .route("/api/search/visual", post(visual_search_handler))

        // WebSocket endpoints (multiple paths for compatibility)
        .route("/ws", get(websocket_handler))
        .route("/api/status/live", get(websocket_handler))

        // Dashboard and static files
        .route("/", get(serve_ui))
        .route("/static/*path", get(serve_static))

        // Add state and middleware
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(body_limit)),
        );

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
        app = app.layer(cors);
    }

    // Bind and serve
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port)).await?;
    info!("🌐 API server listening on http://{}:{}", host, port);
    info!("🔗 WebSocket endpoint available at ws://{}:{}/ws", host, port);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Wrap a handler result in the response envelope with its status code
fn envelope(result: Result<Value, ApiError>) -> Response {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))).into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(error: ApiError) -> Response {
    (
        error.status_code(),
        Json(ApiResponse::<Value>::error(error.to_string())),
    )
        .into_response()
}

async fn health_handler() -> Response {
    envelope(handlers::health_check().await)
}

async fn quota_status_handler(State(state): State<AppState>) -> Response {
    envelope(handlers::quota_status(&state.scheduler).await)
}

async fn quota_reset_handler(State(state): State<AppState>) -> Response {
    envelope(handlers::quota_reset(&state.scheduler).await)
}

async fn switch_strategy_handler(
    State(state): State<AppState>,
    Json(payload): Json<SwitchStrategyRequest>,
) -> Response {
    envelope(handlers::switch_strategy(&state.scheduler, &payload).await)
}

async fn list_videos_handler(State(state): State<AppState>) -> Response {
    envelope(handlers::list_videos(&state.store).await)
}

async fn get_video_handler(
    State(state): State<AppState>,
    axum::extract::Path(id): axum::extract::Path<String>,
) -> Response {
    envelope(handlers::get_video(&state.store, &id).await)
}

async fn delete_video_handler(
    State(state): State<AppState>,
    axum::extract::Path(id): axum::extract::Path<String>,
) -> Response {
    envelope(handlers::delete_video(&state.store, &state.index, &id).await)
}

async fn video_status_handler(
    State(state): State<AppState>,
    axum::extract::Path(id): axum::extract::Path<String>,
) -> Response {
    envelope(handlers::video_status(&state.store, &id).await)
}

async fn outline_handler(
    State(state): State<AppState>,
    axum::extract::Path(id): axum::extract::Path<String>,
) -> Response {
    envelope(handlers::video_outline(&state.store, &id).await)
}

async fn reprocess_handler(
    State(state): State<AppState>,
    axum::extract::Path(id): axum::extract::Path<String>,
) -> Response {
    envelope(handlers::reprocess_video(&state.store, &state.pipeline, &id).await)
}

async fn thumbnail_handler(
    State(state): State<AppState>,
    axum::extract::Path(id): axum::extract::Path<String>,
) -> Response {
    match handlers::thumbnail(&state.store, &id).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response(),
        Err(e) => error_response(e),
    }
}

async fn frame_handler(
    State(state): State<AppState>,
    axum::extract::Path((id, frame_id)): axum::extract::Path<(String, usize)>,
) -> Response {
    match handlers::frame_image(&state.store, &id, frame_id).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response(),
        Err(e) => error_response(e),
    }
}

async fn upload_handler(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut filename = None;
    let mut bytes = None;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let name = field.name().unwrap_or("").to_string();
                if name == "file" || name == "video" {
                    filename = field.file_name().map(|s| s.to_string());
                    match field.bytes().await {
                        Ok(data) => bytes = Some(data),
                        Err(e) => {
                            return error_response(ApiError::BadRequest(format!(
                                "Upload read failed: {}",
                                e
                            )))
                        }
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                return error_response(ApiError::BadRequest(format!(
                    "Malformed multipart body: {}",
                    e
                )))
            }
        }
    }

    match (filename, bytes) {
        (Some(filename), Some(bytes)) => envelope(
            handlers::upload_video(
                &state.store,
                &state.pipeline,
                &state.config,
                &filename,
                &bytes,
            )
            .await,
        ),
        _ => error_response(ApiError::BadRequest(
            "Multipart body must contain a 'file' field with a filename".to_string(),
        )),
    }
}

async fn add_youtube_handler(
    State(state): State<AppState>,
    Json(payload): Json<YouTubeRequest>,
) -> Response {
    envelope(handlers::add_youtube(&state.store, &state.pipeline, &state.youtube, &payload).await)
}

async fn validate_youtube_handler(Json(payload): Json<YouTubeRequest>) -> Response {
    envelope(handlers::validate_youtube(&payload.url).await)
}

async fn chat_handler(State(state): State<AppState>, Json(payload): Json<ChatRequest>) -> Response {
    envelope(handlers::chat(&state.store, &state.chat, &payload).await)
}

async fn visual_search_handler(
    State(state): State<AppState>,
    Json(payload): Json<VisualSearchRequest>,
) -> Response {
    envelope(handlers::visual_search(&state.store, &state.chat, &payload).await)
}

/// WebSocket handler for real-time updates
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| websocket_connection(socket, state))
}

/// Handle WebSocket connections
async fn websocket_connection(mut socket: WebSocket, state: AppState) {
    info!("🔌 New WebSocket connection established");

    if let Ok(text) = status_message(&state).await {
        if socket.send(Message::Text(text)).await.is_err() {
            warn!("Failed to send initial status message");
            return;
        }
    }

    // Push quota and progress updates on a fixed cadence
    let mut ticker = interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text == "ping" {
                            if socket.send(Message::Text("pong".to_string())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("🔌 WebSocket connection closed by client");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            _ = ticker.tick() => {
                match status_message(&state).await {
                    Ok(text) => {
                        if socket.send(Message::Text(text)).await.is_err() {
                            info!("🔌 WebSocket connection closed during status update");
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to build status update: {}", e),
                }
            }
        }
    }

    info!("🔌 WebSocket connection ended");
}

async fn status_message(state: &AppState) -> Result<String> {
    let report = state.scheduler.report().await;
    let progress = state.store.all_progress().await;
    let message = serde_json::json!({
        "type": "status",
        "quota": report,
        "progress": progress
    });
    Ok(serde_json::to_string(&message)?)
}

/// Serve the main UI page
async fn serve_ui() -> Response {
    if std::path::Path::new("static/index.html").exists() {
        match tokio::fs::read("static/index.html").await {
            Ok(content) => {
                ([(header::CONTENT_TYPE, "text/html")], content).into_response()
            }
            Err(_) => not_found_response(),
        }
    } else {
        ([(header::CONTENT_TYPE, "text/html")], DASHBOARD_HTML).into_response()
    }
}

/// Serve static files from the static directory
async fn serve_static(axum::extract::Path(path): axum::extract::Path<String>) -> Response {
    if path.contains("..") {
        return not_found_response();
    }
    let file_path = format!("static/{}", path);

    match tokio::fs::read(&file_path).await {
        Ok(content) => {
            let content_type = content_type_for(&path);
            ([(header::CONTENT_TYPE, content_type)], content).into_response()
        }
        Err(_) => not_found_response(),
    }
}

fn content_type_for(path: &str) -> &'static str {
    match path.split('.').last() {
        Some("html") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

fn not_found_response() -> Response {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "text/plain")],
        "Not Found",
    )
        .into_response()
}

/// Fallback dashboard shown when no static UI is installed
const DASHBOARD_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Video Chat Server</title>
    <style>
        body { font-family: Arial, sans-serif; margin: 40px; max-width: 900px; }
        .bar { background: #eee; border-radius: 4px; height: 18px; margin: 4px 0 12px; }
        .bar div { background: #4a90d9; border-radius: 4px; height: 100%; }
        .bar div.hot { background: #d9534f; }
        button { margin: 2px; padding: 6px 12px; }
        table { border-collapse: collapse; width: 100%; margin-top: 10px; }
        td, th { border: 1px solid #ddd; padding: 6px; text-align: left; }
        .strategy { font-weight: bold; }
        #videos li { margin: 4px 0; }
    </style>
</head>
<body>
    <h1>Video Chat Server</h1>

    <h2>Quota</h2>
    <p>Strategy: <span class="strategy" id="strategy">-</span></p>
    <p>Requests this minute: <span id="minute-label">-</span></p>
    <div class="bar"><div id="minute-bar" style="width:0%"></div></div>
    <p>Requests today: <span id="day-label">-</span></p>
    <div class="bar"><div id="day-bar" style="width:0%"></div></div>

    <p>
        <button onclick="switchStrategy('normal')">Normal</button>
        <button onclick="switchStrategy('batch')">Batch</button>
        <button onclick="switchStrategy('conservative')">Conservative</button>
        <button onclick="switchStrategy('emergency')">Emergency</button>
        <button onclick="switchStrategy('auto')">Auto</button>
        <button onclick="resetQuota()">Reset counters</button>
    </p>

    <h2>Queue</h2>
    <p>Waiting: <span id="queue-length">0</span>,
       processed: <span id="queue-processed">0</span>,
       rate: <span id="queue-rate">0</span>/min</p>
    <table id="queue-table">
        <tr><th>Function</th><th>Priority</th><th>Waited (s)</th><th>Retries</th></tr>
    </table>

    <h2>Videos</h2>
    <ul id="videos"></ul>

    <script>
        async function refresh() {
            try {
                const res = await fetch('/api/videos/quota-status');
                const body = await res.json();
                if (!body.success) return;
                const data = body.data;

                document.getElementById('strategy').textContent =
                    data.strategy + (data.forced_strategy ? ' (forced)' : '');

                const u = data.usage;
                setBar('minute', u.minute_percent,
                    u.minute_requests + ' / ' + u.minute_request_limit);
                setBar('day', u.day_percent,
                    u.day_requests + ' / ' + u.day_request_limit);

                const q = data.queue;
                document.getElementById('queue-length').textContent = q.length;
                document.getElementById('queue-processed').textContent = q.processed;
                document.getElementById('queue-rate').textContent =
                    q.rate_per_minute.toFixed(1);

                const table = document.getElementById('queue-table');
                while (table.rows.length > 1) table.deleteRow(1);
                for (const p of q.pending) {
                    const row = table.insertRow();
                    row.insertCell().textContent = p.function;
                    row.insertCell().textContent = p.priority;
                    row.insertCell().textContent = p.waited_secs;
                    row.insertCell().textContent = p.retries;
                }
            } catch (e) { /* server restarting */ }

            try {
                const res = await fetch('/api/videos');
                const body = await res.json();
                if (!body.success) return;
                const list = document.getElementById('videos');
                list.innerHTML = '';
                for (const v of body.data.videos) {
                    const item = document.createElement('li');
                    item.textContent = v.title + ' [' + v.status + ']';
                    list.appendChild(item);
                }
            } catch (e) { /* ignore */ }
        }

        function setBar(prefix, percent, label) {
            const bar = document.getElementById(prefix + '-bar');
            bar.style.width = Math.min(percent, 100) + '%';
            bar.className = percent >= 70 ? 'hot' : '';
            document.getElementById(prefix + '-label').textContent =
                label + ' (' + percent.toFixed(1) + '%)';
        }

        async function switchStrategy(name) {
            await fetch('/api/videos/switch-strategy', {
                method: 'POST',
                headers: {'Content-Type': 'application/json'},
                body: JSON.stringify({strategy: name})
            });
            refresh();
        }

        async function resetQuota() {
            await fetch('/api/videos/quota-reset', {method: 'POST'});
            refresh();
        }

        refresh();
        setInterval(refresh, 3000);
    </script>
</body>
</html>
"#;
