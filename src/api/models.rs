//! API data models

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::chat::ChatTurn;

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Handler failures mapped onto HTTP status codes
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    TooLarge(String),

    #[error("{0}")]
    QuotaExhausted(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::QuotaExhausted(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Chat request from the UI
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub video_id: String,

    #[serde(default)]
    pub chat_history: Vec<ChatTurn>,
}

/// Chat reply with validated timestamp references
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub timestamp_references: Vec<f64>,
    pub confidence: f32,
    pub sources_used: usize,
}

/// Visual search request
#[derive(Debug, Deserialize)]
pub struct VisualSearchRequest {
    pub query: String,
    pub video_id: String,

    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Optional (start, end) window in seconds
    #[serde(default)]
    pub time_range: Option<(f64, f64)>,
}

fn default_max_results() -> usize {
    10
}

/// One matching frame in a visual search
#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub timestamp: f64,
    pub description: String,
    pub relevance_score: f32,
    pub frame_path: String,
}

#[derive(Debug, Serialize)]
pub struct VisualSearchResponse {
    pub results: Vec<SearchResult>,
    pub total_found: usize,
    pub search_time_ms: u64,
}

/// YouTube ingest request
#[derive(Debug, Deserialize)]
pub struct YouTubeRequest {
    pub url: String,

    /// Overrides the fetched title when set
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub download_video: bool,

    #[serde(default = "default_true")]
    pub extract_transcript: bool,
}

fn default_true() -> bool {
    true
}

/// Strategy override request
#[derive(Debug, Deserialize)]
pub struct SwitchStrategyRequest {
    pub strategy: String,
}
