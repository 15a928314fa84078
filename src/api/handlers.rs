//! API request handlers

use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use super::models::{
    ApiError, ChatRequest, ChatResponse, SearchResult, SwitchStrategyRequest,
    VisualSearchRequest, VisualSearchResponse, YouTubeRequest,
};
use crate::chat::ChatEngine;
use crate::config::Config;
use crate::index::SearchIndex;
use crate::models::{VideoMetadata, VideoSource, VideoStatus};
use crate::pipeline::Pipeline;
use crate::quota::{Scheduler, SchedulerError, Strategy};
use crate::storage::{is_safe_component, VideoStore};
use crate::youtube::{self, YoutubeClient, YoutubeError};

/// Handle health check requests
pub async fn health_check() -> Result<Value, ApiError> {
    Ok(serde_json::json!({
        "status": "healthy",
        "service": "video-chat-rust",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Combined quota, queue, and strategy snapshot
pub async fn quota_status(scheduler: &Arc<Scheduler>) -> Result<Value, ApiError> {
    let report = scheduler.report().await;
    Ok(serde_json::to_value(report).map_err(anyhow::Error::from)?)
}

/// Zero all quota windows and clear the exhausted latch
pub async fn quota_reset(scheduler: &Arc<Scheduler>) -> Result<Value, ApiError> {
    scheduler.tracker().reset().await;
    info!("🔄 Quota counters reset by operator request");

    let usage = scheduler.tracker().usage().await;
    Ok(serde_json::json!({
        "message": "Quota counters reset",
        "usage": serde_json::to_value(usage).map_err(anyhow::Error::from)?
    }))
}

/// Force a strategy by name, or `auto` to return to automatic selection
pub async fn switch_strategy(
    scheduler: &Arc<Scheduler>,
    request: &SwitchStrategyRequest,
) -> Result<Value, ApiError> {
    let name = request.strategy.trim().to_lowercase();

    let (strategy, forced) = if name == "auto" {
        scheduler.selector().clear_force().await;
        (scheduler.active_strategy().await, false)
    } else {
        let strategy = Strategy::parse(&name).ok_or_else(|| {
            ApiError::BadRequest(format!(
                "Unknown strategy '{}'; expected normal, conservative, batch, emergency, or auto",
                request.strategy
            ))
        })?;
        scheduler.selector().force(strategy).await;
        (strategy, true)
    };

    Ok(serde_json::json!({
        "strategy": strategy.as_str(),
        "forced": forced,
        "params": serde_json::to_value(strategy.params()).map_err(anyhow::Error::from)?
    }))
}

/// Handle video listing requests
pub async fn list_videos(store: &Arc<VideoStore>) -> Result<Value, ApiError> {
    let videos = futures::future::join_all(
        store
            .list()
            .await
            .into_iter()
            .map(|meta| video_json(store, meta)),
    )
    .await
    .into_iter()
    .collect::<Result<Vec<_>, _>>()?;

    Ok(serde_json::json!({
        "total": videos.len(),
        "videos": videos
    }))
}

/// One video's full metadata
pub async fn get_video(store: &Arc<VideoStore>, video_id: &str) -> Result<Value, ApiError> {
    let meta = require_video(store, video_id).await?;
    video_json(store, meta).await
}

/// Current processing progress for one video
pub async fn video_status(store: &Arc<VideoStore>, video_id: &str) -> Result<Value, ApiError> {
    let meta = require_video(store, video_id).await?;

    let (progress, message) = match store.progress(video_id).await {
        Some(p) => (p.progress, p.message),
        None => match meta.status {
            VideoStatus::Completed | VideoStatus::TranscriptOnly => {
                (1.0, "Ready for chat".to_string())
            }
            VideoStatus::Failed => (
                1.0,
                meta.error
                    .clone()
                    .unwrap_or_else(|| "Processing failed".to_string()),
            ),
            VideoStatus::Pending => (0.0, "Waiting to start".to_string()),
            VideoStatus::Processing => (0.0, "Processing".to_string()),
        },
    };

    Ok(serde_json::json!({
        "video_id": meta.id,
        "status": meta.status,
        "progress": progress,
        "message": message
    }))
}

/// Register an uploaded video file and start processing
pub async fn upload_video(
    store: &Arc<VideoStore>,
    pipeline: &Arc<Pipeline>,
    config: &Config,
    filename: &str,
    bytes: &[u8],
) -> Result<Value, ApiError> {
    let filename = filename.trim();
    if filename.is_empty() || !is_safe_component(filename) {
        return Err(ApiError::BadRequest("Invalid filename".to_string()));
    }

    if !pipeline.processor().is_supported(filename) {
        return Err(ApiError::BadRequest(format!(
            "Unsupported file type; expected one of: {}",
            config.storage.supported_extensions.join(", ")
        )));
    }

    if bytes.is_empty() {
        return Err(ApiError::BadRequest("Uploaded file is empty".to_string()));
    }
    if bytes.len() as u64 > config.storage.max_file_size {
        return Err(ApiError::TooLarge(format!(
            "File exceeds the upload limit of {} bytes",
            config.storage.max_file_size
        )));
    }

    let id = VideoStore::allocate_id();
    store.write_video_file(&id, filename, bytes).await?;

    let title = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
        .to_string();
    let meta = VideoMetadata::new(
        id.clone(),
        title,
        VideoSource::Upload {
            filename: filename.to_string(),
        },
    );
    store.insert(meta.clone()).await?;
    pipeline.spawn(id);

    info!("📁 Upload accepted: {} ({} bytes)", filename, bytes.len());
    Ok(serde_json::to_value(meta).map_err(anyhow::Error::from)?)
}

/// Register a YouTube video and start processing
pub async fn add_youtube(
    store: &Arc<VideoStore>,
    pipeline: &Arc<Pipeline>,
    youtube_client: &Arc<YoutubeClient>,
    request: &YouTubeRequest,
) -> Result<Value, ApiError> {
    if request.download_video {
        return Err(ApiError::BadRequest(
            "Media download is not supported; metadata and captions only".to_string(),
        ));
    }

    let youtube_id = youtube::extract_video_id(&request.url).ok_or_else(|| {
        ApiError::BadRequest(format!("Not a recognizable YouTube URL: {}", request.url))
    })?;

    let id = VideoStore::youtube_storage_id(&youtube_id);
    if let Some(existing) = store.get(&id).await {
        return Ok(serde_json::to_value(existing).map_err(anyhow::Error::from)?);
    }

    let title = match &request.title {
        Some(title) => title.clone(),
        None => match youtube_client.fetch_info(&youtube_id).await {
            Ok(info) => info.title,
            Err(YoutubeError::Blocked) => {
                return Err(ApiError::QuotaExhausted(
                    "YouTube is rate limiting metadata requests, try again later".to_string(),
                ))
            }
            Err(e) => {
                return Err(ApiError::BadRequest(format!(
                    "Could not fetch video info: {}",
                    e
                )))
            }
        },
    };

    let meta = VideoMetadata::new(
        id.clone(),
        title,
        VideoSource::Youtube {
            url: request.url.clone(),
            youtube_id,
            fetch_captions: request.extract_transcript,
        },
    );
    store.insert(meta.clone()).await?;
    pipeline.spawn(id);

    Ok(serde_json::to_value(meta).map_err(anyhow::Error::from)?)
}

/// Syntactic URL check without registering anything
pub async fn validate_youtube(url: &str) -> Result<Value, ApiError> {
    match youtube::extract_video_id(url) {
        Some(id) => Ok(serde_json::json!({"valid": true, "youtube_id": id})),
        None => Ok(serde_json::json!({"valid": false, "youtube_id": Value::Null})),
    }
}

/// Re-run the pipeline for a video
pub async fn reprocess_video(
    store: &Arc<VideoStore>,
    pipeline: &Arc<Pipeline>,
    video_id: &str,
) -> Result<Value, ApiError> {
    let mut meta = require_video(store, video_id).await?;
    if meta.status == VideoStatus::Processing {
        return Err(ApiError::BadRequest(format!(
            "Video {} is already processing",
            video_id
        )));
    }

    meta.status = VideoStatus::Pending;
    meta.error = None;
    store.update(meta).await?;
    pipeline.spawn(video_id.to_string());

    Ok(serde_json::json!({
        "message": "Processing restarted",
        "video_id": video_id
    }))
}

/// Remove a video's directory and its search index
pub async fn delete_video(
    store: &Arc<VideoStore>,
    index: &Arc<SearchIndex>,
    video_id: &str,
) -> Result<Value, ApiError> {
    if !store.contains(video_id).await {
        return Err(not_found(video_id));
    }
    store.remove(video_id).await?;
    index.evict(video_id).await;

    Ok(serde_json::json!({
        "message": "Video removed",
        "video_id": video_id
    }))
}

/// Chapters plus the basics a player needs to render an outline
pub async fn video_outline(store: &Arc<VideoStore>, video_id: &str) -> Result<Value, ApiError> {
    let meta = require_video(store, video_id).await?;
    let chapters = store.load_chapters(video_id).await?;

    Ok(serde_json::json!({
        "video_id": meta.id,
        "title": meta.title,
        "duration_secs": meta.duration_secs,
        "chapters": serde_json::to_value(chapters).map_err(anyhow::Error::from)?
    }))
}

/// Thumbnail JPEG bytes
pub async fn thumbnail(store: &Arc<VideoStore>, video_id: &str) -> Result<Vec<u8>, ApiError> {
    require_video(store, video_id).await?;
    tokio::fs::read(store.thumbnail_path(video_id))
        .await
        .map_err(|_| ApiError::NotFound(format!("No thumbnail for video {}", video_id)))
}

/// One sampled frame's JPEG bytes
pub async fn frame_image(
    store: &Arc<VideoStore>,
    video_id: &str,
    frame_index: usize,
) -> Result<Vec<u8>, ApiError> {
    let meta = require_video(store, video_id).await?;
    let frame = meta
        .frames
        .iter()
        .find(|f| f.index == frame_index)
        .ok_or_else(|| {
            ApiError::NotFound(format!("Video {} has no frame {}", video_id, frame_index))
        })?;

    tokio::fs::read(store.video_dir(video_id).join(&frame.path))
        .await
        .map_err(|_| ApiError::NotFound(format!("Frame file missing for {}", video_id)))
}

/// Handle chat requests about a processed video
pub async fn chat(
    store: &Arc<VideoStore>,
    engine: &Arc<ChatEngine>,
    request: &ChatRequest,
) -> Result<Value, ApiError> {
    let meta = require_video(store, &request.video_id).await?;
    if !meta.is_ready() {
        return Err(ApiError::BadRequest(format!(
            "Video {} is not ready for chat yet (status: {:?})",
            request.video_id, meta.status
        )));
    }
    if request.message.trim().is_empty() {
        return Err(ApiError::BadRequest("Message is empty".to_string()));
    }

    let reply = engine
        .chat(&request.video_id, &request.message, &request.chat_history)
        .await
        .map_err(map_engine_error)?;

    let confidence = if reply.degraded {
        0.3
    } else if reply.timestamps.is_empty() {
        0.6
    } else {
        0.9
    };
    let response = ChatResponse {
        response: reply.reply,
        timestamp_references: reply.timestamps,
        confidence,
        sources_used: reply.sources_used,
    };
    Ok(serde_json::to_value(response).map_err(anyhow::Error::from)?)
}

/// Handle visual search requests over a video's sampled frames
pub async fn visual_search(
    store: &Arc<VideoStore>,
    engine: &Arc<ChatEngine>,
    request: &VisualSearchRequest,
) -> Result<Value, ApiError> {
    let meta = require_video(store, &request.video_id).await?;
    if !meta.is_ready() {
        return Err(ApiError::BadRequest(format!(
            "Video {} is not ready for search yet (status: {:?})",
            request.video_id, meta.status
        )));
    }
    if request.query.trim().is_empty() {
        return Err(ApiError::BadRequest("Query is empty".to_string()));
    }

    let started = Instant::now();
    let max_results = request.max_results.clamp(1, 50);
    let matches = engine
        .visual_search(
            &request.video_id,
            &request.query,
            max_results,
            request.time_range,
        )
        .await
        .map_err(map_engine_error)?;

    let results: Vec<SearchResult> = matches
        .into_iter()
        .map(|m| SearchResult {
            timestamp: m.timestamp_secs,
            description: m.description,
            relevance_score: m.score,
            frame_path: format!("/api/videos/{}/frame/{}", request.video_id, m.frame_index),
        })
        .collect();

    let response = VisualSearchResponse {
        total_found: results.len(),
        results,
        search_time_ms: started.elapsed().as_millis() as u64,
    };
    Ok(serde_json::to_value(response).map_err(anyhow::Error::from)?)
}

async fn video_json(store: &Arc<VideoStore>, meta: VideoMetadata) -> Result<Value, ApiError> {
    let mut value = serde_json::to_value(&meta).map_err(anyhow::Error::from)?;
    value["has_transcript"] = Value::Bool(store.has_transcript(&meta.id).await);
    if let Some(progress) = store.progress(&meta.id).await {
        value["progress"] = serde_json::to_value(progress).map_err(anyhow::Error::from)?;
    }
    Ok(value)
}

async fn require_video(store: &Arc<VideoStore>, video_id: &str) -> Result<VideoMetadata, ApiError> {
    store.get(video_id).await.ok_or_else(|| not_found(video_id))
}

fn not_found(video_id: &str) -> ApiError {
    ApiError::NotFound(format!("Video not found: {}", video_id))
}

/// Scheduler failures mean the quota is the problem, not the request
fn map_engine_error(error: anyhow::Error) -> ApiError {
    match error.downcast_ref::<SchedulerError>() {
        Some(SchedulerError::Expired { .. }) | Some(SchedulerError::RetriesExhausted { .. }) => {
            ApiError::QuotaExhausted(error.to_string())
        }
        _ => ApiError::Internal(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::{GenerativeModel, ModelReply};
    use crate::quota::{CallError, QuotaLimits};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct OfflineModel;

    #[async_trait]
    impl GenerativeModel for OfflineModel {
        async fn generate(&self, _prompt: &str) -> Result<ModelReply, CallError> {
            Err(CallError::Other(anyhow!("offline")))
        }

        async fn describe_image(
            &self,
            _prompt: &str,
            _jpeg: &[u8],
        ) -> Result<ModelReply, CallError> {
            Err(CallError::Other(anyhow!("offline")))
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, CallError> {
            Err(CallError::Other(anyhow!("offline")))
        }

        async fn is_available(&self) -> bool {
            false
        }
    }

    struct Harness {
        _temp: TempDir,
        store: Arc<VideoStore>,
        index: Arc<SearchIndex>,
        scheduler: Arc<Scheduler>,
        pipeline: Arc<Pipeline>,
        youtube: Arc<YoutubeClient>,
        config: Config,
    }

    async fn harness() -> Harness {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.base_dir = temp.path().to_path_buf();

        let store = Arc::new(VideoStore::new(config.storage.base_dir.clone()).await.unwrap());
        let index = Arc::new(SearchIndex::new(config.storage.base_dir.clone()));
        let scheduler = Arc::new(Scheduler::new(QuotaLimits::free_tier()));
        let youtube = Arc::new(YoutubeClient::new(30).unwrap());
        let pipeline = Arc::new(Pipeline::new(
            config.clone(),
            Arc::clone(&store),
            Arc::clone(&index),
            Arc::clone(&youtube),
            Arc::new(OfflineModel),
            Arc::clone(&scheduler),
        ));

        Harness {
            _temp: temp,
            store,
            index,
            scheduler,
            pipeline,
            youtube,
            config,
        }
    }

    #[tokio::test]
    async fn test_health_shape() {
        let value = health_check().await.unwrap();
        assert_eq!(value["status"], "healthy");
        assert!(value["version"].is_string());
    }

    #[tokio::test]
    async fn test_quota_status_shape() {
        let h = harness().await;
        let value = quota_status(&h.scheduler).await.unwrap();
        assert!(value["usage"]["minute_requests"].is_number());
        assert!(value["queue"]["length"].is_number());
        assert_eq!(value["strategy"], "normal");
    }

    #[tokio::test]
    async fn test_switch_strategy_and_back_to_auto() {
        let h = harness().await;

        let value = switch_strategy(
            &h.scheduler,
            &SwitchStrategyRequest {
                strategy: "Conservative".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(value["strategy"], "conservative");
        assert_eq!(value["forced"], true);

        let value = switch_strategy(
            &h.scheduler,
            &SwitchStrategyRequest {
                strategy: "auto".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(value["forced"], false);

        let err = switch_strategy(
            &h.scheduler,
            &SwitchStrategyRequest {
                strategy: "warp-speed".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_upload_rejections() {
        let h = harness().await;

        let err = upload_video(&h.store, &h.pipeline, &h.config, "notes.txt", b"abc")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let err = upload_video(&h.store, &h.pipeline, &h.config, "../evil.mp4", b"abc")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let mut small = h.config.clone();
        small.storage.max_file_size = 4;
        let err = upload_video(&h.store, &h.pipeline, &small, "clip.mp4", b"too big")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::TooLarge(_)));
    }

    #[tokio::test]
    async fn test_upload_registers_video() {
        let h = harness().await;
        let value = upload_video(&h.store, &h.pipeline, &h.config, "lecture.mp4", b"fake")
            .await
            .unwrap();

        let id = value["id"].as_str().unwrap();
        assert_eq!(value["title"], "lecture");
        assert!(h.store.contains(id).await);
        assert!(h.store.video_dir(id).join("video.mp4").exists());
    }

    #[tokio::test]
    async fn test_add_youtube_with_explicit_title() {
        let h = harness().await;
        let request = YouTubeRequest {
            url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
            title: Some("Known title".to_string()),
            download_video: false,
            extract_transcript: false,
        };

        let value = add_youtube(&h.store, &h.pipeline, &h.youtube, &request)
            .await
            .unwrap();
        assert_eq!(value["id"], "youtube_dQw4w9WgXcQ");
        assert_eq!(value["title"], "Known title");
        assert_eq!(value["source"]["fetch_captions"], false);

        // Same URL again returns the existing registration
        let again = add_youtube(&h.store, &h.pipeline, &h.youtube, &request)
            .await
            .unwrap();
        assert_eq!(again["id"], "youtube_dQw4w9WgXcQ");
    }

    #[tokio::test]
    async fn test_add_youtube_rejects_bad_urls() {
        let h = harness().await;
        let request = YouTubeRequest {
            url: "https://example.com/watch?v=123".to_string(),
            title: None,
            download_video: false,
            extract_transcript: true,
        };
        let err = add_youtube(&h.store, &h.pipeline, &h.youtube, &request)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let request = YouTubeRequest {
            url: "https://youtu.be/dQw4w9WgXcQ".to_string(),
            title: None,
            download_video: true,
            extract_transcript: true,
        };
        let err = add_youtube(&h.store, &h.pipeline, &h.youtube, &request)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_validate_youtube() {
        let value = validate_youtube("https://youtu.be/dQw4w9WgXcQ").await.unwrap();
        assert_eq!(value["valid"], true);
        assert_eq!(value["youtube_id"], "dQw4w9WgXcQ");

        let value = validate_youtube("not a url").await.unwrap();
        assert_eq!(value["valid"], false);
    }

    #[tokio::test]
    async fn test_video_lookups_404() {
        let h = harness().await;

        assert!(matches!(
            get_video(&h.store, "missing").await.unwrap_err(),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            video_status(&h.store, "missing").await.unwrap_err(),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            delete_video(&h.store, &h.index, "missing").await.unwrap_err(),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            thumbnail(&h.store, "missing").await.unwrap_err(),
            ApiError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_chat_requires_ready_video() {
        let h = harness().await;
        let engine = Arc::new(ChatEngine::new(
            Arc::new(OfflineModel),
            Arc::clone(&h.scheduler),
            Arc::clone(&h.store),
            Arc::clone(&h.index),
        ));

        let request = ChatRequest {
            message: "hello".to_string(),
            video_id: "missing".to_string(),
            chat_history: Vec::new(),
        };
        assert!(matches!(
            chat(&h.store, &engine, &request).await.unwrap_err(),
            ApiError::NotFound(_)
        ));

        // Registered but still pending
        let meta = VideoMetadata::new(
            "v1".to_string(),
            "Pending".to_string(),
            VideoSource::Upload {
                filename: "clip.mp4".to_string(),
            },
        );
        h.store.insert(meta).await.unwrap();
        let request = ChatRequest {
            message: "hello".to_string(),
            video_id: "v1".to_string(),
            chat_history: Vec::new(),
        };
        assert!(matches!(
            chat(&h.store, &engine, &request).await.unwrap_err(),
            ApiError::BadRequest(_)
        ));
    }
}
