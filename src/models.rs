use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a video from intake to chat-ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    /// Accepted, processing has not started
    Pending,

    /// Pipeline is running
    Processing,

    /// Transcript, frames, and index are ready
    Completed,

    /// Transcript indexed, but no frames were available
    TranscriptOnly,

    /// Pipeline gave up; see the error field
    Failed,
}

/// Where a video came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VideoSource {
    Upload {
        filename: String,
    },
    Youtube {
        url: String,
        youtube_id: String,
        /// Cleared when the ingest request opted out of captions
        #[serde(default = "default_fetch_captions")]
        fetch_captions: bool,
    },
}

fn default_fetch_captions() -> bool {
    true
}

/// One sampled frame with its eventual description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameData {
    /// Position in the sampled sequence, starting at 0
    pub index: usize,

    /// Timestamp in the video this frame was taken from
    pub timestamp_secs: f64,

    /// Path relative to the video's storage directory
    pub path: String,

    /// Model-written description, filled in during processing
    #[serde(default)]
    pub description: Option<String>,
}

/// Everything persisted about a video in metadata.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// Storage identifier, also the directory name
    pub id: String,

    /// Display title
    pub title: String,

    /// Upload or YouTube origin
    pub source: VideoSource,

    /// Current lifecycle state
    pub status: VideoStatus,

    /// Video duration in seconds (0 when unknown)
    pub duration_secs: f64,

    /// When the video was registered
    pub created_at: DateTime<Utc>,

    /// Sampled frames with descriptions
    #[serde(default)]
    pub frames: Vec<FrameData>,

    /// Model-written overview of the whole video
    #[serde(default)]
    pub summary: Option<String>,

    /// Failure detail when status is `Failed`
    #[serde(default)]
    pub error: Option<String>,
}

impl VideoMetadata {
    pub fn new(id: String, title: String, source: VideoSource) -> Self {
        Self {
            id,
            title,
            source,
            status: VideoStatus::Pending,
            duration_secs: 0.0,
            created_at: Utc::now(),
            frames: Vec::new(),
            summary: None,
            error: None,
        }
    }

    /// Chat and search are allowed once an index exists
    pub fn is_ready(&self) -> bool {
        matches!(
            self.status,
            VideoStatus::Completed | VideoStatus::TranscriptOnly
        )
    }
}

/// How the transcript was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptKind {
    /// Downloaded caption track
    Captions,

    /// Model-generated from sampled frames
    Generated,

    /// Placeholder built from title and frame timing
    Pseudo,
}

/// One timed span of transcript text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptChunk {
    pub start_secs: f64,
    pub end_secs: f64,
    pub text: String,
}

/// Full transcript for a video, persisted as transcript.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub kind: TranscriptKind,

    #[serde(default)]
    pub language: Option<String>,

    pub chunks: Vec<TranscriptChunk>,
}

impl Transcript {
    pub fn full_text(&self) -> String {
        self.chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// One chapter boundary with an optional synopsis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub start_secs: f64,
    pub end_secs: f64,

    #[serde(default)]
    pub summary: Option<String>,
}

/// Live progress for a video moving through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingProgress {
    pub video_id: String,

    /// Short machine-readable stage name
    pub stage: String,

    /// Fraction complete, 0.0 to 1.0
    pub progress: f64,

    /// Human-readable detail for the dashboard
    pub message: String,

    pub updated_at: DateTime<Utc>,
}

impl ProcessingProgress {
    pub fn new(video_id: &str, stage: &str, progress: f64, message: impl Into<String>) -> Self {
        Self {
            video_id: video_id.to_string(),
            stage: stage.to_string(),
            progress,
            message: message.into(),
            updated_at: Utc::now(),
        }
    }
}
