/// Video Chat Server
///
/// Upload a video or link a YouTube URL, let the pipeline build a
/// transcript, sampled frames, and a search index, then chat about the
/// content or search it visually. Every Gemini call runs through a
/// quota-aware scheduler that queues, throttles, and degrades instead
/// of failing when the request budget runs out.

pub mod api;
pub mod chat;
pub mod config;
pub mod gemini;
pub mod index;
pub mod models;
pub mod pipeline;
pub mod quota;
pub mod storage;
pub mod video;
pub mod youtube;

// Re-export main types for easy access
pub use crate::api::{ApiServer, AppState};
pub use crate::chat::{ChatEngine, ChatReply, ChatTurn, VisualMatch};
pub use crate::config::Config;
pub use crate::gemini::{GeminiClient, GenerativeModel, ModelReply};
pub use crate::index::{IndexEntry, SearchIndex};
pub use crate::models::{VideoMetadata, VideoSource, VideoStatus};
pub use crate::pipeline::Pipeline;
pub use crate::quota::{
    QuotaLimits, QuotaTracker, QuotaUsage, Scheduler, Strategy, StrategySelector,
};
pub use crate::storage::VideoStore;
pub use crate::video::{VideoInfo, VideoProcessor};
pub use crate::youtube::YoutubeClient;
