use crate::models::{Chapter, ProcessingProgress, Transcript, VideoMetadata};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

const METADATA_FILE: &str = "metadata.json";
const TRANSCRIPT_FILE: &str = "transcript.json";
const CHAPTERS_FILE: &str = "chapters.json";
const FRAMES_DIR: &str = "frames";
const THUMBNAIL_FILE: &str = "thumbnail.jpg";

/// Directory-per-video store. Metadata lives in metadata.json inside
/// each video's directory and is cached in memory; live processing
/// progress is memory-only.
#[derive(Debug)]
pub struct VideoStore {
    base_dir: PathBuf,
    cache: RwLock<HashMap<String, VideoMetadata>>,
    progress: RwLock<HashMap<String, ProcessingProgress>>,
}

impl VideoStore {
    /// Open the store, creating the base directory and loading any
    /// existing videos from disk
    pub async fn new(base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_dir).await?;

        let store = Self {
            base_dir,
            cache: RwLock::new(HashMap::new()),
            progress: RwLock::new(HashMap::new()),
        };
        store.load_existing().await?;

        let cached = store.cache.read().await.len();
        info!(
            "📊 Video store initialized with {} video(s), {:.1} MB on disk",
            cached,
            store.disk_usage() as f64 / (1024.0 * 1024.0)
        );
        Ok(store)
    }

    /// Total bytes of everything stored under the base directory
    pub fn disk_usage(&self) -> u64 {
        walkdir::WalkDir::new(&self.base_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.metadata().ok())
            .map(|meta| meta.len())
            .sum()
    }

    async fn load_existing(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.base_dir).await?;
        let mut loaded = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let metadata_path = path.join(METADATA_FILE);
            match fs::read_to_string(&metadata_path).await {
                Ok(raw) => match serde_json::from_str::<VideoMetadata>(&raw) {
                    Ok(meta) => {
                        self.cache.write().await.insert(meta.id.clone(), meta);
                        loaded += 1;
                    }
                    Err(e) => warn!("Failed to parse {}: {}", metadata_path.display(), e),
                },
                Err(e) => warn!("Failed to read {}: {}", metadata_path.display(), e),
            }
        }

        debug!("📁 Loaded {} metadata file(s) from disk", loaded);
        Ok(())
    }

    /// Fresh identifier for an uploaded video
    pub fn allocate_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Deterministic identifier for a YouTube video
    pub fn youtube_storage_id(youtube_id: &str) -> String {
        format!("youtube_{}", youtube_id)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn video_dir(&self, id: &str) -> PathBuf {
        self.base_dir.join(id)
    }

    pub fn frames_dir(&self, id: &str) -> PathBuf {
        self.video_dir(id).join(FRAMES_DIR)
    }

    pub fn thumbnail_path(&self, id: &str) -> PathBuf {
        self.video_dir(id).join(THUMBNAIL_FILE)
    }

    fn metadata_path(&self, id: &str) -> PathBuf {
        self.video_dir(id).join(METADATA_FILE)
    }

    fn transcript_path(&self, id: &str) -> PathBuf {
        self.video_dir(id).join(TRANSCRIPT_FILE)
    }

    fn chapters_path(&self, id: &str) -> PathBuf {
        self.video_dir(id).join(CHAPTERS_FILE)
    }

    /// Path to the stored media file, if the video carries one
    pub fn video_file_path(&self, meta: &VideoMetadata) -> Option<PathBuf> {
        match &meta.source {
            crate::models::VideoSource::Upload { filename } => {
                let ext = Path::new(filename)
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("mp4");
                Some(self.video_dir(&meta.id).join(format!("video.{}", ext)))
            }
            crate::models::VideoSource::Youtube { .. } => None,
        }
    }

    /// Persist an uploaded media file into the video's directory
    pub async fn write_video_file(&self, id: &str, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4")
            .to_lowercase();
        let dir = self.video_dir(id);
        fs::create_dir_all(&dir).await?;

        let path = dir.join(format!("video.{}", ext));
        fs::write(&path, bytes).await?;
        debug!("💾 Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(path)
    }

    /// Register a new video and persist its metadata
    pub async fn insert(&self, meta: VideoMetadata) -> Result<()> {
        self.persist(&meta).await?;
        info!("🆕 Registered video {} ('{}')", meta.id, meta.title);
        self.cache.write().await.insert(meta.id.clone(), meta);
        Ok(())
    }

    /// Update a video's metadata on disk and in cache
    pub async fn update(&self, meta: VideoMetadata) -> Result<()> {
        self.persist(&meta).await?;
        debug!("💾 Updated metadata for {}", meta.id);
        self.cache.write().await.insert(meta.id.clone(), meta);
        Ok(())
    }

    async fn persist(&self, meta: &VideoMetadata) -> Result<()> {
        let dir = self.video_dir(&meta.id);
        fs::create_dir_all(&dir).await?;
        let json = serde_json::to_string_pretty(meta)?;
        fs::write(self.metadata_path(&meta.id), json).await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<VideoMetadata> {
        self.cache.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.cache.read().await.contains_key(id)
    }

    /// All videos, newest first
    pub async fn list(&self) -> Vec<VideoMetadata> {
        let mut videos: Vec<VideoMetadata> = self.cache.read().await.values().cloned().collect();
        videos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        videos
    }

    /// Delete a video's directory and forget it
    pub async fn remove(&self, id: &str) -> Result<()> {
        let existed = self.cache.write().await.remove(id).is_some();
        if !existed {
            return Err(anyhow!("Video {} not found", id));
        }
        self.progress.write().await.remove(id);

        let dir = self.video_dir(id);
        if dir.exists() {
            fs::remove_dir_all(&dir).await?;
        }
        info!("🧹 Removed video {}", id);
        Ok(())
    }

    pub async fn save_transcript(&self, id: &str, transcript: &Transcript) -> Result<()> {
        let json = serde_json::to_string_pretty(transcript)?;
        fs::write(self.transcript_path(id), json).await?;
        Ok(())
    }

    pub async fn load_transcript(&self, id: &str) -> Result<Option<Transcript>> {
        match fs::read_to_string(self.transcript_path(id)).await {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(_) => Ok(None),
        }
    }

    pub async fn has_transcript(&self, id: &str) -> bool {
        fs::try_exists(self.transcript_path(id)).await.unwrap_or(false)
    }

    pub async fn save_chapters(&self, id: &str, chapters: &[Chapter]) -> Result<()> {
        let json = serde_json::to_string_pretty(chapters)?;
        fs::write(self.chapters_path(id), json).await?;
        Ok(())
    }

    pub async fn load_chapters(&self, id: &str) -> Result<Vec<Chapter>> {
        match fs::read_to_string(self.chapters_path(id)).await {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(_) => Ok(Vec::new()),
        }
    }

    pub async fn set_progress(&self, progress: ProcessingProgress) {
        self.progress
            .write()
            .await
            .insert(progress.video_id.clone(), progress);
    }

    pub async fn progress(&self, id: &str) -> Option<ProcessingProgress> {
        self.progress.read().await.get(id).cloned()
    }

    pub async fn clear_progress(&self, id: &str) {
        self.progress.write().await.remove(id);
    }

    pub async fn all_progress(&self) -> Vec<ProcessingProgress> {
        self.progress.read().await.values().cloned().collect()
    }
}

/// Reject path components that could escape a video's directory
pub fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{VideoSource, VideoStatus};
    use tempfile::TempDir;

    fn sample_meta(id: &str) -> VideoMetadata {
        VideoMetadata::new(
            id.to_string(),
            format!("Video {}", id),
            VideoSource::Upload {
                filename: "clip.mp4".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_insert_get_list_remove() {
        let temp = TempDir::new().unwrap();
        let store = VideoStore::new(temp.path().to_path_buf()).await.unwrap();

        store.insert(sample_meta("a")).await.unwrap();
        store.insert(sample_meta("b")).await.unwrap();

        assert!(store.contains("a").await);
        assert_eq!(store.get("a").await.unwrap().title, "Video a");
        assert_eq!(store.list().await.len(), 2);
        assert!(temp.path().join("a/metadata.json").exists());

        store.remove("a").await.unwrap();
        assert!(!store.contains("a").await);
        assert!(!temp.path().join("a").exists());
        assert!(store.remove("a").await.is_err());
    }

    #[tokio::test]
    async fn test_reload_from_disk() {
        let temp = TempDir::new().unwrap();
        {
            let store = VideoStore::new(temp.path().to_path_buf()).await.unwrap();
            let mut meta = sample_meta("persisted");
            meta.status = VideoStatus::Completed;
            store.insert(meta).await.unwrap();
        }

        let reopened = VideoStore::new(temp.path().to_path_buf()).await.unwrap();
        let meta = reopened.get("persisted").await.unwrap();
        assert_eq!(meta.status, VideoStatus::Completed);
    }

    #[tokio::test]
    async fn test_disk_usage_counts_stored_bytes() {
        let temp = TempDir::new().unwrap();
        let store = VideoStore::new(temp.path().to_path_buf()).await.unwrap();
        assert_eq!(store.disk_usage(), 0);

        store.insert(sample_meta("v")).await.unwrap();
        store
            .write_video_file("v", "clip.mp4", b"fake video bytes")
            .await
            .unwrap();

        let used = store.disk_usage();
        assert!(used >= b"fake video bytes".len() as u64);
    }

    #[tokio::test]
    async fn test_transcript_round_trip() {
        use crate::models::{TranscriptChunk, TranscriptKind};

        let temp = TempDir::new().unwrap();
        let store = VideoStore::new(temp.path().to_path_buf()).await.unwrap();
        store.insert(sample_meta("v")).await.unwrap();

        assert!(store.load_transcript("v").await.unwrap().is_none());
        assert!(!store.has_transcript("v").await);

        let transcript = Transcript {
            kind: TranscriptKind::Captions,
            language: Some("en".to_string()),
            chunks: vec![TranscriptChunk {
                start_secs: 0.0,
                end_secs: 30.0,
                text: "hello".to_string(),
            }],
        };
        store.save_transcript("v", &transcript).await.unwrap();

        let loaded = store.load_transcript("v").await.unwrap().unwrap();
        assert_eq!(loaded.chunks.len(), 1);
        assert_eq!(loaded.kind, TranscriptKind::Captions);
        assert!(store.has_transcript("v").await);
    }

    #[tokio::test]
    async fn test_progress_is_memory_only() {
        let temp = TempDir::new().unwrap();
        let store = VideoStore::new(temp.path().to_path_buf()).await.unwrap();

        store
            .set_progress(ProcessingProgress::new("v", "frames", 0.3, "Sampling frames"))
            .await;
        assert_eq!(store.progress("v").await.unwrap().stage, "frames");
        assert_eq!(store.all_progress().await.len(), 1);

        store.clear_progress("v").await;
        assert!(store.progress("v").await.is_none());
    }

    #[tokio::test]
    async fn test_video_file_path_follows_source() {
        let temp = TempDir::new().unwrap();
        let store = VideoStore::new(temp.path().to_path_buf()).await.unwrap();

        let upload = sample_meta("u");
        assert!(store
            .video_file_path(&upload)
            .unwrap()
            .ends_with("u/video.mp4"));

        let youtube = VideoMetadata::new(
            "youtube_dQw4w9WgXcQ".to_string(),
            "Linked".to_string(),
            VideoSource::Youtube {
                url: "https://youtu.be/dQw4w9WgXcQ".to_string(),
                youtube_id: "dQw4w9WgXcQ".to_string(),
                fetch_captions: true,
            },
        );
        assert!(store.video_file_path(&youtube).is_none());
    }

    #[test]
    fn test_safe_components() {
        assert!(is_safe_component("frame_0001.jpg"));
        assert!(!is_safe_component("../../etc/passwd"));
        assert!(!is_safe_component(".."));
        assert!(!is_safe_component("a/b"));
        assert!(!is_safe_component(""));
    }
}
