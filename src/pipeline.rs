use crate::config::Config;
use crate::gemini::GenerativeModel;
use crate::index::{EntryKind, IndexEntry, SearchIndex};
use crate::models::{
    Chapter, FrameData, ProcessingProgress, Transcript, TranscriptChunk, TranscriptKind,
    VideoMetadata, VideoSource, VideoStatus,
};
use crate::quota::{estimate_tokens, Priority, Scheduler, StrategyParams};
use crate::storage::VideoStore;
use crate::video::VideoProcessor;
use crate::youtube::{YoutubeClient, YoutubeError};
use anyhow::{anyhow, Result};
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const FRAME_PROMPT: &str = "Describe what is visible in this video frame in one or two \
     sentences. Mention any text shown on screen.";
const IMAGE_TOKEN_ESTIMATE: u64 = 260;
const SUMMARY_INPUT_CHARS: usize = 3000;

/// Drives a video from intake to chat-ready: probe, frames, transcript,
/// descriptions, chapters, index, summary. Every model call goes through
/// the scheduler and respects the active strategy.
pub struct Pipeline {
    config: Config,
    store: Arc<VideoStore>,
    index: Arc<SearchIndex>,
    video: VideoProcessor,
    youtube: Arc<YoutubeClient>,
    model: Arc<dyn GenerativeModel>,
    scheduler: Arc<Scheduler>,
}

impl Pipeline {
    pub fn new(
        config: Config,
        store: Arc<VideoStore>,
        index: Arc<SearchIndex>,
        youtube: Arc<YoutubeClient>,
        model: Arc<dyn GenerativeModel>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        let video = VideoProcessor::new(
            config.processing.clone(),
            config.storage.supported_extensions.clone(),
        );

        Self {
            config,
            store,
            index,
            video,
            youtube,
            model,
            scheduler,
        }
    }

    pub fn processor(&self) -> &VideoProcessor {
        &self.video
    }

    /// Kick off processing in the background
    pub fn spawn(self: &Arc<Self>, video_id: String) {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = pipeline.run(&video_id).await {
                error!("❌ Processing failed for {}: {}", video_id, e);
                pipeline.mark_failed(&video_id, &e.to_string()).await;
            }
        });
    }

    async fn run(&self, video_id: &str) -> Result<()> {
        let started = Instant::now();
        let mut meta = self
            .store
            .get(video_id)
            .await
            .ok_or_else(|| anyhow!("Video {} not found", video_id))?;

        info!("🚀 Processing video {} ('{}')", meta.id, meta.title);
        meta.status = VideoStatus::Processing;
        self.store.update(meta.clone()).await?;
        self.report(video_id, "validate", 0.05, "Validating input").await;

        // Media handling differs by source; YouTube videos have no local
        // file, their frames stage is skipped entirely.
        let mut transcript = match meta.source.clone() {
            VideoSource::Upload { .. } => {
                self.prepare_upload(&mut meta).await?;
                pseudo_transcript(
                    &meta.title,
                    meta.duration_secs,
                    self.config.processing.chunk_duration_secs,
                )
            }
            VideoSource::Youtube {
                youtube_id,
                fetch_captions,
                ..
            } => {
                if fetch_captions {
                    self.report(video_id, "transcript", 0.4, "Fetching captions").await;
                    self.fetch_youtube_transcript(&meta, &youtube_id).await?
                } else {
                    pseudo_transcript(
                        &meta.title,
                        meta.duration_secs,
                        self.config.processing.chunk_duration_secs,
                    )
                }
            }
        };

        if let Some(last) = transcript.chunks.last() {
            meta.duration_secs = meta.duration_secs.max(last.end_secs);
        }
        self.report(video_id, "transcript", 0.6, "Saving transcript").await;
        self.store.save_transcript(video_id, &transcript).await?;
        self.store.update(meta.clone()).await?;

        // Frame descriptions through the scheduler
        if !meta.frames.is_empty() {
            let strategy = self.scheduler.active_strategy().await;
            let params = strategy.params();
            if params.skip_visual_analysis {
                info!(
                    "🚫 Skipping frame descriptions under {} strategy",
                    strategy.as_str()
                );
            } else {
                self.report(video_id, "descriptions", 0.7, "Describing frames").await;
                let described = self.describe_frames(&mut meta, &params).await;
                info!("🖼️ Described {}/{} frames for {}", described, meta.frames.len(), meta.id);
                self.store.update(meta.clone()).await?;

                // A pseudo transcript can be upgraded once real descriptions exist
                if transcript.kind == TranscriptKind::Pseudo && described > 0 {
                    transcript = transcript_from_descriptions(&meta.frames, meta.duration_secs);
                    self.store.save_transcript(video_id, &transcript).await?;
                }
            }
        }

        self.report(video_id, "chapters", 0.8, "Detecting chapters").await;
        let chapters = self.generate_chapters(&meta, &transcript).await;
        self.store.save_chapters(video_id, &chapters).await?;

        self.report(video_id, "index", 0.85, "Building search index").await;
        let mut entries = build_index_entries(video_id, &transcript, &meta.frames, &chapters);
        let params = self.scheduler.active_strategy().await.params();
        self.embed_entries(&mut entries, &params).await;
        self.index.put(video_id, entries).await?;

        self.report(video_id, "summary", 0.9, "Writing summary").await;
        meta.summary = self.generate_summary(&meta, &transcript).await;

        meta.status = if meta.frames.is_empty() {
            VideoStatus::TranscriptOnly
        } else {
            VideoStatus::Completed
        };
        self.store.update(meta.clone()).await?;
        self.report(video_id, "done", 1.0, "Ready for chat").await;
        self.store.clear_progress(video_id).await;

        info!(
            "✅ Video {} ready ({:?}) in {:.1}s",
            meta.id,
            meta.status,
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Probe the uploaded file, sample frames, grab a thumbnail
    async fn prepare_upload(&self, meta: &mut VideoMetadata) -> Result<()> {
        let path = self
            .store
            .video_file_path(meta)
            .ok_or_else(|| anyhow!("Video {} has no media file", meta.id))?;

        if !self.video.validate(&path).await? {
            return Err(anyhow!("Uploaded file is not a readable video"));
        }
        let info = self.video.probe(&path).await?;
        meta.duration_secs = info.duration_secs;
        self.store.update(meta.clone()).await?;

        self.report(&meta.id, "frames", 0.3, "Sampling frames").await;
        let params = self.scheduler.active_strategy().await.params();
        let frame_count = self
            .config
            .processing
            .max_frames
            .min(params.max_frames_per_video);
        meta.frames = self
            .video
            .extract_frames(
                &path,
                info.duration_secs,
                frame_count,
                &self.store.frames_dir(&meta.id),
            )
            .await?;

        if let Err(e) = self
            .video
            .extract_thumbnail(&path, info.duration_secs, &self.store.thumbnail_path(&meta.id))
            .await
        {
            warn!("Thumbnail extraction failed for {}: {}", meta.id, e);
        }
        Ok(())
    }

    async fn fetch_youtube_transcript(
        &self,
        meta: &VideoMetadata,
        youtube_id: &str,
    ) -> Result<Transcript> {
        match self.youtube.fetch_transcript(youtube_id).await {
            Ok(transcript) => Ok(transcript),
            Err(YoutubeError::NoCaptions) => {
                warn!("No captions for {}, indexing title only", youtube_id);
                Ok(pseudo_transcript(
                    &meta.title,
                    meta.duration_secs,
                    self.config.processing.chunk_duration_secs,
                ))
            }
            Err(e) => Err(anyhow!("Caption fetch failed: {}", e)),
        }
    }

    /// Run the vision model over each sampled frame. Batch delays and the
    /// frame cap come from the active strategy; a failed frame keeps its
    /// description empty instead of failing the video.
    async fn describe_frames(&self, meta: &mut VideoMetadata, params: &StrategyParams) -> usize {
        let limit = params.max_frames_per_video;
        let mut described = 0;
        let mut calls = 0;

        for position in 0..meta.frames.len().min(limit) {
            if meta.frames[position].description.is_some() {
                continue;
            }
            if calls > 0 && params.batch_delay_secs > 0 {
                debug!("⏳ Batch delay {}s before next frame", params.batch_delay_secs);
                tokio::time::sleep(Duration::from_secs(params.batch_delay_secs)).await;
            }
            calls += 1;

            let frame = &meta.frames[position];
            let frame_file = self.store.video_dir(&meta.id).join(&frame.path);
            let jpeg = match tokio::fs::read(&frame_file).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Cannot read frame {}: {}", frame_file.display(), e);
                    continue;
                }
            };

            let estimated = estimate_tokens(FRAME_PROMPT) + IMAGE_TOKEN_ESTIMATE;
            let result = self
                .scheduler
                .execute("frame_analysis", Priority::Normal, estimated, || {
                    self.model.describe_image(FRAME_PROMPT, &jpeg)
                })
                .await;

            match result {
                Ok(reply) => {
                    meta.frames[position].description = Some(reply.text.trim().to_string());
                    described += 1;
                }
                Err(e) => warn!("Frame {} description failed: {}", position, e),
            }
        }
        described
    }

    /// One model call proposing chapter boundaries; falls back to fixed
    /// windows over the transcript when the call or parse fails
    async fn generate_chapters(&self, meta: &VideoMetadata, transcript: &Transcript) -> Vec<Chapter> {
        if transcript.is_empty() {
            return Vec::new();
        }
        let params = self.scheduler.active_strategy().await.params();
        if params.reduce_prompt_detail {
            return derive_default_chapters(transcript, meta.duration_secs);
        }

        let outline: String = transcript
            .chunks
            .iter()
            .map(|c| format!("[{}] {}\n", crate::chat::format_timestamp(c.start_secs), c.text))
            .take(40)
            .collect();
        let prompt = format!(
            "Here is a timed transcript of \"{}\". Propose between 3 and 8 chapters.\n\
             Reply with one chapter per line in exactly this form:\n\
             MM:SS | Chapter title\n\n{}",
            meta.title, outline
        );

        let estimated = estimate_tokens(&prompt);
        let reply = self
            .scheduler
            .execute("chapter_detection", Priority::Normal, estimated, || {
                self.model.generate(&prompt)
            })
            .await;

        match reply {
            Ok(reply) => {
                let chapters = parse_chapter_lines(&reply.text, meta.duration_secs);
                if chapters.is_empty() {
                    derive_default_chapters(transcript, meta.duration_secs)
                } else {
                    info!("📖 Detected {} chapters for {}", chapters.len(), meta.id);
                    chapters
                }
            }
            Err(e) => {
                warn!("Chapter detection failed for {}: {}", meta.id, e);
                derive_default_chapters(transcript, meta.duration_secs)
            }
        }
    }

    /// Attach embedding vectors where the strategy still allows the
    /// spend; entries left without a vector fall back to keyword search
    async fn embed_entries(&self, entries: &mut [IndexEntry], params: &StrategyParams) {
        if params.reduce_prompt_detail {
            debug!("Skipping embeddings under the current strategy");
            return;
        }

        let mut embedded = 0;
        for entry in entries.iter_mut() {
            let estimated = estimate_tokens(&entry.text);
            let result = self
                .scheduler
                .execute("index_embedding", Priority::Normal, estimated, || {
                    self.model.embed(&entry.text)
                })
                .await;
            match result {
                Ok(vector) => {
                    entry.vector = Some(vector);
                    embedded += 1;
                }
                Err(e) => {
                    warn!("Embedding failed, rest of index stays keyword-only: {}", e);
                    break;
                }
            }
        }
        debug!("💾 Embedded {}/{} index entries", embedded, entries.len());
    }

    async fn generate_summary(&self, meta: &VideoMetadata, transcript: &Transcript) -> Option<String> {
        let params = self.scheduler.active_strategy().await.params();
        if params.fallback_responses || transcript.is_empty() {
            return None;
        }

        let text = transcript.full_text();
        let head: String = text.chars().take(SUMMARY_INPUT_CHARS).collect();
        let prompt = format!(
            "Summarize the video \"{}\" in 3 to 5 sentences based on this transcript:\n\n{}",
            meta.title, head
        );

        let estimated = estimate_tokens(&prompt);
        match self
            .scheduler
            .execute("summary_generation", Priority::Normal, estimated, || {
                self.model.generate(&prompt)
            })
            .await
        {
            Ok(reply) => Some(reply.text.trim().to_string()),
            Err(e) => {
                warn!("Summary generation failed for {}: {}", meta.id, e);
                None
            }
        }
    }

    async fn mark_failed(&self, video_id: &str, message: &str) {
        if let Some(mut meta) = self.store.get(video_id).await {
            meta.status = VideoStatus::Failed;
            meta.error = Some(message.to_string());
            if let Err(e) = self.store.update(meta).await {
                warn!("Could not persist failure for {}: {}", video_id, e);
            }
        }
        self.store.clear_progress(video_id).await;
    }

    async fn report(&self, video_id: &str, stage: &str, progress: f64, message: &str) {
        debug!("📊 {} {}: {:.0}%", video_id, stage, progress * 100.0);
        self.store
            .set_progress(ProcessingProgress::new(video_id, stage, progress, message))
            .await;
    }
}

/// Placeholder transcript carrying the title across fixed windows, so a
/// video without captions is still indexed with usable timing
fn pseudo_transcript(title: &str, duration_secs: f64, chunk_secs: u64) -> Transcript {
    let chunk_secs = chunk_secs.max(1) as f64;
    let windows = if duration_secs > 0.0 {
        (duration_secs / chunk_secs).ceil() as usize
    } else {
        1
    };

    let chunks = (0..windows)
        .map(|i| {
            let start = i as f64 * chunk_secs;
            TranscriptChunk {
                start_secs: start,
                end_secs: (start + chunk_secs).min(duration_secs.max(chunk_secs)),
                text: format!("{} (part {} of {})", title, i + 1, windows),
            }
        })
        .collect();

    Transcript {
        kind: TranscriptKind::Pseudo,
        language: None,
        chunks,
    }
}

/// Turn frame descriptions into a timed transcript, one chunk per
/// described frame
fn transcript_from_descriptions(frames: &[FrameData], duration_secs: f64) -> Transcript {
    let described: Vec<&FrameData> = frames.iter().filter(|f| f.description.is_some()).collect();

    let chunks = described
        .iter()
        .enumerate()
        .filter_map(|(i, frame)| {
            let text = frame.description.clone()?;
            let end = described
                .get(i + 1)
                .map(|next| next.timestamp_secs)
                .unwrap_or_else(|| duration_secs.max(frame.timestamp_secs));
            Some(TranscriptChunk {
                start_secs: frame.timestamp_secs,
                end_secs: end,
                text,
            })
        })
        .collect();

    Transcript {
        kind: TranscriptKind::Generated,
        language: None,
        chunks,
    }
}

/// Parse "MM:SS | Title" chapter lines, dropping anything past the end
/// of the video
fn parse_chapter_lines(text: &str, duration_secs: f64) -> Vec<Chapter> {
    let re = match Regex::new(r"(?m)^\s*(\d{1,2}):(\d{2})\s*\|\s*(.+?)\s*$") {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };

    let mut chapters: Vec<Chapter> = re
        .captures_iter(text)
        .filter_map(|caps| {
            let minutes: f64 = caps[1].parse().ok()?;
            let seconds: f64 = caps[2].parse().ok()?;
            let start = minutes * 60.0 + seconds;
            if duration_secs > 0.0 && start >= duration_secs {
                return None;
            }
            Some(Chapter {
                title: caps[3].to_string(),
                start_secs: start,
                end_secs: start,
                summary: None,
            })
        })
        .collect();

    chapters.sort_by(|a, b| {
        a.start_secs
            .partial_cmp(&b.start_secs)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let count = chapters.len();
    for i in 0..count {
        chapters[i].end_secs = if i + 1 < count {
            chapters[i + 1].start_secs
        } else if duration_secs > 0.0 {
            duration_secs
        } else {
            chapters[i].start_secs
        };
    }
    chapters
}

/// Fixed-window chapters when the model is unavailable: one "Part N"
/// per five transcript chunks
fn derive_default_chapters(transcript: &Transcript, duration_secs: f64) -> Vec<Chapter> {
    const CHUNKS_PER_CHAPTER: usize = 5;

    let mut chapters: Vec<Chapter> = transcript
        .chunks
        .chunks(CHUNKS_PER_CHAPTER)
        .enumerate()
        .map(|(i, group)| Chapter {
            title: format!("Part {}", i + 1),
            start_secs: group.first().map(|c| c.start_secs).unwrap_or(0.0),
            end_secs: group.last().map(|c| c.end_secs).unwrap_or(0.0),
            summary: None,
        })
        .collect();

    if let Some(last) = chapters.last_mut() {
        last.end_secs = last.end_secs.max(duration_secs);
    }
    chapters
}

/// Index entries from every searchable artifact of a video
fn build_index_entries(
    video_id: &str,
    transcript: &Transcript,
    frames: &[FrameData],
    chapters: &[Chapter],
) -> Vec<IndexEntry> {
    let mut entries = Vec::new();

    for chunk in &transcript.chunks {
        entries.push(IndexEntry::new(
            video_id,
            EntryKind::Transcript,
            chunk.text.clone(),
            chunk.start_secs,
            chunk.end_secs,
        ));
    }

    for frame in frames {
        if let Some(description) = &frame.description {
            entries.push(IndexEntry::new(
                video_id,
                EntryKind::Frame,
                description.clone(),
                frame.timestamp_secs,
                frame.timestamp_secs,
            ));
        }
    }

    for chapter in chapters {
        entries.push(IndexEntry::new(
            video_id,
            EntryKind::Chapter,
            chapter.title.clone(),
            chapter.start_secs,
            chapter.end_secs,
        ));
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::ModelReply;
    use crate::quota::{CallError, QuotaLimits, Strategy};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tempfile::TempDir;
    use tokio::sync::Mutex;

    #[test]
    fn test_pseudo_transcript_windows() {
        let t = pseudo_transcript("Demo video", 95.0, 30);
        assert_eq!(t.kind, TranscriptKind::Pseudo);
        assert_eq!(t.chunks.len(), 4);
        assert_eq!(t.chunks[0].start_secs, 0.0);
        assert_eq!(t.chunks[3].start_secs, 90.0);
        assert_eq!(t.chunks[3].end_secs, 95.0);
        assert!(t.chunks[0].text.contains("Demo video"));

        // Unknown duration still yields one indexable chunk
        let t = pseudo_transcript("Demo", 0.0, 30);
        assert_eq!(t.chunks.len(), 1);
    }

    #[test]
    fn test_transcript_from_descriptions() {
        let frames = vec![
            FrameData {
                index: 0,
                timestamp_secs: 10.0,
                path: "frames/frame_0000.jpg".to_string(),
                description: Some("Intro slide".to_string()),
            },
            FrameData {
                index: 1,
                timestamp_secs: 50.0,
                path: "frames/frame_0001.jpg".to_string(),
                description: None,
            },
            FrameData {
                index: 2,
                timestamp_secs: 90.0,
                path: "frames/frame_0002.jpg".to_string(),
                description: Some("Closing remarks".to_string()),
            },
        ];

        let t = transcript_from_descriptions(&frames, 120.0);
        assert_eq!(t.kind, TranscriptKind::Generated);
        assert_eq!(t.chunks.len(), 2);
        assert_eq!(t.chunks[0].start_secs, 10.0);
        // Undescribed frames do not contribute boundaries
        assert_eq!(t.chunks[0].end_secs, 90.0);
        assert_eq!(t.chunks[1].end_secs, 120.0);
    }

    #[test]
    fn test_parse_chapter_lines() {
        let reply = "Here are the chapters:\n00:00 | Introduction\n02:30 | Main argument\n99:00 | Past the end\n08:15 | Wrap up\n";
        let chapters = parse_chapter_lines(reply, 600.0);

        assert_eq!(chapters.len(), 3);
        assert_eq!(chapters[0].title, "Introduction");
        assert_eq!(chapters[1].start_secs, 150.0);
        // Ends chain to the next start, the last one to the duration
        assert_eq!(chapters[0].end_secs, 150.0);
        assert_eq!(chapters[2].end_secs, 600.0);

        assert!(parse_chapter_lines("no chapters here", 600.0).is_empty());
    }

    #[test]
    fn test_derive_default_chapters() {
        let transcript = pseudo_transcript("T", 360.0, 30); // 12 chunks
        let chapters = derive_default_chapters(&transcript, 360.0);
        assert_eq!(chapters.len(), 3);
        assert_eq!(chapters[0].title, "Part 1");
        assert_eq!(chapters[0].start_secs, 0.0);
        assert_eq!(chapters[2].end_secs, 360.0);
    }

    #[test]
    fn test_build_index_entries_covers_all_kinds() {
        let transcript = pseudo_transcript("T", 60.0, 30);
        let frames = vec![FrameData {
            index: 0,
            timestamp_secs: 15.0,
            path: "frames/frame_0000.jpg".to_string(),
            description: Some("A desk".to_string()),
        }];
        let chapters = vec![Chapter {
            title: "Part 1".to_string(),
            start_secs: 0.0,
            end_secs: 60.0,
            summary: None,
        }];

        let entries = build_index_entries("v", &transcript, &frames, &chapters);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries.iter().filter(|e| e.kind == EntryKind::Transcript).count(), 2);
        assert_eq!(entries.iter().filter(|e| e.kind == EntryKind::Frame).count(), 1);
        assert_eq!(entries.iter().filter(|e| e.kind == EntryKind::Chapter).count(), 1);
    }

    struct ScriptedModel {
        descriptions: Mutex<VecDeque<String>>,
    }

    #[async_trait]
    impl GenerativeModel for ScriptedModel {
        async fn generate(&self, _prompt: &str) -> Result<ModelReply, CallError> {
            Err(CallError::Other(anyhow!("no generate in this test")))
        }

        async fn describe_image(&self, _prompt: &str, _jpeg: &[u8]) -> Result<ModelReply, CallError> {
            match self.descriptions.lock().await.pop_front() {
                Some(text) => Ok(ModelReply {
                    text,
                    tokens_used: Some(12),
                }),
                None => Err(CallError::Other(anyhow!("script exhausted"))),
            }
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, CallError> {
            Err(CallError::Other(anyhow!("no embeddings in this test")))
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_describe_frames_respects_strategy_cap() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(VideoStore::new(temp.path().to_path_buf()).await.unwrap());
        let index = Arc::new(SearchIndex::new(temp.path().to_path_buf()));
        let scheduler = Arc::new(Scheduler::new(QuotaLimits::free_tier()));
        let model = Arc::new(ScriptedModel {
            descriptions: Mutex::new(
                vec!["First frame".to_string(), "Second frame".to_string()].into(),
            ),
        });

        let youtube = Arc::new(YoutubeClient::new(30).unwrap());
        let pipeline = Pipeline::new(
            Config::default(),
            Arc::clone(&store),
            index,
            youtube,
            model,
            Arc::clone(&scheduler),
        );

        let mut meta = VideoMetadata::new(
            "v".to_string(),
            "Test".to_string(),
            VideoSource::Upload {
                filename: "clip.mp4".to_string(),
            },
        );
        let frames_dir = store.frames_dir("v");
        tokio::fs::create_dir_all(&frames_dir).await.unwrap();
        for i in 0..3 {
            let name = format!("frame_{:04}.jpg", i);
            tokio::fs::write(frames_dir.join(&name), [0xFF, 0xD8]).await.unwrap();
            meta.frames.push(FrameData {
                index: i,
                timestamp_secs: i as f64 * 10.0,
                path: format!("frames/{}", name),
                description: None,
            });
        }
        store.insert(meta.clone()).await.unwrap();

        // Emergency allows a single frame and no scripted reply is wasted
        let described = pipeline
            .describe_frames(&mut meta, &Strategy::Emergency.params())
            .await;
        assert_eq!(described, 1);
        assert_eq!(meta.frames[0].description.as_deref(), Some("First frame"));
        assert!(meta.frames[1].description.is_none());

        // Re-running under Normal skips the described frame, picks up the
        // next one, and leaves the last empty once the script runs dry
        let described = pipeline
            .describe_frames(&mut meta, &Strategy::Normal.params())
            .await;
        assert_eq!(described, 1);
        assert_eq!(meta.frames[0].description.as_deref(), Some("First frame"));
        assert_eq!(meta.frames[1].description.as_deref(), Some("Second frame"));
        assert!(meta.frames[2].description.is_none());
    }
}
