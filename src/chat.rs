use crate::gemini::GenerativeModel;
use crate::index::{EntryKind, SearchIndex};
use crate::models::VideoMetadata;
use crate::quota::{estimate_tokens, Priority, Scheduler};
use crate::storage::VideoStore;
use anyhow::{anyhow, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const CONTEXT_TRANSCRIPT_CHUNKS: usize = 5;
const CONTEXT_FRAMES: usize = 3;
const CONTEXT_HISTORY_TURNS: usize = 3;
const TRANSCRIPT_SNIPPET_CHARS: usize = 1000;
const DESCRIPTION_SNIPPET_CHARS: usize = 200;
const TIMESTAMP_TOLERANCE_SECS: f64 = 30.0;
const MIN_VISUAL_SCORE: f32 = 0.3;
const MAX_SCORED_FRAMES: usize = 20;

/// One prior exchange in a chat session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// Answer with the video moments it cites
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub reply: String,
    pub timestamps: Vec<f64>,

    /// Transcript excerpts and frame descriptions that fed the prompt
    pub sources_used: usize,

    /// True when the reply came from the reduced quota path
    pub degraded: bool,
}

/// One frame matching a visual search query
#[derive(Debug, Clone, Serialize)]
pub struct VisualMatch {
    pub frame_index: usize,
    pub timestamp_secs: f64,
    pub frame_path: String,
    pub score: f32,
    pub description: String,
}

/// Answers questions about indexed videos and searches their frames
pub struct ChatEngine {
    model: Arc<dyn GenerativeModel>,
    scheduler: Arc<Scheduler>,
    store: Arc<VideoStore>,
    index: Arc<SearchIndex>,
}

impl ChatEngine {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        scheduler: Arc<Scheduler>,
        store: Arc<VideoStore>,
        index: Arc<SearchIndex>,
    ) -> Self {
        Self {
            model,
            scheduler,
            store,
            index,
        }
    }

    /// Answer a question about one video, citing timestamps
    pub async fn chat(
        &self,
        video_id: &str,
        message: &str,
        history: &[ChatTurn],
    ) -> Result<ChatReply> {
        let meta = self.ready_video(video_id).await?;
        let params = self.scheduler.active_strategy().await.params();

        if params.fallback_responses {
            info!("🚫 Quota exhausted, answering '{}' from the index only", video_id);
            return self.fallback_reply(video_id, message).await;
        }

        let query_vector = self.query_vector(message).await;
        let chunk_budget = if params.reduce_prompt_detail {
            CONTEXT_TRANSCRIPT_CHUNKS.min(3)
        } else {
            CONTEXT_TRANSCRIPT_CHUNKS
        };
        let snippet_chars = if params.reduce_prompt_detail {
            300
        } else {
            TRANSCRIPT_SNIPPET_CHARS
        };

        let transcript_hits = self
            .index
            .query(
                video_id,
                message,
                query_vector.as_deref(),
                Some(EntryKind::Transcript),
                chunk_budget,
            )
            .await?;
        let frame_hits = if params.reduce_prompt_detail {
            Vec::new()
        } else {
            self.index
                .query(
                    video_id,
                    message,
                    query_vector.as_deref(),
                    Some(EntryKind::Frame),
                    CONTEXT_FRAMES,
                )
                .await?
        };

        let prompt = build_chat_prompt(
            &meta,
            message,
            history,
            &transcript_hits,
            &frame_hits,
            snippet_chars,
        );

        let estimated = estimate_tokens(&prompt);
        let reply = self
            .scheduler
            .execute("chat_completion", Priority::High, estimated, || {
                self.model.generate(&prompt)
            })
            .await
            .map_err(anyhow::Error::new)?;

        let valid_starts = self.indexed_starts(video_id).await?;
        let timestamps = extract_timestamps(&reply.text, &valid_starts);

        Ok(ChatReply {
            reply: reply.text,
            timestamps,
            sources_used: transcript_hits.len() + frame_hits.len(),
            degraded: false,
        })
    }

    /// Score frames against a visual query, best matches first. An
    /// optional time range restricts which frames are considered.
    pub async fn visual_search(
        &self,
        video_id: &str,
        query: &str,
        max_results: usize,
        time_range: Option<(f64, f64)>,
    ) -> Result<Vec<VisualMatch>> {
        let meta = self.ready_video(video_id).await?;
        if meta.frames.is_empty() {
            return Ok(Vec::new());
        }

        let params = self.scheduler.active_strategy().await.params();
        let mut matches = Vec::new();

        let in_range = |ts: f64| match time_range {
            Some((start, end)) => ts >= start && ts <= end,
            None => true,
        };

        for frame in meta
            .frames
            .iter()
            .filter(|f| in_range(f.timestamp_secs))
            .take(MAX_SCORED_FRAMES)
        {
            let scored = if params.skip_visual_analysis {
                keyword_frame_score(frame.description.as_deref(), query)
            } else {
                match self.score_frame(&meta, frame, query).await {
                    Ok(scored) => scored,
                    Err(e) => {
                        warn!("Frame {} scoring failed: {}, using keywords", frame.index, e);
                        keyword_frame_score(frame.description.as_deref(), query)
                    }
                }
            };

            if scored.0 >= MIN_VISUAL_SCORE {
                matches.push(VisualMatch {
                    frame_index: frame.index,
                    timestamp_secs: frame.timestamp_secs,
                    frame_path: frame.path.clone(),
                    score: scored.0,
                    description: scored.1,
                });
            }
        }

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(max_results);
        Ok(matches)
    }

    async fn ready_video(&self, video_id: &str) -> Result<VideoMetadata> {
        let meta = self
            .store
            .get(video_id)
            .await
            .ok_or_else(|| anyhow!("Video {} not found", video_id))?;
        if !meta.is_ready() {
            return Err(anyhow!(
                "Video {} is not ready for chat (status: {:?})",
                video_id,
                meta.status
            ));
        }
        Ok(meta)
    }

    /// Embed the query through the scheduler; fall back to keyword
    /// scoring when the quota will not admit it
    async fn query_vector(&self, message: &str) -> Option<Vec<f32>> {
        let estimated = estimate_tokens(message);
        match self
            .scheduler
            .execute("query_embedding", Priority::High, estimated, || {
                self.model.embed(message)
            })
            .await
        {
            Ok(vector) => Some(vector),
            Err(e) => {
                debug!("Query embedding unavailable ({}), keyword ranking", e);
                None
            }
        }
    }

    async fn indexed_starts(&self, video_id: &str) -> Result<Vec<f64>> {
        let entries = self.index.get(video_id).await?;
        Ok(entries.iter().map(|e| e.start_secs).collect())
    }

    async fn fallback_reply(&self, video_id: &str, message: &str) -> Result<ChatReply> {
        let hits = self
            .index
            .query(video_id, message, None, Some(EntryKind::Transcript), 1)
            .await?;

        let reply = match hits.first().filter(|h| h.score > 0.0) {
            Some(hit) => format!(
                "The request quota is exhausted right now, so here is the closest transcript \
                 excerpt instead: [{}] \"{}\"",
                format_timestamp(hit.entry.start_secs),
                truncate_chars(&hit.entry.text, DESCRIPTION_SNIPPET_CHARS)
            ),
            None => "The request quota is exhausted right now and nothing in the transcript \
                     matches that question. Please try again after the quota resets."
                .to_string(),
        };

        let timestamps: Vec<f64> = hits
            .iter()
            .filter(|h| h.score > 0.0)
            .map(|h| h.entry.start_secs)
            .collect();
        Ok(ChatReply {
            reply,
            sources_used: timestamps.len(),
            timestamps,
            degraded: true,
        })
    }

    async fn score_frame(
        &self,
        meta: &VideoMetadata,
        frame: &crate::models::FrameData,
        query: &str,
    ) -> Result<(f32, String)> {
        let frame_file = self.store.video_dir(&meta.id).join(&frame.path);
        let jpeg = tokio::fs::read(&frame_file).await?;

        let prompt = format!(
            "Rate how well this video frame matches the search query \"{}\".\n\
             Reply with exactly one line in the form:\n\
             SCORE: <0.0-1.0> | DESCRIPTION: <one sentence describing what is shown>",
            query
        );
        let estimated = estimate_tokens(&prompt) + 260; // image tokens

        let reply = self
            .scheduler
            .execute("frame_scoring", Priority::High, estimated, || {
                self.model.describe_image(&prompt, &jpeg)
            })
            .await
            .map_err(|e| anyhow!("{}", e))?;

        parse_score_line(&reply.text)
            .ok_or_else(|| anyhow!("Unparseable score reply: {}", reply.text))
    }
}

/// Parse "SCORE: 0.8 | DESCRIPTION: ..." replies, clamping the score
pub fn parse_score_line(text: &str) -> Option<(f32, String)> {
    let re = Regex::new(r"(?i)SCORE:\s*([0-9]*\.?[0-9]+)\s*\|\s*DESCRIPTION:\s*(.+)").ok()?;
    let caps = re.captures(text)?;
    let score: f32 = caps.get(1)?.as_str().parse().ok()?;
    let description = caps.get(2)?.as_str().trim().to_string();
    Some((score.clamp(0.0, 1.0), description))
}

/// Keyword fallback scoring over a frame's stored description
fn keyword_frame_score(description: Option<&str>, query: &str) -> (f32, String) {
    let description = description.unwrap_or("").to_string();
    let overlap = crate::index::keyword_score(&description, query);
    let score = if overlap >= 1.0 {
        0.7
    } else if overlap > 0.0 {
        0.4
    } else {
        0.1
    };
    (score, description)
}

/// Pull [MM:SS] citations out of a reply, keeping only ones close to a
/// moment the index actually knows about
pub fn extract_timestamps(reply: &str, indexed_starts: &[f64]) -> Vec<f64> {
    let re = match Regex::new(r"\[(\d{1,2}):(\d{2})\]") {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };

    let mut seen = Vec::new();
    for caps in re.captures_iter(reply) {
        let minutes: f64 = caps[1].parse().unwrap_or(0.0);
        let seconds: f64 = caps[2].parse().unwrap_or(0.0);
        let total = minutes * 60.0 + seconds;

        let is_known = indexed_starts
            .iter()
            .any(|start| (start - total).abs() <= TIMESTAMP_TOLERANCE_SECS);
        if is_known && !seen.contains(&total) {
            seen.push(total);
        }
    }
    seen.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    seen
}

pub fn format_timestamp(secs: f64) -> String {
    let total = secs.max(0.0).round() as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn build_chat_prompt(
    meta: &VideoMetadata,
    message: &str,
    history: &[ChatTurn],
    transcript_hits: &[crate::index::ScoredEntry],
    frame_hits: &[crate::index::ScoredEntry],
    snippet_chars: usize,
) -> String {
    let mut prompt = format!(
        "You are an assistant answering questions about a video titled \"{}\".\n",
        meta.title
    );
    if let Some(summary) = &meta.summary {
        prompt.push_str(&format!("Video summary: {}\n", truncate_chars(summary, snippet_chars)));
    }

    if !transcript_hits.is_empty() {
        prompt.push_str("\nTranscript excerpts:\n");
        for hit in transcript_hits {
            prompt.push_str(&format!(
                "[{} - {}] {}\n",
                format_timestamp(hit.entry.start_secs),
                format_timestamp(hit.entry.end_secs),
                truncate_chars(&hit.entry.text, snippet_chars)
            ));
        }
    }

    if !frame_hits.is_empty() {
        prompt.push_str("\nFrame descriptions:\n");
        for hit in frame_hits {
            prompt.push_str(&format!(
                "[{}] {}\n",
                format_timestamp(hit.entry.start_secs),
                truncate_chars(&hit.entry.text, DESCRIPTION_SNIPPET_CHARS)
            ));
        }
    }

    let recent: Vec<&ChatTurn> = history
        .iter()
        .rev()
        .take(CONTEXT_HISTORY_TURNS)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if !recent.is_empty() {
        prompt.push_str("\nRecent conversation:\n");
        for turn in recent {
            let role = match turn.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            };
            prompt.push_str(&format!("{}: {}\n", role, turn.content));
        }
    }

    prompt.push_str(&format!(
        "\nQuestion: {}\n\nAnswer using the excerpts above. When you reference a moment in the \
         video, cite its timestamp as [MM:SS].",
        message
    ));
    prompt
}
