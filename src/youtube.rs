use crate::models::{Transcript, TranscriptChunk, TranscriptKind};
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const WATCH_URL: &str = "https://www.youtube.com/watch";
const OEMBED_URL: &str = "https://www.youtube.com/oembed";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum YoutubeError {
    #[error("not a recognizable YouTube URL")]
    InvalidUrl,

    #[error("video is unavailable or private")]
    Unavailable,

    #[error("video is restricted (region or age gate)")]
    Restricted,

    #[error("no caption tracks are published for this video")]
    NoCaptions,

    #[error("YouTube rejected the request, try again later")]
    Blocked,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Basic metadata from the oEmbed endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct YoutubeVideoInfo {
    pub title: String,
    #[serde(rename = "author_name")]
    pub author: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaptionTrack {
    base_url: String,
    language_code: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    is_translatable: bool,
}

impl CaptionTrack {
    fn is_auto_generated(&self) -> bool {
        self.kind.as_deref() == Some("asr")
    }
}

#[derive(Debug, Deserialize)]
struct Json3Transcript {
    #[serde(default)]
    events: Vec<Json3Event>,
}

#[derive(Debug, Deserialize)]
struct Json3Event {
    #[serde(rename = "tStartMs", default)]
    start_ms: u64,
    #[serde(rename = "dDurationMs", default)]
    duration_ms: Option<u64>,
    #[serde(default)]
    segs: Option<Vec<Json3Seg>>,
}

#[derive(Debug, Deserialize)]
struct Json3Seg {
    #[serde(default)]
    utf8: String,
}

#[derive(Debug, Clone)]
struct Cue {
    start_secs: f64,
    end_secs: f64,
    text: String,
}

/// Fetches YouTube metadata and caption tracks without downloading media
#[derive(Debug, Clone)]
pub struct YoutubeClient {
    client: reqwest::Client,
    chunk_duration_secs: u64,
}

/// Pull the 11-character video ID out of a URL, or accept a bare ID
pub fn extract_video_id(input: &str) -> Option<String> {
    let input = input.trim();

    let bare = Regex::new(r"^[0-9A-Za-z_-]{11}$").ok()?;
    if bare.is_match(input) {
        return Some(input.to_string());
    }

    let from_url = Regex::new(
        r"(?:youtube\.com/watch\?(?:[^#]*&)?v=|youtube\.com/embed/|youtube\.com/shorts/|youtube\.com/live/|youtu\.be/)([0-9A-Za-z_-]{11})",
    )
    .ok()?;
    from_url
        .captures(input)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

impl YoutubeClient {
    pub fn new(chunk_duration_secs: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            chunk_duration_secs,
        })
    }

    /// Title and channel via oEmbed
    pub async fn fetch_info(&self, youtube_id: &str) -> Result<YoutubeVideoInfo, YoutubeError> {
        let watch_url = format!("{}?v={}", WATCH_URL, youtube_id);
        let url = format!(
            "{}?url={}&format=json",
            OEMBED_URL,
            urlencoding::encode(&watch_url)
        );

        let response = self.client.get(&url).send().await?;
        match response.status().as_u16() {
            200 => Ok(response.json().await?),
            401 | 403 => Err(YoutubeError::Restricted),
            429 => Err(YoutubeError::Blocked),
            _ => Err(YoutubeError::Unavailable),
        }
    }

    /// Fetch the best caption track and chunk it into timed spans
    pub async fn fetch_transcript(&self, youtube_id: &str) -> Result<Transcript, YoutubeError> {
        let watch_url = format!("{}?v={}", WATCH_URL, youtube_id);
        let response = self.client.get(&watch_url).send().await?;

        if response.status().as_u16() == 429 {
            return Err(YoutubeError::Blocked);
        }
        let page = response.text().await?;
        if page.contains("consent.youtube.com") {
            return Err(YoutubeError::Blocked);
        }

        let tracks = extract_caption_tracks(&page)?;
        let (track, needs_translation) =
            pick_caption_track(&tracks).ok_or(YoutubeError::NoCaptions)?;

        let mut track_url = format!("{}&fmt=json3", track.base_url);
        if needs_translation {
            track_url.push_str("&tlang=en");
        }

        debug!(
            "🌐 Fetching '{}' captions for {} (auto: {})",
            track.language_code,
            youtube_id,
            track.is_auto_generated()
        );

        let raw = self.client.get(&track_url).send().await?.text().await?;
        let parsed: Json3Transcript =
            serde_json::from_str(&raw).map_err(|e| YoutubeError::Other(e.into()))?;

        let cues = collect_cues(&parsed);
        if cues.is_empty() {
            return Err(YoutubeError::NoCaptions);
        }

        let chunks = chunk_cues(&cues, self.chunk_duration_secs);
        info!(
            "✅ Transcript for {}: {} cues into {} chunks",
            youtube_id,
            cues.len(),
            chunks.len()
        );

        Ok(Transcript {
            kind: TranscriptKind::Captions,
            language: Some(if needs_translation {
                "en".to_string()
            } else {
                track.language_code.clone()
            }),
            chunks,
        })
    }
}

fn extract_caption_tracks(page: &str) -> Result<Vec<CaptionTrack>, YoutubeError> {
    let marker = "\"captionTracks\":";
    let start = match page.find(marker) {
        Some(pos) => pos + marker.len(),
        None => {
            return if page.contains("\"status\":\"ERROR\"")
                || page.contains("Video unavailable")
            {
                Err(YoutubeError::Unavailable)
            } else {
                Err(YoutubeError::NoCaptions)
            };
        }
    };

    // Walk to the matching close bracket of the JSON array
    let bytes = page.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut end = None;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'[' if !in_string => depth += 1,
            b']' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    end = Some(start + offset + 1);
                    break;
                }
            }
            _ => {}
        }
    }

    let end = end.ok_or(YoutubeError::NoCaptions)?;
    serde_json::from_str(&page[start..end]).map_err(|e| YoutubeError::Other(e.into()))
}

/// Track preference: manual English, any manual en-*, auto-generated
/// English, then anything translatable to English
fn pick_caption_track(tracks: &[CaptionTrack]) -> Option<(&CaptionTrack, bool)> {
    if let Some(track) = tracks
        .iter()
        .find(|t| t.language_code == "en" && !t.is_auto_generated())
    {
        return Some((track, false));
    }
    if let Some(track) = tracks
        .iter()
        .find(|t| t.language_code.starts_with("en") && !t.is_auto_generated())
    {
        return Some((track, false));
    }
    if let Some(track) = tracks
        .iter()
        .find(|t| t.language_code.starts_with("en") && t.is_auto_generated())
    {
        return Some((track, false));
    }
    tracks
        .iter()
        .find(|t| t.is_translatable)
        .map(|t| (t, true))
}

fn collect_cues(parsed: &Json3Transcript) -> Vec<Cue> {
    parsed
        .events
        .iter()
        .filter_map(|event| {
            let text = event
                .segs
                .as_ref()?
                .iter()
                .map(|s| s.utf8.as_str())
                .collect::<String>();
            let text = text.replace('\n', " ").trim().to_string();
            if text.is_empty() {
                return None;
            }
            let start_secs = event.start_ms as f64 / 1000.0;
            let end_secs = start_secs + event.duration_ms.unwrap_or(0) as f64 / 1000.0;
            Some(Cue {
                start_secs,
                end_secs,
                text,
            })
        })
        .collect()
}

/// Merge cues into fixed windows keyed by their start time
fn chunk_cues(cues: &[Cue], chunk_secs: u64) -> Vec<TranscriptChunk> {
    let chunk_secs = chunk_secs.max(1) as f64;
    let mut chunks: Vec<TranscriptChunk> = Vec::new();

    for cue in cues {
        let bucket_start = (cue.start_secs / chunk_secs).floor() * chunk_secs;
        match chunks.last_mut() {
            Some(last) if last.start_secs == bucket_start => {
                last.text.push(' ');
                last.text.push_str(&cue.text);
                last.end_secs = last.end_secs.max(cue.end_secs);
            }
            _ => chunks.push(TranscriptChunk {
                start_secs: bucket_start,
                end_secs: cue.end_secs.max(bucket_start),
                text: cue.text.clone(),
            }),
        }
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_video_id_url_forms() {
        let id = Some("dQw4w9WgXcQ".to_string());
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            id
        );
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?list=PL123&v=dQw4w9WgXcQ"),
            id
        );
        assert_eq!(extract_video_id("https://youtu.be/dQw4w9WgXcQ?t=42"), id);
        assert_eq!(
            extract_video_id("https://www.youtube.com/embed/dQw4w9WgXcQ"),
            id
        );
        assert_eq!(
            extract_video_id("https://www.youtube.com/shorts/dQw4w9WgXcQ"),
            id
        );
        assert_eq!(extract_video_id("dQw4w9WgXcQ"), id);

        assert_eq!(extract_video_id("https://example.com/watch?v=dQw4w9WgXcQ"), None);
        assert_eq!(extract_video_id("not a url"), None);
        assert_eq!(extract_video_id("https://www.youtube.com/watch?v=short"), None);
    }

    fn track(lang: &str, kind: Option<&str>, translatable: bool) -> CaptionTrack {
        CaptionTrack {
            base_url: format!("https://captions/{}", lang),
            language_code: lang.to_string(),
            kind: kind.map(|k| k.to_string()),
            is_translatable: translatable,
        }
    }

    #[test]
    fn test_caption_track_preference() {
        // Manual English beats auto-generated English
        let tracks = vec![track("en", Some("asr"), true), track("en", None, true)];
        let (picked, translate) = pick_caption_track(&tracks).unwrap();
        assert!(!picked.is_auto_generated());
        assert!(!translate);

        // Regional English accepted when plain "en" is missing
        let tracks = vec![track("de", None, true), track("en-GB", None, true)];
        assert_eq!(pick_caption_track(&tracks).unwrap().0.language_code, "en-GB");

        // Auto-generated English over translating a foreign track
        let tracks = vec![track("de", None, true), track("en", Some("asr"), true)];
        let (picked, translate) = pick_caption_track(&tracks).unwrap();
        assert!(picked.is_auto_generated());
        assert!(!translate);

        // Last resort: translate whatever is translatable
        let tracks = vec![track("de", None, true)];
        let (picked, translate) = pick_caption_track(&tracks).unwrap();
        assert_eq!(picked.language_code, "de");
        assert!(translate);

        // Nothing usable
        let tracks = vec![track("de", None, false)];
        assert!(pick_caption_track(&tracks).is_none());
    }

    #[test]
    fn test_extract_caption_tracks_from_page() {
        let page = r#"...,"captions":{"playerCaptionsTracklistRenderer":{"captionTracks":[{"baseUrl":"https://www.youtube.com/api/timedtext?v=abc\u0026lang=en","name":{"simpleText":"English"},"languageCode":"en","isTranslatable":true}]}},"videoDetails":..."#;
        let tracks = extract_caption_tracks(page).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].language_code, "en");
        // The \u0026 escape must decode back to an ampersand
        assert!(tracks[0].base_url.contains("?v=abc&lang=en"));
    }

    #[test]
    fn test_extract_caption_tracks_missing() {
        assert!(matches!(
            extract_caption_tracks("<html>no captions here</html>"),
            Err(YoutubeError::NoCaptions)
        ));
        assert!(matches!(
            extract_caption_tracks(r#"{"status":"ERROR","reason":"Video unavailable"}"#),
            Err(YoutubeError::Unavailable)
        ));
    }

    #[test]
    fn test_json3_cues_and_chunking() {
        let raw = r#"{
            "events": [
                {"tStartMs": 0, "dDurationMs": 2000, "segs": [{"utf8": "Hello"}, {"utf8": " there"}]},
                {"tStartMs": 2500, "segs": [{"utf8": "\n"}]},
                {"tStartMs": 5000, "dDurationMs": 1500, "segs": [{"utf8": "welcome back"}]},
                {"tStartMs": 31000, "dDurationMs": 2000, "segs": [{"utf8": "second window"}]}
            ]
        }"#;
        let parsed: Json3Transcript = serde_json::from_str(raw).unwrap();
        let cues = collect_cues(&parsed);
        // The newline-only event is dropped
        assert_eq!(cues.len(), 3);
        assert_eq!(cues[0].text, "Hello there");

        let chunks = chunk_cues(&cues, 30);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].start_secs, 0.0);
        assert_eq!(chunks[0].text, "Hello there welcome back");
        assert_eq!(chunks[1].start_secs, 30.0);
        assert_eq!(chunks[1].text, "second window");
        assert!(chunks[1].end_secs >= 33.0);
    }
}
