use crate::config::ProcessingConfig;
use crate::models::FrameData;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Video information extracted from file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub filename: String,
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub format: String,
    pub file_size: u64,
}

/// FFmpeg wrapper for probing, frame sampling, and thumbnails
#[derive(Debug, Clone)]
pub struct VideoProcessor {
    processing: ProcessingConfig,
    supported_extensions: Vec<String>,
}

impl VideoProcessor {
    pub fn new(processing: ProcessingConfig, supported_extensions: Vec<String>) -> Self {
        Self {
            processing,
            supported_extensions,
        }
    }

    /// Whether a filename carries a supported video extension
    pub fn is_supported(&self, filename: &str) -> bool {
        Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.supported_extensions.contains(&ext.to_lowercase()))
            .unwrap_or(false)
    }

    /// Extract video information using ffprobe
    pub async fn probe(&self, video_path: &Path) -> Result<VideoInfo> {
        let output = tokio::process::Command::new("ffprobe")
            .args([
                "-v", "quiet",
                "-print_format", "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(video_path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(anyhow!("ffprobe failed for {}", video_path.display()));
        }

        let json_str = String::from_utf8(output.stdout)?;
        let ffprobe_data: serde_json::Value = serde_json::from_str(&json_str)?;

        let format = &ffprobe_data["format"];
        let streams = ffprobe_data["streams"]
            .as_array()
            .ok_or_else(|| anyhow!("ffprobe returned no streams"))?;

        let video_stream = streams
            .iter()
            .find(|s| s["codec_type"] == "video")
            .ok_or_else(|| anyhow!("No video stream found"))?;

        let duration_secs: f64 = format["duration"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0);

        let file_size = tokio::fs::metadata(video_path).await?.len();

        let info = VideoInfo {
            path: video_path.to_path_buf(),
            filename: video_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            duration_secs,
            width: video_stream["width"].as_u64().unwrap_or(0) as u32,
            height: video_stream["height"].as_u64().unwrap_or(0) as u32,
            fps: video_stream["r_frame_rate"]
                .as_str()
                .and_then(parse_frame_rate)
                .unwrap_or(0.0),
            format: format["format_name"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
            file_size,
        };

        info!(
            "📹 Analyzed video: {} ({}x{}, {:.1}fps, {:.1}s)",
            info.filename, info.width, info.height, info.fps, info.duration_secs
        );

        Ok(info)
    }

    /// Validate video file integrity
    pub async fn validate(&self, video_path: &Path) -> Result<bool> {
        let output = tokio::process::Command::new("ffprobe")
            .args([
                "-v", "error",
                "-select_streams", "v:0",
                "-show_entries", "stream=codec_name",
                "-of", "csv=p=0",
            ])
            .arg(video_path)
            .output()
            .await?;

        Ok(output.status.success() && !output.stdout.is_empty())
    }

    /// Sample `count` frames evenly across the video into `frames_dir`.
    /// Individual frame failures are skipped so one bad seek does not
    /// sink the whole video.
    pub async fn extract_frames(
        &self,
        video_path: &Path,
        duration_secs: f64,
        count: usize,
        frames_dir: &Path,
    ) -> Result<Vec<FrameData>> {
        if count == 0 || duration_secs <= 0.0 {
            return Ok(Vec::new());
        }

        tokio::fs::create_dir_all(frames_dir).await?;
        let dir_name = frames_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("frames")
            .to_string();
        let scale = format!(
            "scale={}:{}",
            self.processing.frame_width, self.processing.frame_height
        );

        let mut frames = Vec::new();
        for (index, timestamp) in sample_timestamps(duration_secs, count).into_iter().enumerate() {
            let filename = format!("frame_{:04}.jpg", index);
            let frame_path = frames_dir.join(&filename);
            let timestamp_str = format!("{:.2}", timestamp);

            let status = tokio::process::Command::new("ffmpeg")
                .args(["-ss", &timestamp_str, "-i"])
                .arg(video_path)
                .args(["-vframes", "1", "-vf", &scale, "-q:v", "2", "-y"])
                .arg(&frame_path)
                .status()
                .await?;

            if !status.success() || !frame_path.exists() {
                warn!("Frame extraction failed at {:.2}s, skipping", timestamp);
                continue;
            }

            frames.push(FrameData {
                index,
                timestamp_secs: timestamp,
                path: format!("{}/{}", dir_name, filename),
                description: None,
            });
        }

        info!(
            "🖼️ Extracted {}/{} frames from {}",
            frames.len(),
            count,
            video_path.display()
        );

        Ok(frames)
    }

    /// Grab a thumbnail at 10% into the video
    pub async fn extract_thumbnail(
        &self,
        video_path: &Path,
        duration_secs: f64,
        output_path: &Path,
    ) -> Result<PathBuf> {
        let timestamp = (duration_secs * 0.1).max(0.0);
        let timestamp_str = format!("{:.2}", timestamp);

        let status = tokio::process::Command::new("ffmpeg")
            .args(["-ss", &timestamp_str, "-i"])
            .arg(video_path)
            .args(["-vframes", "1", "-vf", "scale=320:-1", "-q:v", "2", "-y"])
            .arg(output_path)
            .status()
            .await?;

        if !status.success() {
            return Err(anyhow!("Thumbnail extraction failed"));
        }

        Ok(output_path.to_path_buf())
    }
}

/// Midpoint-of-slice timestamps, so frames spread across the whole
/// video instead of bunching at the start
fn sample_timestamps(duration_secs: f64, count: usize) -> Vec<f64> {
    (0..count)
        .map(|i| (i as f64 + 0.5) * duration_secs / count as f64)
        .collect()
}

fn parse_frame_rate(raw: &str) -> Option<f64> {
    let parts: Vec<&str> = raw.split('/').collect();
    if parts.len() == 2 {
        let num: f64 = parts[0].parse().ok()?;
        let den: f64 = parts[1].parse().ok()?;
        if den == 0.0 {
            return None;
        }
        Some(num / den)
    } else {
        raw.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn processor() -> VideoProcessor {
        let config = Config::default();
        VideoProcessor::new(config.processing, config.storage.supported_extensions)
    }

    #[test]
    fn test_supported_extensions() {
        let processor = processor();
        assert!(processor.is_supported("lecture.mp4"));
        assert!(processor.is_supported("LECTURE.MOV"));
        assert!(!processor.is_supported("notes.txt"));
        assert!(!processor.is_supported("no_extension"));
    }

    #[test]
    fn test_sample_timestamps_spread() {
        let ts = sample_timestamps(100.0, 4);
        assert_eq!(ts, vec![12.5, 37.5, 62.5, 87.5]);

        // A single frame lands in the middle
        assert_eq!(sample_timestamps(60.0, 1), vec![30.0]);
        assert!(sample_timestamps(60.0, 0).is_empty());
    }

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30000/1001").map(|f| f.round()), Some(30.0));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("garbage"), None);
    }
}
