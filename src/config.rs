use crate::quota::QuotaLimits;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the video chat server
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Video storage settings
    pub storage: StorageConfig,

    /// Frame and transcript processing settings
    pub processing: ProcessingConfig,

    /// Gemini API settings
    pub gemini: GeminiConfig,

    /// Request quota settings
    pub quota: QuotaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the HTTP server
    pub host: String,

    /// Bind port for the HTTP server
    pub port: u16,

    /// Allow cross-origin requests from the dashboard
    pub enable_cors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for video artifacts
    pub base_dir: PathBuf,

    /// Maximum upload size in bytes (0 = no limit)
    pub max_file_size: u64,

    /// Supported video file extensions
    pub supported_extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Upper bound on frames sampled per video
    pub max_frames: usize,

    /// Extracted frame width in pixels
    pub frame_width: u32,

    /// Extracted frame height in pixels
    pub frame_height: u32,

    /// Transcript chunk duration in seconds
    pub chunk_duration_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// API key for Gemini requests
    pub api_key: Option<String>,

    /// Base URL for the Gemini REST API
    pub base_url: String,

    /// Model for chat and transcript work
    pub chat_model: String,

    /// Model for frame descriptions and visual scoring
    pub vision_model: String,

    /// Model for text embeddings
    pub embedding_model: String,

    /// Request timeout in seconds
    pub timeout_seconds: u64,

    /// Maximum tokens to generate per reply
    pub max_output_tokens: u32,

    /// Temperature for generation (0.0 = deterministic)
    pub temperature: f32,
}

/// Billing tier the Gemini key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaTier {
    Free,
    Paid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Billing tier that picks the baseline limits
    pub tier: QuotaTier,

    /// Override for requests per minute
    pub requests_per_minute: Option<u32>,

    /// Override for requests per day
    pub requests_per_day: Option<u32>,

    /// Override for tokens per minute
    pub tokens_per_minute: Option<u64>,

    /// Override for the maximum queue wait in seconds
    pub max_wait_secs: Option<u64>,

    /// Override for the retry budget after provider limit responses
    pub retry_attempts: Option<u32>,
}

impl QuotaConfig {
    /// Effective limits: the tier baseline with any overrides applied
    pub fn limits(&self) -> QuotaLimits {
        let base = match self.tier {
            QuotaTier::Free => QuotaLimits::free_tier(),
            QuotaTier::Paid => QuotaLimits::paid_tier(),
        };
        QuotaLimits {
            requests_per_minute: self.requests_per_minute.unwrap_or(base.requests_per_minute),
            requests_per_day: self.requests_per_day.unwrap_or(base.requests_per_day),
            tokens_per_minute: self.tokens_per_minute.unwrap_or(base.tokens_per_minute),
            max_wait_secs: self.max_wait_secs.unwrap_or(base.max_wait_secs),
            retry_attempts: self.retry_attempts.unwrap_or(base.retry_attempts),
        }
    }
}

impl Config {
    /// Load configuration from a file, or probe the usual locations.
    /// Falls back to defaults so the server starts without a config file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| anyhow!("Cannot read config file {}: {}", path.display(), e))?;
            let config: Config = toml::from_str(&raw)
                .map_err(|e| anyhow!("Cannot parse config file {}: {}", path.display(), e))?;
            tracing::info!("📄 Loaded configuration from: {}", path.display());
            config
        } else {
            Self::probe_default_paths()
        };

        config.apply_env();
        Ok(config)
    }

    fn probe_default_paths() -> Self {
        let config_paths = [
            "video-chat.toml",
            "config/video-chat.toml",
            "/etc/video-chat/config.toml",
        ];

        for path in &config_paths {
            if let Ok(raw) = std::fs::read_to_string(path) {
                match toml::from_str(&raw) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        Self::default()
    }

    /// Apply environment variable overrides
    fn apply_env(&mut self) {
        if let Ok(api_key) = std::env::var("GEMINI_API_KEY") {
            if !api_key.is_empty() {
                self.gemini.api_key = Some(api_key);
            }
        }

        if let Ok(host) = std::env::var("VIDEO_CHAT_HOST") {
            self.server.host = host;
        }

        if let Ok(port) = std::env::var("VIDEO_CHAT_PORT") {
            self.server.port = port.parse().unwrap_or(self.server.port);
        }

        if let Ok(dir) = std::env::var("VIDEO_CHAT_STORAGE_DIR") {
            self.storage.base_dir = PathBuf::from(dir);
        }

        if let Ok(tier) = std::env::var("VIDEO_CHAT_QUOTA_TIER") {
            match tier.to_lowercase().as_str() {
                "free" => self.quota.tier = QuotaTier::Free,
                "paid" => self.quota.tier = QuotaTier::Paid,
                other => tracing::warn!("Unknown quota tier '{}', keeping {:?}", other, self.quota.tier),
            }
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &str) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path);
        Ok(())
    }

    /// Validate configuration and prepare the storage directory
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("server.port must be greater than 0"));
        }

        if self.processing.max_frames == 0 {
            return Err(anyhow!("processing.max_frames must be greater than 0"));
        }

        if self.processing.chunk_duration_secs == 0 {
            return Err(anyhow!("processing.chunk_duration_secs must be greater than 0"));
        }

        if let Err(e) = url::Url::parse(&self.gemini.base_url) {
            return Err(anyhow!("gemini.base_url is not a valid URL: {}", e));
        }

        if !self.storage.base_dir.exists() {
            if let Err(e) = std::fs::create_dir_all(&self.storage.base_dir) {
                return Err(anyhow!("Cannot create storage directory: {}", e));
            }
        }

        if self.gemini.api_key.is_none() {
            tracing::warn!("⚠️ No Gemini API key configured; provider calls will fail until GEMINI_API_KEY is set");
        }

        tracing::info!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Video Chat Configuration:\n\
            - Server: {}:{}\n\
            - Storage Directory: {}\n\
            - Max Upload Size: {}MB\n\
            - Frames Per Video: {}\n\
            - Chat Model: {}\n\
            - Quota Tier: {:?} ({}/min, {}/day)",
            self.server.host,
            self.server.port,
            self.storage.base_dir.display(),
            self.storage.max_file_size / (1024 * 1024),
            self.processing.max_frames,
            self.gemini.chat_model,
            self.quota.tier,
            self.quota.limits().requests_per_minute,
            self.quota.limits().requests_per_day,
        )
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            enable_cors: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./storage"),
            max_file_size: 500 * 1024 * 1024, // 500MB
            supported_extensions: vec![
                "mp4".to_string(),
                "mov".to_string(),
                "avi".to_string(),
                "mkv".to_string(),
                "webm".to_string(),
            ],
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_frames: 20,
            frame_width: 320,
            frame_height: 180,
            chunk_duration_secs: 30,
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            chat_model: "gemini-1.5-flash".to_string(),
            vision_model: "gemini-1.5-flash".to_string(),
            embedding_model: "text-embedding-004".to_string(),
            timeout_seconds: 60,
            max_output_tokens: 1024,
            temperature: 0.7,
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            tier: QuotaTier::Free,
            requests_per_minute: None,
            requests_per_day: None,
            tokens_per_minute: None,
            max_wait_secs: None,
            retry_attempts: None,
        }
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.config.server.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    pub fn with_storage_dir(mut self, dir: PathBuf) -> Self {
        self.config.storage.base_dir = dir;
        self
    }

    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.config.gemini.api_key = Some(api_key);
        self
    }

    pub fn with_quota_tier(mut self, tier: QuotaTier) -> Self {
        self.config.quota.tier = tier;
        self
    }

    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.config.processing.max_frames = max_frames;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
