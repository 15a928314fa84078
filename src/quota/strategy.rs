use super::tracker::QuotaUsage;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

/// Processing posture, ordered from most permissive to most restrictive.
/// The ordering lets callers tighten with a plain `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Normal,
    Batch,
    Conservative,
    Emergency,
}

/// Knobs a strategy applies to processing and chat
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StrategyParams {
    pub max_frames_per_video: usize,
    pub batch_delay_secs: u64,
    pub max_concurrent: usize,
    pub reduce_prompt_detail: bool,
    pub skip_visual_analysis: bool,
    pub fallback_responses: bool,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Normal => "normal",
            Strategy::Batch => "batch",
            Strategy::Conservative => "conservative",
            Strategy::Emergency => "emergency",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "normal" => Some(Strategy::Normal),
            "batch" => Some(Strategy::Batch),
            "conservative" => Some(Strategy::Conservative),
            "emergency" => Some(Strategy::Emergency),
            _ => None,
        }
    }

    pub fn params(&self) -> StrategyParams {
        match self {
            Strategy::Normal => StrategyParams {
                max_frames_per_video: 10,
                batch_delay_secs: 0,
                max_concurrent: 4,
                reduce_prompt_detail: false,
                skip_visual_analysis: false,
                fallback_responses: false,
            },
            Strategy::Batch => StrategyParams {
                max_frames_per_video: 5,
                batch_delay_secs: 60,
                max_concurrent: 2,
                reduce_prompt_detail: false,
                skip_visual_analysis: false,
                fallback_responses: false,
            },
            Strategy::Conservative => StrategyParams {
                max_frames_per_video: 3,
                batch_delay_secs: 90,
                max_concurrent: 1,
                reduce_prompt_detail: true,
                skip_visual_analysis: false,
                fallback_responses: false,
            },
            Strategy::Emergency => StrategyParams {
                max_frames_per_video: 1,
                batch_delay_secs: 120,
                max_concurrent: 1,
                reduce_prompt_detail: true,
                skip_visual_analysis: true,
                fallback_responses: true,
            },
        }
    }

    /// Map one window's utilization percentage onto a strategy
    fn from_percent(percent: f64) -> Self {
        if percent >= 90.0 {
            Strategy::Emergency
        } else if percent >= 70.0 {
            Strategy::Conservative
        } else if percent >= 40.0 {
            Strategy::Batch
        } else {
            Strategy::Normal
        }
    }

    /// Pick the stricter of the minute and day window recommendations
    pub fn from_usage(usage: &QuotaUsage) -> Self {
        let minute = Self::from_percent(usage.minute_percent);
        let day = Self::from_percent(usage.day_percent);
        minute.max(day)
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chooses the active strategy: a manual override wins, otherwise the
/// recommendation derived from current quota utilization.
#[derive(Debug, Default)]
pub struct StrategySelector {
    forced: RwLock<Option<Strategy>>,
}

impl StrategySelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn select(&self, usage: &QuotaUsage) -> Strategy {
        if let Some(strategy) = *self.forced.read().await {
            return strategy;
        }
        Strategy::from_usage(usage)
    }

    /// Pin the strategy regardless of utilization
    pub async fn force(&self, strategy: Strategy) {
        info!("🔄 Strategy forced to '{}'", strategy);
        *self.forced.write().await = Some(strategy);
    }

    /// Drop any manual override and go back to automatic selection
    pub async fn clear_force(&self) {
        let mut forced = self.forced.write().await;
        if forced.take().is_some() {
            info!("🔄 Strategy override cleared, back to automatic");
        }
    }

    pub async fn forced(&self) -> Option<Strategy> {
        *self.forced.read().await
    }
}
