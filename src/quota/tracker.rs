use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Request and token budgets for one provider tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaLimits {
    /// Requests allowed per rolling minute
    pub requests_per_minute: u32,

    /// Requests allowed per calendar day
    pub requests_per_day: u32,

    /// Tokens allowed per rolling minute
    pub tokens_per_minute: u64,

    /// Longest a throttled call may wait in the queue (seconds)
    pub max_wait_secs: u64,

    /// Attempts against an exhausted provider quota before giving up
    pub retry_attempts: u32,
}

impl QuotaLimits {
    /// Gemini free-tier budgets
    pub fn free_tier() -> Self {
        Self {
            requests_per_minute: 15,
            requests_per_day: 1_500,
            tokens_per_minute: 32_000,
            max_wait_secs: 300,
            retry_attempts: 3,
        }
    }

    /// Gemini paid-tier budgets
    pub fn paid_tier() -> Self {
        Self {
            requests_per_minute: 300,
            requests_per_day: 50_000,
            tokens_per_minute: 4_000_000,
            max_wait_secs: 60,
            retry_attempts: 5,
        }
    }
}

/// Reason a call was not admitted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaDenied {
    #[error("minute request limit reached ({limit}/min)")]
    MinuteRequests { limit: u32 },

    #[error("daily request limit reached ({limit}/day)")]
    DayRequests { limit: u32 },

    #[error("minute token budget would be exceeded ({limit} tokens/min)")]
    MinuteTokens { limit: u64 },

    #[error("provider reported quota exhausted")]
    ProviderExhausted,
}

/// Snapshot of current usage against the configured limits
#[derive(Debug, Clone, Serialize)]
pub struct QuotaUsage {
    pub minute_requests: u32,
    pub minute_request_limit: u32,
    pub minute_tokens: u64,
    pub minute_token_limit: u64,
    pub day_requests: u32,
    pub day_request_limit: u32,
    pub day_tokens: u64,
    /// Worst of the minute-window percentages (requests vs tokens)
    pub minute_percent: f64,
    pub day_percent: f64,
    pub exceeded: bool,
    pub seconds_until_minute_reset: u64,
    pub seconds_until_day_reset: u64,
}

#[derive(Debug, Default)]
struct WindowState {
    minute_epoch: u64,
    day_epoch: u64,
    minute_requests: u32,
    minute_tokens: u64,
    day_requests: u32,
    day_tokens: u64,
    /// Latched when the provider answers 429; cleared on rollover or reset
    exhausted: bool,
}

impl WindowState {
    /// Roll windows forward when the wall clock crosses a boundary
    fn roll(&mut self, now: u64) {
        let minute = now / 60;
        let day = now / 86_400;

        if minute != self.minute_epoch {
            self.minute_epoch = minute;
            self.minute_requests = 0;
            self.minute_tokens = 0;
            if self.exhausted {
                debug!("🔄 Minute window rolled over, clearing exhausted latch");
            }
            self.exhausted = false;
        }

        if day != self.day_epoch {
            self.day_epoch = day;
            self.day_requests = 0;
            self.day_tokens = 0;
        }
    }
}

/// Records requests and tokens consumed per rolling minute and per day.
/// Read before admitting a call, mutated when calls start and complete.
#[derive(Debug)]
pub struct QuotaTracker {
    limits: QuotaLimits,
    state: Mutex<WindowState>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl QuotaTracker {
    pub fn new(limits: QuotaLimits) -> Self {
        info!(
            "📊 Quota tracker: {} req/min, {} req/day, {} tokens/min",
            limits.requests_per_minute, limits.requests_per_day, limits.tokens_per_minute
        );
        Self {
            limits,
            state: Mutex::new(WindowState::default()),
        }
    }

    pub fn limits(&self) -> &QuotaLimits {
        &self.limits
    }

    /// Admit a call if every budget has room, reserving one request slot.
    /// Token usage is recorded separately once the provider reports it.
    pub async fn try_admit(&self, estimated_tokens: u64) -> Result<(), QuotaDenied> {
        self.try_admit_at(estimated_tokens, unix_now()).await
    }

    pub(crate) async fn try_admit_at(
        &self,
        estimated_tokens: u64,
        now: u64,
    ) -> Result<(), QuotaDenied> {
        let mut state = self.state.lock().await;
        state.roll(now);

        if state.exhausted {
            return Err(QuotaDenied::ProviderExhausted);
        }
        if state.minute_requests >= self.limits.requests_per_minute {
            return Err(QuotaDenied::MinuteRequests {
                limit: self.limits.requests_per_minute,
            });
        }
        if state.day_requests >= self.limits.requests_per_day {
            return Err(QuotaDenied::DayRequests {
                limit: self.limits.requests_per_day,
            });
        }
        if state.minute_tokens + estimated_tokens > self.limits.tokens_per_minute {
            return Err(QuotaDenied::MinuteTokens {
                limit: self.limits.tokens_per_minute,
            });
        }

        state.minute_requests += 1;
        state.day_requests += 1;
        Ok(())
    }

    /// Record actual token usage reported by the provider
    pub async fn record_tokens(&self, tokens: u64) {
        self.record_tokens_at(tokens, unix_now()).await;
    }

    pub(crate) async fn record_tokens_at(&self, tokens: u64, now: u64) {
        let mut state = self.state.lock().await;
        state.roll(now);
        state.minute_tokens += tokens;
        state.day_tokens += tokens;
    }

    /// Latch the exhausted flag after the provider answered 429
    pub async fn mark_exhausted(&self) {
        let mut state = self.state.lock().await;
        if !state.exhausted {
            warn!("🚫 Provider reported quota exhausted, holding new calls until the window rolls over");
        }
        state.exhausted = true;
    }

    /// Zero all windows and clear the exhausted latch
    pub async fn reset(&self) {
        self.reset_at(unix_now()).await;
    }

    pub(crate) async fn reset_at(&self, now: u64) {
        let mut state = self.state.lock().await;
        *state = WindowState {
            minute_epoch: now / 60,
            day_epoch: now / 86_400,
            ..WindowState::default()
        };
        info!("🔄 Quota counters reset");
    }

    /// Current usage, limits, and derived percentages
    pub async fn usage(&self) -> QuotaUsage {
        self.usage_at(unix_now()).await
    }

    pub(crate) async fn usage_at(&self, now: u64) -> QuotaUsage {
        let mut state = self.state.lock().await;
        state.roll(now);

        let request_pct = percent(state.minute_requests as u64, self.limits.requests_per_minute as u64);
        let token_pct = percent(state.minute_tokens, self.limits.tokens_per_minute);
        let minute_percent = request_pct.max(token_pct);
        let day_percent = percent(state.day_requests as u64, self.limits.requests_per_day as u64);

        QuotaUsage {
            minute_requests: state.minute_requests,
            minute_request_limit: self.limits.requests_per_minute,
            minute_tokens: state.minute_tokens,
            minute_token_limit: self.limits.tokens_per_minute,
            day_requests: state.day_requests,
            day_request_limit: self.limits.requests_per_day,
            day_tokens: state.day_tokens,
            minute_percent,
            day_percent,
            exceeded: state.exhausted || minute_percent >= 100.0 || day_percent >= 100.0,
            seconds_until_minute_reset: 60 - (now % 60),
            seconds_until_day_reset: 86_400 - (now % 86_400),
        }
    }

    /// True when any budget is at its limit or the provider latch is set
    pub async fn is_exceeded(&self) -> bool {
        self.usage().await.exceeded
    }
}

fn percent(used: u64, limit: u64) -> f64 {
    if limit == 0 {
        100.0
    } else {
        used as f64 / limit as f64 * 100.0
    }
}
