use super::queue::{DispatchSignal, QueueStatus, RequestQueue};
use super::strategy::{Strategy, StrategyParams, StrategySelector};
use super::tracker::{QuotaDenied, QuotaLimits, QuotaTracker, QuotaUsage};
use super::{InFlightGuard, Priority};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Failure reported by the provider call itself
#[derive(Debug, Error)]
pub enum CallError {
    #[error("provider reported quota exhausted")]
    QuotaExhausted,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure reported by the scheduler around a call
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("'{function}' expired after waiting {waited_secs}s for quota")]
    Expired { function: String, waited_secs: u64 },
    #[error("'{function}' gave up after {attempts} provider limit responses")]
    RetriesExhausted { function: String, attempts: u32 },
    #[error("scheduler shut down before the call was dispatched")]
    Closed,
    #[error(transparent)]
    Call(#[from] anyhow::Error),
}

#[derive(Debug)]
pub(crate) enum AdmitDenied {
    Busy { max_concurrent: usize },
    Quota(QuotaDenied),
}

/// Combined view of quota, queue, and strategy for the dashboard
#[derive(Debug, Clone, Serialize)]
pub struct QuotaReport {
    pub strategy: Strategy,
    pub strategy_params: StrategyParams,
    pub forced_strategy: Option<Strategy>,
    pub active_requests: usize,
    pub usage: QuotaUsage,
    pub queue: QueueStatus,
}

/// Front door for every provider call. Calls that fit inside the quota
/// and concurrency budget run immediately; the rest park in the queue
/// until the dispatcher can admit them or their wait runs out.
pub struct Scheduler {
    tracker: Arc<QuotaTracker>,
    queue: Arc<RequestQueue>,
    selector: Arc<StrategySelector>,
    in_flight: Arc<AtomicUsize>,
}

impl Scheduler {
    pub fn new(limits: QuotaLimits) -> Self {
        info!(
            "🚀 Request scheduler ready ({}/min, {}/day, {} tokens/min)",
            limits.requests_per_minute, limits.requests_per_day, limits.tokens_per_minute
        );
        Self {
            tracker: Arc::new(QuotaTracker::new(limits)),
            queue: Arc::new(RequestQueue::new()),
            selector: Arc::new(StrategySelector::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn tracker(&self) -> &Arc<QuotaTracker> {
        &self.tracker
    }

    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    pub fn selector(&self) -> &Arc<StrategySelector> {
        &self.selector
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Strategy currently in effect: a manual override if set, otherwise
    /// the recommendation for the current utilization
    pub async fn active_strategy(&self) -> Strategy {
        let usage = self.tracker.usage().await;
        self.selector.select(&usage).await
    }

    pub async fn report(&self) -> QuotaReport {
        let usage = self.tracker.usage().await;
        let strategy = self.selector.select(&usage).await;
        QuotaReport {
            strategy,
            strategy_params: strategy.params(),
            forced_strategy: self.selector.forced().await,
            active_requests: self.in_flight(),
            usage,
            queue: self.queue.status().await,
        }
    }

    /// Try to admit a call right now: a concurrency slot under the active
    /// strategy's cap, then a request slot in the quota windows.
    pub(crate) async fn try_begin(
        &self,
        estimated_tokens: u64,
    ) -> Result<InFlightGuard, AdmitDenied> {
        let params = self.active_strategy().await.params();
        let guard = InFlightGuard::try_reserve(&self.in_flight, params.max_concurrent)
            .ok_or(AdmitDenied::Busy {
                max_concurrent: params.max_concurrent,
            })?;
        self.tracker
            .try_admit(estimated_tokens)
            .await
            .map_err(AdmitDenied::Quota)?;
        Ok(guard)
    }

    /// Run `work` under quota control. Throttled calls wait in the queue
    /// for the dispatcher; provider limit responses re-queue the call up
    /// to the configured retry budget. Normal-priority calls yield to an
    /// existing backlog so queued work keeps its place in line.
    pub async fn execute<T, F, Fut>(
        &self,
        function: &str,
        priority: Priority,
        estimated_tokens: u64,
        work: F,
    ) -> Result<T, SchedulerError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let max_attempts = self.tracker.limits().retry_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            let backlog_clear =
                priority == Priority::High || self.queue.is_empty().await;
            let direct = if backlog_clear {
                self.try_begin(estimated_tokens).await.ok()
            } else {
                None
            };

            let guard = match direct {
                Some(guard) => guard,
                None => {
                    debug!("⏳ '{}' throttled, waiting in queue", function);
                    let rx = self
                        .queue
                        .enqueue(function, priority, estimated_tokens, attempt)
                        .await;
                    match rx.await {
                        Ok(DispatchSignal::Admitted(guard)) => guard,
                        Ok(DispatchSignal::Expired { waited_secs }) => {
                            return Err(SchedulerError::Expired {
                                function: function.to_string(),
                                waited_secs,
                            });
                        }
                        Err(_) => return Err(SchedulerError::Closed),
                    }
                }
            };

            let result = work().await;
            drop(guard);

            match result {
                Ok(value) => return Ok(value),
                Err(CallError::QuotaExhausted) => {
                    self.tracker.mark_exhausted().await;
                    attempt += 1;
                    if attempt >= max_attempts {
                        return Err(SchedulerError::RetriesExhausted {
                            function: function.to_string(),
                            attempts: attempt,
                        });
                    }
                    warn!(
                        "🚫 '{}' hit the provider limit, retry {}/{}",
                        function, attempt, max_attempts
                    );
                }
                Err(CallError::Other(err)) => return Err(SchedulerError::Call(err)),
            }
        }
    }

    /// One dispatcher pass: drop entries that waited too long, then admit
    /// from the front of the queue until quota or concurrency says stop.
    pub async fn drain_once(&self) -> usize {
        let max_wait = Duration::from_secs(self.tracker.limits().max_wait_secs);
        let expired = self.queue.expire(max_wait).await;
        if expired > 0 {
            warn!(
                "⏳ Expired {} queued request(s) after {}s wait",
                expired,
                max_wait.as_secs()
            );
        }

        let mut dispatched = 0;
        while let Some(entry) = self.queue.pop_next().await {
            match self.try_begin(entry.estimated_tokens).await {
                Ok(guard) => {
                    let function = entry.function.clone();
                    if entry.tx.send(DispatchSignal::Admitted(guard)).is_err() {
                        // Waiter is gone; the rejected guard frees its slot
                        debug!("🧹 Dropping abandoned queue entry '{}'", function);
                        continue;
                    }
                    self.queue.mark_processed();
                    dispatched += 1;
                }
                Err(denied) => {
                    debug!("⏳ Queue blocked: {:?}", denied);
                    self.queue.push_front(entry).await;
                    break;
                }
            }
        }

        if dispatched > 0 {
            info!("✅ Dispatched {} queued request(s)", dispatched);
        }
        dispatched
    }

    /// Background loop that runs a dispatch pass every second
    pub fn spawn_dispatcher(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                scheduler.drain_once().await;
            }
        })
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn small_limits() -> QuotaLimits {
        QuotaLimits {
            requests_per_minute: 5,
            requests_per_day: 100,
            tokens_per_minute: 10_000,
            max_wait_secs: 30,
            retry_attempts: 2,
        }
    }

    async fn wait_until<F, Fut>(mut cond: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..200 {
            if cond().await {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_runs_directly_when_quota_free() {
        let scheduler = Scheduler::new(small_limits());

        let result = scheduler
            .execute("chat_completion", Priority::High, 100, || async {
                Ok::<_, CallError>(42u32)
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(scheduler.queue().len().await, 0);
        assert_eq!(scheduler.tracker().usage().await.minute_requests, 1);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_throttled_call_queues_then_drains_after_reset() {
        let limits = QuotaLimits {
            requests_per_minute: 1,
            ..small_limits()
        };
        let scheduler = Arc::new(Scheduler::new(limits));

        // Use up the one request this minute allows
        scheduler
            .execute("frame_analysis", Priority::Normal, 10, || async {
                Ok::<_, CallError>(())
            })
            .await
            .unwrap();

        let throttled = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                scheduler
                    .execute("frame_analysis", Priority::Normal, 10, || async {
                        Ok::<_, CallError>("done")
                    })
                    .await
            })
        };

        let s = Arc::clone(&scheduler);
        wait_until(|| {
            let s = Arc::clone(&s);
            async move { s.queue().len().await == 1 }
        })
        .await;

        // Still over budget, nothing moves
        assert_eq!(scheduler.drain_once().await, 0);

        scheduler.tracker().reset().await;
        assert_eq!(scheduler.drain_once().await, 1);

        assert_eq!(throttled.await.unwrap().unwrap(), "done");
        assert_eq!(scheduler.queue().processed_count(), 1);
    }

    #[tokio::test]
    async fn test_provider_limit_retries_are_bounded() {
        let scheduler = Arc::new(Scheduler::new(small_limits()));

        // Stand in for minute rollovers so the exhausted latch clears
        let pump = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                loop {
                    scheduler.tracker().reset().await;
                    scheduler.drain_once().await;
                    sleep(Duration::from_millis(5)).await;
                }
            })
        };

        let result = scheduler
            .execute("summary_generation", Priority::Normal, 10, || async {
                Err::<(), _>(CallError::QuotaExhausted)
            })
            .await;
        pump.abort();

        match result {
            Err(SchedulerError::RetriesExhausted { attempts, .. }) => {
                assert_eq!(attempts, 2);
            }
            other => panic!("expected retries exhausted, got {:?}", other),
        }
        assert!(scheduler.tracker().usage().await.minute_requests <= 2);
    }

    #[tokio::test]
    async fn test_blocked_call_expires_at_max_wait() {
        let limits = QuotaLimits {
            requests_per_minute: 0,
            max_wait_secs: 0,
            ..small_limits()
        };
        let scheduler = Arc::new(Scheduler::new(limits));

        let blocked = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                scheduler
                    .execute("frame_analysis", Priority::Normal, 10, || async {
                        Ok::<_, CallError>(())
                    })
                    .await
            })
        };

        let s = Arc::clone(&scheduler);
        wait_until(|| {
            let s = Arc::clone(&s);
            async move { s.queue().len().await == 1 }
        })
        .await;

        scheduler.drain_once().await;

        match blocked.await.unwrap() {
            Err(SchedulerError::Expired { waited_secs, .. }) => {
                assert_eq!(waited_secs, 0);
            }
            other => panic!("expected expiry, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_strategy_concurrency_cap_holds_second_call() {
        let limits = QuotaLimits {
            requests_per_minute: 100,
            ..small_limits()
        };
        let scheduler = Arc::new(Scheduler::new(limits));
        scheduler.selector().force(Strategy::Conservative).await; // one slot

        let slow = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                scheduler
                    .execute("frame_analysis", Priority::Normal, 10, || async {
                        sleep(Duration::from_millis(300)).await;
                        Ok::<_, CallError>(())
                    })
                    .await
            })
        };

        let s = Arc::clone(&scheduler);
        wait_until(|| {
            let s = Arc::clone(&s);
            async move { s.in_flight() == 1 }
        })
        .await;

        let held = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                scheduler
                    .execute("chat_completion", Priority::High, 10, || async {
                        Ok::<_, CallError>(())
                    })
                    .await
            })
        };

        let s = Arc::clone(&scheduler);
        wait_until(|| {
            let s = Arc::clone(&s);
            async move { s.queue().len().await == 1 }
        })
        .await;

        // Slot still taken by the slow call
        assert_eq!(scheduler.drain_once().await, 0);

        slow.await.unwrap().unwrap();
        assert_eq!(scheduler.drain_once().await, 1);
        held.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_report_reflects_forced_strategy() {
        let scheduler = Scheduler::new(small_limits());
        scheduler.selector().force(Strategy::Emergency).await;

        let report = scheduler.report().await;
        assert_eq!(report.strategy, Strategy::Emergency);
        assert_eq!(report.forced_strategy, Some(Strategy::Emergency));
        assert_eq!(report.strategy_params.max_frames_per_video, 1);
        assert_eq!(report.active_requests, 0);
        assert_eq!(report.queue.length, 0);
    }
}
