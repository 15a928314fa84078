//! Quota-aware coordination for calls to the hosted AI provider.
//!
//! Three loosely coupled pieces: the [`QuotaTracker`] counts requests and
//! tokens against per-minute and per-day budgets, the [`RequestQueue`] holds
//! throttled calls until the tracker admits them, and the
//! [`StrategySelector`] maps observed quota pressure to a processing
//! strategy. The [`Scheduler`] wires them together.

pub mod queue;
pub mod scheduler;
pub mod strategy;
pub mod tracker;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub use queue::{PendingRequest, QueueStatus, RequestQueue};
pub use scheduler::{CallError, QuotaReport, Scheduler, SchedulerError};
pub use strategy::{Strategy, StrategyParams, StrategySelector};
pub use tracker::{QuotaDenied, QuotaLimits, QuotaTracker, QuotaUsage};

/// Priority class for scheduled calls. Interactive work (chat, search)
/// runs as `High` and drains ahead of background pipeline work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Normal,
    High,
}

/// Rough token count for a prompt before the provider reports real usage.
/// The tracker corrects itself with `usageMetadata` once a call completes.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() / 4).max(1) as u64
}

/// RAII slot for one in-flight provider call. Dropping the guard releases
/// the slot, including when a dispatched waiter has already gone away.
#[derive(Debug)]
pub struct InFlightGuard {
    counter: Arc<AtomicUsize>,
}

impl InFlightGuard {
    /// Reserve a slot if fewer than `max` calls are in flight.
    pub(crate) fn try_reserve(counter: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        let mut current = counter.load(Ordering::Acquire);
        loop {
            if current >= max {
                return None;
            }
            match counter.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(Self {
                        counter: Arc::clone(counter),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}
