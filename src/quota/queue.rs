use super::{InFlightGuard, Priority};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

/// Resolution of a queued call, delivered through its oneshot channel
#[derive(Debug)]
pub enum DispatchSignal {
    /// Quota admitted the call; the guard holds its concurrency slot
    Admitted(InFlightGuard),
    /// The call sat in the queue past the configured maximum wait
    Expired { waited_secs: u64 },
}

/// One throttled call waiting for quota
#[derive(Debug)]
pub(crate) struct QueueEntry {
    pub(crate) function: String,
    pub(crate) priority: Priority,
    pub(crate) enqueued: Instant,
    pub(crate) enqueued_unix: u64,
    pub(crate) retries: u32,
    pub(crate) estimated_tokens: u64,
    pub(crate) tx: oneshot::Sender<DispatchSignal>,
}

/// Serializable view of one pending entry for the dashboard
#[derive(Debug, Clone, Serialize)]
pub struct PendingRequest {
    pub function: String,
    pub priority: Priority,
    pub enqueued_at: u64,
    pub waited_secs: u64,
    pub retries: u32,
}

/// Queue counters and pending snapshot for the dashboard
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub length: usize,
    pub processed: u64,
    pub rate_per_minute: f64,
    pub pending: Vec<PendingRequest>,
}

#[derive(Debug, Default)]
struct Lanes {
    high: VecDeque<QueueEntry>,
    normal: VecDeque<QueueEntry>,
}

/// Holds throttled calls in arrival order with a priority lane that
/// drains first. Entries resolve through their oneshot when dispatched
/// or when they expire.
#[derive(Debug)]
pub struct RequestQueue {
    lanes: Mutex<Lanes>,
    processed: AtomicU64,
    started: Instant,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            lanes: Mutex::new(Lanes::default()),
            processed: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Park a throttled call. The returned receiver resolves when the
    /// dispatcher admits the call or expires it.
    pub async fn enqueue(
        &self,
        function: &str,
        priority: Priority,
        estimated_tokens: u64,
        retries: u32,
    ) -> oneshot::Receiver<DispatchSignal> {
        let (tx, rx) = oneshot::channel();
        let entry = QueueEntry {
            function: function.to_string(),
            priority,
            enqueued: Instant::now(),
            enqueued_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            retries,
            estimated_tokens,
            tx,
        };

        let mut lanes = self.lanes.lock().await;
        match priority {
            Priority::High => lanes.high.push_back(entry),
            Priority::Normal => lanes.normal.push_back(entry),
        }
        debug!(
            "⏳ Queued '{}' ({:?}, {} pending)",
            function,
            priority,
            lanes.high.len() + lanes.normal.len()
        );
        rx
    }

    /// Pop the oldest entry, priority lane first
    pub(crate) async fn pop_next(&self) -> Option<QueueEntry> {
        let mut lanes = self.lanes.lock().await;
        lanes.high.pop_front().or_else(|| lanes.normal.pop_front())
    }

    /// Return an entry the dispatcher could not admit, preserving order
    pub(crate) async fn push_front(&self, entry: QueueEntry) {
        let mut lanes = self.lanes.lock().await;
        match entry.priority {
            Priority::High => lanes.high.push_front(entry),
            Priority::Normal => lanes.normal.push_front(entry),
        }
    }

    /// Expire entries older than `max_age`, resolving their waiters.
    /// Entries are FIFO within each lane, so expired ones sit at the front.
    pub async fn expire(&self, max_age: Duration) -> usize {
        let mut lanes = self.lanes.lock().await;
        let lanes = &mut *lanes;
        let mut expired = 0;
        for lane in [&mut lanes.high, &mut lanes.normal] {
            while lane
                .front()
                .map_or(false, |e| e.enqueued.elapsed() >= max_age)
            {
                if let Some(entry) = lane.pop_front() {
                    let waited_secs = entry.enqueued.elapsed().as_secs();
                    let _ = entry.tx.send(DispatchSignal::Expired { waited_secs });
                    expired += 1;
                }
            }
        }
        expired
    }

    pub async fn len(&self) -> usize {
        let lanes = self.lanes.lock().await;
        lanes.high.len() + lanes.normal.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Count one dispatched entry
    pub fn mark_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Dispatched entries per elapsed minute since startup
    pub fn rate_per_minute(&self) -> f64 {
        let elapsed_mins = self.started.elapsed().as_secs_f64() / 60.0;
        self.processed_count() as f64 / elapsed_mins.max(1.0)
    }

    /// Snapshot of pending entries: priority lane first, FIFO within each
    pub async fn status(&self) -> QueueStatus {
        let lanes = self.lanes.lock().await;
        let pending: Vec<PendingRequest> = lanes
            .high
            .iter()
            .chain(lanes.normal.iter())
            .map(|e| PendingRequest {
                function: e.function.clone(),
                priority: e.priority,
                enqueued_at: e.enqueued_unix,
                waited_secs: e.enqueued.elapsed().as_secs(),
                retries: e.retries,
            })
            .collect();

        QueueStatus {
            length: pending.len(),
            processed: self.processed_count(),
            rate_per_minute: self.rate_per_minute(),
            pending,
        }
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_within_lane() {
        let queue = RequestQueue::new();
        let _rx1 = queue.enqueue("first", Priority::Normal, 10, 0).await;
        let _rx2 = queue.enqueue("second", Priority::Normal, 10, 0).await;

        let a = queue.pop_next().await.map(|e| e.function);
        let b = queue.pop_next().await.map(|e| e.function);
        assert_eq!(a.as_deref(), Some("first"));
        assert_eq!(b.as_deref(), Some("second"));
        assert!(queue.pop_next().await.is_none());
    }

    #[tokio::test]
    async fn test_priority_lane_drains_first() {
        let queue = RequestQueue::new();
        let _rx1 = queue.enqueue("background", Priority::Normal, 10, 0).await;
        let _rx2 = queue.enqueue("interactive", Priority::High, 10, 0).await;

        let first = queue.pop_next().await.map(|e| e.function);
        assert_eq!(first.as_deref(), Some("interactive"));
    }

    #[tokio::test]
    async fn test_push_front_preserves_order() {
        let queue = RequestQueue::new();
        let _rx1 = queue.enqueue("a", Priority::Normal, 10, 0).await;
        let _rx2 = queue.enqueue("b", Priority::Normal, 10, 0).await;

        let entry = queue.pop_next().await.unwrap();
        assert_eq!(entry.function, "a");
        queue.push_front(entry).await;

        let again = queue.pop_next().await.unwrap();
        assert_eq!(again.function, "a");
    }

    #[tokio::test]
    async fn test_expire_resolves_waiters() {
        let queue = RequestQueue::new();
        let rx = queue.enqueue("stale", Priority::Normal, 10, 1).await;

        let expired = queue.expire(Duration::from_secs(0)).await;
        assert_eq!(expired, 1);
        assert_eq!(queue.len().await, 0);

        match rx.await {
            Ok(DispatchSignal::Expired { .. }) => {}
            other => panic!("expected expiry signal, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expire_leaves_fresh_entries() {
        let queue = RequestQueue::new();
        let _rx = queue.enqueue("fresh", Priority::Normal, 10, 0).await;

        let expired = queue.expire(Duration::from_secs(300)).await;
        assert_eq!(expired, 0);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_status_snapshot_shape() {
        let queue = RequestQueue::new();
        let _rx1 = queue.enqueue("frame_analysis", Priority::Normal, 120, 2).await;
        let _rx2 = queue.enqueue("chat_completion", Priority::High, 50, 0).await;
        queue.mark_processed();

        let status = queue.status().await;
        assert_eq!(status.length, 2);
        assert_eq!(status.processed, 1);
        assert!(status.rate_per_minute > 0.0);

        // High lane listed first
        assert_eq!(status.pending[0].function, "chat_completion");
        assert_eq!(status.pending[0].priority, Priority::High);
        assert_eq!(status.pending[1].function, "frame_analysis");
        assert_eq!(status.pending[1].retries, 2);
    }
}
