use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one scheduled callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    /// Allocate a process-unique id, so a stale fire from an old session
    /// can never match a timer of a newer one.
    pub fn next() -> Self {
        Self(NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Monotonic time source in milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> f64;
}

/// Schedules a one-shot callback identified by a [`TimerId`].
///
/// The recorder never sleeps; the host reports each fire back through
/// `on_timer_fired`.
pub trait TimerScheduler: Send + Sync {
    fn schedule(&self, id: TimerId, delay: Duration);

    /// Cancel a pending callback. Cancelling an unknown id is a no-op.
    fn cancel(&self, id: TimerId);
}

/// Wall clock measured from construction
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Timer scheduler backed by tokio tasks.
///
/// Each fire is wrapped into a message of type `M` and sent on the channel
/// it was built with, so fires can share a queue with other inputs.
pub struct TokioTimerScheduler<M = TimerId> {
    fired: mpsc::UnboundedSender<M>,
    wrap: fn(TimerId) -> M,
    tasks: Arc<DashMap<TimerId, tokio::task::JoinHandle<()>>>,
}

impl TokioTimerScheduler<TimerId> {
    pub fn new(fired: mpsc::UnboundedSender<TimerId>) -> Self {
        Self::mapped(fired, std::convert::identity)
    }
}

impl<M: Send + 'static> TokioTimerScheduler<M> {
    /// Send `wrap(id)` on `fired` whenever a timer elapses
    pub fn mapped(fired: mpsc::UnboundedSender<M>, wrap: fn(TimerId) -> M) -> Self {
        Self {
            fired,
            wrap,
            tasks: Arc::new(DashMap::new()),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.len()
    }
}

impl<M: Send + 'static> TimerScheduler for TokioTimerScheduler<M> {
    fn schedule(&self, id: TimerId, delay: Duration) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(timer = id.raw(), "no tokio runtime; timer dropped");
                return;
            }
        };

        let fired = self.fired.clone();
        let wrap = self.wrap;
        let tasks = Arc::clone(&self.tasks);
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            tasks.remove(&id);
            // Receiver gone means the driver shut down.
            let _ = fired.send(wrap(id));
        });

        if let Some(previous) = self.tasks.insert(id, task) {
            previous.abort();
        }
    }

    fn cancel(&self, id: TimerId) {
        if let Some((_, task)) = self.tasks.remove(&id) {
            task.abort();
        }
    }
}

impl<M> Drop for TokioTimerScheduler<M> {
    fn drop(&mut self) {
        for entry in self.tasks.iter() {
            entry.value().abort();
        }
        self.tasks.clear();
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: f64) {
        *self.now.lock() += ms;
    }

    pub fn set(&self, ms: f64) {
        *self.now.lock() = ms;
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        *self.now.lock()
    }
}

/// Scheduler that records requests and lets the caller decide when they fire
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    pending: Arc<Mutex<Vec<(TimerId, Duration)>>>,
    scheduled_total: Arc<AtomicU64>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids scheduled and not yet cancelled or taken
    pub fn pending(&self) -> Vec<TimerId> {
        self.pending.lock().iter().map(|(id, _)| *id).collect()
    }

    /// Remove and return every pending id, as if they had all elapsed
    pub fn take_pending(&self) -> Vec<TimerId> {
        self.pending.lock().drain(..).map(|(id, _)| id).collect()
    }

    pub fn scheduled_total(&self) -> u64 {
        self.scheduled_total.load(Ordering::Relaxed)
    }
}

impl TimerScheduler for ManualScheduler {
    fn schedule(&self, id: TimerId, delay: Duration) {
        self.scheduled_total.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().push((id, delay));
    }

    fn cancel(&self, id: TimerId) {
        self.pending
            .lock()
            .retain(|(pending_id, _)| *pending_id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_ids_are_unique() {
        let a = TimerId::next();
        let b = TimerId::next();
        assert_ne!(a, b);
        assert!(b.raw() > a.raw());
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_ms(), 0.0);
        clock.advance(25.0);
        clock.advance(5.0);
        assert_eq!(clock.now_ms(), 30.0);

        let shared = clock.clone();
        shared.set(100.0);
        assert_eq!(clock.now_ms(), 100.0);
    }

    #[test]
    fn test_manual_scheduler_cancel() {
        let scheduler = ManualScheduler::new();
        let a = TimerId::next();
        let b = TimerId::next();

        scheduler.schedule(a, Duration::from_millis(100));
        scheduler.schedule(b, Duration::from_millis(100));
        scheduler.cancel(a);
        scheduler.cancel(TimerId::next());

        assert_eq!(scheduler.pending(), vec![b]);
        assert_eq!(scheduler.scheduled_total(), 2);
        assert_eq!(scheduler.take_pending(), vec![b]);
        assert!(scheduler.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = TokioTimerScheduler::new(tx);

        let id = TimerId::next();
        scheduler.schedule(id, Duration::from_millis(100));
        assert_eq!(scheduler.pending_count(), 1);

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(rx.recv().await, Some(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_cancel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = TokioTimerScheduler::new(tx);

        let cancelled = TimerId::next();
        let kept = TimerId::next();
        scheduler.schedule(cancelled, Duration::from_millis(100));
        scheduler.schedule(kept, Duration::from_millis(200));
        scheduler.cancel(cancelled);

        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(rx.recv().await, Some(kept));
        assert!(rx.try_recv().is_err());
    }

    #[derive(Debug, PartialEq)]
    enum Queued {
        Other(&'static str),
        Fired(TimerId),
    }

    #[tokio::test(start_paused = true)]
    async fn test_mapped_fires_queue_behind_earlier_inputs() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = TokioTimerScheduler::mapped(tx.clone(), Queued::Fired);

        let id = TimerId::next();
        scheduler.schedule(id, Duration::from_millis(10));
        tx.send(Queued::Other("before")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(Queued::Other("after")).unwrap();

        assert_eq!(rx.recv().await, Some(Queued::Other("before")));
        assert_eq!(rx.recv().await, Some(Queued::Fired(id)));
        assert_eq!(rx.recv().await, Some(Queued::Other("after")));
    }
}
