use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

/// Per-item exponential backoff combined with an overall token bucket
///
/// The delay for an item is the larger of `base * 2^failures` (capped at
/// `max`) and the wait imposed by a `qps`/`burst` bucket shared by all items.
#[derive(Debug)]
pub struct RateLimiter<T> {
    base: Duration,
    max: Duration,
    qps: f64,
    burst: f64,
    failures: HashMap<T, u32>,
    tokens: f64,
    last: Option<Instant>,
}

impl<T: Eq + Hash + Clone> RateLimiter<T> {
    pub fn new(base: Duration, max: Duration, qps: f64, burst: u32) -> Self {
        Self {
            base,
            max,
            qps,
            burst: burst as f64,
            failures: HashMap::new(),
            tokens: burst as f64,
            last: None,
        }
    }

    /// Delay before `item` may be processed again; counts a failure
    pub fn when(&mut self, item: &T) -> Duration {
        let failures = self.failures.entry(item.clone()).or_insert(0);
        let exponent = (*failures).min(31);
        *failures += 1;
        let backoff = self
            .base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |d| d.min(self.max));
        backoff.max(self.bucket_delay())
    }

    fn bucket_delay(&mut self) -> Duration {
        let now = Instant::now();
        if let Some(last) = self.last {
            let refill = now.duration_since(last).as_secs_f64() * self.qps;
            self.tokens = (self.tokens + refill).min(self.burst);
        }
        self.last = Some(now);
        self.tokens -= 1.0;
        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.qps)
        }
    }

    pub fn forget(&mut self, item: &T) {
        self.failures.remove(item);
    }

    pub fn requeues(&self, item: &T) -> u32 {
        self.failures.get(item).copied().unwrap_or(0)
    }
}

impl<T: Eq + Hash + Clone> Default for RateLimiter<T> {
    fn default() -> Self {
        Self::new(Duration::from_millis(5), Duration::from_secs(1000), 10.0, 100)
    }
}

#[derive(Debug)]
struct State<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    shutting_down: bool,
}

/// Deduplicating FIFO with rate-limited requeue
///
/// An item is held at most once in the queue. An item re-added while being
/// processed is queued again when `done` is called for it, so one item is
/// never handled by two workers at once.
pub struct RateLimitingQueue<T> {
    state: Mutex<State<T>>,
    limiter: Mutex<RateLimiter<T>>,
    notify: Notify,
}

impl<T> RateLimitingQueue<T>
where
    T: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
{
    pub fn new() -> Arc<Self> {
        Self::with_limiter(RateLimiter::default())
    }

    pub fn with_limiter(limiter: RateLimiter<T>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            limiter: Mutex::new(limiter),
            notify: Notify::new(),
        })
    }

    pub fn add(&self, item: T) {
        let mut state = self.state.lock();
        if state.shutting_down || !state.dirty.insert(item.clone()) {
            return;
        }
        if state.processing.contains(&item) {
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.notify.notify_one();
    }

    /// Add `item` once `delay` has elapsed
    pub fn add_after(self: &Arc<Self>, item: T, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    pub fn add_rate_limited(self: &Arc<Self>, item: T) {
        let delay = self.limiter.lock().when(&item);
        debug!("Requeueing {:?} after {:?}", item, delay);
        self.add_after(item, delay);
    }

    /// Stop tracking failures of `item`
    pub fn forget(&self, item: &T) {
        self.limiter.lock().forget(item);
    }

    pub fn requeues(&self, item: &T) -> u32 {
        self.limiter.lock().requeues(item)
    }

    /// Block until an item is available; `None` after shutdown
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark `item` finished; re-queues it if it was added meanwhile
    pub fn done(&self, item: &T) {
        let mut state = self.state.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    pub fn shut_down(&self) {
        self.state.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dedup_while_queued() {
        let queue = RateLimitingQueue::<String>::new();
        queue.add("a".to_string());
        queue.add("a".to_string());
        queue.add("b".to_string());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get().await.as_deref(), Some("a"));
        assert_eq!(queue.get().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_readd_during_processing_is_deferred() {
        let queue = RateLimitingQueue::<String>::new();
        queue.add("a".to_string());
        let item = queue.get().await.unwrap();

        queue.add("a".to_string());
        assert!(queue.is_empty());

        queue.done(&item);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let queue = RateLimitingQueue::<String>::new();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.shut_down();
        assert_eq!(waiter.await.unwrap(), None);

        queue.add("late".to_string());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_exponential_backoff() {
        let mut limiter: RateLimiter<&str> =
            RateLimiter::new(Duration::from_millis(5), Duration::from_secs(1000), 1e6, 1_000_000);
        assert_eq!(limiter.when(&"a"), Duration::from_millis(5));
        assert_eq!(limiter.when(&"a"), Duration::from_millis(10));
        assert_eq!(limiter.when(&"a"), Duration::from_millis(20));
        assert_eq!(limiter.when(&"b"), Duration::from_millis(5));
        assert_eq!(limiter.requeues(&"a"), 3);

        for _ in 0..40 {
            limiter.when(&"a");
        }
        assert_eq!(limiter.when(&"a"), Duration::from_secs(1000));

        limiter.forget(&"a");
        assert_eq!(limiter.when(&"a"), Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_requeue() {
        let queue = RateLimitingQueue::<String>::new();
        queue.add_rate_limited("a".to_string());
        queue.add_rate_limited("a".to_string());
        assert_eq!(queue.requeues(&"a".to_string()), 2);
        assert!(queue.is_empty());

        let item = tokio::time::timeout(Duration::from_secs(1), queue.get())
            .await
            .unwrap();
        assert_eq!(item.as_deref(), Some("a"));
    }
}
