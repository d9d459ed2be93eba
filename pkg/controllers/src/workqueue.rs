use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use pkg_constants::timing::{REQUEUE_BASE_DELAY_MILLIS, REQUEUE_MAX_DELAY_SECS};

/// Deduplicating work queue shared by the reconciliation workers.
///
/// A key is queued at most once. A key added while a worker is processing it
/// is marked dirty and handed out again after `done`, so one key is never
/// processed by two workers at the same time.
pub struct WorkQueue<K> {
    state: Arc<Mutex<QueueState<K>>>,
    notify: Arc<Notify>,
    base_delay: Duration,
    max_delay: Duration,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            notify: self.notify.clone(),
            base_delay: self.base_delay,
            max_delay: self.max_delay,
        }
    }
}

struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    failures: HashMap<K, u32>,
    shutting_down: bool,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
{
    pub fn new() -> Self {
        Self::with_backoff(
            Duration::from_millis(REQUEUE_BASE_DELAY_MILLIS),
            Duration::from_secs(REQUEUE_MAX_DELAY_SECS),
        )
    }

    pub fn with_backoff(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                failures: HashMap::new(),
                shutting_down: false,
            })),
            notify: Arc::new(Notify::new()),
            base_delay,
            max_delay,
        }
    }

    /// Queue a key unless it is already waiting.
    pub async fn add(&self, key: K) {
        let mut state = self.state.lock().await;
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Queue a key once `delay` has elapsed.
    pub fn add_after(&self, key: K, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key).await;
        });
    }

    /// Requeue a key after a failed attempt, backing off exponentially per key.
    pub async fn add_rate_limited(&self, key: K) {
        let delay = {
            let mut state = self.state.lock().await;
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let delay = self.backoff(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        debug!("requeue {:?} in {:?}", key, delay);
        self.add_after(key, delay);
    }

    fn backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Reset the failure count of a key after a successful attempt.
    pub async fn forget(&self, key: &K) {
        self.state.lock().await.failures.remove(key);
    }

    pub async fn failures(&self, key: &K) -> u32 {
        self.state
            .lock()
            .await
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Mark a key finished. If it was re-added meanwhile it goes back on the queue.
    pub async fn done(&self, key: &K) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys. Waiting workers return `None`.
    pub async fn shut_down(&self) {
        self.state.lock().await.shutting_down = true;
        self.notify.notify_waiters();
    }

    pub async fn is_shutting_down(&self) -> bool {
        self.state.lock().await.shutting_down
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deduplicates_waiting_keys() {
        let q = WorkQueue::new();
        q.add("a").await;
        q.add("a").await;
        q.add("b").await;
        assert_eq!(q.len().await, 2);
        assert_eq!(q.get().await, Some("a"));
        assert_eq!(q.get().await, Some("b"));
    }

    #[tokio::test]
    async fn key_added_while_processing_is_redelivered_after_done() {
        let q = WorkQueue::new();
        q.add("t").await;
        let key = q.get().await.unwrap();
        q.add("t").await;
        // Not handed to a second worker while in flight.
        assert!(q.is_empty().await);
        q.done(&key).await;
        assert_eq!(q.get().await, Some("t"));
    }

    #[tokio::test]
    async fn shutdown_releases_waiting_workers() {
        let q: WorkQueue<&str> = WorkQueue::new();
        let worker = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;
        q.shut_down().await;
        assert_eq!(worker.await.unwrap(), None);
        q.add("late").await;
        assert!(q.is_empty().await);
    }

    #[tokio::test]
    async fn rate_limited_requeue_backs_off() {
        let q = WorkQueue::with_backoff(Duration::from_millis(5), Duration::from_millis(20));
        assert_eq!(q.backoff(0), Duration::from_millis(5));
        assert_eq!(q.backoff(1), Duration::from_millis(10));
        assert_eq!(q.backoff(3), Duration::from_millis(20));
        assert_eq!(q.backoff(64), Duration::from_millis(20));

        q.add_rate_limited("k").await;
        q.add_rate_limited("k").await;
        assert_eq!(q.failures(&"k").await, 2);
        let key = tokio::time::timeout(Duration::from_secs(1), q.get())
            .await
            .unwrap();
        assert_eq!(key, Some("k"));
        q.forget(&"k").await;
        assert_eq!(q.failures(&"k").await, 0);
    }

    #[tokio::test]
    async fn add_after_delays_delivery() {
        let q = WorkQueue::new();
        q.add_after("later", Duration::from_millis(30));
        assert!(q.is_empty().await);
        let key = tokio::time::timeout(Duration::from_secs(1), q.get())
            .await
            .unwrap();
        assert_eq!(key, Some("later"));
    }
}
