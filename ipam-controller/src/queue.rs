//! Rate-limited, key-deduplicating work queue shared by the three
//! reconcilers (spec.md §4.1). Modeled on client-go's `workqueue`: adding a
//! key that's already queued is a no-op, adding a key that's currently being
//! processed marks it dirty-again so it gets re-queued the instant the
//! in-flight worker calls `done`.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use owo_colors::OwoColorize as _;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::util::colors::FG2;
use crate::util::MAX_RETRIES;

/// Exponential backoff with a ceiling, keyed per item — client-go's
/// `DefaultControllerRateLimiter` equivalent.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    base: Duration,
    max: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(5),
            max: Duration::from_secs(1000),
        }
    }
}

impl RateLimiter {
    pub fn delay_for(&self, num_requeues: u32) -> Duration {
        let exp = self.base.as_secs_f64() * 2f64.powi(num_requeues as i32);
        Duration::from_secs_f64(exp.min(self.max.as_secs_f64()))
    }
}

struct Inner<K> {
    queue: VecDeque<K>,
    queued: HashSet<K>,
    processing: HashSet<K>,
    dirty_again: HashSet<K>,
    num_requeues: std::collections::HashMap<K, u32>,
    shutting_down: bool,
}

/// A typed, async, rate-limited FIFO of dedup'd keys. Cloning shares the
/// underlying state — every worker task holds a clone.
pub struct Queue<K> {
    inner: Arc<Mutex<Inner<K>>>,
    notify: Arc<Notify>,
    limiter: RateLimiter,
    name: &'static str,
}

impl<K> Clone for Queue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            notify: self.notify.clone(),
            limiter: self.limiter.clone(),
            name: self.name,
        }
    }
}

impl<K> Queue<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                queue: VecDeque::new(),
                queued: HashSet::new(),
                processing: HashSet::new(),
                dirty_again: HashSet::new(),
                num_requeues: std::collections::HashMap::new(),
                shutting_down: false,
            })),
            notify: Arc::new(Notify::new()),
            limiter: RateLimiter::default(),
            name,
        }
    }

    /// Enqueues `key` immediately unless it is already queued, in which case
    /// this is a no-op, or already processing, in which case it is marked
    /// for re-delivery once the in-flight handler calls `done`.
    pub async fn add(&self, key: K) {
        let mut inner = self.inner.lock().await;
        if inner.shutting_down {
            return;
        }
        if inner.processing.contains(&key) {
            inner.dirty_again.insert(key);
            return;
        }
        if inner.queued.insert(key.clone()) {
            inner.queue.push_back(key);
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Enqueues `key` after `delay`, independent of the retry backoff.
    /// Used for periodic resyncs (spec.md §4.5) and probe intervals.
    pub fn add_after(&self, key: K, delay: Duration) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.add(key).await;
        });
    }

    async fn get(&self) -> Option<K> {
        loop {
            let mut inner = self.inner.lock().await;
            if let Some(key) = inner.queue.pop_front() {
                inner.queued.remove(&key);
                inner.processing.insert(key.clone());
                return Some(key);
            }
            if inner.shutting_down {
                return None;
            }
            drop(inner);
            self.notify.notified().await;
        }
    }

    /// Marks `key` as finished processing. If it was re-added while in
    /// flight, it is re-queued now rather than having been dropped.
    async fn done(&self, key: &K) {
        let mut inner = self.inner.lock().await;
        inner.processing.remove(key);
        if inner.dirty_again.remove(key) && inner.queued.insert(key.clone()) {
            inner.queue.push_back(key.clone());
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Schedules `key` for retry after an exponential backoff, or drops it
    /// (and reports the drop via the `dropped` callback) once `MAX_RETRIES`
    /// is exhausted.
    async fn requeue_after_failure(&self, key: K, dropped: impl FnOnce(&K)) {
        let delay = {
            let mut inner = self.inner.lock().await;
            let n = inner.num_requeues.entry(key.clone()).or_insert(0);
            *n += 1;
            if *n > MAX_RETRIES {
                inner.num_requeues.remove(&key);
                drop(inner);
                dropped(&key);
                return;
            }
            self.limiter.delay_for(*n)
        };
        self.add_after(key, delay);
    }

    fn forget(&self, key: &K) {
        let inner = self.inner.clone();
        let key = key.clone();
        tokio::spawn(async move {
            inner.lock().await.num_requeues.remove(&key);
        });
    }

    /// Signals all workers to stop once the queue drains; `get` returns
    /// `None` for every waiting worker from that point on.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.shutting_down = true;
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Runs `workers` tasks pulling from this queue and invoking `handler`
    /// for each key, retrying on error per `requeue_after_failure` and
    /// reporting exhausted keys through `on_dropped`. Returns once every
    /// worker has observed `shutdown`.
    pub async fn run<F, Fut, D>(&self, workers: usize, handler: F, on_dropped: D)
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), crate::util::Error>> + Send,
        D: Fn(&K) + Send + Sync + 'static,
        K: std::fmt::Debug,
    {
        let handler = Arc::new(handler);
        let on_dropped = Arc::new(on_dropped);
        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let queue = self.clone();
            let handler = handler.clone();
            let on_dropped = on_dropped.clone();
            handles.push(tokio::spawn(async move {
                println!(
                    "{}",
                    format!("▶ {} worker {worker_id} started", queue.name)
                        .color(FG2)
                );
                while let Some(key) = queue.get().await {
                    let started = Instant::now();
                    let result = handler(key.clone()).await;
                    match result {
                        Ok(()) => {
                            queue.forget(&key);
                        }
                        Err(err) if err.is_retriable() => {
                            eprintln!(
                                "{}",
                                format!("⚠ {} reconcile of {key:?} failed in {:?}: {err}",
                                    queue.name, started.elapsed())
                                    .yellow()
                            );
                            let on_dropped = on_dropped.clone();
                            queue
                                .requeue_after_failure(key, move |k| on_dropped(k))
                                .await;
                        }
                        Err(err) => {
                            eprintln!(
                                "{}",
                                format!("🛑 {} reconcile of {key:?} hit a non-retriable error: {err}", queue.name)
                                    .red()
                            );
                            queue.forget(&key);
                        }
                    }
                    queue.done(&key).await;
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_add_is_deduplicated() {
        let q: Queue<String> = Queue::new("test");
        q.add("a".to_string()).await;
        q.add("a".to_string()).await;
        assert_eq!(q.len().await, 1);
    }

    #[tokio::test]
    async fn get_then_done_allows_readd() {
        let q: Queue<String> = Queue::new("test");
        q.add("a".to_string()).await;
        let key = q.get().await.unwrap();
        assert_eq!(key, "a");
        assert_eq!(q.len().await, 0);
        q.done(&key).await;
        q.add("a".to_string()).await;
        assert_eq!(q.len().await, 1);
    }

    #[tokio::test]
    async fn add_while_processing_redelivers_after_done() {
        let q: Queue<String> = Queue::new("test");
        q.add("a".to_string()).await;
        let key = q.get().await.unwrap();
        q.add("a".to_string()).await; // marked dirty_again, not queued twice
        assert_eq!(q.len().await, 0);
        q.done(&key).await;
        assert_eq!(q.len().await, 1);
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let limiter = RateLimiter::default();
        assert!(limiter.delay_for(1) > limiter.delay_for(0));
        assert_eq!(limiter.delay_for(100), limiter.max);
    }
}
