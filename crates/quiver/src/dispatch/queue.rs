use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::pin::pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::request::Job;
use crate::sync::lock;

/// Heap slot: priority descending, then sequence ascending.
struct Slot(Arc<Job>);

impl Ord for Slot {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0
            .priority()
            .cmp(&other.0.priority())
            .then_with(|| other.0.sequence().cmp(&self.0.sequence()))
    }
}

impl PartialOrd for Slot {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Slot {}

/// Priority queue shared between the queue front-end and the dispatcher
/// workers. `push` is synchronous; `pop` parks until a job arrives.
pub(crate) struct DispatchQueue {
    heap: Mutex<BinaryHeap<Slot>>,
    notify: Notify,
}

impl DispatchQueue {
    pub(crate) fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
        }
    }

    pub(crate) fn push(&self, job: Arc<Job>) {
        lock(&self.heap).push(Slot(job));
        self.notify.notify_waiters();
    }

    /// Take the highest-priority job, parking until one is available.
    pub(crate) async fn pop(&self) -> Arc<Job> {
        loop {
            // Register for wakeups before checking the heap so a push
            // between the check and the await is not lost.
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();
            if let Some(Slot(job)) = lock(&self.heap).pop() {
                return job;
            }
            notified.await;
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        lock(&self.heap).len()
    }
}

/// Shutdown signal for one generation of dispatcher workers.
///
/// Triggering does not drain the queues: pending jobs survive a
/// stop/start cycle and are served by the next generation.
pub(crate) struct Shutdown {
    triggered: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub(crate) fn new() -> Self {
        Self {
            triggered: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub(crate) fn trigger(&self) {
        self.triggered.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub(crate) async fn wait(&self) {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();
            if self.triggered.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::data::{Method, Priority};
    use crate::request::Request;

    fn job(url: &str, priority: Priority, sequence: u64) -> Arc<Job> {
        let job = Job::erase(Request::string(Method::Get, url).priority(priority));
        job.set_sequence(sequence);
        job
    }

    #[tokio::test]
    async fn pops_by_priority_then_sequence() {
        let queue = DispatchQueue::new();
        queue.push(job("http://x/low", Priority::Low, 1));
        queue.push(job("http://x/first", Priority::Normal, 2));
        queue.push(job("http://x/second", Priority::Normal, 3));
        queue.push(job("http://x/now", Priority::Immediate, 4));

        assert_eq!(queue.pop().await.url(), "http://x/now");
        assert_eq!(queue.pop().await.url(), "http://x/first");
        assert_eq!(queue.pop().await.url(), "http://x/second");
        assert_eq!(queue.pop().await.url(), "http://x/low");
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pop_parks_until_push() {
        let queue = Arc::new(DispatchQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await.url().to_owned() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(job("http://x/late", Priority::Normal, 1));
        let url = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("pop woke up")
            .expect("task ran");
        assert_eq!(url, "http://x/late");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_wakes_waiters() {
        let shutdown = Arc::new(Shutdown::new());
        let waiter = {
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move { shutdown.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait returned")
            .expect("task ran");
    }
}
