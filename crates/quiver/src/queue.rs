//! The request queue orchestrator.

use std::collections::HashMap;
use std::collections::hash_map::Entry as MapEntry;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::cache::Cache;
use crate::delivery::{DeliveryContext, ResponseDelivery, TokioDelivery};
use crate::dispatch::{CacheDispatcher, DispatchQueue, NetworkDispatcher, Shutdown};
use crate::request::{FinishReason, Job, Request, RequestHandle};
use crate::sync::lock;
use crate::transport::Transport;

/// Callback fired whenever a request leaves the queue, whatever the
/// outcome.
pub type FinishedListener = Arc<dyn Fn(&RequestHandle, FinishReason) + Send + Sync>;

/// Identifier for a registered finished-listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Everything the dispatchers and delivery share. Non-generic so erased
/// jobs can point back at it.
pub(crate) struct QueueCore {
    pub(crate) cache_queue: DispatchQueue,
    pub(crate) network_queue: DispatchQueue,
    pub(crate) delivery: ResponseDelivery,
    pub(crate) cache_initialized: AtomicBool,
    /// Requests between add() and finish(), for bookkeeping and bulk
    /// cancellation.
    current: Mutex<HashMap<u64, Arc<Job>>>,
    /// Staging area for duplicate cacheable requests. A key is present
    /// iff a fetch for it is in flight; the in-flight request itself is
    /// not in the list.
    waiting: Mutex<HashMap<String, Vec<Arc<Job>>>>,
    sequence: AtomicU64,
    listeners: Mutex<Vec<(u64, FinishedListener)>>,
    listener_ids: AtomicU64,
}

impl QueueCore {
    fn new(delivery: ResponseDelivery) -> Self {
        Self {
            cache_queue: DispatchQueue::new(),
            network_queue: DispatchQueue::new(),
            delivery,
            cache_initialized: AtomicBool::new(false),
            current: Mutex::new(HashMap::new()),
            waiting: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
            listener_ids: AtomicU64::new(0),
        }
    }

    /// Release a finished request: drop it from the in-flight set, tell
    /// the listeners, and replay any duplicates staged behind its cache
    /// key. The duplicates go onto the **cache** queue: the entry the
    /// finished request wrote is there for them to hit.
    pub(crate) fn finish(&self, job: &Arc<Job>, reason: FinishReason) {
        lock(&self.current).remove(&job.sequence());

        let handle = RequestHandle::new(Arc::clone(job));
        for (_, listener) in lock(&self.listeners).iter() {
            (**listener)(&handle, reason);
        }

        if job.should_cache() {
            let staged = lock(&self.waiting).remove(job.cache_key());
            if let Some(staged) = staged {
                if !staged.is_empty() {
                    debug!(
                        count = staged.len(),
                        cache_key = job.cache_key(),
                        "releasing waiting requests"
                    );
                }
                for waiting in staged {
                    self.cache_queue.push(waiting);
                }
            }
        }
    }
}

/// Orchestrates the dispatch pipeline: owns the two priority queues, the
/// in-flight dedup table and the dispatcher workers.
///
/// The cache and transport are injected at construction; the engine holds
/// no process-wide state. Call [`start`](RequestQueue::start) before or
/// after adding requests — submissions made while stopped are dispatched
/// once workers come up. Dropping the queue stops its workers.
pub struct RequestQueue<T, C> {
    core: Arc<QueueCore>,
    transport: Arc<T>,
    cache: Arc<tokio::sync::Mutex<C>>,
    network_workers: usize,
    shutdown: Mutex<Option<Arc<Shutdown>>>,
}

/// Builder for [`RequestQueue`].
///
/// # Examples
///
/// ```no_run
/// use quiver::{MemoryCache, ReqwestTransport, RequestQueueBuilder};
///
/// # async fn build() -> Result<(), quiver::Error> {
/// let queue = RequestQueueBuilder::new()
///     .network_workers(2)
///     .build(MemoryCache::new(), ReqwestTransport::new()?);
/// queue.start();
/// # Ok(())
/// # }
/// ```
pub struct RequestQueueBuilder {
    network_workers: usize,
    delivery: Option<Arc<dyn DeliveryContext>>,
}

impl Default for RequestQueueBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestQueueBuilder {
    pub const DEFAULT_NETWORK_WORKERS: usize = 4;

    pub fn new() -> Self {
        Self {
            network_workers: Self::DEFAULT_NETWORK_WORKERS,
            delivery: None,
        }
    }

    /// Size of the network dispatcher pool. Defaults to 4.
    #[must_use]
    pub fn network_workers(mut self, workers: usize) -> Self {
        self.network_workers = workers.max(1);
        self
    }

    /// Replace the delivery context. Defaults to a [`TokioDelivery`]
    /// created at build time.
    #[must_use]
    pub fn delivery(mut self, context: impl DeliveryContext) -> Self {
        self.delivery = Some(Arc::new(context));
        self
    }

    /// Build the queue. Must run inside a Tokio runtime when the default
    /// delivery context is used.
    pub fn build<T: Transport, C: Cache>(self, cache: C, transport: T) -> RequestQueue<T, C> {
        let context = self
            .delivery
            .unwrap_or_else(|| Arc::new(TokioDelivery::new()));
        RequestQueue {
            core: Arc::new(QueueCore::new(ResponseDelivery::new(context))),
            transport: Arc::new(transport),
            cache: Arc::new(tokio::sync::Mutex::new(cache)),
            network_workers: self.network_workers,
            shutdown: Mutex::new(None),
        }
    }
}

impl<T: Transport, C: Cache> RequestQueue<T, C> {
    /// Build a queue with default configuration.
    pub fn new(cache: C, transport: T) -> Self {
        RequestQueueBuilder::new().build(cache, transport)
    }

    /// Spawn the dispatcher workers: one cache worker plus the network
    /// pool. Any previous generation is stopped first, so restarting is
    /// idempotent; queued requests carry over. Must run inside a Tokio
    /// runtime.
    pub fn start(&self) {
        self.stop();
        let shutdown = Arc::new(Shutdown::new());
        *lock(&self.shutdown) = Some(Arc::clone(&shutdown));

        tokio::spawn(
            CacheDispatcher::new(
                Arc::clone(&self.core),
                Arc::clone(&self.cache),
                Arc::clone(&shutdown),
            )
            .run(),
        );
        for worker in 0..self.network_workers {
            tokio::spawn(
                NetworkDispatcher::new(
                    Arc::clone(&self.core),
                    Arc::clone(&self.transport),
                    Arc::clone(&self.cache),
                    Arc::clone(&shutdown),
                    worker,
                )
                .run(),
            );
        }
        debug!(network_workers = self.network_workers, "request queue started");
    }

    /// Signal every worker to exit. In-flight transport calls are not
    /// interrupted; each worker stops at its next checkpoint.
    pub fn stop(&self) {
        if let Some(shutdown) = lock(&self.shutdown).take() {
            shutdown.trigger();
            debug!("request queue stopping");
        }
    }

    /// Submit a request.
    ///
    /// Non-cacheable requests bypass deduplication and go straight to the
    /// network queue. A cacheable request whose key already has a fetch in
    /// flight is staged and replayed against the cache once that fetch
    /// finishes — at most one fetch pipeline runs per cache key.
    pub fn add<P: Send + 'static>(&self, request: Request<P>) -> RequestHandle {
        let job = Job::erase(request);
        job.attach_queue(Arc::downgrade(&self.core));
        let sequence = self.core.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        job.set_sequence(sequence);
        lock(&self.core.current).insert(sequence, Arc::clone(&job));
        debug!(sequence, cache_key = job.cache_key(), "add-to-queue");

        let handle = RequestHandle::new(Arc::clone(&job));
        if !job.should_cache() {
            self.core.network_queue.push(job);
            return handle;
        }

        let mut waiting = lock(&self.core.waiting);
        match waiting.entry(job.cache_key().to_owned()) {
            MapEntry::Occupied(mut staged) => {
                debug!(
                    cache_key = job.cache_key(),
                    "request for key in flight, staging"
                );
                staged.get_mut().push(job);
            }
            MapEntry::Vacant(slot) => {
                slot.insert(Vec::new());
                self.core.cache_queue.push(job);
            }
        }
        handle
    }

    /// Cancel every in-flight request matching `filter`. Cancellation is
    /// cooperative: requests are discarded at their next checkpoint, not
    /// preempted.
    pub fn cancel_all(&self, filter: impl Fn(&RequestHandle) -> bool) {
        for job in lock(&self.core.current).values() {
            let handle = RequestHandle::new(Arc::clone(job));
            if filter(&handle) {
                handle.cancel();
            }
        }
    }

    /// Cancel every in-flight request carrying `tag`.
    pub fn cancel_by_tag(&self, tag: &str) {
        self.cancel_all(|request| request.tag() == Some(tag));
    }

    /// Register a listener fired on every request completion.
    pub fn add_finished_listener(
        &self,
        listener: impl Fn(&RequestHandle, FinishReason) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.core.listener_ids.fetch_add(1, Ordering::Relaxed);
        lock(&self.core.listeners).push((id, Arc::new(listener)));
        ListenerId(id)
    }

    /// Remove a previously registered listener.
    pub fn remove_finished_listener(&self, id: ListenerId) {
        lock(&self.core.listeners).retain(|(listener_id, _)| *listener_id != id.0);
    }

    /// Number of requests currently between submission and completion.
    pub fn in_flight(&self) -> usize {
        lock(&self.core.current).len()
    }
}

impl<T, C> Drop for RequestQueue<T, C> {
    fn drop(&mut self) {
        if let Some(shutdown) = lock(&self.shutdown).take() {
            shutdown.trigger();
        }
    }
}
