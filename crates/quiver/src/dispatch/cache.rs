use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::cache::Cache;
use crate::data::WireResponse;
use crate::dispatch::Shutdown;
use crate::queue::QueueCore;
use crate::request::{FinishReason, Job};

/// The single cache worker.
///
/// Resolves requests against the cache and decides hit, miss, expired or
/// soft-refresh. Nothing a single request does can stop the loop; failures
/// are logged or delivered and the worker moves on.
pub(crate) struct CacheDispatcher<C> {
    core: Arc<QueueCore>,
    cache: Arc<Mutex<C>>,
    shutdown: Arc<Shutdown>,
}

impl<C: Cache> CacheDispatcher<C> {
    pub(crate) fn new(core: Arc<QueueCore>, cache: Arc<Mutex<C>>, shutdown: Arc<Shutdown>) -> Self {
        Self {
            core,
            cache,
            shutdown,
        }
    }

    pub(crate) async fn run(self) {
        debug!("cache dispatcher started");
        // Initialize once per queue, not per start(): backends treat this
        // as one-time setup.
        if !self.core.cache_initialized.swap(true, Ordering::AcqRel) {
            if let Err(error) = self.cache.lock().await.initialize().await {
                warn!(%error, "cache initialization failed");
            }
        }
        loop {
            let job = tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                job = self.core.cache_queue.pop() => job,
            };
            self.process(job).await;
        }
        debug!("cache dispatcher stopped");
    }

    async fn process(&self, job: Arc<Job>) {
        trace!(sequence = job.sequence(), cache_key = job.cache_key(), "cache-queue-take");

        if job.is_canceled() {
            debug!(sequence = job.sequence(), "cache-discard-canceled");
            job.finish(FinishReason::Canceled);
            return;
        }

        let entry = match self.cache.lock().await.get(job.cache_key()).await {
            Ok(entry) => entry,
            Err(error) => {
                // Backend failures are a miss, never a caller error.
                warn!(%error, cache_key = job.cache_key(), "cache lookup failed, treating as miss");
                None
            }
        };

        let Some(entry) = entry else {
            debug!(cache_key = job.cache_key(), "cache-miss");
            self.core.network_queue.push(job);
            return;
        };

        if entry.is_expired() {
            debug!(cache_key = job.cache_key(), "cache-hit-expired");
            // Keep the stale entry for its validators: the refetch can
            // come back 304.
            job.set_cache_entry(entry);
            self.core.network_queue.push(job);
            return;
        }

        debug!(cache_key = job.cache_key(), "cache-hit");
        let wire = WireResponse::from_entry(&entry);
        let packaged = match job.parse(&wire) {
            Ok(packaged) => packaged,
            Err(error) => {
                warn!(%error, cache_key = job.cache_key(), "cached entry failed to parse");
                self.core.delivery.post_error(job, error);
                return;
            }
        };

        if !entry.refresh_needed() {
            self.core.delivery.post_response(job, packaged, false, None);
        } else {
            debug!(cache_key = job.cache_key(), "cache-hit-refresh-needed");
            job.set_cache_entry(entry);
            // Serve the stale value now; once the callback has run, queue
            // the same job for a background refresh.
            let core = Arc::clone(&self.core);
            let refresh = Arc::clone(&job);
            self.core.delivery.post_response(
                job,
                packaged,
                true,
                Some(Box::new(move || core.network_queue.push(refresh))),
            );
        }
    }
}
