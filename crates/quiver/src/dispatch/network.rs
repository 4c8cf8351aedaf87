use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::cache::{Cache, Entry};
use crate::core::cache_headers;
use crate::data::WireResponse;
use crate::dispatch::Shutdown;
use crate::error::{Error, Result};
use crate::queue::QueueCore;
use crate::request::{FinishReason, Job};
use crate::transport::Transport;

/// One worker of the network pool.
///
/// Executes transport calls, applies the request's retry policy in place
/// and writes fresh results to the cache before handing them to delivery.
pub(crate) struct NetworkDispatcher<T, C> {
    core: Arc<QueueCore>,
    transport: Arc<T>,
    cache: Arc<Mutex<C>>,
    shutdown: Arc<Shutdown>,
    worker: usize,
}

impl<T: Transport, C: Cache> NetworkDispatcher<T, C> {
    pub(crate) fn new(
        core: Arc<QueueCore>,
        transport: Arc<T>,
        cache: Arc<Mutex<C>>,
        shutdown: Arc<Shutdown>,
        worker: usize,
    ) -> Self {
        Self {
            core,
            transport,
            cache,
            shutdown,
            worker,
        }
    }

    pub(crate) async fn run(self) {
        debug!(worker = self.worker, "network dispatcher started");
        loop {
            let job = tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                job = self.core.network_queue.pop() => job,
            };
            self.process(job).await;
        }
        debug!(worker = self.worker, "network dispatcher stopped");
    }

    async fn process(&self, job: Arc<Job>) {
        trace!(
            worker = self.worker,
            sequence = job.sequence(),
            "network-queue-take"
        );

        if job.is_canceled() {
            debug!(sequence = job.sequence(), "network-discard-canceled");
            job.finish(FinishReason::Canceled);
            return;
        }

        let wire = match self.attempt_until_resolved(&job).await {
            Ok(wire) => wire,
            Err(error) => {
                self.core.delivery.post_error(job, error);
                return;
            }
        };
        debug!(
            status = wire.status,
            network_time_ms = wire.network_time.as_millis() as u64,
            url = job.url(),
            "network-http-complete"
        );

        // A 304 for a request that already saw its intermediate delivery
        // is complete: the caller has the current value.
        if wire.not_modified && job.has_response_delivered() {
            job.finish(FinishReason::NotModified);
            return;
        }
        let wire = if wire.not_modified {
            merge_not_modified(wire, job.cache_entry())
        } else {
            wire
        };

        let packaged = match job.parse(&wire) {
            Ok(packaged) => packaged,
            Err(error) => {
                self.core.delivery.post_error(job, error);
                return;
            }
        };
        trace!(sequence = job.sequence(), "network-parse-complete");

        if job.should_cache() {
            if let Some(entry) = packaged.entry.clone() {
                match self.cache.lock().await.put(job.cache_key(), entry).await {
                    Ok(()) => trace!(cache_key = job.cache_key(), "network-cache-written"),
                    Err(error) => {
                        // A failed write costs a refetch later, nothing more.
                        warn!(%error, cache_key = job.cache_key(), "cache write failed")
                    }
                }
            }
        }

        self.core.delivery.post_response(job, packaged, false, None);
    }

    /// Run transport attempts until a response is produced or an error
    /// becomes terminal. Retries happen in place on this worker; the
    /// request is never re-queued.
    async fn attempt_until_resolved(&self, job: &Arc<Job>) -> Result<WireResponse> {
        loop {
            let parts = job.parts();
            let extra_headers = conditional_headers(job.cache_entry().as_ref());
            let timeout = job.current_timeout();

            let attempt =
                tokio::time::timeout(timeout, self.transport.perform(&parts, &extra_headers)).await;
            let error = match attempt {
                Ok(Ok(wire)) => return Ok(wire),
                Err(_) => Error::Timeout,
                Ok(Err(error)) => error,
            };

            if !error.is_transient() {
                return Err(error);
            }
            if let Error::Redirect {
                location: Some(location),
            } = &error
            {
                job.set_redirect_url(location.clone());
            }

            match job.retry(error) {
                Ok(()) => debug!(
                    url = %parts.url,
                    retries = job.retry_count(),
                    next_timeout_ms = job.current_timeout().as_millis() as u64,
                    "transient failure, retrying"
                ),
                Err(error) => {
                    debug!(url = %parts.url, retries = job.retry_count(), "retries exhausted");
                    return Err(error);
                }
            }
        }
    }
}

/// Validator headers for a conditional refetch of `entry`.
fn conditional_headers(entry: Option<&Entry>) -> Vec<(String, String)> {
    let Some(entry) = entry else {
        return Vec::new();
    };
    let mut headers = Vec::new();
    if let Some(etag) = &entry.etag {
        headers.push(("If-None-Match".to_owned(), etag.clone()));
    }
    if let Some(last_modified) = entry.last_modified {
        headers.push((
            "If-Modified-Since".to_owned(),
            cache_headers::format_http_date(last_modified),
        ));
    }
    headers
}

/// A 304 carries no body: substitute the cached payload and fold the
/// fresh headers over the stored ones.
fn merge_not_modified(wire: WireResponse, entry: Option<Entry>) -> WireResponse {
    let Some(entry) = entry else {
        return wire;
    };
    let mut headers = entry.headers;
    for (name, value) in wire.headers {
        if let Some(slot) = headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            slot.1 = value;
        } else {
            headers.push((name, value));
        }
    }
    WireResponse {
        status: wire.status,
        data: entry.data,
        headers,
        not_modified: true,
        network_time: wire.network_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    use bytes::Bytes;

    fn entry() -> Entry {
        let now = SystemTime::now();
        Entry {
            data: Bytes::from_static(b"cached body"),
            etag: Some("\"v1\"".into()),
            server_date: None,
            last_modified: cache_headers::parse_http_date("Wed, 21 Oct 2015 07:28:00 GMT"),
            ttl: now,
            soft_ttl: now,
            headers: vec![
                ("Content-Type".to_string(), "text/plain".to_string()),
                ("Cache-Control".to_string(), "max-age=10".to_string()),
            ],
        }
    }

    #[test]
    fn conditional_headers_carry_both_validators() {
        let headers = conditional_headers(Some(&entry()));
        assert_eq!(
            headers,
            vec![
                ("If-None-Match".to_string(), "\"v1\"".to_string()),
                (
                    "If-Modified-Since".to_string(),
                    "Wed, 21 Oct 2015 07:28:00 GMT".to_string()
                ),
            ]
        );
        assert!(conditional_headers(None).is_empty());
    }

    #[test]
    fn not_modified_merge_keeps_body_and_folds_headers() {
        let wire = WireResponse::new(
            304,
            Bytes::new(),
            vec![
                ("Cache-Control".to_string(), "max-age=60".to_string()),
                ("Age".to_string(), "0".to_string()),
            ],
            true,
            Duration::from_millis(5),
        );
        let merged = merge_not_modified(wire, Some(entry()));
        assert_eq!(merged.data, Bytes::from_static(b"cached body"));
        assert_eq!(merged.header("Content-Type"), Some("text/plain"));
        // The fresh response wins where both sides carry a header.
        assert_eq!(merged.header("Cache-Control"), Some("max-age=60"));
        assert_eq!(merged.header("Age"), Some("0"));
        assert!(merged.not_modified);
    }

    #[test]
    fn not_modified_without_entry_is_left_alone() {
        let wire = WireResponse::new(304, Bytes::new(), Vec::new(), true, Duration::ZERO);
        let merged = merge_not_modified(wire.clone(), None);
        assert_eq!(merged.data, wire.data);
        assert_eq!(merged.headers, wire.headers);
    }
}
