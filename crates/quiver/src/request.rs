//! Request construction and the type-erased in-queue representation.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::cache::Entry;
use crate::core::cache_headers;
use crate::core::retry::{DefaultRetryPolicy, RetryPolicy};
use crate::data::{Method, Parsed, Priority, WireResponse};
use crate::error::{Error, Result};
use crate::queue::QueueCore;
use crate::sync::lock;
use crate::transport::RequestParts;

/// Reason a request left the queue, reported to finished-listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// A final response or error was delivered.
    Done,
    /// Canceled before delivery; caller callbacks were suppressed.
    Canceled,
    /// A 304 arrived for a request whose response had already been
    /// delivered; nothing more to do.
    NotModified,
}

type SuccessFn<T> = Arc<dyn Fn(T) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(Error) + Send + Sync>;
type ParseFn<T> = Arc<dyn Fn(&WireResponse) -> Result<Parsed<T>> + Send + Sync>;
type PackageFn = Box<dyn Fn(&WireResponse) -> Result<PackagedResponse> + Send + Sync>;

pub(crate) type DeliverFn = Box<dyn FnOnce() + Send>;

/// A unit of work for the queue, generic over the parsed payload type.
///
/// Build one with a typed constructor ([`Request::string`],
/// [`Request::json`], [`Request::bytes`]) or [`Request::with_parser`],
/// configure it with the builder methods and submit it via
/// [`RequestQueue::add`](crate::RequestQueue::add).
///
/// Cacheable requests can see their success callback run **twice** for a
/// single submission: once with a stale cached value (intermediate
/// delivery, past the soft TTL) and once with the refreshed value. Callers
/// that cannot tolerate double delivery should submit with [`no_cache`]
/// or cache responses without `stale-while-revalidate`.
///
/// [`no_cache`]: Request::no_cache
pub struct Request<T> {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
    content_type: Option<String>,
    priority: Priority,
    should_cache: bool,
    cache_key: Option<String>,
    tag: Option<String>,
    retry_policy: Box<dyn RetryPolicy>,
    parser: ParseFn<T>,
    on_success: Option<SuccessFn<T>>,
    on_error: Option<ErrorFn>,
}

impl<T: Send + 'static> Request<T> {
    /// Create a request with a custom parser mapping the wire response to
    /// the typed payload and its cache entry.
    pub fn with_parser(
        method: Method,
        url: impl Into<String>,
        parser: impl Fn(&WireResponse) -> Result<Parsed<T>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            content_type: None,
            priority: Priority::default(),
            should_cache: true,
            cache_key: None,
            tag: None,
            retry_policy: Box::new(DefaultRetryPolicy::default()),
            parser: Arc::new(parser),
            on_success: None,
            on_error: None,
        }
    }

    /// Add a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the request body and its content type.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self.content_type = Some(content_type.into());
        self
    }

    /// Serialize `body` as the JSON request body.
    pub fn json_body<S: serde::Serialize>(mut self, body: &S) -> Result<Self> {
        let encoded = serde_json::to_vec(body).map_err(|e| Error::Parse(e.to_string()))?;
        self.body = Some(Bytes::from(encoded));
        self.content_type = Some("application/json; charset=utf-8".to_owned());
        Ok(self)
    }

    /// Set the dispatch priority. Defaults to [`Priority::Normal`].
    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Bypass the cache: the request goes straight to the network queue
    /// and its response is never stored.
    #[must_use]
    pub fn no_cache(mut self) -> Self {
        self.should_cache = false;
        self
    }

    /// Override the cache key. Defaults to `{method}:{url}`.
    #[must_use]
    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Tag the request for bulk cancellation via
    /// [`RequestQueue::cancel_by_tag`](crate::RequestQueue::cancel_by_tag).
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Replace the retry policy. Defaults to [`DefaultRetryPolicy`]
    /// (2.5 s timeout, no retries).
    #[must_use]
    pub fn retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry_policy = Box::new(policy);
        self
    }

    /// Callback invoked with the parsed payload. May run twice for one
    /// submission, see the type-level docs.
    #[must_use]
    pub fn on_success(mut self, callback: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    /// Callback invoked with the terminal error.
    #[must_use]
    pub fn on_error(mut self, callback: impl Fn(Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

impl Request<String> {
    /// A request whose body is decoded as text. Non-UTF-8 bytes are
    /// replaced rather than rejected.
    pub fn string(method: Method, url: impl Into<String>) -> Self {
        Self::with_parser(method, url, |wire| {
            Ok(Parsed {
                value: String::from_utf8_lossy(&wire.data).into_owned(),
                entry: cache_headers::entry_for(wire),
            })
        })
    }
}

impl Request<Bytes> {
    /// A request whose body is kept as raw bytes.
    pub fn bytes(method: Method, url: impl Into<String>) -> Self {
        Self::with_parser(method, url, |wire| {
            Ok(Parsed {
                value: wire.data.clone(),
                entry: cache_headers::entry_for(wire),
            })
        })
    }
}

impl<T: DeserializeOwned + Send + 'static> Request<T> {
    /// A request whose body is deserialized from JSON.
    pub fn json(method: Method, url: impl Into<String>) -> Self {
        Self::with_parser(method, url, |wire| {
            let value = serde_json::from_slice(&wire.data).map_err(|e| Error::Parse(e.to_string()))?;
            Ok(Parsed {
                value,
                entry: cache_headers::entry_for(wire),
            })
        })
    }
}

/// Parse outcome with the typed value already bound into its delivery
/// closure.
pub(crate) struct PackagedResponse {
    pub deliver: DeliverFn,
    pub entry: Option<Entry>,
}

/// Type-erased request state shared between the queue front-end, the
/// dispatcher workers and the delivery context.
///
/// Ownership transfers are queue hand-offs: no two workers process one
/// job concurrently. The atomics exist for the cancel and delivered flags,
/// which the caller and the delivery context may touch at any time.
pub(crate) struct Job {
    method: Method,
    url: String,
    cache_key: String,
    tag: Option<String>,
    priority: Priority,
    should_cache: bool,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
    content_type: Option<String>,
    sequence: OnceLock<u64>,
    canceled: AtomicBool,
    delivered: AtomicBool,
    redirect_url: Mutex<Option<String>>,
    cache_entry: Mutex<Option<Entry>>,
    retry_policy: Mutex<Box<dyn RetryPolicy>>,
    queue: OnceLock<Weak<QueueCore>>,
    package: PackageFn,
    on_error: Option<ErrorFn>,
}

impl Job {
    pub(crate) fn erase<T: Send + 'static>(request: Request<T>) -> Arc<Self> {
        let cache_key = request
            .cache_key
            .unwrap_or_else(|| format!("{}:{}", request.method, request.url));
        let parser = request.parser;
        let on_success = request.on_success;
        let package: PackageFn = Box::new(move |wire| {
            let parsed = (*parser)(wire)?;
            let callback = on_success.clone();
            let value = parsed.value;
            Ok(PackagedResponse {
                deliver: Box::new(move || {
                    if let Some(callback) = callback {
                        (*callback)(value);
                    }
                }),
                entry: parsed.entry,
            })
        });
        Arc::new(Self {
            method: request.method,
            url: request.url,
            cache_key,
            tag: request.tag,
            priority: request.priority,
            should_cache: request.should_cache,
            headers: request.headers,
            body: request.body,
            content_type: request.content_type,
            sequence: OnceLock::new(),
            canceled: AtomicBool::new(false),
            delivered: AtomicBool::new(false),
            redirect_url: Mutex::new(None),
            cache_entry: Mutex::new(None),
            retry_policy: Mutex::new(request.retry_policy),
            queue: OnceLock::new(),
            package,
            on_error: request.on_error,
        })
    }

    pub(crate) fn method(&self) -> Method {
        self.method
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub(crate) fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub(crate) fn priority(&self) -> Priority {
        self.priority
    }

    pub(crate) fn should_cache(&self) -> bool {
        self.should_cache
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.sequence.get().copied().unwrap_or_default()
    }

    pub(crate) fn set_sequence(&self, sequence: u64) {
        let _ = self.sequence.set(sequence);
    }

    pub(crate) fn attach_queue(&self, queue: Weak<QueueCore>) {
        let _ = self.queue.set(queue);
    }

    pub(crate) fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    pub(crate) fn mark_delivered(&self) {
        self.delivered.store(true, Ordering::Release);
    }

    pub(crate) fn has_response_delivered(&self) -> bool {
        self.delivered.load(Ordering::Acquire)
    }

    pub(crate) fn set_redirect_url(&self, url: String) {
        *lock(&self.redirect_url) = Some(url);
    }

    pub(crate) fn set_cache_entry(&self, entry: Entry) {
        *lock(&self.cache_entry) = Some(entry);
    }

    pub(crate) fn cache_entry(&self) -> Option<Entry> {
        lock(&self.cache_entry).clone()
    }

    /// Wire-facing view of this job; the recorded redirect target, if
    /// any, replaces the original URL.
    pub(crate) fn parts(&self) -> RequestParts {
        let url = lock(&self.redirect_url)
            .clone()
            .unwrap_or_else(|| self.url.clone());
        RequestParts {
            method: self.method,
            url,
            headers: self.headers.clone(),
            body: self.body.clone(),
            content_type: self.content_type.clone(),
        }
    }

    pub(crate) fn current_timeout(&self) -> Duration {
        lock(&self.retry_policy).current_timeout()
    }

    pub(crate) fn retry_count(&self) -> u32 {
        lock(&self.retry_policy).current_retry_count()
    }

    pub(crate) fn retry(&self, error: Error) -> Result<()> {
        lock(&self.retry_policy).retry(error)
    }

    /// Run the parser. A panic inside a caller-supplied parser is caught
    /// and surfaced as a parse error so it cannot take down a dispatcher.
    pub(crate) fn parse(&self, wire: &WireResponse) -> Result<PackagedResponse> {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (self.package)(wire)))
            .unwrap_or_else(|_| Err(Error::Parse("response parser panicked".into())))
    }

    pub(crate) fn deliver_error(&self, error: Error) {
        if let Some(callback) = &self.on_error {
            (**callback)(error);
        }
    }

    /// Tell the owning queue this job is done so the dedup slot is
    /// released and any staged duplicates are replayed.
    pub(crate) fn finish(self: Arc<Self>, reason: FinishReason) {
        if let Some(core) = self.queue.get().and_then(Weak::upgrade) {
            core.finish(&self, reason);
        }
    }
}

/// Shareable handle to a submitted request, returned by
/// [`RequestQueue::add`](crate::RequestQueue::add) and passed to cancel
/// filters and finished-listeners.
#[derive(Clone)]
pub struct RequestHandle {
    job: Arc<Job>,
}

impl RequestHandle {
    pub(crate) fn new(job: Arc<Job>) -> Self {
        Self { job }
    }

    pub(crate) fn job(&self) -> &Arc<Job> {
        &self.job
    }

    /// Mark the request canceled. Cooperative: a transport call already
    /// in flight is not interrupted, the request is discarded at the next
    /// checkpoint and its callbacks never run.
    pub fn cancel(&self) {
        tracing::debug!(sequence = self.job.sequence(), url = self.job.url(), "cancel");
        self.job.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.job.is_canceled()
    }

    pub fn method(&self) -> Method {
        self.job.method()
    }

    pub fn url(&self) -> &str {
        self.job.url()
    }

    pub fn cache_key(&self) -> &str {
        self.job.cache_key()
    }

    pub fn tag(&self) -> Option<&str> {
        self.job.tag()
    }

    pub fn priority(&self) -> Priority {
        self.job.priority()
    }

    /// Submission order within the owning queue.
    pub fn sequence(&self) -> u64 {
        self.job.sequence()
    }
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {:?} {}",
            if self.is_canceled() { "[X]" } else { "[ ]" },
            self.method(),
            self.url(),
            self.priority(),
            self.sequence(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn default_cache_key_is_method_and_url() {
        let job = Job::erase(Request::string(Method::Get, "http://example.com/a"));
        assert_eq!(job.cache_key(), "GET:http://example.com/a");
        assert!(job.should_cache());
        assert_eq!(job.priority(), Priority::Normal);
    }

    #[test]
    fn explicit_cache_key_wins() {
        let job = Job::erase(Request::string(Method::Get, "http://example.com/a").cache_key("custom"));
        assert_eq!(job.cache_key(), "custom");
    }

    #[test]
    fn redirect_url_replaces_original_in_parts() {
        let job = Job::erase(Request::string(Method::Get, "http://example.com/a"));
        assert_eq!(job.parts().url, "http://example.com/a");
        job.set_redirect_url("http://example.com/b".into());
        assert_eq!(job.parts().url, "http://example.com/b");
        assert_eq!(job.url(), "http://example.com/a");
    }

    #[test]
    fn json_parser_surfaces_decode_failures() {
        #[derive(serde::Deserialize)]
        struct Payload {
            #[allow(dead_code)]
            name: String,
        }

        let job = Job::erase(Request::<Payload>::json(Method::Get, "http://example.com"));
        let wire = WireResponse::new(
            200,
            Bytes::from_static(b"not json"),
            Vec::new(),
            false,
            Duration::ZERO,
        );
        assert!(matches!(job.parse(&wire), Err(Error::Parse(_))));
    }

    #[test]
    fn parser_panic_becomes_parse_error() {
        let job = Job::erase(Request::<String>::with_parser(
            Method::Get,
            "http://example.com",
            |_| panic!("boom"),
        ));
        let wire = WireResponse::new(200, Bytes::new(), Vec::new(), false, Duration::ZERO);
        assert!(matches!(job.parse(&wire), Err(Error::Parse(_))));
    }

    #[test]
    fn packaged_delivery_invokes_success_callback() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);
        let job = Job::erase(
            Request::string(Method::Get, "http://example.com")
                .on_success(move |value| lock(&sink).push(value)),
        );
        let wire = WireResponse::new(
            200,
            Bytes::from_static(b"hello"),
            Vec::new(),
            false,
            Duration::ZERO,
        );
        let packaged = job.parse(&wire).expect("parses");
        (packaged.deliver)();
        assert_eq!(*lock(&delivered), vec!["hello".to_string()]);
    }
}
