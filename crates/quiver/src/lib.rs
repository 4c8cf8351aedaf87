//! Asynchronous request queue with cache-aware dispatch.
//!
//! # Architecture
//!
//! The crate follows a three-layer split:
//! - [`data`] - immutable request/response types
//! - [`core`] - pure policy: retry arithmetic, cache-header interpretation
//! - dispatch and delivery - the workers and the callback context
//!
//! A [`RequestQueue`] owns two priority queues and their workers: one
//! cache worker resolving requests against the injected [`Cache`], and a
//! pool of network workers executing misses against the injected
//! [`Transport`]. Identical cacheable requests are deduplicated: one fetch
//! flies per cache key while later arrivals wait, then replay against the
//! primed cache. Results are posted to a single [`DeliveryContext`] so all
//! caller callbacks observe one thread of delivery.
//!
//! # Key behaviors
//!
//! - **Soft expiry**: an entry past its soft TTL is served immediately as
//!   an intermediate response, then refreshed in the background. The
//!   success callback can run twice for one submission; see
//!   [`Request`] for the contract.
//! - **Cooperative cancellation**: [`RequestHandle::cancel`] sets a flag
//!   that workers check at dequeue and again before delivery. An
//!   in-flight transport call is never interrupted.
//! - **Retries**: timeouts, auth failures and redirects consult the
//!   request's [`RetryPolicy`] before becoming terminal; retries run on
//!   the same worker with a multiplicatively growing timeout.
//!
//! # Examples
//!
//! ```no_run
//! use quiver::{MemoryCache, Method, Request, ReqwestTransport, RequestQueue};
//!
//! # async fn run() -> Result<(), quiver::Error> {
//! let queue = RequestQueue::new(MemoryCache::new(), ReqwestTransport::new()?);
//! queue.start();
//!
//! let handle = queue.add(
//!     Request::string(Method::Get, "https://example.com/articles")
//!         .tag("home")
//!         .on_success(|body| println!("{body}"))
//!         .on_error(|error| eprintln!("request failed: {error}")),
//! );
//! # let _ = handle;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod core;
pub mod data;
mod delivery;
mod dispatch;
mod error;
mod queue;
mod request;
mod sync;
pub mod transport;

pub use cache::{Cache, CacheError, Entry, MemoryCache};
pub use crate::core::retry::{DefaultRetryPolicy, RetryPolicy};
pub use data::{Method, Parsed, Priority, WireResponse};
pub use delivery::{DeliveryContext, DeliveryTask, ImmediateDelivery, TokioDelivery};
pub use error::{Error, Result};
pub use queue::{FinishedListener, ListenerId, RequestQueue, RequestQueueBuilder};
pub use request::{FinishReason, Request, RequestHandle};
pub use transport::{RequestParts, Transport};

#[cfg(feature = "reqwest")]
pub use transport::ReqwestTransport;
