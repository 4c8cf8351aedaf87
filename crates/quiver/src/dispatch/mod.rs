//! Dispatch infrastructure: the shared priority queues and the cache and
//! network dispatcher workers.

mod cache;
mod network;
mod queue;

pub(crate) use cache::CacheDispatcher;
pub(crate) use network::NetworkDispatcher;
pub(crate) use queue::{DispatchQueue, Shutdown};
