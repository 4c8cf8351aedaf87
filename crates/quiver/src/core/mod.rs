//! Pure policy: retry arithmetic and cache-header interpretation.
//!
//! Nothing in this layer performs I/O; the dispatchers call into it.

pub mod cache_headers;
pub mod retry;
