//! Persistent cache backends for the quiver request queue.
//!
//! Two shapes of persistence behind the same [`quiver::Cache`] contract:
//!
//! - [`DiskCache`] - one file per entry under a root directory, with a
//!   size cap enforced by pruning the oldest entries.
//! - [`SledCache`] - an embedded [`sled`] database, for callers that
//!   already keep one around or want transactional storage.
//!
//! Both serialize entries with `postcard`. The engine serializes access,
//! so neither backend carries its own locking.

mod disk;
mod embedded;
mod record;

pub use disk::DiskCache;
pub use embedded::SledCache;
