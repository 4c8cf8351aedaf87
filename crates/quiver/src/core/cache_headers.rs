//! Derivation of cache entries from response headers.

use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};

use crate::cache::Entry;
use crate::data::WireResponse;

/// Build a cache [`Entry`] for a response, following the origin's caching
/// headers.
///
/// Returns `None` when the response forbids caching (`no-cache`,
/// `no-store`) or carries nothing to cache by. `max-age` controls the soft
/// TTL; `stale-while-revalidate` extends the hard TTL past it, which is
/// what enables the serve-stale-then-refresh path. `must-revalidate`
/// collapses the two. Without `Cache-Control`, `Expires` relative to the
/// origin's `Date` is used for both TTLs. A response that only carries
/// validators is stored immediately stale, so every hit revalidates.
pub fn entry_for(response: &WireResponse) -> Option<Entry> {
    let now = SystemTime::now();
    let server_date = response.header("Date").and_then(parse_http_date);
    let last_modified = response.header("Last-Modified").and_then(parse_http_date);
    let etag = response.header("ETag").map(str::to_owned);

    let mut has_cache_control = false;
    let mut max_age: u64 = 0;
    let mut stale_while_revalidate: u64 = 0;
    let mut must_revalidate = false;
    if let Some(value) = response.header("Cache-Control") {
        has_cache_control = true;
        for token in value.split(',').map(str::trim) {
            if token == "no-cache" || token == "no-store" {
                return None;
            } else if let Some(secs) = token.strip_prefix("max-age=") {
                max_age = secs.parse().unwrap_or(0);
            } else if let Some(secs) = token.strip_prefix("stale-while-revalidate=") {
                stale_while_revalidate = secs.parse().unwrap_or(0);
            } else if token == "must-revalidate" || token == "proxy-revalidate" {
                must_revalidate = true;
            }
        }
    }

    let (soft_ttl, ttl) = if has_cache_control {
        let soft = now + Duration::from_secs(max_age);
        let hard = if must_revalidate {
            soft
        } else {
            soft + Duration::from_secs(stale_while_revalidate)
        };
        (soft, hard)
    } else if let (Some(date), Some(expires)) = (
        server_date,
        response.header("Expires").and_then(parse_http_date),
    ) {
        // Expires is relative to the origin's own clock.
        let lifetime = expires.duration_since(date).unwrap_or(Duration::ZERO);
        let soft = now + lifetime;
        (soft, soft)
    } else if etag.is_some() || last_modified.is_some() {
        (now, now)
    } else {
        return None;
    };

    Some(Entry {
        data: response.data.clone(),
        etag,
        server_date,
        last_modified,
        ttl,
        soft_ttl,
        headers: response.headers.clone(),
    })
}

/// Parse an HTTP date (IMF-fixdate, e.g. `Wed, 21 Oct 2015 07:28:00 GMT`).
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(SystemTime::from)
}

/// Format an instant as an HTTP date for validator headers.
pub fn format_http_date(value: SystemTime) -> String {
    DateTime::<Utc>::from(value)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
