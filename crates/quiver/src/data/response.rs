use std::time::Duration;

use bytes::Bytes;

use crate::cache::Entry;

/// A raw response as produced by a [`Transport`](crate::transport::Transport)
/// or rebuilt from a cache entry.
#[derive(Debug, Clone)]
pub struct WireResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body. Empty for a 304.
    pub data: Bytes,
    /// Response headers in arrival order; look up with [`WireResponse::header`].
    pub headers: Vec<(String, String)>,
    /// True for a 304 Not Modified answer to a conditional request.
    pub not_modified: bool,
    /// Wall time spent on the wire for this response.
    pub network_time: Duration,
}

impl WireResponse {
    pub fn new(
        status: u16,
        data: Bytes,
        headers: Vec<(String, String)>,
        not_modified: bool,
        network_time: Duration,
    ) -> Self {
        Self {
            status,
            data,
            headers,
            not_modified,
            network_time,
        }
    }

    /// Case-insensitive header lookup; first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    /// Rebuild the wire shape of a cached response so cache hits and
    /// network responses go through the same parser.
    pub(crate) fn from_entry(entry: &Entry) -> Self {
        Self {
            status: 200,
            data: entry.data.clone(),
            headers: entry.headers.clone(),
            not_modified: false,
            network_time: Duration::ZERO,
        }
    }
}

/// Case-insensitive lookup in a header list.
pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// A successfully parsed response: the typed value plus the cache entry
/// derived from the response headers, when the response was cacheable.
pub struct Parsed<T> {
    pub value: T,
    pub entry: Option<Entry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let headers = vec![
            ("Content-Type".to_string(), "text/plain".to_string()),
            ("ETag".to_string(), "\"abc\"".to_string()),
        ];
        assert_eq!(header_value(&headers, "content-type"), Some("text/plain"));
        assert_eq!(header_value(&headers, "etag"), Some("\"abc\""));
        assert_eq!(header_value(&headers, "Location"), None);
    }
}
