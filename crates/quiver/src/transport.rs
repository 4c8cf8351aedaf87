//! Transport contract and the reqwest-backed reference adapter.

use std::future::Future;

use bytes::Bytes;

use crate::data::{Method, WireResponse};
use crate::error::Error;

/// The wire-facing view of a request handed to a transport.
#[derive(Debug, Clone)]
pub struct RequestParts {
    pub method: Method,
    /// Effective URL: the redirect target once one has been recorded.
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub content_type: Option<String>,
}

/// Executes one request attempt against the wire.
///
/// Invoked only from network dispatcher workers, one call at a time per
/// worker; the per-attempt timeout is enforced by the dispatcher, not the
/// transport.
///
/// Implementations map their failures onto [`Error`]: connection-level
/// failures to `Network`, 401/403 to `AuthFailure`, 3xx to `Redirect`,
/// other non-2xx to `Server`. A 304 is not an error; it comes back as a
/// response with `not_modified` set and the dispatcher substitutes the
/// cached payload.
pub trait Transport: Send + Sync + 'static {
    fn perform(
        &self,
        parts: &RequestParts,
        extra_headers: &[(String, String)],
    ) -> impl Future<Output = Result<WireResponse, Error>> + Send;
}

#[cfg(feature = "reqwest")]
mod reqwest_impl {
    use std::time::Instant;

    use super::*;
    use crate::data::header_value;

    /// Production transport over a shared [`reqwest::Client`].
    ///
    /// Redirects are not followed: 3xx responses surface as
    /// [`Error::Redirect`] so the engine's retry policy governs them.
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new() -> Result<Self, Error> {
            let client = reqwest::Client::builder()
                .user_agent(concat!("quiver/", env!("CARGO_PKG_VERSION")))
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .map_err(|e| Error::Network(e.to_string()))?;
            Ok(Self { client })
        }

        /// Wrap an already-configured client. The client should have
        /// redirect following disabled for redirect retries to work.
        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    impl Transport for ReqwestTransport {
        async fn perform(
            &self,
            parts: &RequestParts,
            extra_headers: &[(String, String)],
        ) -> Result<WireResponse, Error> {
            let started = Instant::now();

            let method = match parts.method {
                Method::Get => reqwest::Method::GET,
                Method::Post => reqwest::Method::POST,
                Method::Put => reqwest::Method::PUT,
                Method::Delete => reqwest::Method::DELETE,
                Method::Head => reqwest::Method::HEAD,
                Method::Options => reqwest::Method::OPTIONS,
                Method::Trace => reqwest::Method::TRACE,
                Method::Patch => reqwest::Method::PATCH,
            };

            let mut request = self.client.request(method, &parts.url);
            for (name, value) in parts.headers.iter().chain(extra_headers) {
                request = request.header(name, value);
            }
            if let Some(content_type) = &parts.content_type {
                request = request.header("Content-Type", content_type.as_str());
            }
            if let Some(body) = &parts.body {
                request = request.body(body.clone());
            }

            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout
                } else {
                    Error::Network(e.to_string())
                }
            })?;

            let status = response.status().as_u16();
            let headers: Vec<(String, String)> = response
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_owned(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect();
            let data = response
                .bytes()
                .await
                .map_err(|e| Error::Network(e.to_string()))?;
            let network_time = started.elapsed();

            match status {
                304 => Ok(WireResponse::new(status, data, headers, true, network_time)),
                200..=299 => Ok(WireResponse::new(status, data, headers, false, network_time)),
                401 | 403 => Err(Error::AuthFailure {
                    response: WireResponse::new(status, data, headers, false, network_time),
                }),
                300..=399 => Err(Error::Redirect {
                    location: header_value(&headers, "Location").map(str::to_owned),
                }),
                _ => Err(Error::Server {
                    response: WireResponse::new(status, data, headers, false, network_time),
                }),
            }
        }
    }
}

#[cfg(feature = "reqwest")]
pub use reqwest_impl::ReqwestTransport;
