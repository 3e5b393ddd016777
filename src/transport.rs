//! The HTTP transport: one pooled connection per service client.
//!
//! [`Transport`] is the capability seam the endpoint drives; the shipped
//! implementation is [`HttpTransport`], a thin wrapper over a pooled
//! `reqwest::Client`. One exchange per call: the transport takes a method,
//! absolute URL, headers, and body, and yields a [`RawResponse`] whose
//! body is a raw byte stream. Redirects are never followed — services use
//! 3xx for legitimate region redirection, which callers handle explicitly.

use crate::config::ClientConfig;
use crate::endpoint::Body;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use http::header::ACCEPT_ENCODING;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use std::time::Duration;
use url::Url;

/// The raw result of one HTTP exchange.
///
/// Ownership of the body stream transfers with the response: whoever holds
/// the `RawResponse` is responsible for draining or dropping it.
pub struct RawResponse {
    /// The HTTP status code.
    pub status: StatusCode,
    /// The response headers.
    pub headers: HeaderMap,
    /// The raw body stream.
    pub body: BoxStream<'static, Result<Bytes>>,
}

impl RawResponse {
    /// Builds a response from an in-memory body.
    ///
    /// Useful for scripted transports in tests and for replaying buffered
    /// responses.
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        let chunks = if body.is_empty() {
            Vec::new()
        } else {
            vec![Ok(body)]
        };
        Self {
            status,
            headers,
            body: stream::iter(chunks).boxed(),
        }
    }
}

impl std::fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Performs one HTTP request/response exchange cooperatively.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one request and returns the raw response.
    async fn request(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Body,
    ) -> Result<RawResponse>;
}

/// The pooled reqwest-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Builds a transport from the client configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid proxy URLs, unparsable
    /// root certificates, or a connector reqwest refuses to build.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .pool_max_idle_per_host(if config.connector.force_close {
                0
            } else {
                config.max_pool_connections
            });

        if let Some(keepalive) = config.connector.keepalive_timeout {
            builder = builder.pool_idle_timeout(Duration::from_secs_f64(keepalive));
        }

        for (scheme, proxy_url) in &config.proxies {
            let proxy = match scheme.as_str() {
                "http" => reqwest::Proxy::http(proxy_url.as_str()),
                "https" => reqwest::Proxy::https(proxy_url.as_str()),
                other => {
                    return Err(Error::Configuration(format!(
                        "unknown proxy scheme \"{other}\""
                    )))
                }
            }
            .map_err(|e| {
                Error::Configuration(format!("invalid proxy URL \"{proxy_url}\": {e}"))
            })?;
            builder = builder.proxy(proxy);
        }

        if config.connector.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(pem) = &config.connector.extra_root_ca_pem {
            let cert = reqwest::Certificate::from_pem(pem.as_bytes())
                .map_err(|e| Error::Configuration(format!("invalid root certificate: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: Method,
        url: Url,
        mut headers: HeaderMap,
        body: Body,
    ) -> Result<RawResponse> {
        // Identity encoding keeps content-length and downstream integrity
        // checks aligned with the bytes on the wire.
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

        tracing::debug!(method = %method, url = %url, "Sending HTTP request");

        let mut builder = self.client.request(method, url.clone()).headers(headers);
        builder = match body {
            Body::Empty => builder,
            Body::Bytes(bytes) => builder.body(reqwest::Body::from(bytes)),
            Body::Stream(stream) => builder.body(reqwest::Body::wrap_stream(stream)),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| classify_send_error(&url, e))?;

        let status = response.status();
        let response_headers = response.headers().clone();
        let stream_url = url.to_string();
        let body = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| classify_read_error(&stream_url, e)))
            .boxed();

        Ok(RawResponse {
            status,
            headers: response_headers,
            body,
        })
    }
}

/// Maps a reqwest send error onto the network-error taxonomy.
fn classify_send_error(url: &Url, err: reqwest::Error) -> Error {
    let url_text = url.to_string();
    if err.is_timeout() {
        if err.is_connect() {
            return Error::ConnectTimeout { url: url_text };
        }
        return Error::ReadTimeout { url: url_text };
    }
    if err.is_connect() {
        if chain_mentions(&err, &["proxy"]) {
            return Error::ProxyConnection {
                url: url_text,
                source: err,
            };
        }
        // Resolver failures and refused connections both mean the endpoint
        // URL is unreachable as configured.
        return Error::EndpointConnection {
            url: url_text,
            source: err,
        };
    }
    if chain_mentions(
        &err,
        &[
            "connection closed",
            "connection reset",
            "incomplete message",
            "broken pipe",
        ],
    ) {
        return Error::ConnectionClosed { url: url_text };
    }
    Error::Network(err)
}

/// Maps an error raised mid-body onto the network-error taxonomy.
fn classify_read_error(url: &str, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::ReadTimeout {
            url: url.to_string(),
        }
    } else {
        Error::ConnectionClosed {
            url: url.to_string(),
        }
    }
}

/// Returns `true` if any error in the source chain mentions one of the
/// needles (case-insensitive).
fn chain_mentions(err: &dyn std::error::Error, needles: &[&str]) -> bool {
    let mut current: Option<&dyn std::error::Error> = Some(err);
    while let Some(e) = current {
        let text = e.to_string().to_ascii_lowercase();
        if needles.iter().any(|needle| text.contains(needle)) {
            return true;
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn chain_mentions_walks_sources() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "dns lookup failed");
        let outer = std::io::Error::new(std::io::ErrorKind::Other, inner);
        assert!(chain_mentions(&outer, &["dns"]));
        assert!(!chain_mentions(&outer, &["proxy"]));
    }

    #[tokio::test]
    async fn from_bytes_yields_the_body_once() {
        let mut response = RawResponse::from_bytes(
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::from_static(b"hello"),
        );
        let first = response.body.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"hello");
        assert!(response.body.next().await.is_none());
    }

    #[tokio::test]
    async fn from_bytes_with_empty_body_ends_immediately() {
        let mut response =
            RawResponse::from_bytes(StatusCode::NO_CONTENT, HeaderMap::new(), Bytes::new());
        assert!(response.body.next().await.is_none());
    }
}
