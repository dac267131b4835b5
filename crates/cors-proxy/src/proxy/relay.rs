//! Outbound relay to the target host.
//!
//! Bodies are streamed in both directions: the inbound body of a POST/PUT is
//! handed to reqwest as a stream and the upstream response body is handed to
//! axum as a stream, so neither side is ever buffered in full and the two
//! connections share flow control.
//!
//! Only `User-Agent` and `Accept` are forwarded; every other inbound header
//! (cookies, credentials, origin) stays on this side of the proxy.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{ACCEPT, USER_AGENT};
use axum::http::{HeaderMap, HeaderValue, Method};
use axum::response::Response;
use bytes::Bytes;
use futures_core::Stream;
use tracing::Instrument;

use super::correlation::CORRELATION_HEADER;
use super::cors;
use super::guard::AccessGuard;
use super::target::TargetDescriptor;
use crate::config::RelayConfig;
use crate::error::ProxyError;

/// Credential-free URL the proxy requested.
pub const REQUEST_URL_HEADER: &str = "x-request-url";
/// URL that produced the relayed response, after redirects.
pub const FINAL_URL_HEADER: &str = "x-final-url";

const DEFAULT_ACCEPT: &str = "*/*";

/// Performs the outbound exchange for one request at a time. Cheap to share:
/// the inner client pools connections across requests.
#[derive(Debug, Clone)]
pub struct Relay {
    client: reqwest::Client,
    timeout: Duration,
    user_agent: HeaderValue,
}

impl Relay {
    /// Build the shared client. Redirect hops are re-checked against `guard`,
    /// so a public target cannot bounce the proxy onto a private address.
    pub fn new(config: &RelayConfig, guard: AccessGuard) -> anyhow::Result<Self> {
        let max_redirects = config.max_redirects;
        let policy = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() > max_redirects {
                tracing::debug!(url = %attempt.url(), "Redirect limit reached, relaying 3xx");
                return attempt.stop();
            }
            let verdict = match TargetDescriptor::from_url(attempt.url().clone()) {
                Some(hop) => guard.check_destination(&hop),
                None => Err(ProxyError::TargetInvalid {
                    candidate: super::target::redact_credentials(attempt.url().as_str()),
                    received: Vec::new(),
                }),
            };
            match verdict {
                Ok(()) => attempt.follow(),
                Err(e) => {
                    tracing::warn!(error = %e, "Refusing to follow redirect, relaying 3xx");
                    attempt.stop()
                }
            }
        });

        // Outbound requests go direct; an ambient HTTP(S)_PROXY would sit
        // outside the destination checks.
        let client = reqwest::Client::builder()
            .redirect(policy)
            .no_proxy()
            .build()?;
        let user_agent = HeaderValue::from_str(&config.user_agent)?;

        Ok(Self {
            client,
            timeout: Duration::from_millis(config.timeout_ms),
            user_agent,
        })
    }

    /// Send `request` to `target` and stream the response back.
    ///
    /// Errors are only produced before response headers exist. Once the
    /// response is returned, a late upstream failure (including the timeout
    /// firing mid-body) truncates the stream instead.
    pub async fn forward(
        &self,
        target: TargetDescriptor,
        request: Request,
        correlation_id: &str,
    ) -> Result<Response, ProxyError> {
        let root_span = tracing::Span::current();
        let span = cors_tracing::relay_span!(correlation_id, target.hostname());
        let start = Instant::now();

        async {
            let (parts, body) = request.into_parts();
            let outbound = self.build_request(&parts.method, &parts.headers, body, &target);

            let result = outbound.send().await;
            let latency = start.elapsed().as_millis() as u64;
            tracing::Span::current().record("latency_ms", latency);

            let upstream = match result {
                Ok(resp) => resp,
                Err(e) if e.is_timeout() => {
                    tracing::error!(error = %e, latency_ms = latency, "Upstream timeout");
                    return Err(ProxyError::UpstreamTimeout {
                        timeout_ms: self.timeout.as_millis() as u64,
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, latency_ms = latency, "Upstream connection error");
                    return Err(ProxyError::UpstreamTransport {
                        message: error_chain(&e),
                    });
                }
            };

            let status = upstream.status();
            tracing::Span::current().record("status", status.as_u16());
            tracing::info!(
                status = status.as_u16(),
                scheme = %target.scheme(),
                port = ?target.port(),
                latency_ms = latency,
                "Upstream responded"
            );

            Ok(build_response(upstream, &target, correlation_id, start, root_span))
        }
        .instrument(span)
        .await
    }

    fn build_request(
        &self,
        method: &Method,
        headers: &HeaderMap,
        body: Body,
        target: &TargetDescriptor,
    ) -> reqwest::RequestBuilder {
        let user_agent = headers
            .get(USER_AGENT)
            .cloned()
            .unwrap_or_else(|| self.user_agent.clone());
        let accept = headers
            .get(ACCEPT)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_ACCEPT));

        let builder = self
            .client
            .request(method.clone(), target.url().clone())
            .timeout(self.timeout)
            .header(USER_AGENT, user_agent)
            .header(ACCEPT, accept);

        if streams_request_body(method) {
            builder.body(reqwest::Body::wrap_stream(body.into_data_stream()))
        } else {
            builder
        }
    }
}

/// Only POST and PUT carry the caller's body upstream.
fn streams_request_body(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT
}

fn build_response(
    upstream: reqwest::Response,
    target: &TargetDescriptor,
    correlation_id: &str,
    start: Instant,
    root_span: tracing::Span,
) -> Response {
    let status = upstream.status();
    let mut headers = cors::rewrite_response_headers(upstream.headers());

    if let Ok(value) = HeaderValue::from_str(target.url().as_str()) {
        headers.insert(REQUEST_URL_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(upstream.url().as_str()) {
        headers.insert(FINAL_URL_HEADER, value);
    }
    headers.insert(
        CORRELATION_HEADER,
        HeaderValue::from_str(correlation_id)
            .unwrap_or_else(|_| HeaderValue::from_static("unknown")),
    );

    root_span.record("status", status.as_u16());
    let body = RelayBody::new(Box::pin(upstream.bytes_stream()), root_span, start);

    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Flatten an error and its sources into one message for the 502 body.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Passes upstream chunks through unchanged, in order, and records timing and
/// byte counts on the request span.
///
/// An upstream error is passed on rather than swallowed, which makes hyper
/// abort the connection: the caller sees a truncated body, never a clean end.
/// Dropping the body early (caller disconnected) drops the upstream stream
/// with it, closing the outbound connection.
struct RelayBody<E> {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send>>,
    span: tracing::Span,
    start: Instant,
    bytes_relayed: u64,
    first_chunk_seen: bool,
    finished: bool,
}

impl<E> RelayBody<E> {
    fn new(
        inner: Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send>>,
        span: tracing::Span,
        start: Instant,
    ) -> Self {
        Self {
            inner,
            span,
            start,
            bytes_relayed: 0,
            first_chunk_seen: false,
            finished: false,
        }
    }

    fn record_totals(&mut self) {
        self.finished = true;
        self.span
            .record("total_duration_ms", self.start.elapsed().as_millis() as u64);
        self.span.record("bytes_relayed", self.bytes_relayed);
    }
}

impl<E: std::fmt::Display> Stream for RelayBody<E> {
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !self.first_chunk_seen {
                    self.first_chunk_seen = true;
                    self.span
                        .record("ttfb_ms", self.start.elapsed().as_millis() as u64);
                }
                self.bytes_relayed += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                self.record_totals();
                tracing::warn!(
                    parent: &self.span,
                    error = %e,
                    bytes_relayed = self.bytes_relayed,
                    "Upstream body failed after headers were sent, truncating response"
                );
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.record_totals();
                tracing::debug!(
                    parent: &self.span,
                    bytes_relayed = self.bytes_relayed,
                    "Relay complete"
                );
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<E> Drop for RelayBody<E> {
    fn drop(&mut self) {
        // Also reached for bodies hyper never polls (HEAD, 204, 304).
        if !self.finished {
            tracing::debug!(
                parent: &self.span,
                bytes_relayed = self.bytes_relayed,
                "Body dropped before end of stream, closing upstream"
            );
        }
    }
}
