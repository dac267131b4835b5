//! Span builder helpers for cors-proxy instrumentation.

/// Create a tracing span for one inbound proxied request.
///
/// Usage: `let span = proxy_request_span!(correlation_id, method);`
///
/// Fields recorded later as the pipeline advances:
/// - `target_host`: hostname of the resolved target (after the credential check)
/// - `status`: status code sent to the caller
/// - `ttfb_ms`: milliseconds from upstream request start to first body chunk
/// - `total_duration_ms`: milliseconds from upstream request start to stream end
/// - `bytes_relayed`: response body bytes streamed to the caller
#[macro_export]
macro_rules! proxy_request_span {
    ($correlation_id:expr, $method:expr) => {
        tracing::info_span!(
            "proxy_request",
            correlation_id = %$correlation_id,
            method = %$method,
            target_host = tracing::field::Empty,
            status = tracing::field::Empty,
            ttfb_ms = tracing::field::Empty,
            total_duration_ms = tracing::field::Empty,
            bytes_relayed = tracing::field::Empty,
        )
    };
}

/// Create a tracing span for the outbound relay to the target host.
#[macro_export]
macro_rules! relay_span {
    ($correlation_id:expr, $host:expr) => {
        tracing::info_span!(
            "relay",
            correlation_id = %$correlation_id,
            host = %$host,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_spans_accept_late_fields() {
        let span = proxy_request_span!("abc", "GET");
        span.record("target_host", "example.com");
        span.record("status", 200_u16);

        let relay = relay_span!("abc", "example.com");
        relay.record("latency_ms", 12_u64);
    }
}
