//! CORS policy: preflight answers and forwarded-response header rewriting.

use axum::body::Body;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;

pub const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";
pub const ALLOWED_HEADERS: &str = "Content-Type, X-API-Key, Authorization";
pub const PREFLIGHT_MAX_AGE_SECS: &str = "86400";

/// Upstream response headers never relayed to the caller. Cookies stay
/// between the proxy and the destination; the rest are hop-by-hop.
const STRIPPED_RESPONSE_HEADERS: &[&str] = &[
    "set-cookie",
    "set-cookie2",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
    "trailers",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
];

/// Answer an `OPTIONS` request without touching credentials or the target.
pub fn preflight_response() -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    headers.insert(
        ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static(PREFLIGHT_MAX_AGE_SECS),
    );
    response
}

/// Build the header set sent to the caller from the destination's headers.
///
/// Every upstream header is copied in order (repeated names included) except
/// cookies and hop-by-hop headers; the CORS allow/expose wildcards are then
/// set, replacing any upstream values.
pub fn rewrite_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len() + 2);
    for (name, value) in upstream.iter() {
        if STRIPPED_RESPONSE_HEADERS.contains(&name.as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, HeaderValue::from_static("*"));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::{CONTENT_TYPE, SET_COOKIE};

    #[test]
    fn test_preflight_headers() {
        let response = preflight_response();
        assert_eq!(response.status(), StatusCode::OK);

        let h = response.headers();
        assert_eq!(h[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(h[ACCESS_CONTROL_ALLOW_METHODS], "GET, POST, OPTIONS");
        assert_eq!(h[ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type, X-API-Key, Authorization");
        assert_eq!(h[ACCESS_CONTROL_MAX_AGE], "86400");
    }

    #[test]
    fn test_rewrite_drops_cookies_and_hop_by_hop() {
        let mut upstream = HeaderMap::new();
        upstream.insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));
        upstream.append(SET_COOKIE, HeaderValue::from_static("a=1"));
        upstream.append(SET_COOKIE, HeaderValue::from_static("b=2"));
        upstream.insert("connection", HeaderValue::from_static("keep-alive"));
        upstream.insert("transfer-encoding", HeaderValue::from_static("chunked"));

        let rewritten = rewrite_response_headers(&upstream);
        assert_eq!(rewritten[CONTENT_TYPE], "image/png");
        assert!(rewritten.get(SET_COOKIE).is_none());
        assert!(rewritten.get("connection").is_none());
        assert!(rewritten.get("transfer-encoding").is_none());
        assert_eq!(rewritten[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(rewritten[ACCESS_CONTROL_EXPOSE_HEADERS], "*");
    }

    #[test]
    fn test_rewrite_overrides_upstream_cors_and_keeps_repeats() {
        let mut upstream = HeaderMap::new();
        upstream.insert(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("https://only-me.test"),
        );
        upstream.append("x-multi", HeaderValue::from_static("1"));
        upstream.append("x-multi", HeaderValue::from_static("2"));

        let rewritten = rewrite_response_headers(&upstream);
        assert_eq!(rewritten[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let multi: Vec<_> = rewritten.get_all("x-multi").iter().collect();
        assert_eq!(multi, vec!["1", "2"]);
    }
}
