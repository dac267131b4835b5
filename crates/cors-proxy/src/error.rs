//! Request-scoped proxy failures and their JSON responses.
//!
//! Every variant maps to exactly one status code and error body. None of them
//! is fatal to the process.

use axum::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

const UNAUTHORIZED_MESSAGE: &str =
    "Valid API key required. Provide via ?token=YOUR_KEY or X-API-Key header";

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("missing or invalid credential")]
    Unauthorized,

    #[error("no target URL in request")]
    TargetAbsent { received: Vec<String> },

    #[error("invalid target URL {candidate:?}")]
    TargetInvalid {
        candidate: String,
        received: Vec<String>,
    },

    #[error("domain not whitelisted: {hostname}")]
    NotWhitelisted { hostname: String },

    #[error("private address blocked: {hostname}")]
    PrivateAddress { hostname: String },

    #[error("upstream transport failure: {message}")]
    UpstreamTransport { message: String },

    #[error("upstream timed out after {timeout_ms} ms")]
    UpstreamTimeout { timeout_ms: u64 },
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Unauthorized => StatusCode::UNAUTHORIZED,
            ProxyError::TargetAbsent { .. } | ProxyError::TargetInvalid { .. } => {
                StatusCode::BAD_REQUEST
            }
            ProxyError::NotWhitelisted { .. } | ProxyError::PrivateAddress { .. } => {
                StatusCode::FORBIDDEN
            }
            ProxyError::UpstreamTransport { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Short code placed in the `error` field.
    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::Unauthorized => "Unauthorized",
            ProxyError::TargetAbsent { .. } | ProxyError::TargetInvalid { .. } => "Bad Request",
            ProxyError::NotWhitelisted { .. } | ProxyError::PrivateAddress { .. } => "Forbidden",
            ProxyError::UpstreamTransport { .. } => "Bad Gateway",
            ProxyError::UpstreamTimeout { .. } => "Gateway Timeout",
        }
    }

    pub fn body(&self) -> serde_json::Value {
        let code = self.code();
        match self {
            ProxyError::Unauthorized => json!({
                "error": code,
                "message": UNAUTHORIZED_MESSAGE,
            }),
            ProxyError::TargetAbsent { received } => json!({
                "error": code,
                "message": "Missing target URL. Use /<url>, ?url=<url>, or append the URL to the query string",
                "received_params": received,
            }),
            ProxyError::TargetInvalid {
                candidate,
                received,
            } => json!({
                "error": code,
                "message": "Invalid target URL: must be an absolute http:// or https:// URL",
                "target": candidate,
                "received_params": received,
            }),
            ProxyError::NotWhitelisted { hostname } => json!({
                "error": code,
                "message": format!("Domain not whitelisted: {hostname}"),
                "hostname": hostname,
            }),
            ProxyError::PrivateAddress { hostname } => json!({
                "error": code,
                "message": format!("Access to private address not allowed: {hostname}"),
                "hostname": hostname,
            }),
            ProxyError::UpstreamTransport { message } => json!({
                "error": code,
                "message": message,
            }),
            ProxyError::UpstreamTimeout { timeout_ms } => json!({
                "error": code,
                "message": format!("Upstream did not respond within {timeout_ms} ms"),
            }),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), axum::Json(self.body())).into_response();
        let headers = response.headers_mut();
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ProxyError::Unauthorized, 401),
            (ProxyError::TargetAbsent { received: vec![] }, 400),
            (
                ProxyError::TargetInvalid {
                    candidate: "ftp://x".into(),
                    received: vec![],
                },
                400,
            ),
            (
                ProxyError::NotWhitelisted {
                    hostname: "a.test".into(),
                },
                403,
            ),
            (
                ProxyError::PrivateAddress {
                    hostname: "localhost".into(),
                },
                403,
            ),
            (
                ProxyError::UpstreamTransport {
                    message: "refused".into(),
                },
                502,
            ),
            (ProxyError::UpstreamTimeout { timeout_ms: 10 }, 504),
        ];
        for (err, status) in cases {
            assert_eq!(err.status().as_u16(), status, "{err}");
            assert_eq!(err.body()["error"], err.code());
            assert!(err.body()["message"].is_string());
        }
    }

    #[test]
    fn test_unauthorized_body_matches_contract() {
        let body = ProxyError::Unauthorized.body();
        assert_eq!(body["error"], "Unauthorized");
        assert_eq!(body["message"], UNAUTHORIZED_MESSAGE);
        assert_eq!(body.as_object().map(|o| o.len()), Some(2));
    }

    #[test]
    fn test_error_response_carries_cors_header() {
        let response = ProxyError::PrivateAddress {
            hostname: "10.0.0.1".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    }
}
