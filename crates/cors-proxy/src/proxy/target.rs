//! Target URL extraction.
//!
//! The destination is looked up in three places, first match wins:
//!
//! 1. the request path (`/https://host/a?b=1`), with the original query re-appended
//! 2. the `url` query parameter (`/?url=https://host/a`)
//! 3. a scan of all other query parameters for a key or value that is itself an
//!    absolute URL (`/?token=k&https://host/a`). Clients that append a raw URL
//!    without `=` produce a key-only parameter, so keys are checked before values.
//!
//! A candidate that is found but cannot be used is reported as
//! [`ProxyError::TargetInvalid`], distinct from [`ProxyError::TargetAbsent`].

use url::Url;

use super::query::{QueryParams, CREDENTIAL_PARAMS};
use crate::error::ProxyError;

/// A validated absolute `http`/`https` URL with a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    url: Url,
}

impl TargetDescriptor {
    /// Accept `candidate` only if it starts with `http://` or `https://` and
    /// parses as an absolute URL with a host.
    pub fn parse(candidate: &str) -> Option<Self> {
        if !has_http_scheme(candidate) {
            return None;
        }
        Url::parse(candidate).ok().and_then(Self::from_url)
    }

    /// Wrap an already-parsed URL (e.g. a redirect location).
    pub fn from_url(url: Url) -> Option<Self> {
        let scheme_ok = matches!(url.scheme(), "http" | "https");
        let host_ok = url.host_str().is_some_and(|h| !h.is_empty());
        (scheme_ok && host_ok).then_some(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Hostname as serialized by the URL parser: lowercase, IPv6 in brackets.
    pub fn hostname(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> Option<u16> {
        self.url.port()
    }

    /// Drop `token`/`key` query parameters so the credential never reaches
    /// the destination. Other parameters keep their order.
    pub fn without_credentials(mut self) -> Self {
        let is_credential = |k: &str| CREDENTIAL_PARAMS.contains(&k);
        if !self.url.query_pairs().any(|(k, _)| is_credential(&k)) {
            return self;
        }

        let kept: Vec<(String, String)> = self
            .url
            .query_pairs()
            .filter(|(k, _)| !is_credential(k))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if kept.is_empty() {
            self.url.set_query(None);
        } else {
            self.url.query_pairs_mut().clear().extend_pairs(kept);
        }
        self
    }
}

impl std::fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.url, f)
    }
}

/// Resolve the target of an inbound request.
///
/// `raw_query` is the undecoded query string, re-appended verbatim for the
/// path form; `query` is the decoded view of the same string.
pub fn resolve(
    path: &str,
    raw_query: Option<&str>,
    query: &QueryParams,
) -> Result<TargetDescriptor, ProxyError> {
    let Some(candidate) = find_candidate(path, raw_query, query) else {
        return Err(ProxyError::TargetAbsent {
            received: query.received_names(),
        });
    };

    TargetDescriptor::parse(&candidate).ok_or_else(|| ProxyError::TargetInvalid {
        candidate: redact_credentials(&candidate),
        received: query.received_names(),
    })
}

/// Remove `token`/`key` pairs from the query part of an unusable candidate,
/// which is echoed in the 400 body and the rejection log.
pub fn redact_credentials(candidate: &str) -> String {
    let Some((head, query)) = candidate.split_once('?') else {
        return candidate.to_string();
    };

    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| {
            url::form_urlencoded::parse(pair.as_bytes())
                .next()
                .is_none_or(|(name, _)| !CREDENTIAL_PARAMS.contains(&name.as_ref()))
        })
        .collect();

    if kept.is_empty() {
        head.to_string()
    } else {
        format!("{head}?{}", kept.join("&"))
    }
}

fn find_candidate(path: &str, raw_query: Option<&str>, query: &QueryParams) -> Option<String> {
    if path.len() > 1 {
        let mut candidate = path[1..].to_string();
        if let Some(q) = raw_query.filter(|q| !q.is_empty()) {
            candidate.push('?');
            candidate.push_str(q);
        }
        return Some(candidate);
    }

    if let Some(url) = query.get("url") {
        return Some(url.to_string());
    }

    query
        .iter()
        .filter(|(k, _)| !CREDENTIAL_PARAMS.contains(k))
        .find_map(|(k, v)| {
            if has_http_scheme(k) {
                Some(k.to_string())
            } else if has_http_scheme(v) {
                Some(v.to_string())
            } else {
                None
            }
        })
}

fn has_http_scheme(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}
