//! Credential and destination checks.
//!
//! The credential check runs before the target is even parsed, so an
//! unauthenticated caller learns nothing about target handling. The
//! destination check runs on every resolved target and on every redirect hop.
//!
//! The private-address blocklist is a literal hostname match, not a CIDR test:
//! it misses `172.17.` through `172.31.`, `169.254.`, and any name that resolves to a
//! private address (DNS is never consulted). `strict_ip_ranges` widens the
//! check to full ranges for IP-literal hosts.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use axum::http::HeaderMap;

use super::query::QueryParams;
use super::target::TargetDescriptor;
use crate::config::{AccessConfig, AuthConfig};
use crate::error::ProxyError;

const BLOCKED_HOSTS: &[&str] = &["localhost", "127.0.0.1", "0.0.0.0", "[::1]"];
const BLOCKED_PREFIXES: &[&str] = &["192.168.", "10.", "172.16."];

const API_KEY_HEADER: &str = "x-api-key";
const BEARER_PREFIX: &str = "Bearer ";

/// Immutable access policy shared by every request task.
#[derive(Clone)]
pub struct AccessGuard {
    api_key: Arc<str>,
    whitelist: Arc<[String]>,
    strict_ip_ranges: bool,
}

impl AccessGuard {
    pub fn new(auth: &AuthConfig, access: &AccessConfig) -> Self {
        Self {
            api_key: Arc::from(auth.api_key.as_str()),
            whitelist: Arc::from(access.whitelist.clone()),
            strict_ip_ranges: access.strict_ip_ranges,
        }
    }

    /// Accept the request only if the presented token equals the configured key.
    pub fn check_credential(
        &self,
        query: &QueryParams,
        headers: &HeaderMap,
    ) -> Result<(), ProxyError> {
        match presented_token(query, headers) {
            Some(token) if token == &*self.api_key => Ok(()),
            _ => Err(ProxyError::Unauthorized),
        }
    }

    /// Whitelist first, then the private-address blocklist. Both must pass.
    pub fn check_destination(&self, target: &TargetDescriptor) -> Result<(), ProxyError> {
        let hostname = target.hostname().to_ascii_lowercase();

        if !self.is_whitelisted(&hostname) {
            return Err(ProxyError::NotWhitelisted { hostname });
        }
        let strict_hit = self.strict_ip_ranges && is_private_ip_literal(&hostname);
        if is_private_hostname(&hostname) || strict_hit {
            return Err(ProxyError::PrivateAddress { hostname });
        }
        Ok(())
    }

    /// Label-aligned suffix match: `example.com` admits `example.com` and
    /// `api.example.com` but not `badexample.com` or `example.com.evil.net`.
    fn is_whitelisted(&self, hostname: &str) -> bool {
        if self.whitelist.is_empty() {
            return true;
        }
        self.whitelist.iter().any(|domain| {
            hostname == domain
                || hostname
                    .strip_suffix(domain.as_str())
                    .is_some_and(|rest| rest.ends_with('.'))
        })
    }
}

/// The credential presented by the caller, in precedence order:
/// `?token=`, `?key=`, `X-API-Key`, then `Authorization: Bearer`.
/// Empty values fall through to the next source.
pub fn presented_token<'a>(query: &'a QueryParams, headers: &'a HeaderMap) -> Option<&'a str> {
    let header = move |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
    };

    query
        .get("token")
        .filter(|t| !t.is_empty())
        .or_else(|| query.get("key").filter(|k| !k.is_empty()))
        .or_else(|| header(API_KEY_HEADER))
        .or_else(|| {
            header(axum::http::header::AUTHORIZATION.as_str())
                .map(|v| v.strip_prefix(BEARER_PREFIX).unwrap_or(v))
                .filter(|t| !t.is_empty())
        })
}

/// Literal loopback / private hostname check (case-insensitive).
pub fn is_private_hostname(hostname: &str) -> bool {
    let host = hostname.to_ascii_lowercase();
    BLOCKED_HOSTS.contains(&host.as_str()) || BLOCKED_PREFIXES.iter().any(|p| host.starts_with(p))
}

/// Full-range check for IP-literal hosts. Names are not resolved.
fn is_private_ip_literal(hostname: &str) -> bool {
    let literal = hostname.trim_start_matches('[').trim_end_matches(']');
    match literal.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => is_private_v4(v4),
        Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
            Some(v4) => is_private_v4(v4),
            None => is_private_v6(v6),
        },
        Err(_) => false,
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 100.64.0.0/10 carrier-grade NAT
        || (ip.octets()[0] == 100 && (ip.octets()[1] & 0xC0) == 64)
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn guard(whitelist: &[&str], strict: bool) -> AccessGuard {
        AccessGuard::new(
            &AuthConfig {
                api_key: "secret".to_string(),
                allow_insecure_key: false,
            },
            &AccessConfig {
                whitelist: whitelist.iter().map(|d| d.to_string()).collect(),
                strict_ip_ranges: strict,
            },
        )
    }

    fn target(url: &str) -> TargetDescriptor {
        TargetDescriptor::parse(url).expect("valid target")
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(*value));
        }
        map
    }

    #[test]
    fn test_token_precedence() {
        let h = headers(&[("x-api-key", "from-header"), ("authorization", "Bearer from-bearer")]);

        let q = QueryParams::parse(Some("token=t&key=k"));
        assert_eq!(presented_token(&q, &h), Some("t"));

        let q = QueryParams::parse(Some("key=k"));
        assert_eq!(presented_token(&q, &h), Some("k"));

        let q = QueryParams::parse(None);
        assert_eq!(presented_token(&q, &h), Some("from-header"));

        let h = headers(&[("authorization", "Bearer from-bearer")]);
        assert_eq!(presented_token(&q, &h), Some("from-bearer"));

        assert_eq!(presented_token(&q, &HeaderMap::new()), None);
    }

    #[test]
    fn test_empty_token_falls_through() {
        let q = QueryParams::parse(Some("token=&key=k"));
        assert_eq!(presented_token(&q, &HeaderMap::new()), Some("k"));
    }

    #[test]
    fn test_authorization_without_bearer_used_verbatim() {
        let q = QueryParams::parse(None);
        let h = headers(&[("authorization", "secret")]);
        assert_eq!(presented_token(&q, &h), Some("secret"));
    }

    #[test]
    fn test_credential_check() {
        let g = guard(&[], false);
        let ok = QueryParams::parse(Some("token=secret"));
        let wrong = QueryParams::parse(Some("token=wrong"));
        let none = QueryParams::parse(None);

        assert!(g.check_credential(&ok, &HeaderMap::new()).is_ok());
        assert!(matches!(
            g.check_credential(&wrong, &HeaderMap::new()),
            Err(ProxyError::Unauthorized)
        ));
        assert!(matches!(
            g.check_credential(&none, &HeaderMap::new()),
            Err(ProxyError::Unauthorized)
        ));
        assert!(g
            .check_credential(&none, &headers(&[("authorization", "Bearer secret")]))
            .is_ok());
        // Query token outranks a correct header
        assert!(g
            .check_credential(&wrong, &headers(&[("x-api-key", "secret")]))
            .is_err());
    }

    #[test]
    fn test_private_hostnames_blocked() {
        let g = guard(&[], false);
        for url in [
            "http://localhost/",
            "http://LOCALHOST:3000/",
            "http://127.0.0.1/",
            "http://0.0.0.0/",
            "http://[::1]:8080/",
            "http://192.168.1.10/",
            "http://10.0.0.5/",
            "http://172.16.3.4/",
            // WHATWG parsing normalizes numeric encodings before the check
            "http://0x7f.0.0.1/",
            "http://2130706433/",
        ] {
            match g.check_destination(&target(url)) {
                Err(ProxyError::PrivateAddress { .. }) => {}
                other => panic!("{url} should be a private address, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_literal_blocklist_coverage_gap() {
        let g = guard(&[], false);
        for url in ["http://172.17.0.1/", "http://169.254.169.254/", "http://127.0.0.2/"] {
            assert!(g.check_destination(&target(url)).is_ok(), "{url}");
        }
    }

    #[test]
    fn test_strict_ranges_close_gap() {
        let g = guard(&[], true);
        for url in [
            "http://172.17.0.1/",
            "http://169.254.169.254/",
            "http://127.0.0.2/",
            "http://100.64.1.1/",
            "http://[fd00::1]/",
            "http://[fe80::1]/",
            "http://[::ffff:192.168.0.1]/",
        ] {
            assert!(
                matches!(g.check_destination(&target(url)), Err(ProxyError::PrivateAddress { .. })),
                "{url}"
            );
        }
        assert!(g.check_destination(&target("http://8.8.8.8/")).is_ok());
        assert!(g.check_destination(&target("https://example.com/")).is_ok());
    }

    #[test]
    fn test_whitelist_suffix_matching() {
        let g = guard(&["example.com"], false);
        assert!(g.check_destination(&target("https://example.com/")).is_ok());
        assert!(g.check_destination(&target("https://api.example.com/")).is_ok());
        assert!(g.check_destination(&target("https://API.Example.COM/")).is_ok());

        for url in ["https://example.com.evil.net/", "https://badexample.com/", "https://other.org/"] {
            match g.check_destination(&target(url)) {
                Err(ProxyError::NotWhitelisted { .. }) => {}
                other => panic!("{url} should not be whitelisted, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_private_blocked_even_when_whitelisted() {
        let g = guard(&["localhost", "10.0.0.1"], false);
        assert!(matches!(
            g.check_destination(&target("http://localhost/")),
            Err(ProxyError::PrivateAddress { .. })
        ));
        assert!(matches!(
            g.check_destination(&target("http://10.0.0.1/")),
            Err(ProxyError::PrivateAddress { .. })
        ));
    }

    #[test]
    fn test_empty_whitelist_allows_public() {
        let g = guard(&[], false);
        assert!(g.check_destination(&target("https://anything.test/x")).is_ok());
    }
}
