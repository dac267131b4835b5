//! Ordered query-string multi-map.

use url::form_urlencoded;

/// Query parameters that carry the credential. Never relayed upstream and
/// never echoed back in error bodies.
pub const CREDENTIAL_PARAMS: &[&str] = &["token", "key"];

/// Decoded query parameters in their original order. Keys may repeat, and a
/// key given without `=value` appears with an empty value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn parse(query: Option<&str>) -> Self {
        let pairs = query
            .map(|q| {
                form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();
        Self { pairs }
    }

    /// First value for `name`, if the key is present at all.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parameter names as received, minus the credential parameters.
    pub fn received_names(&self) -> Vec<String> {
        self.pairs
            .iter()
            .map(|(k, _)| k)
            .filter(|k| !CREDENTIAL_PARAMS.contains(&k.as_str()))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preserves_order_and_repeats() {
        let q = QueryParams::parse(Some("a=1&b=2&a=3&flag"));
        let pairs: Vec<_> = q.iter().collect();
        assert_eq!(pairs, vec![("a", "1"), ("b", "2"), ("a", "3"), ("flag", "")]);
        assert_eq!(q.get("a"), Some("1"));
        assert_eq!(q.get("flag"), Some(""));
        assert_eq!(q.get("missing"), None);
    }

    #[test]
    fn test_decodes_percent_encoding() {
        let q = QueryParams::parse(Some("url=https%3A%2F%2Fexample.com%2Fa%3Fb%3D1"));
        assert_eq!(q.get("url"), Some("https://example.com/a?b=1"));
    }

    #[test]
    fn test_received_names_hide_credentials() {
        let q = QueryParams::parse(Some("token=s&key=k&foo=1&bar"));
        assert_eq!(q.received_names(), vec!["foo", "bar"]);
    }

    #[test]
    fn test_absent_query_is_empty() {
        assert_eq!(QueryParams::parse(None), QueryParams::default());
        assert_eq!(QueryParams::parse(Some("")).iter().count(), 0);
    }
}
