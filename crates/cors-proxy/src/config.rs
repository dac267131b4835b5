//! Configuration types and loading logic.

use cors_tracing::TracingConfig;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Deserializer};

/// Shipped placeholder credential; `validate` refuses it unless explicitly allowed.
pub const PLACEHOLDER_API_KEY: &str = "your-secret-key-here";

/// Top-level proxy configuration. Built once at startup and shared read-only.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
}

/// Server listen configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Shared-secret credential configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_api_key")]
    pub api_key: String,

    /// Start even if `api_key` is still the placeholder.
    /// Also set via CLI `--allow-insecure-key`.
    #[serde(default)]
    pub allow_insecure_key: bool,
}

/// Destination filtering configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessConfig {
    /// Allowed destination domain suffixes. Empty allows every domain.
    /// Accepts a TOML list or a comma-separated string (`"a.com,b.org"`).
    #[serde(default, deserialize_with = "deserialize_domains")]
    pub whitelist: Vec<String>,

    /// Also reject IP-literal hosts anywhere in the loopback, private,
    /// link-local, CGNAT or unique-local ranges.
    #[serde(default)]
    pub strict_ip_ranges: bool,
}

/// Outbound relay configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Sent upstream when the caller supplies no `User-Agent`.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_api_key() -> String {
    PLACEHOLDER_API_KEY.to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_user_agent() -> String {
    concat!("cors-proxy/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_redirects() -> usize {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
            allow_insecure_key: false,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            user_agent: default_user_agent(),
            max_redirects: default_max_redirects(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DomainList {
    Csv(String),
    List(Vec<String>),
}

fn deserialize_domains<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = match DomainList::deserialize(deserializer)? {
        DomainList::Csv(csv) => parse_domain_list(&csv),
        DomainList::List(list) => list.iter().filter_map(|d| normalize_domain(d)).collect(),
    };
    Ok(entries)
}

/// Split a comma-separated domain list, normalizing each entry.
pub fn parse_domain_list(csv: &str) -> Vec<String> {
    csv.split(',').filter_map(normalize_domain).collect()
}

fn normalize_domain(raw: &str) -> Option<String> {
    let domain = raw.trim().trim_start_matches('.').to_ascii_lowercase();
    (!domain.is_empty()).then_some(domain)
}

impl ProxyConfig {
    /// Load configuration from a TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. Bare `HOST`, `PORT`, `API_KEY`, `ALLOWED_DOMAINS` variables
    /// 2. Environment variables (CORS_PROXY_ prefix, __ for nesting)
    /// 3. TOML config file (a missing file is skipped)
    /// 4. Defaults
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        let mut config: ProxyConfig = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("CORS_PROXY_").split("__"))
            .extract()?;

        if let Ok(host) = std::env::var("HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("PORT") {
            config.server.port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid PORT {port:?}: {e}"))?;
        }
        if let Ok(key) = std::env::var("API_KEY") {
            config.auth.api_key = key;
        }
        if let Ok(domains) = std::env::var("ALLOWED_DOMAINS") {
            config.access.whitelist = parse_domain_list(&domains);
        }

        Ok(config)
    }

    /// Reject configurations the proxy must not start with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.auth.api_key.is_empty() {
            anyhow::bail!("auth.api_key is empty; set API_KEY to a secret value");
        }
        if self.auth.api_key == PLACEHOLDER_API_KEY {
            if !self.auth.allow_insecure_key {
                anyhow::bail!(
                    "auth.api_key is still the placeholder {PLACEHOLDER_API_KEY:?}; \
                     set API_KEY or pass --allow-insecure-key"
                );
            }
            tracing::warn!(
                "RUNNING WITH THE PLACEHOLDER API KEY: anyone can use this proxy. \
                 Set API_KEY before exposing it."
            );
        }
        if self.relay.timeout_ms == 0 {
            anyhow::bail!("relay.timeout_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
