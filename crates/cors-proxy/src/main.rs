//! cors-proxy: authenticated CORS forwarding proxy.
//!
//! Relays `GET /<absolute-url>?token=KEY` (and the `?url=` / bare-URL forms)
//! to the target, adding CORS headers so browsers can read the response.
//! Private and non-whitelisted destinations are refused.

mod config;
mod error;
mod proxy;
mod server;

use config::ProxyConfig;
use server::AppState;

fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1).cloned())
        .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
        .or_else(|| std::env::var("CORS_PROXY_CONFIG").ok())
        .unwrap_or_else(|| "cors-proxy.toml".to_string());

    let allow_insecure_key = args.iter().any(|a| a == "--allow-insecure-key");

    let mut config = ProxyConfig::load(&config_path)?;
    if allow_insecure_key {
        config.auth.allow_insecure_key = true;
    }

    // The tonic gRPC exporter needs a reactor context, so the runtime comes first
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let tracing_guard = cors_tracing::init_tracing(&config.tracing);

        // After tracing so the placeholder-key warning is visible
        config.validate()?;

        tracing::info!(
            config_path = %config_path,
            listen_address = %config.listen_address(),
            whitelist = ?config.access.whitelist,
            strict_ip_ranges = config.access.strict_ip_ranges,
            timeout_ms = config.relay.timeout_ms,
            otlp_export = tracing_guard.exporting(),
            "Starting cors-proxy"
        );

        run(config).await
    })
}

async fn run(config: ProxyConfig) -> anyhow::Result<()> {
    let state = AppState::from_config(&config)?;
    let listen_addr = config.listen_address();
    log_usage(&config);

    server::run(&listen_addr, state).await
}

/// Print request forms with the port filled in. The key itself is never logged.
fn log_usage(config: &ProxyConfig) {
    let port = config.server.port;
    tracing::info!("Usage:");
    tracing::info!("  http://localhost:{port}/https://example.com/image.jpg?token=YOUR_KEY");
    tracing::info!("  http://localhost:{port}/?token=YOUR_KEY&url=https://example.com/image.jpg");
    tracing::info!("  http://localhost:{port}/?token=YOUR_KEY&https://example.com/image.jpg");
    tracing::info!(
        "  curl -H \"X-API-Key: YOUR_KEY\" http://localhost:{port}/https://example.com/image.jpg"
    );
}
