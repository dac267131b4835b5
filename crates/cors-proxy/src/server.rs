//! Axum HTTP server: router, per-request pipeline, graceful shutdown.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::proxy::correlation;
use crate::proxy::cors;
use crate::proxy::guard::AccessGuard;
use crate::proxy::query::QueryParams;
use crate::proxy::relay::Relay;
use crate::proxy::target;

/// Shared application state. Read-only after startup.
#[derive(Clone)]
pub struct AppState {
    pub guard: AccessGuard,
    pub relay: Relay,
}

impl AppState {
    pub fn from_config(config: &ProxyConfig) -> anyhow::Result<Self> {
        let guard = AccessGuard::new(&config.auth, &config.access);
        let relay = Relay::new(&config.relay, guard.clone())?;
        Ok(Self { guard, relay })
    }
}

/// Every method and path lands in the proxy handler.
pub fn router(state: AppState) -> Router {
    Router::new()
        .fallback(handle_proxy)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Bind and serve until a shutdown signal arrives.
pub async fn run(listen_addr: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {listen_addr}: {e}"))?;
    tracing::info!(address = %listen_addr, "cors-proxy listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("cors-proxy shut down gracefully");
    Ok(())
}

/// Entry point for every inbound request.
///
/// `OPTIONS` is answered before anything else. Everything else goes through
/// credential check, target resolution, destination check and relay; the
/// first failing stage decides the response.
async fn handle_proxy(State(state): State<Arc<AppState>>, request: Request) -> Response {
    if request.method() == Method::OPTIONS {
        return cors::preflight_response();
    }

    let correlation_id = correlation::generate_id();
    let span = cors_tracing::proxy_request_span!(&correlation_id, request.method());

    async {
        let response = match proxy_request(&state, request, &correlation_id).await {
            Ok(response) => response,
            Err(e) => {
                log_rejection(&e);
                e.into_response()
            }
        };
        tracing::Span::current().record("status", response.status().as_u16());
        response
    }
    .instrument(span)
    .await
}

async fn proxy_request(
    state: &AppState,
    request: Request,
    correlation_id: &str,
) -> Result<Response, ProxyError> {
    let uri = request.uri().clone();
    let query = QueryParams::parse(uri.query());

    state.guard.check_credential(&query, request.headers())?;

    let target = target::resolve(uri.path(), uri.query(), &query)?;
    tracing::Span::current().record("target_host", target.hostname());
    state.guard.check_destination(&target)?;

    let target = target.without_credentials();
    tracing::debug!(target = %target, "Relaying request");
    state.relay.forward(target, request, correlation_id).await
}

fn log_rejection(err: &ProxyError) {
    match err {
        ProxyError::Unauthorized => tracing::info!("Rejected: missing or invalid credential"),
        ProxyError::TargetAbsent { .. } | ProxyError::TargetInvalid { .. } => {
            tracing::info!(error = %err, "Rejected: bad target")
        }
        ProxyError::NotWhitelisted { .. } | ProxyError::PrivateAddress { .. } => {
            tracing::warn!(error = %err, "Rejected: forbidden destination")
        }
        // Logged by the relay with the transport error attached.
        ProxyError::UpstreamTransport { .. } | ProxyError::UpstreamTimeout { .. } => {}
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received, draining connections...");
}
