pub mod config;
pub mod error;
pub mod metrics;
pub mod rate_limit;

use crate::config::{GuardConfig, LimiterConfig, MethodQuotaView};
use crate::error::Result;
use crate::metrics::{metrics_handler, MetricsService};
use crate::rate_limit::{admission_middleware, AdmissionDispatcher, CounterStore};
use axum::{middleware, routing::any, routing::get, Router as AxumRouter};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Build the admission dispatcher from its configuration parts.
///
/// Any error means the limiting policy is unusable and the host process must
/// not start serving.
pub fn init_overload(
    config: LimiterConfig,
    quotas: Option<&MethodQuotaView>,
    store: Option<Arc<dyn CounterStore>>,
) -> Result<AdmissionDispatcher> {
    info!("Initializing overload guard: {:?}", config);
    AdmissionDispatcher::build(config, quotas, store)
}

/// Wrap an application router with admission control
pub fn with_admission(app: AxumRouter, dispatcher: AdmissionDispatcher) -> AxumRouter {
    app.layer(middleware::from_fn_with_state(
        dispatcher,
        admission_middleware,
    ))
}

/// Initialize the demo server
pub async fn init_server(config: GuardConfig) -> Result<()> {
    let dispatcher = AdmissionDispatcher::from_config(&config).await?;
    info!(
        "Loaded quotas for {} methods",
        dispatcher.registry().len()
    );

    let app = with_admission(AxumRouter::new().route("/*path", any(echo_handler)), dispatcher);

    let app = match MetricsService::new() {
        Ok(metrics) => app.merge(
            AxumRouter::new()
                .route("/metrics", get(metrics_handler))
                .with_state(metrics),
        ),
        Err(e) => {
            warn!("Metrics disabled: {}", e);
            app
        }
    };
    let app = app.layer(TraceLayer::new_for_http());

    // Bind and serve
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

async fn echo_handler(uri: axum::http::Uri) -> String {
    format!("OK {}", uri.path())
}

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "overload_guard=debug,tower_http=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();
}
