mod chat;
mod config;
mod context;
mod error;
mod middleware;
mod pipeline;
mod ratelimit;

use std::{
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    Router,
    body::Body,
    extract::{
        ConnectInfo,
        State,
    },
    http::Request,
    routing::any,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::{
    chat::{api::routes, store::ChatStore},
    config::{AppConfig, LogConfig},
    pipeline::Pipeline,
    ratelimit::{
        RateLimitPolicy,
        clock::SystemClock,
        registry::{BucketRegistry, spawn_eviction_sweeper},
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = AppConfig::from_env().context("failed to load configuration")?;
    init_tracing(&cfg.log);

    let policy = Arc::new(
        RateLimitPolicy::from_config(&cfg.rate_limit).context("invalid rate limit configuration")?,
    );
    let registry = Arc::new(BucketRegistry::new(policy.clone(), Arc::new(SystemClock)));
    spawn_eviction_sweeper(
        registry.clone(),
        Duration::from_secs(cfg.rate_limit.sweep_interval_seconds),
    );

    tracing::info!(
        enabled = policy.enabled,
        capacity = policy.capacity,
        refill_tokens = policy.refill_tokens,
        refill_period_secs = policy.refill_period.as_secs(),
        key_strategy = ?policy.key_strategy,
        idle_eviction = ?policy.idle_eviction,
        "rate limiter configured"
    );

    let downstream = routes(Arc::new(ChatStore::new()));
    let pipeline = Arc::new(Pipeline::from_config(&cfg, policy, registry, downstream));

    let app = Router::new().fallback(any(pipeline_handler)).with_state(pipeline);

    let listener = TcpListener::bind(cfg.bind_addr)
        .await
        .context("failed to bind listener")?;

    tracing::info!(addr = %cfg.bind_addr, "chat storage listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("server error")?;

    Ok(())
}

async fn pipeline_handler(
    State(pipeline): State<Arc<Pipeline>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> axum::response::Response {
    pipeline.handle_http(request, Some(addr.ip())).await
}

fn init_tracing(cfg: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=warn,tower=warn", cfg.level)));

    if cfg.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }
}
