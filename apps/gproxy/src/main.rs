use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod admin_ui;
mod cli;

use cli::Cli;
use gproxy_config::ConfigStore;
use gproxy_core::{catalog_handler, proxy_handler, ProxyEngine};
use gproxy_provider::{ModelResolver, ProviderPool};
use gproxy_storage::RequestLogRing;
use gproxy_upstream::{ClientPoolConfig, HttpClientPool};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(event = "startup_failed", error = %err);
        eprintln!("gproxy: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = ConfigStore::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    let providers = Arc::new(ProviderPool::from_config(&config.snapshot()));
    let upstream = Arc::new(HttpClientPool::new(ClientPoolConfig::default()));
    let resolver = Arc::new(ModelResolver::new(upstream.clone()));
    let logs = Arc::new(RequestLogRing::new());

    let engine = ProxyEngine::new(
        config.clone(),
        providers.clone(),
        resolver,
        upstream,
        logs.clone(),
    );

    let providers_for_reload = providers.clone();
    config
        .clone()
        .spawn_poll_loop(move |snapshot| providers_for_reload.replace_from_config(&snapshot));

    // Each sub-router resolves its own state internally (`with_state`) so
    // the two can be nested together as plain, state-erased `Router`s.
    let proxy_app = Router::new()
        .route("/v1/models", get(catalog_handler))
        .route("/favicon.ico", get(|| async { axum::http::StatusCode::NO_CONTENT }))
        .route("/", get(admin_ui::ui_fallback))
        .route("/assets/{*path}", get(admin_ui::ui_fallback))
        .fallback(proxy_handler)
        .with_state(engine);

    let app = proxy_app.nest("/admin", gproxy_admin::router(config.clone(), providers, logs));

    let bind = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(event = "listening", addr = %bind);
    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
