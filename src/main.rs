mod checkout;
mod guides;
mod keepalive;
mod notify;
mod server;
mod settings;
mod store;
mod stripe;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // Load configuration from environment
    let cfg = settings::Config::from_env();

    if cfg.stripe.secret_key.is_empty() {
        tracing::error!("STRIPE_SECRET_KEY not set; exiting");
        return Ok(());
    }
    if cfg.stripe.webhook_secret.is_empty() {
        tracing::warn!("webhook secret not configured - webhook deliveries will be rejected");
    }
    tracing::info!(
        environment = %cfg.environment,
        "starting guidepay payment backend"
    );

    let store = store::Store::open(&cfg.database_path)?;
    let stripe = stripe::StripeProvider::new(cfg.stripe.clone())?;

    // Shared outbound client for pings and email dispatch
    let http = reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(Duration::from_millis(cfg.stripe.timeout_ms))
        .build()?;
    let mailer = notify::Mailer::new(
        http.clone(),
        cfg.email.api_key.clone(),
        cfg.email.from.clone(),
    );
    if !mailer.is_configured() {
        tracing::warn!("email provider not configured - tip notifications disabled");
    }

    let keepalive = keepalive::KeepAlive::spawn(
        http.clone(),
        vec![cfg.self_url.clone(), cfg.companion_url.clone()],
        cfg.keep_alive_interval,
    );
    if keepalive.is_some() {
        tracing::info!(
            interval = %humantime::format_duration(cfg.keep_alive_interval),
            "keep-alive pinger running"
        );
    }

    let addr: SocketAddr = format!("0.0.0.0:{}", cfg.server_port).parse()?;
    let state = server::AppState {
        stripe,
        store,
        mailer,
        http,
        cfg: Arc::new(cfg),
    };
    let app = server::router(state);

    tracing::info!(addr = %addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    if let Some(task) = keepalive {
        task.shutdown();
    }

    Ok(())
}
