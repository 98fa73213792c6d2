//! # Marketplace
//!
//! ## Usage
//!
//! ```bash
//! # Set environment variables
//! export STRIPE_SECRET_KEY=sk_test_...
//! export STRIPE_PUBLISHABLE_KEY=pk_test_...
//! export STRIPE_WEBHOOK_SECRET=whsec_...
//! export CLERK_JWT_KEY="-----BEGIN PUBLIC KEY-----..."
//! export DATABASE_URL=postgres://localhost/marketplace
//!
//! # Run the server
//! marketplace
//! ```

use market_api::{routes, state::AppState};
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let production = std::env::var("ENVIRONMENT").is_ok_and(|e| e == "production");
    let registry = tracing_subscriber::registry().with(filter);
    if production {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    print_banner();

    // Initialize application state
    let state = AppState::from_env().await?;

    let addr = state.config.socket_addr()?;
    let is_prod = state.config.is_production();

    info!("Environment: {}", state.config.environment);
    info!("Payment processor: {}", state.processor.provider_name());
    info!("Search index: {}", state.search.name());

    let app = routes::create_router(state);

    info!("Marketplace starting on http://{}", addr);
    if !is_prod {
        info!("Checkout: POST http://{}/api/checkout/payment-intent", addr);
        info!("Webhook: POST http://{}/api/webhooks/stripe", addr);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Shut down cleanly");
    Ok(())
}

fn print_banner() {
    println!(
        r#"
  Marketplace
  ━━━━━━━━━━━━━━━━━━━━━━━
  Checkout and payments API
  Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
