//! Mercato API - order placement and payment reconciliation service.
//!
//! # Architecture
//!
//! - Axum web framework
//! - `PostgreSQL` for catalog, ledgers, orders, and payments
//! - External payment gateway behind retry, circuit breaker, and timeout
//! - Background recovery and archival sweeps
//!
//! Migrations are NOT run on startup. Run them via:
//! ```bash
//! cargo run -p mercato-cli -- migrate
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use mercato_api::config::ApiConfig;
use mercato_api::gateway::{HttpGateway, ResilientGateway};
use mercato_api::payments::PaymentRecoveryScheduler;
use mercato_api::state::AppState;
use mercato_api::store::{PgStore, create_pool};
use sentry::integrations::tracing as sentry_tracing;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &ApiConfig) -> Option<sentry::ClientInitGuard> {
    use secrecy::ExposeSecret;

    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.expose_secret(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            traces_sample_rate: config.sentry_traces_sample_rate,
            attach_stacktrace: true,
            // Card data passes through this service
            send_default_pii: false,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR => sentry_tracing::EventFilter::Event,
        tracing::Level::WARN | tracing::Level::INFO => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mercato_api=info,tower_http=debug".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let json_layer = json.then(|| tracing_subscriber::fmt::layer().json().flatten_event(true));
    let text_layer = (!json).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main]
async fn main() {
    // Load configuration from environment (needed for Sentry init)
    let config = ApiConfig::from_env().expect("Failed to load configuration");

    // Sentry must be initialized before the tracing subscriber
    let _sentry_guard = init_sentry(&config);
    init_tracing();

    let pool = create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");
    tracing::info!("Database pool created");
    let store = PgStore::new(pool);

    let transport = HttpGateway::new(&config.gateway).expect("Failed to build gateway client");
    let gateway = ResilientGateway::new(transport, &config.gateway);
    tracing::info!(base_url = %config.gateway.base_url, "Payment gateway client ready");

    let shutdown = CancellationToken::new();
    let scheduler = config.scheduler.enabled.then(|| {
        PaymentRecoveryScheduler::new(store.clone(), gateway.clone(), config.scheduler)
            .spawn(shutdown.clone())
    });
    if scheduler.is_none() {
        tracing::info!("Payment scheduler disabled");
    }

    let state = AppState::new(
        store,
        gateway,
        config.gateway.callback_url.clone(),
        config.scheduler,
    );

    let app = mercato_api::router(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    let addr = config.socket_addr();
    tracing::info!("mercato-api listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal_token.cancel();
        })
        .await
        .expect("Server error");

    shutdown.cancel();
    if let Some(handles) = scheduler {
        handles.join().await;
    }
    tracing::info!("Shutdown complete");
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
