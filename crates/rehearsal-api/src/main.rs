//! Rehearsal API Server
//!
//! Loads configuration, connects the credential store, serves the router and
//! closes the store after graceful shutdown.

use rehearsal_api::auth::{AuthService, SystemClock};
use rehearsal_api::{create_router, state::AppState};
use rehearsal_core::{AppConfig, CredentialRepository, LoggingConfig, PgCredentialStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging);

    let store = Arc::new(PgCredentialStore::connect(&config.database).await?);
    let auth = AuthService::new(store.clone(), &config.auth, Arc::new(SystemClock));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let environment = config.server.environment;
    let app = create_router(AppState::new(config, auth));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(?environment, "Rehearsal API starting on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/api-docs/", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    store.close().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// `RUST_LOG` wins; otherwise `LOG_LEVEL` applies to this workspace and tower_http.
fn init_tracing(logging: &LoggingConfig) {
    let level = &logging.level;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("rehearsal_api={level},rehearsal_core={level},tower_http={level},audit=info").into()
    });

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json_format {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
