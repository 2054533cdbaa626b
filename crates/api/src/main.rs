//! Notex server binary

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use notex_api::{
    config::LogFormat, connect_store, routes::create_router, websocket::room_sweeper_task,
    AppState, Config,
};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("notex_api=info,tower_http=info"));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    init_tracing(LogFormat::from_env().unwrap_or(LogFormat::Pretty));

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        bind_address = %config.bind_address,
        store = ?config.room_store,
        "Starting Notex server"
    );

    let store = connect_store(&config)
        .await
        .context("Failed to connect to room store")?;

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| format!("Failed to create upload directory {}", config.upload_dir))?;

    let state = AppState::new(config, store);
    let shutdown = CancellationToken::new();

    let sweeper = state.config.room_sweep_interval().map(|interval| {
        tokio::spawn(room_sweeper_task(
            state.hub.clone(),
            state.store.clone(),
            interval,
            state.config.room_check_timeout(),
            shutdown.clone(),
        ))
    });

    let listener = tokio::net::TcpListener::bind(&state.config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", state.config.bind_address))?;
    tracing::info!(address = %state.config.bind_address, "Notex server listening");

    let hub = state.hub.clone();
    let app = create_router(state);

    let on_shutdown = {
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
            let closed = hub.close_all();
            tracing::info!(connections = closed, "Closed all rooms");
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(on_shutdown)
        .await
        .context("Server error")?;

    if let Some(sweeper) = sweeper {
        let _ = sweeper.await;
    }

    tracing::info!("Notex server stopped");
    Ok(())
}
