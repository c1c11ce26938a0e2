use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("whistle=info,tower_http=debug")),
        )
        .init();

    let args = cli::Args::parse();
    let config = config::Config::load(&args.config)?;
    ensure_data_dirs(&config);
    config.export_gateway_limits();

    let engine: whistle_db::DatabaseEngine = config.database.engine.into();
    let db = whistle_db::create_pool_with_engine(
        &config.database.url,
        config.database.max_connections,
        Some(engine),
    )
    .await?;
    whistle_db::run_migrations_for_engine(&db, engine).await?;

    let state = whistle_core::AppState::new(db, config.app_config());
    let app = whistle_api::build_router(&state.config)
        .merge(whistle_ws::gateway_router())
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(
        bind_address = %config.server.bind_address,
        database = engine.as_str(),
        strict_sender_identity = state.config.strict_sender_identity,
        "whistle chat service listening"
    );

    let connections = state.connections.clone();
    let shutdown_signal = async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", err);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutting down (ctrl-c)...");
        connections.shutdown();
    };

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    state.db.close().await;
    Ok(())
}

/// Creates the SQLite database's parent directory.
fn ensure_data_dirs(config: &config::Config) {
    if let Some(db_path) = config
        .database
        .url
        .strip_prefix("sqlite://")
        .and_then(|s| s.split('?').next())
    {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    tracing::warn!("Could not create directory '{}': {}", parent.display(), e);
                }
            }
        }
    }
}
