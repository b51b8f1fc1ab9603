use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sensorlink_sdk::AuthClient;
use sensorlink_sdk::transport::WsConnector;
use sensorlink_server::config::Config;
use sensorlink_server::db::{Db, SqliteStore};
use sensorlink_server::ingest::TelemetryIngester;
use sensorlink_server::supervisor::ConnectionSupervisor;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    // Use JSON logs in production (SENSORLINK_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("SENSORLINK_LOG_JSON").unwrap_or_default() == "1";
    let level = if config.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("sensorlink_server={level},sensorlink_sdk={level}").into());
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let db = Db::open(&config.db_path).with_context(|| format!("opening {}", config.db_path))?;
    let store = Arc::new(SqliteStore::new(db));
    tracing::info!("Database at {}", config.db_path);

    let supervisor = Arc::new(ConnectionSupervisor::new(
        Arc::new(AuthClient::new(config.auth_config())),
        store.clone(),
        Arc::new(WsConnector::default()),
        Arc::new(TelemetryIngester::new(store)),
        config.connection_policy(),
    ));

    if let Some(ref web_addr) = config.web_addr {
        let listener = tokio::net::TcpListener::bind(web_addr)
            .await
            .with_context(|| format!("binding {web_addr}"))?;
        tracing::info!("HTTP API on {web_addr}");
        let router = sensorlink_server::web::router(Arc::clone(&supervisor));
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!("HTTP server error: {e}");
            }
        });
    }

    // A failed start is logged by the supervisor; a reset retries it.
    let starter = Arc::clone(&supervisor);
    tokio::spawn(async move {
        let _ = starter.init_all().await;
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    supervisor.close_all(false);
    Ok(())
}
