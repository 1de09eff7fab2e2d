//! drainspout: HTTP log drain collector with live traffic metrics.
//!
//! Startup order matters: configuration, logging, database tables, geo
//! table, pipeline, listener. Any failure before the listener binds is
//! fatal — a collector that cannot persist or serve should not pretend to
//! be up.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use drainspout_core::config::Config;
use drainspout_core::geo::{GeoResolver, NullGeo, StaticGeo};
use drainspout_core::logging::{init_logging, LogConfig};
use drainspout_core::pipeline::Pipeline;
use drainspout_core::writer;
use tracing::info;

mod http;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    init_logging(&LogConfig {
        level: config.log_level.clone(),
        format: config.log_format,
        file: None,
    })
    .context("failed to initialize logging")?;

    writer::init_tables(&config.database_path)
        .with_context(|| format!("failed to initialize database at {}", config.database_path))?;

    let geo: Arc<dyn GeoResolver> = match &config.geo_table_path {
        Some(path) => Arc::new(
            StaticGeo::from_json_file(path)
                .with_context(|| format!("failed to load geo table from {path}"))?,
        ),
        None => Arc::new(NullGeo),
    };

    let pipeline = Pipeline::spawn(&config, geo);
    let app = http::router(http::AppState {
        ingress: pipeline.ingress(),
        hub: pipeline.hub(),
    });

    let addr: SocketAddr = config
        .bind_addr()
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_addr()))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("could not bind {addr}"))?;
    info!(%addr, version = drainspout_core::VERSION, "drainspout listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    // The router (and its ingress handle) is gone; draining the queues
    // flushes the writer's pending batch before we return.
    info!("listener stopped, draining pipeline");
    pipeline.shutdown().await;
    info!("drained, bye");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(%err, "failed to listen for ctrl-c");
    }
}
