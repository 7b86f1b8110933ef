use std::sync::Arc;

use anyhow::Context;

use keyward_api::{app, config::AppConfig};
use keyward_core::SystemClock;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    keyward_observability::init();

    let config = AppConfig::from_env()?;
    let bundle = app::services::build_services(&config, Arc::new(SystemClock)).await?;

    if let Some(boot) = &bundle.bootstrap {
        // Printed once; never written to the log stream.
        let note = if boot.reused { " (earlier tokens revoked)" } else { "" };
        println!(
            "bootstrap admin {} token{}: {}",
            boot.principal.id,
            note,
            boot.token.raw.expose()
        );
    }

    let router = app::build_app(bundle.services.clone());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let refresher = bundle.refresher;
    refresher.shutdown().await;
    tracing::info!("last-used refresher drained");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
