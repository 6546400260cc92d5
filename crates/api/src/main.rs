use std::sync::Arc;

use anyhow::Context;

use userdir_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    userdir_observability::init();

    let config = AppConfig::from_env()?;
    let services = Arc::new(userdir_api::app::services::build_services(&config).await?);
    let app = userdir_api::app::build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let in-flight uploads/removals finish before exiting.
    services.jobs.drain().await;
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
