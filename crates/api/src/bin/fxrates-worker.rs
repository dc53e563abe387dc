use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;

use fxrates_infra::config::Config;

/// Background worker. Runs the poller and serves `/internal/rates/fetch`
/// for delegate drivers in other processes.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("load configuration")?;
    fxrates_observability::init_with_level(&config.log_level);
    config.validate().context("invalid configuration")?;

    let token = CancellationToken::new();
    let runtime = fxrates_api::wiring::build_worker(&config, &token).await?;
    let app = fxrates_api::app::build_rate_server(runtime.service.clone());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("bind 0.0.0.0:{}", config.port))?;

    info!(
        addr = %listener.local_addr()?,
        worker_type = ?config.worker_type,
        workers = runtime.workers.len(),
        "worker started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(fxrates_api::shutdown_signal(token.clone()))
        .await
        .context("rate server")?;

    runtime.shutdown(config.shutdown_timeout).await;
    info!("worker stopped");
    Ok(())
}
