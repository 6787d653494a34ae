use anyhow::Context;

use stockwise_infra::AppConfig;
use stockwise_observability::LogConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_config = LogConfig::from_env().context("invalid LOG_FORMAT")?;
    stockwise_observability::init(&log_config);

    let config = AppConfig::from_env().context("invalid configuration")?;
    let bind_addr = config.bind_addr;

    let app = stockwise_api::app::build_app(config).await?;

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
