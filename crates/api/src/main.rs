use batchforge_api::app::{build_app, services::AppServices};
use batchforge_api::{config::ApiConfig, demo};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    batchforge_observability::init();

    let config = ApiConfig::from_env()?;
    let registry = demo::demo_registry()?;
    let services = AppServices::from_config(&config, registry).await?;
    let app = build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
