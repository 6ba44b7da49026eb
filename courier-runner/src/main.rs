use anyhow::Result;
use courier_api::run as run_api;
use courier_core::Config;
use courier_core::CourierContext;
use courier_delivery::run as run_delivery;
use tokio;
use tracing;
use tracing_subscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting Courier notification relay");

    // Load configuration
    let config = Config::from_env();
    let ctx = CourierContext::new(config).await?;

    tracing::info!("Courier context initialized");

    // Delivery worker runs alongside the API server
    let ctx_clone = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = run_delivery(ctx_clone).await {
            tracing::error!("Delivery worker error: {}", e);
        }
    });

    // API server runs in main task
    tracing::info!("Starting API server");
    run_api(ctx).await?;

    Ok(())
}
