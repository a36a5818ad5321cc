use core_config::tracing::{init_tracing, install_color_eyre};
use eyre::WrapErr;
use messaging::{BootstrapPolicy, Consumer, ConsumerOptions, Producer, default_clock, init_metrics};
use tracing::{info, warn};

mod app;
mod backend;
mod config;
mod shutdown;

use app::App;
use config::Config;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Install color-eyre first for colored error output (before any fallible operations)
    install_color_eyre();

    // Load configuration from environment variables
    let config = Config::from_env().wrap_err("Failed to load configuration")?;

    // Initialize tracing with ErrorLayer for span trace capture
    init_tracing(&config.environment);

    if init_metrics().is_none() {
        warn!("Prometheus recorder unavailable, /metrics will be empty");
    }

    let backend = backend::build(&config).wrap_err("Failed to build broker clients")?;
    let policy = config.retry_policy();

    let producer = Producer::new(backend.producer, backend.provisioner, policy.clone());
    let consumer = Consumer::with_options(
        backend.consumer,
        policy,
        ConsumerOptions::default(),
        default_clock(),
    );

    let app = App::new(producer, consumer, config.kafka.default_partitions);

    // Broker work runs in the background; the listener does not wait for it
    let startup = app.start(BootstrapPolicy::default());

    let listener = tokio::net::TcpListener::bind(config.server.address())
        .await
        .wrap_err_with(|| format!("Failed to bind {}", config.server.address()))?;
    info!("Server starting on {}", listener.local_addr()?);

    axum::serve(listener, app.router().into_make_service())
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await
        .inspect_err(|e| tracing::error!("Server encountered an error: {:?}", e))?;

    startup.abort();
    info!(
        "Starting cleanup tasks (timeout: {:?})",
        config.server.shutdown_grace
    );
    if tokio::time::timeout(config.server.shutdown_grace, app.shutdown())
        .await
        .is_err()
    {
        warn!(
            "Cleanup exceeded timeout of {:?}, forcing shutdown",
            config.server.shutdown_grace
        );
    }

    info!("Shoppers API shutdown complete");
    Ok(())
}
