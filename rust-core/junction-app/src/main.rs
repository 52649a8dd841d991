//! Junction example application.

mod kernel;
mod routes;

use anyhow::Context as _;
use junction_core::{init_tracing, AppConfig, Dispatcher, Router, Server, ServerConfig};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("loading configuration")?;
    init_tracing(config.log_format, &config.log_level);

    let router = Arc::new(Router::new());
    routes::register_routes(&router, &config.name, config.app_key.as_deref())
        .context("registering routes")?;
    router.commit();

    let dispatcher = Dispatcher::new(Arc::clone(&router)).expose_errors(config.debug);
    kernel::register_middleware(&dispatcher, &config);

    info!(
        app = %config.name,
        environment = %config.environment,
        routes = router.len(),
        "Starting application"
    );
    if config.debug {
        for line in router.route_table().lines() {
            info!("{line}");
        }
    }

    let server = Server::new(ServerConfig::from_app_config(&config)?, dispatcher);
    server.serve().await?;
    Ok(())
}
