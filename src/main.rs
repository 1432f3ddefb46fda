//! Serves the query engine over HTTP.
//!
//! Usage: `schemaql [config.toml]`. Without an argument an optional `schemaql.toml`
//! in the working directory is read. Either way `SCHEMAQL_*` environment variables
//! override what the file says.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use schemaql::engine::Engine;
use schemaql::server::router;
use schemaql::settings::Settings;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let settings = match Settings::load(config_path.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "could not read configuration");
            std::process::exit(1);
        }
    };
    info!(schema = %settings.schema_path.display(), data_dir = %settings.data_dir.display(), "starting");

    // schema and data problems at startup are fatal
    let engine = match tokio::task::spawn_blocking({
        let settings = settings.clone();
        move || Engine::open(&settings)
    })
    .await
    {
        Ok(Ok(engine)) => Arc::new(engine),
        Ok(Err(e)) => {
            error!(error = %e, "could not load schema and data");
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "startup task failed");
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(&settings.server.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(bind = %settings.server.bind, error = %e, "could not bind");
            std::process::exit(1);
        }
    };
    info!(bind = %settings.server.bind, "listening");
    if let Err(e) = axum::serve(listener, router(engine)).await {
        error!(error = %e, "server stopped");
        std::process::exit(1);
    }
}
