mod commands;
mod config;
mod handler;

use crate::commands::CommandContext;
use crate::config::{ServerConfig, CONFIG_PATHS};
use crate::handler::EchoHandler;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use zsocket::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let (config, source) = load_config();

    // Initialize logging
    init_logging(&config);

    info!("zsocket server v{} starting...", env!("CARGO_PKG_VERSION"));

    match source {
        Some(path) => info!("Loaded config from {}", path),
        None => {
            warn!("No config file found, using default configuration");
            warn!("IMPORTANT: Change the password in production!");
        }
    }

    let session_config = config.session_config();
    if session_config.password().is_none() {
        warn!("No password configured, clients are not authenticated");
    }

    let command_context = Arc::new(CommandContext::new(env!("CARGO_PKG_VERSION")));
    let handler = Arc::new(EchoHandler::new(command_context.clone()));

    let server = Server::bind(config.listen_addr(), session_config, handler)
        .await?
        .with_max_connections(config.limits.max_conns);
    command_context.attach(server.registry());

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C");
                shutdown.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.run().await?;
    Ok(())
}

/// Returns the configuration and the file it came from, if any.
fn load_config() -> (ServerConfig, Option<&'static str>) {
    match ServerConfig::find(&CONFIG_PATHS) {
        Some((config, path)) => (config, Some(path)),
        None => (ServerConfig::default_config(), None),
    }
}

fn init_logging(config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.log_level));

    if config.logging.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }
}
