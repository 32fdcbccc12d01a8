mod client;
mod config;

use crate::client::{parse_input, ConsoleHandler, Input};
use crate::config::{ClientConfig, CONFIG_PATHS};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    init_logging();

    info!("zsocket client v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = load_config()?;

    let server_addr = config.server_addr();
    info!("Connecting to {}...", server_addr);

    let session = zsocket::connect(&server_addr, config.session_config(), Arc::new(ConsoleHandler)).await?;

    if let Some(reason) = session.close_reason() {
        error!("Failed to connect to {}: {}", server_addr, reason);
        return Err(anyhow::anyhow!("connection failed: {}", reason));
    }

    println!("\nConnected to {}.", server_addr);
    println!("Type text and press Enter. /pack <json>, /bytes <text>, quit\n");

    // Interactive input loop
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut line = String::new();

    loop {
        line.clear();

        let read = tokio::select! {
            _ = session.closed() => break,
            read = reader.read_line(&mut line) => read,
        };

        match read {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        }

        let input = match parse_input(&line) {
            Ok(Some(input)) => input,
            Ok(None) => continue,
            Err(e) => {
                println!("Error: {}", e);
                continue;
            }
        };

        let sent = match input {
            Input::Quit => {
                info!("Exiting...");
                break;
            }
            Input::Text(text) => session.send_text(&text).await,
            Input::Bytes(data) => session.send(data).await,
            Input::Pack(pack) => session.send_pack(&pack).await,
        };

        if let Err(e) = sent {
            warn!("Send failed: {}", e);
            println!("[ERROR] {}", e);
        }
    }

    session.close().await;
    Ok(())
}

fn load_config() -> anyhow::Result<ClientConfig> {
    if let Some((config, path)) = ClientConfig::find(&CONFIG_PATHS) {
        info!("Loaded config from {}", path);
        return Ok(config);
    }

    // Use default config as last resort
    warn!("No config file found, using default configuration");
    Ok(ClientConfig::default_config())
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
