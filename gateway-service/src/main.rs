//! # Gateway Binary
//!
//! Entry point: parse CLI args, load and validate the JSON config (spec.md
//! §6), build the router, and serve.
//!
//! ## Usage
//!
//! ```bash
//! gateway-service
//! gateway-service --config /etc/gateway/config.json
//! gateway-service --host 0.0.0.0 --port 8080 --log-level debug
//! ```
//!
//! ## Environment Variables
//!
//! - `GATEWAY_SERVER__HOST`, `GATEWAY_SERVER__PORT`, ...: override any
//!   `server.*` config field (`config` crate `Environment` layering).
//! - `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `OLLAMA_BASE_URL`, `TGI_BASE_URL`:
//!   provider credentials/endpoints (spec.md §6).
//! - `RUST_LOG`: tracing filter, takes priority over `--log-level` when set.

use clap::Parser;
use gateway_service::{config::Config, server::create_server};
use std::net::SocketAddr;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = None)]
    config: Option<String>,

    /// Port number for the HTTP server. Overrides the config file's
    /// `server.port`.
    #[arg(short, long)]
    port: Option<u16>,

    /// Host address to bind the server to. Overrides the config file's
    /// `server.host`.
    #[arg(long)]
    host: Option<String>,

    /// Logging level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        )
        .init();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| Config::default_path().to_string_lossy().into_owned());
    let mut config = Config::load(&config_path)?;

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let app = create_server(config).await?;

    tracing::info!(%addr, "starting gateway server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
