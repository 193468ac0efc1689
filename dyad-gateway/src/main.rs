//! Binary entry point for the dyad gateway server.
//!
//! ```bash
//! dyad-gateway --config config.toml --host 0.0.0.0 --port 8080 --log-level debug
//! ```
//!
//! Command-line flags override nothing the config file itself sets except host/port/log level,
//! which is also true of `GATEWAY_HOST`/`GATEWAY_PORT`/`GATEWAY_LOG_LEVEL` environment variables
//! applied inside `Config::load`; flags here take effect before the config file is even read, so
//! an explicit `--port` always wins over both.

use clap::Parser;
use std::net::SocketAddr;

use dyad_gateway::config::Config;
use dyad_gateway::server::create_server;

#[derive(Parser)]
#[command(author, version, about = "OpenAI-compatible dispatch gateway", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Overrides the configured port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Overrides the configured host.
    #[arg(long)]
    host: Option<String>,

    /// Logging level: trace, debug, info, warn, error.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt().with_env_filter(&args.log_level).init();

    let mut config = Config::load(&args.config)?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    config.validate()?;

    let host = config.server.host.clone();
    let port = config.server.port;
    let app = create_server(config).await?;

    let addr = SocketAddr::new(host.parse()?, port);
    tracing::info!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
