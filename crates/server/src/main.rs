//! Tabletop server entrypoint.

use std::net::SocketAddr;

use clap::Parser;
use tabletop_server::{DEFAULT_BIND, ServerConfig, run};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(name = "tabletop-server", about = "Session synchronization server")]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "TABLETOP_BIND", default_value = DEFAULT_BIND)]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    run(ServerConfig { bind: cli.bind }).await
}
