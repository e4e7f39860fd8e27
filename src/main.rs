use barzakh_tools::{Config, McpServer, ToolRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // RUST_LOG wins; plain info otherwise
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(true);
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        builder.json().init();
    } else {
        builder.init();
    }

    info!("Starting Barzakh tool server...");

    // a bad variable must not silently drop every API key
    let config = Config::from_env()?;

    let registry = ToolRegistry::from_config(&config)?;
    info!("Tool groups: {}", registry.groups().join(", "));
    let server = Arc::new(McpServer::new(registry));

    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = TcpListener::bind(&addr).await?;
    info!("Tool server listening on {}", addr);

    loop {
        let (socket, peer_addr) = listener.accept().await?;
        let server = Arc::clone(&server);

        tokio::spawn(async move {
            if let Err(e) = server.serve_connection(socket).await {
                error!("Error handling connection from {}: {}", peer_addr, e);
            }
        });
    }
}
