use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use otalink_core::OTA_CHUNK_SIZE;
use otalink_server::{OtaServer, ServerConfig};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "otalink-server", version, about)]
struct Cli {
    /// Address for device WebSockets and the admin API
    #[arg(long, env = "OTALINK_BIND", default_value = "0.0.0.0:3000")]
    bind: SocketAddr,

    /// Seconds a device may take to accept one frame
    #[arg(long, env = "OTALINK_SEND_TIMEOUT_SECS", default_value = "10")]
    send_timeout_secs: u64,

    /// Seconds between PING probes
    #[arg(long, env = "OTALINK_KEEPALIVE_SECS", default_value = "30")]
    keepalive_secs: u64,

    /// Largest accepted firmware image in bytes
    #[arg(long, env = "OTALINK_MAX_IMAGE_BYTES", default_value_t = 16 * 1024 * 1024)]
    max_image_bytes: usize,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind,
            send_timeout: Duration::from_secs(self.send_timeout_secs.max(1)),
            keepalive_interval: Duration::from_secs(self.keepalive_secs.max(1)),
            max_image_bytes: self.max_image_bytes,
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,otalink_server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("otalink server starting...");

    let config = cli.into_config();
    let addr = config.bind_addr;
    let server = OtaServer::new(config);
    let app = server.router().layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = otalink_server::serve(listener, app).await {
            tracing::error!("Server error: {}", e);
        }
    });

    tracing::info!("otalink server ready ({} byte chunks)", OTA_CHUNK_SIZE);
    tracing::info!("   Devices:  ws://{}/ws", addr);
    tracing::info!("   Upload:   curl --data-binary @firmware.bin http://{}/ota/<deviceId>", addr);
    tracing::info!("   List:     curl http://{}/api/devices", addr);

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = server_handle => {
            tracing::warn!("Server stopped");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
