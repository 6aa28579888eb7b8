//! Signaling server binary entry point.
//!
//! Starts the WebSocket signaling server with configurable host, port, and
//! path via command-line arguments, then runs until interrupted.

use roomcast::{AcceptorSource, ServerConfig, SignalingServer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize tracing with RUST_LOG env filter support.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI arguments (simple manual parsing, no clap dependency needed).
    let args: Vec<String> = std::env::args().collect();
    let host = get_arg(&args, "--host").unwrap_or_else(|| "0.0.0.0".to_string());
    let port = get_arg(&args, "--port")
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(3001);
    let path = get_arg(&args, "--path");

    let config = ServerConfig {
        acceptor: AcceptorSource::Bind { host, port },
        path,
        ..ServerConfig::default()
    };

    let server = SignalingServer::new(config);
    if let Err(e) = server.start().await {
        eprintln!("server error: {e}");
        std::process::exit(1);
    }

    tokio::signal::ctrl_c().await.ok();
    if let Err(e) = server.stop().await {
        eprintln!("shutdown error: {e}");
        std::process::exit(1);
    }
}

/// Extract the value following a `--key` argument.
fn get_arg(args: &[String], key: &str) -> Option<String> {
    args.iter()
        .position(|a| a == key)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
