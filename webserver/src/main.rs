//! WebServer entry point
//!
//! Builds the batch service the same way the orchestrator CLI does and serves
//! it over HTTP until Ctrl+C.

use std::net::SocketAddr;
use std::path::PathBuf;
use clap::Parser;
use tokio::signal;

use orchestrator::{ProviderMode, ServiceOptions, build_service};
use shared::{ProcessId, logging, process_info};
use webserver::{WebServer, WebServerResult};

#[derive(Parser, Debug)]
#[command(name = "webserver")]
#[command(about = "HTTP and WebSocket surface for batch image enhancement")]
struct Args {
    /// Port for HTTP server
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Bind address
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Generation provider
    #[arg(long, value_enum, default_value = "random")]
    provider: ProviderMode,

    /// Generation endpoint for the http provider
    #[arg(long, env = "GENERATION_ENDPOINT")]
    endpoint: Option<String>,

    /// Synthetic credentials in random mode
    #[arg(long, default_value = "3")]
    simulated_credentials: usize,

    /// JSON-lines reuse cache file (in-memory when not set)
    #[arg(long)]
    cache_file: Option<PathBuf>,

    /// Directory for finished manifests; they stay served after eviction
    #[arg(long)]
    manifest_dir: Option<PathBuf>,

    /// Finished batches kept in memory
    #[arg(long, default_value = "100")]
    retention: usize,
}

#[tokio::main]
async fn main() -> WebServerResult<()> {
    let args = Args::parse();

    ProcessId::init_webserver();
    logging::init_tracing_with_level(Some(&args.log_level));
    logging::log_startup(ProcessId::current(), "batch enhancement web surface");

    let address: SocketAddr = format!("{}:{}", args.host, args.port).parse().map_err(|e| {
        webserver::WebServerError::InvalidRequest {
            details: format!("Invalid bind address: {e}"),
        }
    })?;

    let service = build_service(&ServiceOptions {
        provider: args.provider,
        endpoint: args.endpoint,
        simulated_credentials: args.simulated_credentials,
        cache_file: args.cache_file,
        manifest_dir: args.manifest_dir,
        retention: args.retention,
    })
    .await?;

    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => logging::log_shutdown(ProcessId::current(), "Received Ctrl+C signal"),
            Err(err) => logging::log_error(ProcessId::current(), "Signal handling", &err),
        }
    };

    process_info!(ProcessId::current(), "📡 Progress streams at ws://{}/api/batches/<id>/ws", address);
    WebServer::new(service).run(address, shutdown).await?;

    logging::log_success(ProcessId::current(), "WebServer stopped gracefully");
    Ok(())
}
