//! Ceptic server binary.
//!
//! Serves two demo routes:
//! - `get /` answers OK
//! - `get /echo` enters an exchange and echoes every message until the
//!   client sends a response, then ends with EXCHANGE_END

use std::path::PathBuf;

use clap::Parser;

use ceptic::config::{load_config, CepticConfig};
use ceptic::lifecycle::shutdown_signal;
use ceptic::observability::{logging, metrics};
use ceptic::stream::StreamData;
use ceptic::{command, handler, CepticServer, Request, Response, StatusCode};

#[derive(Parser)]
#[command(name = "ceptic-server")]
#[command(about = "Ceptic protocol server", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

async fn echo(request: Request) -> Response {
    let Some(stream) = request.begin_exchange().await else {
        return Response::new(StatusCode::UNEXPECTED_END);
    };
    let timeout = stream.settings().timeout();
    let max_length = stream.settings().frame_max_size;
    loop {
        match stream.receive(timeout, max_length).await {
            Ok(StreamData::Data(data)) => {
                if let Err(e) = stream.send(data).await {
                    tracing::debug!(error = %e, "Echo send failed");
                    return Response::new(StatusCode::UNEXPECTED_END);
                }
            }
            Ok(StreamData::Response(_)) => return Response::new(StatusCode::EXCHANGE_END),
            Err(e) => {
                tracing::debug!(error = %e, "Echo receive failed");
                return Response::new(StatusCode::UNEXPECTED_END);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => CepticConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!("ceptic-server v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    tracing::info!(
        bind_address = %config.server.bind_address,
        max_connections = config.server.max_connections,
        secure = config.server.security.secure,
        "Configuration loaded"
    );

    let server = CepticServer::new(config.server)?;
    server.add_command(command::GET, None);
    server.add_route(command::GET, "/", handler(|_| async { Response::new(StatusCode::OK) }))?;
    server.add_route(command::GET, "/echo", handler(echo))?;

    let addr = server.start().await?;
    tracing::info!(address = %addr, "Listening for connections");

    shutdown_signal().await;
    server.stop();

    tracing::info!("Shutdown complete");
    Ok(())
}
