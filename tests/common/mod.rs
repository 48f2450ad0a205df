//! Shared helpers for the integration tests.

use std::net::SocketAddr;

use ceptic::config::{ClientConfig, ServerConfig};
use ceptic::{CepticClient, CepticServer};

/// Server settings with small frames so bodies span several frames.
#[allow(dead_code)]
pub fn server_config() -> ServerConfig {
    ServerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        frame_min_size: 1_000,
        frame_max_size: 4_000,
        headers_min_size: 1_000,
        headers_max_size: 4_000,
        body_max: 1_000_000,
        stream_min_timeout: 1,
        stream_timeout: 5,
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn client_config() -> ClientConfig {
    ClientConfig {
        frame_min_size: 1_000,
        frame_max_size: 4_000,
        headers_min_size: 1_000,
        headers_max_size: 4_000,
        body_max: 1_000_000,
        stream_min_timeout: 1,
        stream_timeout: 5,
        ..Default::default()
    }
}

/// Start a server on an ephemeral port after `configure` registers its routes.
#[allow(dead_code)]
pub async fn start_server<F>(config: ServerConfig, configure: F) -> (CepticServer, SocketAddr)
where
    F: FnOnce(&CepticServer),
{
    let server = CepticServer::new(config).unwrap();
    configure(&server);
    let addr = server.start().await.unwrap();
    (server, addr)
}

#[allow(dead_code)]
pub fn client() -> CepticClient {
    CepticClient::new(client_config()).unwrap()
}

/// `127.0.0.1:<port>/<endpoint>`
#[allow(dead_code)]
pub fn url(addr: SocketAddr, endpoint: &str) -> String {
    format!("127.0.0.1:{}/{}", addr.port(), endpoint.trim_start_matches('/'))
}
