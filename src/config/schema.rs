//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for ceptic
//! servers and clients. All types derive Serde traits for deserialization
//! from config files.

use serde::{Deserialize, Serialize};

use crate::stream::settings::StreamSettings;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CepticConfig {
    /// Server listener and negotiation bounds.
    pub server: ServerConfig,

    /// Client negotiation bounds and limits.
    pub client: ClientConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:9000").
    pub bind_address: String,

    /// Protocol version this server speaks.
    pub version: String,

    pub headers_min_size: usize,
    pub headers_max_size: usize,
    pub frame_min_size: usize,
    pub frame_max_size: usize,

    /// Largest request body accepted unless a route overrides it.
    pub body_max: usize,

    /// Idle timeout bounds in seconds.
    pub stream_min_timeout: u64,
    pub stream_timeout: u64,

    /// Per-stream byte budgets.
    pub send_buffer_size: usize,
    pub read_buffer_size: usize,

    /// Concurrent streams per connection (0 = unlimited).
    pub handler_max_count: usize,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Seconds allowed for TLS setup plus settings negotiation.
    pub handshake_timeout_secs: u64,

    /// Optional TLS configuration.
    pub security: SecurityConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9000".to_string(),
            version: "1.0.0".to_string(),
            headers_min_size: 1_024_000,
            headers_max_size: 1_024_000,
            frame_min_size: 1_024_000,
            frame_max_size: 1_024_000,
            body_max: 102_400_000,
            stream_min_timeout: 1,
            stream_timeout: 5,
            send_buffer_size: 102_400_000,
            read_buffer_size: 102_400_000,
            handler_max_count: 0,
            max_connections: 10_000,
            handshake_timeout_secs: 5,
            security: SecurityConfig::default(),
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Protocol version sent in the handshake.
    pub version: String,

    pub headers_min_size: usize,
    pub headers_max_size: usize,
    pub frame_min_size: usize,
    pub frame_max_size: usize,

    /// Largest response body accepted.
    pub body_max: usize,

    /// Idle timeout bounds in seconds.
    pub stream_min_timeout: u64,
    pub stream_timeout: u64,

    /// Per-stream byte budgets.
    pub send_buffer_size: usize,
    pub read_buffer_size: usize,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Seconds allowed for TLS setup plus settings negotiation.
    pub handshake_timeout_secs: u64,

    /// Optional TLS configuration.
    pub security: SecurityConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            headers_min_size: 1_024_000,
            headers_max_size: 1_024_000,
            frame_min_size: 1_024_000,
            frame_max_size: 1_024_000,
            body_max: 102_400_000,
            stream_min_timeout: 1,
            stream_timeout: 5,
            send_buffer_size: 102_400_000,
            read_buffer_size: 102_400_000,
            connect_timeout_secs: 5,
            handshake_timeout_secs: 5,
            security: SecurityConfig::default(),
        }
    }
}

/// TLS material and verification policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Wrap connections in TLS.
    pub secure: bool,

    /// Local certificate (PEM). May also contain the private key.
    pub local_cert: Option<String>,

    /// Local private key (PEM), when not bundled with the certificate.
    pub local_key: Option<String>,

    /// Certificate (PEM) used to verify the remote peer.
    pub remote_cert: Option<String>,

    /// Verify the remote peer's certificate and name.
    pub verify_remote: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            secure: false,
            local_cert: None,
            local_key: None,
            remote_cert: None,
            verify_remote: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

impl ServerConfig {
    /// Local stream settings before negotiation narrows frame, header and timeout values.
    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            send_buffer_size: self.send_buffer_size,
            read_buffer_size: self.read_buffer_size,
            frame_max_size: self.frame_max_size,
            headers_max_size: self.headers_max_size,
            stream_timeout: self.stream_timeout,
            handler_max_count: self.handler_max_count,
        }
    }
}

impl ClientConfig {
    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            send_buffer_size: self.send_buffer_size,
            read_buffer_size: self.read_buffer_size,
            frame_max_size: self.frame_max_size,
            headers_max_size: self.headers_max_size,
            stream_timeout: self.stream_timeout,
            handler_max_count: 0,
        }
    }
}
