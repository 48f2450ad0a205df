//! Ceptic protocol library.
//!
//! A framed, multiplexed request/response protocol over TCP or TLS, with an
//! optional duplex "exchange" mode per stream.

// Wire and streams
pub mod encode;
pub mod message;
pub mod net;
pub mod stream;

// Roles
pub mod client;
pub mod routing;
pub mod server;

// Cross-cutting concerns
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;

pub use client::CepticClient;
pub use config::{CepticConfig, ClientConfig, ServerConfig};
pub use error::{CepticError, Result};
pub use lifecycle::Shutdown;
pub use message::{command, Headers, Request, Response, StatusCode};
pub use routing::{handler, CommandSettings, EndpointHandler};
pub use server::CepticServer;
pub use stream::{StreamData, StreamHandler};
