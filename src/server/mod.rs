//! Server role.
//!
//! # Data Flow
//! ```text
//! Listener::accept (connection limit)
//!     → tls::accept (optional)
//!     → server_handshake (negotiated StreamSettings)
//!     → StreamManager (Role::Server, owned by the server)
//!     → first HEADER frame of a new stream
//!     → dispatch::serve_stream (validate, route, run handler, respond, close)
//! ```
//!
//! # Design Decisions
//! - The connection permit is held until the manager stops
//! - Routes are registered before or while serving; lookups are lock-free per command

pub mod dispatch;
pub mod service;

pub use service::CepticServer;
