//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Server:
//!     listener.rs (accept, connection limit)
//!     → tls.rs (optional TLS accept)
//!     → handshake.rs (server side negotiation)
//!     → stream manager
//!
//! Client:
//!     TcpStream::connect
//!     → tls.rs (optional TLS connect)
//!     → handshake.rs (client side negotiation)
//!     → stream manager
//! ```
//!
//! # Design Decisions
//! - Everything after TLS runs over a boxed `AsyncSocket`, so managers and
//!   tests can use plain TCP, TLS or in-memory pipes alike
//! - Handshake fields are fixed-width ASCII (socket.rs helpers)

pub mod handshake;
pub mod listener;
pub mod socket;
pub mod tls;

pub use listener::{ConnectionPermit, Listener, ListenerError};
pub use socket::{AsyncSocket, BoxedSocket};
