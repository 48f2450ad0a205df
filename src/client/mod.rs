//! Client role.
//!
//! # Data Flow
//! ```text
//! Request::verify_and_prepare (host, port, endpoint)
//!     → pooled manager for host:port with room for a stream, or
//!       TcpStream::connect → tls::connect → client_handshake → StreamManager
//!     → send request, read OK, send body, read response, read response body
//!     → close the stream unless both sides agreed to an exchange
//! ```

pub mod service;

pub use service::CepticClient;
