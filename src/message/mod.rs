//! Request and response messages.
//!
//! # Data Flow
//! ```text
//! Client                                   Server
//!   Request::to_bytes ──HEADER frames──▶     Request::from_bytes → router
//!   Response::from_bytes ◀─RESPONSE frames── Response::to_bytes
//!   body bytes ────────DATA frames──────▶    (when Content-Length > 0)
//! ```

pub mod headers;
pub mod request;
pub mod response;
pub mod status;

pub use headers::Headers;
pub use request::Request;
pub use response::Response;
pub use status::StatusCode;

/// Port used when a url names no port.
pub const DEFAULT_PORT: u16 = 9000;

/// Longest command a server accepts.
pub const COMMAND_LENGTH: usize = 128;

/// Longest endpoint a server accepts.
pub const ENDPOINT_LENGTH: usize = 128;

/// Common command names.
pub mod command {
    pub const GET: &str = "get";
    pub const POST: &str = "post";
    pub const PUT: &str = "put";
    pub const DELETE: &str = "delete";
    pub const UPDATE: &str = "update";
    pub const STREAM: &str = "stream";
}
