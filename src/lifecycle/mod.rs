//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger → accept loop exits → every stream manager stopped
//!
//! Signals (signals.rs):
//!     SIGINT (Ctrl+C) → caller stops the server
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
