//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (before serving):
//!     add_command(command, settings?)
//!     add_endpoint(command, template, handler, settings?)
//!     → pattern.rs (validate, normalize, compile to anchored regex)
//!     → router.rs (reject equivalent templates per command)
//!
//! Dispatch (per request):
//!     (command, path)
//!     → pattern.rs (validate + normalize path)
//!     → router.rs (match every template, pick by precedence)
//!     → EndpointValue { handler, values, settings } or NotFound
//! ```
//!
//! # Design Decisions
//! - Deterministic: same input always matches same endpoint
//! - Literal segments beat variables, then registration order

pub mod pattern;
pub mod router;

pub use pattern::EndpointPattern;
pub use router::{handler, CommandEntry, CommandSettings, EndpointHandler, EndpointManager, EndpointValue};
