//! Stream multiplexing subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound:
//!     StreamHandler::send* → encode → generator.rs (split to frames)
//!     → send budget → shared outbound queue (bounded)
//!     → manager.rs send loop (sole socket writer) → frame.rs encode
//!
//! Inbound:
//!     manager.rs receive loop (sole socket reader) → frame.rs decode
//!     → dispatch by stream id (new stream on server → owner callback)
//!     → read budget → handler inbound queue → StreamHandler::receive
//!     → reassemble → decode → Data | Response
//! ```
//!
//! # Design Decisions
//! - Every blocking wait is bounded by `BUFFER_WAIT` and rechecks stop flags
//! - Idle deadlines are checked on each send-loop tick
//! - Control frames (CLOSE, KEEP_ALIVE, CLOSE_ALL) bypass the byte budgets

pub mod budget;
pub mod frame;
pub mod generator;
pub mod handler;
pub mod manager;
pub mod settings;

pub use frame::{FrameInfo, FrameType, StreamFrame};
pub use handler::{ExchangeState, StreamData, StreamHandler};
pub use manager::{ConnectionOwner, Role, StreamManager};
pub use settings::StreamSettings;
