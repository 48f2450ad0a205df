//! Three-digit status codes carried by responses.

use std::fmt;

use crate::error::{CepticError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const CREATED: StatusCode = StatusCode(201);
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    pub const EXCHANGE_START: StatusCode = StatusCode(250);
    pub const EXCHANGE_END: StatusCode = StatusCode(251);
    pub const NOT_MODIFIED: StatusCode = StatusCode(304);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const CONFLICT: StatusCode = StatusCode(409);
    pub const UNEXPECTED_END: StatusCode = StatusCode(460);
    pub const MISSING_EXCHANGE: StatusCode = StatusCode(461);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);

    pub fn from_u16(code: u16) -> Result<Self> {
        if (100..=999).contains(&code) {
            Ok(StatusCode(code))
        } else {
            Err(CepticError::Protocol(format!("invalid status code {}", code)))
        }
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    pub fn is_success(self) -> bool {
        (200..=399).contains(&self.0)
    }

    pub fn is_error(self) -> bool {
        (400..=599).contains(&self.0)
    }

    pub fn is_client_error(self) -> bool {
        (400..=499).contains(&self.0)
    }

    pub fn is_server_error(self) -> bool {
        (500..=599).contains(&self.0)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}
