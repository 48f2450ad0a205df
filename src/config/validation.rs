//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check min/max pairs are ordered and non-zero
//! - Check values fit the fixed-width handshake fields
//! - Check TLS material is present when TLS is enabled
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: CepticConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use crate::config::schema::{CepticConfig, ClientConfig, SecurityConfig, ServerConfig};

/// Largest value a 16-digit handshake field can carry.
const MAX_SIZE_FIELD: u64 = 9_999_999_999_999_999;

/// Largest value a 4-digit handshake field can carry.
const MAX_SHORT_FIELD: u64 = 9_999;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn check_size_range(errors: &mut Vec<ValidationError>, field: &str, min: usize, max: usize) {
    if min == 0 {
        errors.push(ValidationError::new(format!("{}_min_size", field), "must be greater than 0"));
    }
    if min > max {
        errors.push(ValidationError::new(
            format!("{}_min_size", field),
            format!("{} exceeds {}_max_size {}", min, field, max),
        ));
    }
    if max as u64 > MAX_SIZE_FIELD {
        errors.push(ValidationError::new(format!("{}_max_size", field), "does not fit in 16 digits"));
    }
}

fn check_timeout_range(errors: &mut Vec<ValidationError>, prefix: &str, min: u64, max: u64) {
    if min == 0 {
        errors.push(ValidationError::new(format!("{}.stream_min_timeout", prefix), "must be greater than 0"));
    }
    if min > max {
        errors.push(ValidationError::new(
            format!("{}.stream_min_timeout", prefix),
            format!("{} exceeds stream_timeout {}", min, max),
        ));
    }
    if max > MAX_SHORT_FIELD {
        errors.push(ValidationError::new(format!("{}.stream_timeout", prefix), "must be at most 9999"));
    }
}

fn check_security(errors: &mut Vec<ValidationError>, prefix: &str, security: &SecurityConfig, needs_cert: bool) {
    if security.secure && needs_cert && security.local_cert.is_none() {
        errors.push(ValidationError::new(
            format!("{}.security.local_cert", prefix),
            "required when secure is enabled",
        ));
    }
    if security.local_key.is_some() && security.local_cert.is_none() {
        errors.push(ValidationError::new(
            format!("{}.security.local_key", prefix),
            "set without local_cert",
        ));
    }
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &CepticConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_server(&mut errors, &config.server);
    check_client(&mut errors, &config.client);
    into_result(errors)
}

/// Validate a server configuration on its own, as built in code.
pub fn validate_server_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_server(&mut errors, config);
    into_result(errors)
}

/// Validate a client configuration on its own, as built in code.
pub fn validate_client_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_client(&mut errors, config);
    into_result(errors)
}

fn into_result(errors: Vec<ValidationError>) -> Result<(), Vec<ValidationError>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_server(errors: &mut Vec<ValidationError>, server: &ServerConfig) {
    check_size_range(errors, "server.frame", server.frame_min_size, server.frame_max_size);
    check_size_range(errors, "server.headers", server.headers_min_size, server.headers_max_size);
    check_timeout_range(errors, "server", server.stream_min_timeout, server.stream_timeout);
    if server.handler_max_count as u64 > MAX_SHORT_FIELD {
        errors.push(ValidationError::new("server.handler_max_count", "must be at most 9999"));
    }
    if server.max_connections == 0 {
        errors.push(ValidationError::new("server.max_connections", "must be greater than 0"));
    }
    if server.handshake_timeout_secs == 0 {
        errors.push(ValidationError::new("server.handshake_timeout_secs", "must be greater than 0"));
    }
    if server.send_buffer_size == 0 || server.read_buffer_size == 0 {
        errors.push(ValidationError::new("server.buffers", "buffer sizes must be greater than 0"));
    }
    check_security(errors, "server", &server.security, true);
}

fn check_client(errors: &mut Vec<ValidationError>, client: &ClientConfig) {
    check_size_range(errors, "client.frame", client.frame_min_size, client.frame_max_size);
    check_size_range(errors, "client.headers", client.headers_min_size, client.headers_max_size);
    check_timeout_range(errors, "client", client.stream_min_timeout, client.stream_timeout);
    if client.connect_timeout_secs == 0 {
        errors.push(ValidationError::new("client.connect_timeout_secs", "must be greater than 0"));
    }
    if client.handshake_timeout_secs == 0 {
        errors.push(ValidationError::new("client.handshake_timeout_secs", "must be greater than 0"));
    }
    if client.send_buffer_size == 0 || client.read_buffer_size == 0 {
        errors.push(ValidationError::new("client.buffers", "buffer sizes must be greater than 0"));
    }
    check_security(errors, "client", &client.security, false);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&CepticConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = CepticConfig::default();
        config.server.frame_min_size = 2_000_000;
        config.server.stream_timeout = 10_000;
        config.client.stream_min_timeout = 0;
        config.server.security.secure = true;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"server.frame_min_size"));
        assert!(fields.contains(&"server.stream_timeout"));
        assert!(fields.contains(&"client.stream_min_timeout"));
        assert!(fields.contains(&"server.security.local_cert"));
    }

    #[test]
    fn test_role_configs_checked_alone() {
        let server = ServerConfig {
            handler_max_count: 10_000,
            handshake_timeout_secs: 0,
            ..Default::default()
        };
        let errors = validate_server_config(&server).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["server.handler_max_count", "server.handshake_timeout_secs"]);

        let client = ClientConfig {
            handshake_timeout_secs: 0,
            ..Default::default()
        };
        let errors = validate_client_config(&client).unwrap_err();
        assert_eq!(errors[0].field, "client.handshake_timeout_secs");
        assert!(validate_client_config(&ClientConfig::default()).is_ok());
    }

    #[test]
    fn test_client_tls_without_cert_is_allowed() {
        let mut config = CepticConfig::default();
        config.client.security.secure = true;
        assert!(validate_config(&config).is_ok());
    }
}
