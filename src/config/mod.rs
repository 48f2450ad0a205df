//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → CepticConfig (validated, immutable)
//!     → ServerConfig / ClientConfig handed to CepticServer / CepticClient
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::CepticConfig;
pub use schema::ClientConfig;
pub use schema::ObservabilityConfig;
pub use schema::SecurityConfig;
pub use schema::ServerConfig;
pub use validation::{validate_client_config, validate_config, validate_server_config, ValidationError};
