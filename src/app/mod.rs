//! Application module
//!
//! This module contains the pieces the `filtermr` binary needs around the
//! library:
//! - Configuration handling
//! - Logging setup
//! - Fatal error reporting

pub mod config;
pub mod error_handling;
pub mod logging;

// Re-export main application functions
pub use config::{AppConfig, AppConfigError, RunConfig};
pub use error_handling::{exit_code, handle_fatal_error};
pub use logging::init_logging;
