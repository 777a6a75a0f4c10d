//! Error handling utilities

use crate::app::config::AppConfigError;
use crate::pipeline::{ConfigError, PipelineError};
use tracing::error;

/// Exit code for invalid arguments or configuration.
pub const ARGUMENT_ERROR: i32 = 2;
/// Exit code for any other failure.
pub const GENERAL_ERROR: i32 = 1;

/// Exit code for an error, based on the first recognized error in its chain.
pub fn exit_code(error: &anyhow::Error) -> i32 {
    for cause in error.chain() {
        if cause.is::<AppConfigError>() || cause.is::<ConfigError>() {
            return ARGUMENT_ERROR;
        }
        if let Some(pipeline_error) = cause.downcast_ref::<PipelineError>() {
            return match pipeline_error {
                PipelineError::InvalidWorkerCount { .. } => ARGUMENT_ERROR,
                _ => GENERAL_ERROR,
            };
        }
    }
    GENERAL_ERROR
}

/// Handle fatal errors and exit with appropriate status code
///
/// # Verbose Mode Behavior
/// - `verbose = 0`: the top-level message only
/// - `verbose >= 1`: the full error chain
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    error!("Fatal error: {}", error);

    eprintln!("Error: {error}");
    if verbose >= 1 {
        eprintln!("\nError chain:");
        for (i, cause) in error.chain().enumerate() {
            eprintln!("  {}: {}", i, cause);
        }
    }

    std::process::exit(exit_code(&error))
}
