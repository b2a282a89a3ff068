//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::path::PathBuf;
use std::process;
use fieldlayer::config::ConfigFileError;
use fieldlayer::service::ServiceError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Lands file could not be read or parsed
    LandsInput { path: PathBuf, reason: String },
    /// Failed to create service
    ServiceCreation(ServiceError),
    /// Service operation failed
    Service(ServiceError),
    /// Failed to start the async runtime
    Runtime(std::io::Error),
    /// Queue did not drain in time
    Timeout { secs: u64, remaining: usize },
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) | CliError::LandsInput { .. } => 2,
            CliError::Timeout { .. } => 3,
            _ => 1,
        }
    }

    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        // Print additional help for specific errors
        match self {
            CliError::ServiceCreation(ServiceError::UnknownProvider(_))
            | CliError::ServiceCreation(ServiceError::ProviderError(_)) => {
                eprintln!();
                eprintln!("Check the [provider] section of config.ini:");
                eprintln!("  1. preferred and secondary must name [provider.<name>] sections");
                eprintln!("  2. sentinel_hub providers need a token");
                eprintln!("  3. raster providers need a base_url and api_key");
            }
            CliError::LandsInput { .. } => {
                eprintln!();
                eprintln!("The lands file is a JSON array of objects like:");
                eprintln!(
                    r#"  {{"land_id": "L1", "tenant_id": "acme", "boundary": [[lon, lat], ...]}}"#
                );
            }
            _ => {}
        }

        process::exit(self.exit_code())
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::LandsInput { path, reason } => {
                write!(f, "Failed to read lands from '{}': {}", path.display(), reason)
            }
            CliError::ServiceCreation(e) => write!(f, "Failed to create service: {}", e),
            CliError::Service(e) => write!(f, "{}", e),
            CliError::Runtime(e) => write!(f, "Failed to start async runtime: {}", e),
            CliError::Timeout { secs, remaining } => write!(
                f,
                "Acquisition did not finish within {}s ({} entries still active)",
                secs, remaining
            ),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::ServiceCreation(e) => Some(e),
            CliError::Service(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<ServiceError> for CliError {
    fn from(e: ServiceError) -> Self {
        CliError::Service(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::Config("x".into()).exit_code(), 2);
        assert_eq!(
            CliError::Timeout {
                secs: 5,
                remaining: 1
            }
            .exit_code(),
            3
        );
        assert_eq!(CliError::LoggingInit("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_display_lands_input() {
        let err = CliError::LandsInput {
            path: PathBuf::from("lands.json"),
            reason: "expected value at line 1".to_string(),
        };
        assert!(err.to_string().contains("lands.json"));
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_from_config_error() {
        let err: CliError = ConfigFileError::Write {
            path: PathBuf::from("/etc/fieldlayer/config.ini"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        }
        .into();
        assert!(matches!(err, CliError::Config(_)));
        assert!(err.to_string().contains("disk full"));
    }
}
