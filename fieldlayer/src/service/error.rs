//! Service error types.

use thiserror::Error;

use crate::config::ConfigFileError;
use crate::grid::GridError;
use crate::ids::LandId;
use crate::mapper::MappingError;
use crate::provider::ProviderError;
use crate::queue::QueueError;
use crate::usage::UsageError;

/// Errors that can occur during service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Failed to create HTTP client
    #[error("HTTP client error: {0}")]
    HttpClientError(String),

    /// Failed to create provider
    #[error("Provider error: {0}")]
    ProviderError(#[from] ProviderError),

    /// A tenant chain names a provider that was never registered
    #[error("Provider '{0}' is referenced but not configured")]
    UnknownProvider(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigFileError),

    /// Grid generation failed
    #[error("Grid error: {0}")]
    GridError(#[from] GridError),

    /// Land could not be mapped onto the grid
    #[error("Mapping error: {0}")]
    MappingError(#[from] MappingError),

    /// Queue operation or snapshot failed
    #[error("Queue error: {0}")]
    QueueError(#[from] QueueError),

    /// Usage daemon refused or is gone
    #[error("Usage error: {0}")]
    UsageError(#[from] UsageError),

    /// No mapping exists for the land
    #[error("Unknown land: {0}")]
    UnknownLand(LandId),

    /// I/O error (ledger file, snapshot directory)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// No Tokio runtime to spawn daemons on
    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_http_client_error() {
        let err = ServiceError::HttpClientError("connection refused".to_string());
        assert!(err.to_string().contains("HTTP client error"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_display_unknown_land() {
        let err = ServiceError::UnknownLand(LandId::from("land-7"));
        assert_eq!(err.to_string(), "Unknown land: land-7");
    }

    #[test]
    fn test_from_provider_error() {
        let provider_err = ProviderError::AuthFailed("no token".to_string());
        let service_err: ServiceError = provider_err.into();
        assert!(matches!(service_err, ServiceError::ProviderError(_)));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let service_err: ServiceError = io_err.into();
        assert!(matches!(service_err, ServiceError::IoError(_)));
        assert!(std::error::Error::source(&service_err).is_some());
    }

    #[test]
    fn test_from_usage_error() {
        let service_err: ServiceError = UsageError::Unavailable.into();
        assert!(service_err.to_string().contains("usage daemon is not running"));
    }
}
