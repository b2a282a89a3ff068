//! Provider factory for centralized provider creation.
//!
//! Configuration names a provider kind plus its credentials; the factory
//! turns that into a shared [`ImageryProvider`] ready to be registered.

use super::http::AsyncReqwestClient;
use super::raster::RasterEndpointProvider;
use super::sentinel::{SentinelHubProvider, SENTINEL_HUB_DEFAULT_URL};
use super::synthetic::SyntheticProvider;
use super::types::{ImageryProvider, ProviderError};
use std::sync::Arc;

/// Configuration for creating a provider.
///
/// # Example
///
/// ```
/// use fieldlayer::provider::ProviderConfig;
///
/// let sentinel = ProviderConfig::sentinel_hub("OAUTH_TOKEN");
/// assert!(sentinel.requires_api_key());
///
/// let offline = ProviderConfig::synthetic();
/// assert!(!offline.requires_api_key());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderConfig {
    /// Sentinel Hub process API.
    ///
    /// Billed in processing units derived from output size and band count.
    SentinelHub {
        endpoint: String,
        /// OAuth bearer token
        token: String,
        cost_per_unit: f64,
    },

    /// Plain GET raster endpoint with an API-key header and a flat
    /// per-request price.
    RasterEndpoint {
        base_url: String,
        api_key: String,
        cost_per_request: f64,
    },

    /// Deterministic offline imagery.
    Synthetic {
        ndvi: f32,
        cloud_cover_pct: f64,
        units_per_call: f64,
    },
}

impl ProviderConfig {
    /// Create a Sentinel Hub configuration against the public endpoint.
    pub fn sentinel_hub(token: impl Into<String>) -> Self {
        Self::SentinelHub {
            endpoint: SENTINEL_HUB_DEFAULT_URL.to_string(),
            token: token.into(),
            cost_per_unit: 0.0,
        }
    }

    /// Create a raster endpoint configuration.
    pub fn raster_endpoint(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::RasterEndpoint {
            base_url: base_url.into(),
            api_key: api_key.into(),
            cost_per_request: 0.0,
        }
    }

    /// Create a synthetic provider configuration with healthy vegetation
    /// and clear skies.
    pub fn synthetic() -> Self {
        Self::Synthetic {
            ndvi: 0.6,
            cloud_cover_pct: 0.0,
            units_per_call: 1.0,
        }
    }

    /// Returns the provider kind for this configuration.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SentinelHub { .. } => "sentinel_hub",
            Self::RasterEndpoint { .. } => "raster",
            Self::Synthetic { .. } => "synthetic",
        }
    }

    /// Returns true if this provider requires credentials.
    pub fn requires_api_key(&self) -> bool {
        matches!(self, Self::SentinelHub { .. } | Self::RasterEndpoint { .. })
    }
}

/// Factory for creating imagery providers.
///
/// Holds the shared HTTP client so every HTTP-backed adapter reuses one
/// connection pool.
pub struct ProviderFactory {
    http_client: AsyncReqwestClient,
}

impl ProviderFactory {
    /// Create a new provider factory with the given HTTP client.
    pub fn new(http_client: AsyncReqwestClient) -> Self {
        Self { http_client }
    }

    /// Create a provider registered under `name`.
    ///
    /// Fails with `AuthFailed` when a credentialed provider is configured
    /// without credentials.
    pub fn create(
        &self,
        name: &str,
        config: &ProviderConfig,
    ) -> Result<Arc<dyn ImageryProvider>, ProviderError> {
        match config {
            ProviderConfig::SentinelHub {
                endpoint,
                token,
                cost_per_unit,
            } => {
                if token.trim().is_empty() {
                    return Err(ProviderError::AuthFailed(format!(
                        "provider '{}' has no token configured",
                        name
                    )));
                }
                Ok(Arc::new(SentinelHubProvider::new(
                    self.http_client.clone(),
                    name,
                    endpoint.clone(),
                    token.clone(),
                    *cost_per_unit,
                )))
            }
            ProviderConfig::RasterEndpoint {
                base_url,
                api_key,
                cost_per_request,
            } => {
                if api_key.trim().is_empty() {
                    return Err(ProviderError::AuthFailed(format!(
                        "provider '{}' has no API key configured",
                        name
                    )));
                }
                Ok(Arc::new(RasterEndpointProvider::new(
                    self.http_client.clone(),
                    name,
                    base_url.clone(),
                    api_key.clone(),
                    *cost_per_request,
                )))
            }
            ProviderConfig::Synthetic {
                ndvi,
                cloud_cover_pct,
                units_per_call,
            } => Ok(Arc::new(
                SyntheticProvider::new(name)
                    .with_ndvi(*ndvi)
                    .with_cloud_cover(*cloud_cover_pct)
                    .with_units_per_call(*units_per_call),
            )),
        }
    }
}
