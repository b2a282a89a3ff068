//! Satellite imagery provider abstraction
//!
//! Every imagery source implements [`ImageryProvider`]: it fetches a
//! multi-band raster for a bounding box and date range, prices the request
//! in processing units, and normalizes its failures to four kinds
//! (`RateLimited`, `AuthFailed`, `NoCoverage`, `Transient`).
//!
//! Providers are built from [`ProviderConfig`] by the [`ProviderFactory`],
//! registered by name in a [`ProviderRegistry`], and driven per tenant by
//! the [`AcquisitionOrchestrator`], which handles failover and quota.
//!
//! ```ignore
//! use fieldlayer::provider::{AsyncReqwestClient, ProviderConfig, ProviderFactory, ProviderRegistry};
//!
//! let factory = ProviderFactory::new(AsyncReqwestClient::new()?);
//! let mut registry = ProviderRegistry::new();
//! registry.register(factory.create("sentinel", &ProviderConfig::sentinel_hub(token))?);
//! ```

mod codec;
mod factory;
mod http;
mod orchestrator;
mod raster;
mod registry;
mod sentinel;
mod synthetic;
mod types;

pub use codec::{decode_png, encode_png};
pub use factory::{ProviderConfig, ProviderFactory};
pub use http::{classify_status, AsyncHttpClient, AsyncReqwestClient};
pub use orchestrator::{
    Acquisition, AcquisitionError, AcquisitionOrchestrator, TenantPolicies, TenantPolicy,
};
pub use raster::{RasterEndpointProvider, API_KEY_HEADER};
pub use registry::ProviderRegistry;
pub use sentinel::{SentinelHubProvider, SENTINEL_HUB_DEFAULT_URL};
pub use synthetic::SyntheticProvider;
pub use types::{
    Band, CostEstimate, DateRange, Fetched, Imagery, ImageryProvider, ImageryRequest,
    ProviderError, ProviderErrorKind,
};

#[cfg(test)]
pub use http::tests::MockAsyncHttpClient;
