//! Generic bbox/date raster endpoint adapter.

use futures::future::BoxFuture;
use futures::FutureExt;

use super::codec::decode_png;
use super::http::AsyncHttpClient;
use super::types::{CostEstimate, Fetched, ImageryProvider, ImageryRequest, ProviderError};

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Adapter for a plain GET raster endpoint.
///
/// The endpoint takes the bbox, date range and output size as query
/// parameters and returns the same band-packed PNG the process API does.
/// Every request is billed at a flat rate.
pub struct RasterEndpointProvider<C: AsyncHttpClient> {
    http_client: C,
    name: String,
    base_url: String,
    api_key: String,
    cost_per_request: f64,
}

impl<C: AsyncHttpClient> RasterEndpointProvider<C> {
    pub fn new(
        http_client: C,
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        cost_per_request: f64,
    ) -> Self {
        Self {
            http_client,
            name: name.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            cost_per_request,
        }
    }

    fn url(&self, request: &ImageryRequest) -> String {
        let b = &request.bbox;
        format!(
            "{}?bbox={:.6},{:.6},{:.6},{:.6}&from={}&to={}&width={}&height={}",
            self.base_url.trim_end_matches('?'),
            b.west,
            b.south,
            b.east,
            b.north,
            request.dates.from,
            request.dates.to,
            request.width,
            request.height
        )
    }

    async fn fetch(&self, request: &ImageryRequest) -> Result<Fetched, ProviderError> {
        let url = self.url(request);
        let bytes = self
            .http_client
            .get_with_headers(&url, &[(API_KEY_HEADER, self.api_key.as_str())])
            .await?;

        let mut cost = self.estimate_cost(request);
        cost.bytes = bytes.len() as u64;
        let imagery = decode_png(&bytes, request.bbox, request.dates.to, &self.name)?;
        Ok(Fetched { imagery, cost })
    }
}

impl<C: AsyncHttpClient> ImageryProvider for RasterEndpointProvider<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn estimate_cost(&self, _request: &ImageryRequest) -> CostEstimate {
        CostEstimate {
            processing_units: 1.0,
            cost: self.cost_per_request,
            bytes: 0,
        }
    }

    fn fetch_imagery<'a>(
        &'a self,
        request: &'a ImageryRequest,
    ) -> BoxFuture<'a, Result<Fetched, ProviderError>> {
        self.fetch(request).boxed()
    }
}
