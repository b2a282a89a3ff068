//! Sentinel Hub process-API adapter.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;
use tracing::debug;

use super::codec::decode_png;
use super::http::AsyncHttpClient;
use super::types::{Band, CostEstimate, Fetched, ImageryProvider, ImageryRequest, ProviderError};

/// Default process API endpoint.
pub const SENTINEL_HUB_DEFAULT_URL: &str = "https://services.sentinel-hub.com/api/v1/process";

/// Pixels covered by one processing unit.
const PU_PIXELS: f64 = 512.0 * 512.0;

/// Bands covered by one processing unit.
const PU_BANDS: f64 = 3.0;

/// Smallest charge for any request.
const PU_MINIMUM: f64 = 0.01;

/// Sentinel-2 L2A imagery through the Sentinel Hub process API.
///
/// Requests are POSTed with a bearer token and return a band-packed PNG.
/// Cost follows the processing-unit rule: one unit per 512x512 output
/// pixels and three bands, with a floor per request.
pub struct SentinelHubProvider<C: AsyncHttpClient> {
    http_client: C,
    name: String,
    endpoint: String,
    token: String,
    cost_per_unit: f64,
}

impl<C: AsyncHttpClient> SentinelHubProvider<C> {
    pub fn new(
        http_client: C,
        name: impl Into<String>,
        endpoint: impl Into<String>,
        token: impl Into<String>,
        cost_per_unit: f64,
    ) -> Self {
        Self {
            http_client,
            name: name.into(),
            endpoint: endpoint.into(),
            token: token.into(),
            cost_per_unit,
        }
    }

    fn evalscript(bands: &[Band]) -> String {
        let inputs: Vec<String> = bands
            .iter()
            .map(|b| format!("\"{}\"", b.name()))
            .chain(std::iter::once("\"dataMask\"".to_string()))
            .collect();
        format!(
            "//VERSION=3\n\
             function setup() {{ return {{ input: [{}], output: {{ bands: 4, sampleType: \"UINT8\" }} }}; }}\n\
             function evaluatePixel(s) {{ return [255 * s.B04, 255 * s.B08, s.CLP, 255 * s.dataMask]; }}",
            inputs.join(", ")
        )
    }

    fn request_body(request: &ImageryRequest) -> String {
        json!({
            "input": {
                "bounds": {
                    "bbox": [request.bbox.west, request.bbox.south, request.bbox.east, request.bbox.north],
                    "properties": { "crs": "http://www.opengis.net/def/crs/OGC/1.3/CRS84" }
                },
                "data": [{
                    "type": "sentinel-2-l2a",
                    "dataFilter": {
                        "timeRange": {
                            "from": format!("{}T00:00:00Z", request.dates.from),
                            "to": format!("{}T23:59:59Z", request.dates.to)
                        },
                        "mosaickingOrder": "leastCC"
                    }
                }]
            },
            "output": {
                "width": request.width,
                "height": request.height,
                "responses": [{ "identifier": "default", "format": { "type": "image/png" } }]
            },
            "evalscript": Self::evalscript(&request.bands)
        })
        .to_string()
    }

    fn processing_units(request: &ImageryRequest) -> f64 {
        let bands = request.bands.len().max(1) as f64;
        (request.pixel_count() as f64 / PU_PIXELS * (bands / PU_BANDS)).max(PU_MINIMUM)
    }

    async fn fetch(&self, request: &ImageryRequest) -> Result<Fetched, ProviderError> {
        let body = Self::request_body(request);
        let auth = format!("Bearer {}", self.token);
        let bytes = self
            .http_client
            .post_json(&self.endpoint, &body, &[("Authorization", auth.as_str()), ("Accept", "image/png")])
            .await?;

        let mut cost = self.estimate_cost(request);
        cost.bytes = bytes.len() as u64;
        let imagery = decode_png(&bytes, request.bbox, request.dates.to, &self.name)?;
        debug!(
            provider = %self.name,
            width = imagery.width,
            height = imagery.height,
            processing_units = cost.processing_units,
            "Sentinel Hub imagery decoded"
        );
        Ok(Fetched { imagery, cost })
    }
}

impl<C: AsyncHttpClient> ImageryProvider for SentinelHubProvider<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn estimate_cost(&self, request: &ImageryRequest) -> CostEstimate {
        let processing_units = Self::processing_units(request);
        CostEstimate {
            processing_units,
            cost: processing_units * self.cost_per_unit,
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
