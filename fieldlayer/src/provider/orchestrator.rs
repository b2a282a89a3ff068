//! Provider selection, failover and quota enforcement.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::registry::ProviderRegistry;
use super::types::{Fetched, ImageryRequest, ProviderError};
use crate::ids::TenantId;
use crate::time::Clock;
use crate::usage::{UsageClient, UsageDelta, UsageError};

/// Which providers a tenant uses and how much it may spend.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantPolicy {
    pub preferred: String,
    pub secondary: Option<String>,
    pub fallback_enabled: bool,
    /// Daily processing-unit budget; `None` is unlimited.
    pub daily_budget: Option<f64>,
}

impl TenantPolicy {
    pub fn new(preferred: impl Into<String>) -> Self {
        Self {
            preferred: preferred.into(),
            secondary: None,
            fallback_enabled: false,
            daily_budget: None,
        }
    }

    pub fn with_fallback(mut self, secondary: impl Into<String>) -> Self {
        self.secondary = Some(secondary.into());
        self.fallback_enabled = true;
        self
    }

    pub fn with_daily_budget(mut self, budget: f64) -> Self {
        self.daily_budget = Some(budget);
        self
    }

    /// Providers to try, in order.
    fn chain(&self) -> Vec<&str> {
        let mut chain = vec![self.preferred.as_str()];
        if self.fallback_enabled {
            if let Some(secondary) = self.secondary.as_deref() {
                if secondary != self.preferred {
                    chain.push(secondary);
                }
            }
        }
        chain
    }
}

/// Default policy plus per-tenant overrides.
#[derive(Debug, Clone)]
pub struct TenantPolicies {
    default: TenantPolicy,
    overrides: HashMap<TenantId, TenantPolicy>,
}

impl TenantPolicies {
    pub fn new(default: TenantPolicy) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_tenant(mut self, tenant: TenantId, policy: TenantPolicy) -> Self {
        self.overrides.insert(tenant, policy);
        self
    }

    pub fn policy_for(&self, tenant: &TenantId) -> &TenantPolicy {
        self.overrides.get(tenant).unwrap_or(&self.default)
    }

    /// Every provider name any policy refers to.
    pub fn referenced_providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = std::iter::once(&self.default)
            .chain(self.overrides.values())
            .flat_map(|p| std::iter::once(p.preferred.as_str()).chain(p.secondary.as_deref()))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

/// Why an acquisition produced no imagery.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("provider '{provider}' failed: {source}")]
    Provider {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error("provider '{0}' is not registered")]
    UnknownProvider(String),
}

impl AcquisitionError {
    /// Whether re-queueing the request may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { source, .. } => source.is_retryable(),
            Self::Usage(UsageError::Unavailable) => true,
            Self::Usage(UsageError::QuotaExceeded { .. }) => false,
            Self::UnknownProvider(_) => false,
        }
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::Usage(UsageError::QuotaExceeded { .. }))
    }
}

/// Imagery together with where it came from.
#[derive(Debug, Clone)]
pub struct Acquisition {
    pub fetched: Fetched,
    pub provider: String,
    /// Provider calls made, including failed ones.
    pub attempts: u32,
}

/// Runs one imagery request through a tenant's provider chain.
///
/// The preferred provider is tried first. A `RateLimited` or `Transient`
/// failure moves on to the secondary provider, once, when the tenant has
/// fallback enabled. `AuthFailed` and `NoCoverage` end the attempt. Each
/// call is preceded by a budget reservation and followed by a usage
/// settlement, failed calls included.
pub struct AcquisitionOrchestrator {
    registry: ProviderRegistry,
    policies: TenantPolicies,
    usage: UsageClient,
    clock: Arc<dyn Clock>,
}

impl AcquisitionOrchestrator {
    pub fn new(
        registry: ProviderRegistry,
        policies: TenantPolicies,
        usage: UsageClient,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            policies,
            usage,
            clock,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn policies(&self) -> &TenantPolicies {
        &self.policies
    }

    pub async fn acquire(
        &self,
        tenant: &TenantId,
        request: &ImageryRequest,
    ) -> Result<Acquisition, AcquisitionError> {
        let policy = self.policies.policy_for(tenant);
        let chain = policy.chain();
        let mut attempts = 0u32;

        for (i, name) in chain.iter().enumerate() {
            let provider = self
                .registry
                .get(name)
                .ok_or_else(|| AcquisitionError::UnknownProvider(name.to_string()))?;

            let estimate = provider.estimate_cost(request);
            let day = self.clock.today();
            let reservation = self
                .usage
                .reserve(tenant, day, estimate.processing_units, policy.daily_budget)
                .await?;

            attempts += 1;
            debug!(
                tenant = %tenant,
                provider = %name,
                estimate_pu = estimate.processing_units,
                "Fetching imagery"
            );

            match provider.fetch_imagery(request).await {
                Ok(fetched) => {
                    self.usage
                        .settle(reservation, UsageDelta::success(&fetched.cost));
                    if i > 0 {
                        info!(tenant = %tenant, provider = %name, "Imagery served by fallback provider");
                    }
                    return Ok(Acquisition {
                        fetched,
                        provider: name.to_string(),
                        attempts,
                    });
                }
                Err(err) => {
                    self.usage.settle(reservation, UsageDelta::failure());
                    let has_next = i + 1 < chain.len();
                    if err.is_retryable() && has_next {
                        warn!(
                            tenant = %tenant,
                            provider = %name,
                            error = %err,
                            fallback = %chain[i + 1],
                            "Provider failed, falling back"
                        );
                        continue;
                    }
                    warn!(tenant = %tenant, provider = %name, error = %err, "Provider failed");
                    return Err(AcquisitionError::Provider {
                        provider: name.to_string(),
                        source: err,
                    });
                }
            }
        }

        Err(AcquisitionError::UnknownProvider(policy.preferred.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::BoundingBox;
    use crate::provider::types::{Band, DateRange};
    use crate::provider::SyntheticProvider;
    use crate::time::ManualClock;
    use crate::usage::UsageSystem;
    use chrono::{TimeZone, Utc};

    struct Fixture {
        orchestrator: AcquisitionOrchestrator,
        primary: Arc<SyntheticProvider>,
        secondary: Arc<SyntheticProvider>,
        usage: UsageClient,
        clock: ManualClock,
        _system: UsageSystem,
    }

    fn fixture(policy: TenantPolicy) -> Fixture {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        let system = UsageSystem::new(&tokio::runtime::Handle::current());
        let primary = Arc::new(SyntheticProvider::new("primary").with_units_per_call(2.0));
        let secondary = Arc::new(SyntheticProvider::new("secondary").with_units_per_call(3.0));
        let registry = ProviderRegistry::new()
            .with(primary.clone())
            .with(secondary.clone());
        let orchestrator = AcquisitionOrchestrator::new(
            registry,
            TenantPolicies::new(policy),
            system.client(),
            Arc::new(clock.clone()),
        );
        Fixture {
            orchestrator,
            primary,
            secondary,
            usage: system.client(),
            clock,
            _system: system,
        }
    }

    fn request() -> ImageryRequest {
        ImageryRequest {
            bbox: BoundingBox::new(1.0, 44.0, 1.01, 44.01),
            dates: DateRange::single(chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()),
            bands: vec![Band::Red, Band::Nir, Band::CloudProbability],
            width: 4,
            height: 4,
        }
    }

    fn acme() -> TenantId {
        TenantId::from("acme")
    }

    #[tokio::test]
    async fn test_preferred_provider_success() {
        let f = fixture(TenantPolicy::new("primary").with_fallback("secondary"));
        let acq = f.orchestrator.acquire(&acme(), &request()).await.unwrap();
        assert_eq!(acq.provider, "primary");
        assert_eq!(acq.attempts, 1);
        assert_eq!(f.secondary.calls(), 0);

        let usage = f.usage.usage(&acme(), f.clock.today()).await.unwrap();
        assert_eq!(usage.calls_succeeded, 1);
        assert_eq!(usage.processing_units, 2.0);
    }

    #[tokio::test]
    async fn test_rate_limited_falls_back_once() {
        let f = fixture(TenantPolicy::new("primary").with_fallback("secondary"));
        f.primary
            .push_failure(ProviderError::RateLimited { retry_after: None });

        let acq = f.orchestrator.acquire(&acme(), &request()).await.unwrap();

        assert_eq!(acq.provider, "secondary");
        assert_eq!(acq.attempts, 2);
        let usage = f.usage.usage(&acme(), f.clock.today()).await.unwrap();
        assert_eq!(usage.calls_failed, 1);
        assert_eq!(usage.calls_succeeded, 1);
        assert_eq!(usage.processing_units, 3.0, "failed call is not billed");
    }

    #[tokio::test]
    async fn test_transient_without_fallback_fails() {
        let f = fixture(TenantPolicy::new("primary"));
        f.primary.push_failure(ProviderError::Transient("503".into()));

        let err = f.orchestrator.acquire(&acme(), &request()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(f.secondary.calls(), 0);
    }

    #[tokio::test]
    async fn test_auth_failure_never_falls_back() {
        let f = fixture(TenantPolicy::new("primary").with_fallback("secondary"));
        f.primary.push_failure(ProviderError::AuthFailed("401".into()));

        let err = f.orchestrator.acquire(&acme(), &request()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(matches!(
            err,
            AcquisitionError::Provider { source: ProviderError::AuthFailed(_), .. }
        ));
        assert_eq!(f.secondary.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_coverage_never_falls_back() {
        let f = fixture(TenantPolicy::new("primary").with_fallback("secondary"));
        f.primary.push_failure(ProviderError::NoCoverage("404".into()));
        assert!(f.orchestrator.acquire(&acme(), &request()).await.is_err());
        assert_eq!(f.secondary.calls(), 0);
    }

    #[tokio::test]
    async fn test_fallback_only_once() {
        let f = fixture(TenantPolicy::new("primary").with_fallback("secondary"));
        f.primary.push_failure(ProviderError::Transient("a".into()));
        f.secondary.push_failure(ProviderError::Transient("b".into()));

        let err = f.orchestrator.acquire(&acme(), &request()).await.unwrap_err();
        assert!(matches!(err, AcquisitionError::Provider { ref provider, .. } if provider == "secondary"));
        assert_eq!(f.primary.calls() + f.secondary.calls(), 2);
    }

    #[tokio::test]
    async fn test_quota_exceeded_stops_before_calling() {
        let f = fixture(TenantPolicy::new("primary").with_daily_budget(3.0));
        f.orchestrator.acquire(&acme(), &request()).await.unwrap();

        let err = f.orchestrator.acquire(&acme(), &request()).await.unwrap_err();
        assert!(err.is_quota_exceeded());
        assert!(!err.is_retryable());
        assert_eq!(f.primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let f = fixture(TenantPolicy::new("nope"));
        let err = f.orchestrator.acquire(&acme(), &request()).await.unwrap_err();
        assert!(matches!(err, AcquisitionError::UnknownProvider(ref n) if n == "nope"));
    }

    #[test]
    fn test_referenced_providers() {
        let policies = TenantPolicies::new(TenantPolicy::new("a").with_fallback("b"))
            .with_tenant(TenantId::from("t"), TenantPolicy::new("c"));
        assert_eq!(policies.referenced_providers(), vec!["a", "b", "c"]);
        assert_eq!(policies.policy_for(&TenantId::from("t")).preferred, "c");
        assert_eq!(policies.policy_for(&TenantId::from("x")).preferred, "a");
    }
}
