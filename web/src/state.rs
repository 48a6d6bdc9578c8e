//! Application state for Axum handlers.

use admission_core::claims::IdentityProvider;
use admission_runtime::AdmissionService;
use metrics_exporter_prometheus::PrometheusHandle;
use std::fmt;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cheap to clone: the service and identity provider are shared.
#[derive(Clone)]
pub struct AppState {
    /// Admission orchestrator
    pub service: AdmissionService,
    /// Resolves bearer tokens into callers
    pub identity: Arc<dyn IdentityProvider>,
    /// Prometheus renderer, when metrics are enabled
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create state without a metrics endpoint.
    #[must_use]
    pub fn new(service: AdmissionService, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            service,
            identity,
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("metrics_enabled", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}
