//! Active health probing.
//!
//! # Responsibilities
//! - Probe every upstream's health path on demand
//! - Bound each probe with the short probe ceiling
//! - Fan probes out so one dead upstream cannot stall the aggregate

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use reqwest::{Client, StatusCode};
use tokio::time;

use crate::health::state::{HealthSnapshot, ServiceHealth, ServiceState};
use crate::observability::metrics;
use crate::routing::{ServiceDescriptor, ServiceRegistry};

#[derive(Clone)]
pub struct HealthAggregator {
    registry: Arc<ServiceRegistry>,
    client: Client,
    probe_timeout: Duration,
}

impl HealthAggregator {
    pub fn new(registry: Arc<ServiceRegistry>, client: Client, probe_timeout: Duration) -> Self {
        Self {
            registry,
            client,
            probe_timeout,
        }
    }

    /// Probe all services concurrently. Completes within roughly one probe
    /// ceiling even when every upstream is unreachable.
    pub async fn aggregate(&self) -> HealthSnapshot {
        let probes = self
            .registry
            .services()
            .iter()
            .map(|service| self.probe(service));
        let results = join_all(probes).await;

        let services = self
            .registry
            .services()
            .iter()
            .zip(results)
            .map(|(service, status)| {
                metrics::record_upstream_health(&service.key, status.is_online());
                (
                    service.key.clone(),
                    ServiceHealth {
                        status,
                        url: service.base_url.as_str().trim_end_matches('/').to_string(),
                        name: service.display_name.clone(),
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();

        HealthSnapshot {
            services,
            timestamp: Utc::now(),
        }
    }

    async fn probe(&self, service: &ServiceDescriptor) -> ServiceState {
        let url = service.health_url();
        let request = self.client.get(url.clone()).send();

        match time::timeout(self.probe_timeout, request).await {
            Ok(Ok(response)) if response.status() == StatusCode::OK => ServiceState::Online,
            Ok(Ok(response)) => {
                tracing::warn!(service = %service.key, url = %url, status = %response.status(), "Health probe failed: non-200 status");
                ServiceState::Error
            }
            Ok(Err(e)) => {
                tracing::warn!(service = %service.key, url = %url, error = %e, "Health probe failed: connection error");
                ServiceState::Offline
            }
            Err(_) => {
                tracing::warn!(service = %service.key, url = %url, "Health probe failed: timeout");
                ServiceState::Offline
            }
        }
    }
}
