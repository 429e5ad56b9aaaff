//! Timeout enforcement.
//!
//! # Responsibilities
//! - Pick the ceiling for each upstream call
//! - Keep health probes short so one dead upstream cannot stall the aggregate
//!
//! # Design Decisions
//! - Timeout errors are distinct from other errors
//! - Timed-out requests return 504 Gateway Timeout
//! - The stream ceiling bounds connect and idle gaps, not total stream length

use std::time::Duration;

use axum::http::Method;

use crate::config::{TimeoutClass, TimeoutConfig};
use crate::routing::ServiceDescriptor;

/// Read-only table of upstream ceilings, built once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub connect: Duration,
    pub standard: Duration,
    pub inference: Duration,
    pub probe: Duration,
    pub stream: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::from(&TimeoutConfig::default())
    }
}

impl From<&TimeoutConfig> for TimeoutPolicy {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            connect: Duration::from_secs(config.connect_secs),
            standard: Duration::from_secs(config.standard_secs),
            inference: Duration::from_secs(config.inference_secs),
            probe: Duration::from_millis(config.probe_ms),
            stream: Duration::from_secs(config.stream_secs),
        }
    }
}

impl TimeoutPolicy {
    /// Ceiling for an ordinary forwarded call.
    ///
    /// POSTs to inference services run the model and get the longer ceiling.
    pub fn for_request(&self, service: &ServiceDescriptor, method: &Method) -> Duration {
        match service.timeout_class {
            TimeoutClass::Inference if *method == Method::POST => self.inference,
            _ => self.standard,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::routing::ServiceRegistry;

    #[test]
    fn inference_posts_get_longer_ceiling() {
        let registry = ServiceRegistry::from_config(&GatewayConfig::default().services).unwrap();
        let policy = TimeoutPolicy::default();
        let image = registry.get("ai_image").unwrap();
        let main = registry.get("main").unwrap();

        assert_eq!(policy.for_request(image, &Method::POST), Duration::from_secs(60));
        assert_eq!(policy.for_request(image, &Method::GET), Duration::from_secs(30));
        assert_eq!(policy.for_request(main, &Method::POST), Duration::from_secs(30));
        assert_eq!(policy.probe, Duration::from_secs(2));
    }
}
