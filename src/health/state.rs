//! Upstream health snapshot.
//!
//! # States
//! - Online: probe answered 200
//! - Error: probe answered with any other status
//! - Offline: connection failed or the probe timed out
//!
//! # Design Decisions
//! - Snapshots are recomputed per query and never cached
//! - Upstream degradation never changes the gateway's own status

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Online,
    Error,
    Offline,
}

impl ServiceState {
    pub fn is_online(self) -> bool {
        self == ServiceState::Online
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub status: ServiceState,
    pub url: String,
    pub name: String,
}

/// Per-service status at one point in time.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub services: BTreeMap<String, ServiceHealth>,
    pub timestamp: DateTime<Utc>,
}

impl HealthSnapshot {
    /// The `/health` response document. The gateway itself is always `OK`.
    pub fn document(&self) -> GatewayHealth<'_> {
        GatewayHealth {
            gateway: "OK",
            timestamp: self.timestamp,
            services: &self.services,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GatewayHealth<'a> {
    pub gateway: &'static str,
    pub timestamp: DateTime<Utc>,
    pub services: &'a BTreeMap<String, ServiceHealth>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_shape() {
        let snapshot = HealthSnapshot {
            services: BTreeMap::from([(
                "main".to_string(),
                ServiceHealth {
                    status: ServiceState::Offline,
                    url: "http://127.0.0.1:5000".into(),
                    name: "Main API Server".into(),
                },
            )]),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(snapshot.document()).unwrap();
        assert_eq!(json["gateway"], "OK");
        assert_eq!(json["services"]["main"]["status"], "offline");
        assert_eq!(json["services"]["main"]["url"], "http://127.0.0.1:5000");
        let ts = json["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }
}
