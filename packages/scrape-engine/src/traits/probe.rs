//! Health probe seam for egress identities.

use async_trait::async_trait;
use std::time::Duration;

use crate::types::identity::EgressIdentity;

/// Outcome of probing one identity.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeReport {
    Healthy {
        latency: Duration,
        observed_ip: Option<String>,
    },
    Unhealthy {
        reason: String,
    },
}

impl ProbeReport {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeReport::Healthy { .. })
    }
}

/// Issues one bounded request through an identity.
///
/// Implementations must return within their own timeout; a timeout is an
/// `Unhealthy` report, not an error.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, identity: &EgressIdentity) -> ProbeReport;
}
