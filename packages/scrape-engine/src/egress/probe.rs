//! HTTP health probe.
//!
//! Sends one GET through the identity to a randomly chosen echo endpoint.
//! Healthy means HTTP 200 within the timeout.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::traits::probe::{HealthProbe, ProbeReport};
use crate::types::identity::EgressIdentity;

/// Echo endpoints that report the caller's IP.
pub const PROBE_ENDPOINTS: [&str; 4] = [
    "http://httpbin.org/ip",
    "https://httpbin.org/ip",
    "http://ifconfig.me/ip",
    "https://api.ipify.org?format=json",
];

/// Probe that routes a request through the identity with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    timeout: Duration,
    endpoints: Vec<String>,
}

impl HttpHealthProbe {
    /// Create a probe over the default endpoints.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            endpoints: PROBE_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replace the endpoint list.
    pub fn with_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.endpoints = endpoints;
        self
    }

    fn pick_endpoint(&self) -> Option<String> {
        self.endpoints.choose(&mut rand::thread_rng()).cloned()
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, identity: &EgressIdentity) -> ProbeReport {
        let Some(endpoint) = self.pick_endpoint() else {
            return ProbeReport::Unhealthy {
                reason: "no probe endpoints configured".to_string(),
            };
        };

        let proxy = match reqwest::Proxy::all(identity.proxy_url()) {
            Ok(p) => p,
            Err(e) => {
                return ProbeReport::Unhealthy {
                    reason: format!("invalid proxy: {}", e),
                }
            }
        };
        let client = match reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                return ProbeReport::Unhealthy {
                    reason: format!("client build failed: {}", e),
                }
            }
        };

        let start = Instant::now();
        let report = match client.get(&endpoint).send().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => {
                let latency = start.elapsed();
                let observed_ip = resp.text().await.ok().and_then(|body| parse_observed_ip(&body));
                ProbeReport::Healthy {
                    latency,
                    observed_ip,
                }
            }
            Ok(resp) => ProbeReport::Unhealthy {
                reason: format!("HTTP {}", resp.status().as_u16()),
            },
            Err(e) if e.is_timeout() => ProbeReport::Unhealthy {
                reason: format!("timeout after {}s", self.timeout.as_secs()),
            },
            Err(e) => ProbeReport::Unhealthy {
                reason: e.to_string(),
            },
        };

        debug!(
            proxy = %identity.endpoint(),
            endpoint = %endpoint,
            healthy = report.is_healthy(),
            "Probed egress identity"
        );
        report
    }
}

/// Read the caller IP from an echo response: JSON `origin` or `ip`, or the
/// plain-text body.
fn parse_observed_ip(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        return ["origin", "ip"]
            .iter()
            .find_map(|key| json.get(key).and_then(|v| v.as_str()))
            .map(str::to_string);
    }
    Some(body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_observed_ip() {
        assert_eq!(
            parse_observed_ip(r#"{"origin": "203.0.113.7"}"#).as_deref(),
            Some("203.0.113.7")
        );
        assert_eq!(
            parse_observed_ip(r#"{"ip":"198.51.100.2"}"#).as_deref(),
            Some("198.51.100.2")
        );
        assert_eq!(parse_observed_ip("192.0.2.1\n").as_deref(), Some("192.0.2.1"));
        assert_eq!(parse_observed_ip("  "), None);
        assert_eq!(parse_observed_ip(r#"{"other": 1}"#), None);
    }

    #[test]
    fn test_pick_endpoint_from_list() {
        let probe = HttpHealthProbe::new(Duration::from_secs(1));
        for _ in 0..20 {
            let endpoint = probe.pick_endpoint().unwrap();
            assert!(PROBE_ENDPOINTS.contains(&endpoint.as_str()));
        }

        let empty = probe.with_endpoints(vec![]);
        assert!(empty.pick_endpoint().is_none());
    }

    #[tokio::test]
    async fn test_invalid_proxy_is_unhealthy() {
        let probe = HttpHealthProbe::new(Duration::from_millis(200))
            .with_endpoints(vec!["http://127.0.0.1:9/ip".to_string()]);
        let identity = EgressIdentity::new(1, "127.0.0.1", 9);
        let report = probe.probe(&identity).await;
        assert!(!report.is_healthy());
    }
}
