//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::identity::EgressIdentity;
use crate::types::session::SearchQuery;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Limits and timeouts consumed by the orchestrator and its components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Simultaneous sessions allowed per target. Default: 3.
    pub max_concurrent_sessions_per_target: usize,

    /// Session submissions allowed per identifier per window. Default: 100.
    pub rate_limit_requests: usize,

    /// Sliding window length. Default: 3600.
    pub rate_limit_window_seconds: u64,

    /// Ban length once an identifier exceeds twice its limit. Default: 60.
    pub ban_duration_minutes: u64,

    /// Health check staleness threshold. Default: 300.
    pub proxy_health_check_interval_seconds: u64,

    /// Timeout for one health probe. Default: 10.
    pub proxy_request_timeout_seconds: u64,

    /// Page budget when a query does not set one. Default: 10.
    pub page_budget_default: u32,

    /// Base inter-request delay, jittered. Default: 5.
    pub inter_request_delay_seconds: u64,

    /// Timeout for one page request. Default: 30.
    pub request_timeout_seconds: u64,

    /// Fail sessions that asked for a proxy when none is healthy,
    /// instead of connecting directly. Default: false.
    pub require_egress: bool,

    /// User agent sent by adapters.
    pub user_agent: String,

    /// Upper bound on one notifier call. Default: 10.
    pub notify_timeout_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions_per_target: 3,
            rate_limit_requests: 100,
            rate_limit_window_seconds: 3600,
            ban_duration_minutes: 60,
            proxy_health_check_interval_seconds: 300,
            proxy_request_timeout_seconds: 10,
            page_budget_default: 10,
            inter_request_delay_seconds: 5,
            request_timeout_seconds: 30,
            require_egress: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            notify_timeout_seconds: 10,
        }
    }
}

impl EngineConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from environment variables, falling back to defaults.
    ///
    /// Reads a `.env` file first if one is present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        Ok(Self {
            max_concurrent_sessions_per_target: env_or(
                "MAX_CONCURRENT_SESSIONS_PER_TARGET",
                defaults.max_concurrent_sessions_per_target,
            )?,
            rate_limit_requests: env_or("RATE_LIMIT_REQUESTS", defaults.rate_limit_requests)?,
            rate_limit_window_seconds: env_or(
                "RATE_LIMIT_WINDOW_SECONDS",
                defaults.rate_limit_window_seconds,
            )?,
            ban_duration_minutes: env_or("BAN_DURATION_MINUTES", defaults.ban_duration_minutes)?,
            proxy_health_check_interval_seconds: env_or(
                "PROXY_HEALTH_CHECK_INTERVAL_SECONDS",
                defaults.proxy_health_check_interval_seconds,
            )?,
            proxy_request_timeout_seconds: env_or(
                "PROXY_REQUEST_TIMEOUT_SECONDS",
                defaults.proxy_request_timeout_seconds,
            )?,
            page_budget_default: env_or("PAGE_BUDGET_DEFAULT", defaults.page_budget_default)?,
            inter_request_delay_seconds: env_or(
                "INTER_REQUEST_DELAY_SECONDS",
                defaults.inter_request_delay_seconds,
            )?,
            request_timeout_seconds: env_or(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            )?,
            require_egress: env_or("REQUIRE_EGRESS", defaults.require_egress)?,
            user_agent: env::var("USER_AGENT").unwrap_or(defaults.user_agent),
            notify_timeout_seconds: env_or(
                "NOTIFY_TIMEOUT_SECONDS",
                defaults.notify_timeout_seconds,
            )?,
        })
    }

    /// Parse `EGRESS_PROXIES` (comma-separated proxy URLs).
    pub fn egress_proxies_from_env() -> Result<Vec<EgressIdentity>, ConfigError> {
        let raw = env::var("EGRESS_PROXIES").unwrap_or_default();
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .enumerate()
            .map(|(i, url)| EgressIdentity::parse(i as i64 + 1, url))
            .collect()
    }

    /// A query carrying this config's page budget and delay defaults.
    pub fn query(&self, specialty: impl Into<String>, city: impl Into<String>) -> SearchQuery {
        SearchQuery::new(specialty, city)
            .with_max_pages(self.page_budget_default)
            .with_delay_seconds(self.inter_request_delay_seconds)
    }

    /// Set the per-target concurrency cap.
    pub fn with_max_concurrent_sessions(mut self, max: usize) -> Self {
        self.max_concurrent_sessions_per_target = max;
        self
    }

    /// Set the rate limit.
    pub fn with_rate_limit(mut self, requests: usize, window_seconds: u64) -> Self {
        self.rate_limit_requests = requests;
        self.rate_limit_window_seconds = window_seconds;
        self
    }

    /// Set the ban duration.
    pub fn with_ban_duration_minutes(mut self, minutes: u64) -> Self {
        self.ban_duration_minutes = minutes;
        self
    }

    /// Set the proxy health check interval.
    pub fn with_health_check_interval(mut self, seconds: u64) -> Self {
        self.proxy_health_check_interval_seconds = seconds;
        self
    }

    /// Fail sessions instead of connecting directly when no proxy is healthy.
    pub fn with_require_egress(mut self, require: bool) -> Self {
        self.require_egress = require;
        self
    }

    /// Set the default inter-request delay.
    pub fn with_inter_request_delay(mut self, seconds: u64) -> Self {
        self.inter_request_delay_seconds = seconds;
        self
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_seconds)
    }

    pub fn ban_duration(&self) -> Duration {
        Duration::from_secs(self.ban_duration_minutes * 60)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.proxy_health_check_interval_seconds)
    }

    pub fn proxy_request_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy_request_timeout_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_seconds)
    }
}

fn env_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            })
        }
        _ => Ok(default),
    }
}
