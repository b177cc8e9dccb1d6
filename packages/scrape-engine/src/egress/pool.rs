//! Egress pool: identity list, health tracking and rotation.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::traits::probe::{HealthProbe, ProbeReport};
use crate::traits::store::IdentitySource;
use crate::types::identity::{EgressIdentity, RotationStrategy};

/// Snapshot of pool health.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub health_percentage: f64,
    pub total_usage: u64,
    pub last_health_check: Option<DateTime<Utc>>,

    /// Time since the last completed health check.
    pub health_check_age: Option<Duration>,
}

#[derive(Default)]
struct PoolState {
    identities: Vec<EgressIdentity>,
    cursor: usize,
    last_check: Option<Instant>,
    last_check_at: Option<DateTime<Utc>>,
}

struct Inner {
    state: Mutex<PoolState>,
    probe: Arc<dyn HealthProbe>,
    check_interval: Duration,
    refreshing: AtomicBool,
}

/// Shared pool of egress identities.
///
/// Cheap to clone; clones share state. Identities are never removed, only
/// marked unhealthy and skipped by rotation until a later check passes.
#[derive(Clone)]
pub struct EgressPool {
    inner: Arc<Inner>,
}

impl EgressPool {
    /// Create an empty pool.
    pub fn new(probe: Arc<dyn HealthProbe>, check_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(PoolState::default()),
                probe,
                check_interval,
                refreshing: AtomicBool::new(false),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Load identities from the backing store and run one health check.
    ///
    /// Returns the number of identities loaded.
    pub async fn initialize(&self, source: &dyn IdentitySource) -> StoreResult<usize> {
        let loaded = source.list_active_identities().await?;
        let count = loaded.len();
        {
            let mut state = self.state();
            state.identities = loaded.into_iter().map(reset_health).collect();
            state.cursor = 0;
            state.last_check = None;
            state.last_check_at = None;
        }
        info!(count, "Loaded egress identities");

        if count > 0 {
            self.health_check_all().await;
        }
        Ok(count)
    }

    /// Add an identity at runtime. It stays out of rotation until probed.
    pub fn add_identity(&self, identity: EgressIdentity) {
        debug!(proxy = %identity.endpoint(), "Added egress identity");
        self.state().identities.push(reset_health(identity));
    }

    /// Pick a healthy identity, or `None` when none is healthy.
    ///
    /// Never waits on a health check. If the last check is older than the
    /// configured interval, a refresh is started in the background and
    /// this call serves from the last-known healthy set.
    pub fn acquire(&self, strategy: RotationStrategy) -> Option<EgressIdentity> {
        if self.is_stale() {
            self.spawn_refresh();
        }
        self.acquire_healthy(strategy)
    }

    fn acquire_healthy(&self, strategy: RotationStrategy) -> Option<EgressIdentity> {
        let mut state = self.state();
        let healthy: Vec<usize> = state
            .identities
            .iter()
            .enumerate()
            .filter(|(_, identity)| identity.healthy)
            .map(|(i, _)| i)
            .collect();

        if healthy.is_empty() {
            return None;
        }

        let index = match strategy {
            RotationStrategy::RoundRobin => {
                if state.cursor >= healthy.len() {
                    state.cursor = 0;
                }
                let index = healthy[state.cursor];
                state.cursor = (state.cursor + 1) % healthy.len();
                index
            }
            RotationStrategy::Random => *healthy.choose(&mut rand::thread_rng())?,
        };

        let identity = &mut state.identities[index];
        identity.usage_count += 1;
        identity.last_used_at = Some(Utc::now());
        Some(identity.clone())
    }

    /// Return an identity after use. Identities are shared, so this only
    /// records bookkeeping.
    pub fn release(&self, identity: &EgressIdentity) {
        let mut state = self.state();
        if let Some(entry) = state.identities.iter_mut().find(|i| i.id == identity.id) {
            entry.last_used_at = Some(Utc::now());
        }
        debug!(proxy = %identity.endpoint(), "Released egress identity");
    }

    /// Whether the last health check is older than the check interval.
    pub fn is_stale(&self) -> bool {
        match self.state().last_check {
            Some(at) => at.elapsed() > self.inner.check_interval,
            None => true,
        }
    }

    fn spawn_refresh(&self) {
        if self.inner.refreshing.load(Ordering::Acquire) || self.state().identities.is_empty() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let pool = self.clone();
        handle.spawn(async move {
            pool.health_check_all().await;
        });
    }

    /// Probe every identity concurrently and update health fields.
    ///
    /// Total wall time is bounded by the slowest probe. If a check is
    /// already in flight this returns current stats without probing.
    pub async fn health_check_all(&self) -> PoolStats {
        if self
            .inner
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Health check already running, skipping");
            return self.stats();
        }
        let _guard = RefreshGuard(&self.inner.refreshing);

        let snapshot: Vec<EgressIdentity> = self.state().identities.clone();
        let probe = &self.inner.probe;
        let reports = join_all(snapshot.iter().map(|identity| probe.probe(identity))).await;

        let checked_at = Utc::now();
        {
            let mut state = self.state();
            for (probed, report) in snapshot.iter().zip(reports) {
                let Some(identity) = state.identities.iter_mut().find(|i| i.id == probed.id)
                else {
                    continue;
                };
                identity.last_checked = Some(checked_at);
                match report {
                    ProbeReport::Healthy {
                        latency,
                        observed_ip,
                    } => {
                        identity.healthy = true;
                        identity.latency = Some(latency);
                        identity.last_error = None;
                        if observed_ip.is_some() {
                            identity.observed_ip = observed_ip;
                        }
                    }
                    ProbeReport::Unhealthy { reason } => {
                        debug!(proxy = %identity.endpoint(), reason = %reason, "Egress identity unhealthy");
                        identity.healthy = false;
                        identity.latency = None;
                        identity.last_error = Some(reason);
                    }
                }
            }
            state.last_check = Some(Instant::now());
            state.last_check_at = Some(checked_at);
        }

        let stats = self.stats();
        info!(
            total = stats.total,
            healthy = stats.healthy,
            health_percentage = stats.health_percentage,
            "Egress health check complete"
        );
        if stats.total > 0 && stats.healthy == 0 {
            warn!("No healthy egress identities");
        }
        stats
    }

    /// Re-run the health check every interval until `cancel` fires.
    pub fn spawn_health_monitor(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let pool = self.clone();
        let interval = self.inner.check_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Egress health monitor stopped");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        pool.health_check_all().await;
                    }
                }
            }
        })
    }

    /// Current health summary.
    pub fn stats(&self) -> PoolStats {
        let state = self.state();
        let total = state.identities.len();
        let healthy = state.identities.iter().filter(|i| i.healthy).count();
        let health_percentage = if total == 0 {
            0.0
        } else {
            healthy as f64 / total as f64 * 100.0
        };
        PoolStats {
            total,
            healthy,
            unhealthy: total - healthy,
            health_percentage,
            total_usage: state.identities.iter().map(|i| i.usage_count).sum(),
            last_health_check: state.last_check_at,
            health_check_age: state.last_check.map(|at| at.elapsed()),
        }
    }

    /// Snapshot of all identities, healthy or not.
    pub fn identities(&self) -> Vec<EgressIdentity> {
        self.state().identities.clone()
    }
}

struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn reset_health(mut identity: EgressIdentity) -> EgressIdentity {
    identity.healthy = false;
    identity.last_checked = None;
    identity.latency = None;
    identity.last_error = None;
    identity
}
