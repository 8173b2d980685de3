//! Liveness sweep daemon.
//!
//! Periodically downgrades the health of agents whose heartbeat is overdue:
//! UNKNOWN past the heartbeat TTL, CRITICAL past the critical TTL. Status is
//! never changed by a sweep.

use chrono::{TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::agent_registry::AgentRegistry;
use crate::domain::errors::DomainResult;
use crate::domain::models::{HealthStatus, LivenessConfig};
use crate::domain::ports::AgentRepository;

/// Counters for the monitor.
#[derive(Debug, Clone, Default)]
pub struct MonitorStatus {
    pub running: bool,
    pub total_sweeps: u64,
    pub failed_sweeps: u64,
    /// Health downgrades applied over the monitor's lifetime
    pub total_downgrades: u64,
    pub last_sweep: Option<Instant>,
}

/// Read-only view of a running monitor.
#[derive(Clone)]
pub struct MonitorHandle {
    status: Arc<RwLock<MonitorStatus>>,
}

impl MonitorHandle {
    pub async fn status(&self) -> MonitorStatus {
        self.status.read().await.clone()
    }
}

pub struct LivenessMonitor<R: AgentRepository + 'static> {
    agents: Arc<AgentRegistry<R>>,
    config: LivenessConfig,
    status: Arc<RwLock<MonitorStatus>>,
}

impl<R: AgentRepository + 'static> LivenessMonitor<R> {
    pub fn new(agents: Arc<AgentRegistry<R>>, config: LivenessConfig) -> Self {
        Self {
            agents,
            config,
            status: Arc::new(RwLock::new(MonitorStatus::default())),
        }
    }

    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle {
            status: Arc::clone(&self.status),
        }
    }

    /// Sweep once against the current clock.
    pub async fn run_once(&self) -> DomainResult<Vec<(Uuid, HealthStatus)>> {
        let ttl = ttl_delta(self.config.heartbeat_ttl_secs);
        let critical_ttl = ttl_delta(self.config.critical_ttl_secs);
        self.agents.sweep_liveness(Utc::now(), ttl, critical_ttl).await
    }

    /// Sweep on every interval tick until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        self.status.write().await.running = true;
        tracing::info!(
            interval_ms = self.config.sweep_interval_ms,
            heartbeat_ttl_secs = self.config.heartbeat_ttl_secs,
            critical_ttl_secs = self.config.critical_ttl_secs,
            "Liveness monitor started"
        );

        let mut ticker = interval(Duration::from_millis(self.config.sweep_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => self.sweep_cycle().await,
            }
        }

        self.status.write().await.running = false;
        tracing::info!("Liveness monitor stopped");
    }

    async fn sweep_cycle(&self) {
        let result = self.run_once().await;
        let mut status = self.status.write().await;
        status.total_sweeps += 1;
        status.last_sweep = Some(Instant::now());
        match result {
            Ok(changed) => status.total_downgrades += changed.len() as u64,
            Err(err) => {
                status.failed_sweeps += 1;
                tracing::error!(error = %err, "Liveness sweep failed");
            }
        }
    }
}

/// TTLs beyond what `TimeDelta` can hold saturate (never stale).
fn ttl_delta(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryAgentRepository;
    use crate::domain::models::{AgentDefaults, AgentStatus, Capability};

    fn registry() -> Arc<AgentRegistry<InMemoryAgentRepository>> {
        Arc::new(AgentRegistry::new(
            Arc::new(InMemoryAgentRepository::new()),
            &AgentDefaults::default(),
        ))
    }

    #[tokio::test]
    async fn test_zero_ttl_downgrades_on_first_sweep() {
        let agents = registry();
        let agent = agents.register(Capability::Validation, Some(1)).await.unwrap();
        agents.start(agent.id).await.unwrap();

        let monitor = LivenessMonitor::new(
            Arc::clone(&agents),
            LivenessConfig {
                sweep_interval_ms: 10,
                heartbeat_ttl_secs: 0,
                critical_ttl_secs: 3600,
            },
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
        let changed = monitor.run_once().await.unwrap();
        assert_eq!(changed, vec![(agent.id, HealthStatus::Unknown)]);

        let agent = agents.get(agent.id).await.unwrap();
        assert_eq!(agent.health, HealthStatus::Unknown);
        assert_eq!(agent.status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let monitor = LivenessMonitor::new(registry(), LivenessConfig {
            sweep_interval_ms: 5,
            ..LivenessConfig::default()
        });
        let handle = monitor.handle();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(monitor.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(handle.status().await.running);
        cancel.cancel();
        task.await.unwrap();

        let status = handle.status().await;
        assert!(!status.running);
        assert!(status.total_sweeps >= 1);
        assert_eq!(status.failed_sweeps, 0);
    }

    #[test]
    fn test_ttl_delta_saturates() {
        assert_eq!(ttl_delta(30), TimeDelta::seconds(30));
        assert_eq!(ttl_delta(10_u64.pow(16)), TimeDelta::MAX);
        assert_eq!(ttl_delta(u64::MAX), TimeDelta::MAX);
    }

    #[tokio::test]
    async fn test_huge_ttls_keep_sweeping() {
        let agents = registry();
        let agent = agents.register(Capability::Validation, Some(1)).await.unwrap();
        agents.start(agent.id).await.unwrap();

        let monitor = LivenessMonitor::new(
            Arc::clone(&agents),
            LivenessConfig {
                sweep_interval_ms: 5,
                heartbeat_ttl_secs: 10_u64.pow(15),
                critical_ttl_secs: 10_u64.pow(16),
            },
        );
        assert!(monitor.run_once().await.unwrap().is_empty());

        let handle = monitor.handle();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(monitor.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        task.await.unwrap();

        let status = handle.status().await;
        assert!(status.total_sweeps >= 1);
        assert_eq!(status.failed_sweeps, 0);
        assert_eq!(agents.get(agent.id).await.unwrap().health, HealthStatus::Healthy);
    }
}
