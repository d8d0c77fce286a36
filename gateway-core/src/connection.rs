//! # Connection Manager (C6)
//!
//! Distinct from the circuit breaker: the breaker reacts to call failures,
//! this tracks an explicit lifecycle so an operator can pause/resume a
//! provider independent of whether it's currently erroring.
//!
//! ```text
//! disconnected --connect()-->       connecting
//! connecting   --ok-->               connected
//! connecting   --fail-->             disconnected  (error_count++)
//! connected    --health_fail x3-->   unhealthy
//! connected    --disconnect()-->     disconnecting --> disconnected
//! unhealthy    --health_ok-->        connected      (health_failures=0)
//! ```
//!
//! A `tokio::sync::RwLock`-guarded per-provider record plus a spawned
//! interval task drive the health-check side of this lifecycle.

use crate::error::GatewayError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Unhealthy,
    Disconnecting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub state: ConnectionState,
    pub enabled: bool,
    pub health_failures: u32,
    pub error_count: u32,
    pub last_used: Option<chrono::DateTime<chrono::Utc>>,
    pub connected_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Default for ConnectionRecord {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            enabled: true,
            health_failures: 0,
            error_count: 0,
            last_used: None,
            connected_at: None,
        }
    }
}

/// Consecutive health-check failures while connected before a provider is
/// marked unhealthy.
const UNHEALTHY_AFTER_FAILURES: u32 = 3;

pub struct ConnectionManager {
    records: DashMap<String, Arc<RwLock<ConnectionRecord>>>,
    health_check_interval: Duration,
}

impl ConnectionManager {
    pub fn new(health_check_interval: Duration) -> Self {
        Self {
            records: DashMap::new(),
            health_check_interval,
        }
    }

    fn entry(&self, provider: &str) -> Arc<RwLock<ConnectionRecord>> {
        self.records
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(ConnectionRecord::default())))
            .clone()
    }

    /// `state ≠ connected OR !enabled` blocks new dispatch; `enabled=false`
    /// never drives a state transition by itself, it just gates dispatch.
    pub async fn is_available(&self, provider: &str) -> bool {
        let record = self.entry(provider).read().await.clone();
        record.enabled && record.state == ConnectionState::Connected
    }

    pub async fn connect(&self, provider: &str, connect_ok: bool) -> ConnectionState {
        let entry = self.entry(provider);
        {
            let mut record = entry.write().await;
            record.state = ConnectionState::Connecting;
        }
        let mut record = entry.write().await;
        if connect_ok {
            record.state = ConnectionState::Connected;
            record.connected_at = Some(chrono::Utc::now());
            record.health_failures = 0;
            tracing::info!(%provider, "connected");
        } else {
            record.state = ConnectionState::Disconnected;
            record.error_count += 1;
            tracing::warn!(%provider, "connect failed");
        }
        record.state
    }

    pub async fn disconnect(&self, provider: &str) -> ConnectionState {
        let entry = self.entry(provider);
        {
            let mut record = entry.write().await;
            record.state = ConnectionState::Disconnecting;
        }
        let mut record = entry.write().await;
        record.state = ConnectionState::Disconnected;
        record.connected_at = None;
        tracing::info!(%provider, "disconnected");
        record.state
    }

    pub async fn connect_all(&self, providers: &[String]) {
        for provider in providers {
            self.connect(provider, true).await;
        }
    }

    pub async fn disconnect_all(&self, providers: &[String]) {
        for provider in providers {
            self.disconnect(provider).await;
        }
    }

    pub async fn set_enabled(&self, provider: &str, enabled: bool) {
        let entry = self.entry(provider);
        let mut record = entry.write().await;
        record.enabled = enabled;
    }

    pub async fn mark_used(&self, provider: &str) {
        let entry = self.entry(provider);
        let mut record = entry.write().await;
        record.last_used = Some(chrono::Utc::now());
    }

    /// Report a health check result. Three consecutive failures while
    /// connected transitions to `unhealthy`; a success while unhealthy
    /// restores `connected` and resets the failure count.
    pub async fn record_health_check(&self, provider: &str, healthy: bool) {
        let entry = self.entry(provider);
        let mut record = entry.write().await;

        if healthy {
            record.health_failures = 0;
            if record.state == ConnectionState::Unhealthy {
                record.state = ConnectionState::Connected;
                tracing::info!(%provider, "recovered, connected");
            }
        } else if record.state == ConnectionState::Connected {
            record.health_failures += 1;
            if record.health_failures >= UNHEALTHY_AFTER_FAILURES {
                record.state = ConnectionState::Unhealthy;
                tracing::warn!(%provider, "marked unhealthy after repeated health check failures");
            }
        }
    }

    pub async fn status(&self) -> HashMap<String, ConnectionRecord> {
        let mut out = HashMap::with_capacity(self.records.len());
        for entry in self.records.iter() {
            out.insert(entry.key().clone(), entry.value().read().await.clone());
        }
        out
    }

    pub async fn connected(&self, provider: &str) -> bool {
        self.entry(provider).read().await.state == ConnectionState::Connected
    }

    pub fn health_check_interval(&self) -> Duration {
        self.health_check_interval
    }
}

/// Spawn the periodic health-check task. `check` runs the adapter's
/// `health_check` for each connected provider; its result feeds
/// [`ConnectionManager::record_health_check`].
pub fn spawn_health_check_task<F, Fut>(
    manager: Arc<ConnectionManager>,
    provider_names: Vec<String>,
    check: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), GatewayError>> + Send + 'static,
{
    let interval = manager.health_check_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            for name in &provider_names {
                let healthy = check(name.clone()).await.is_ok();
                manager.record_health_check(name, healthy).await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lifecycle_through_connect_and_disconnect() {
        let manager = ConnectionManager::new(Duration::from_secs(30));
        assert_eq!(
            manager.connect("openai", true).await,
            ConnectionState::Connected
        );
        assert!(manager.is_available("openai").await);

        assert_eq!(
            manager.disconnect("openai").await,
            ConnectionState::Disconnected
        );
        assert!(!manager.is_available("openai").await);
    }

    #[tokio::test]
    async fn three_consecutive_health_failures_marks_unhealthy() {
        let manager = ConnectionManager::new(Duration::from_secs(30));
        manager.connect("openai", true).await;

        for _ in 0..2 {
            manager.record_health_check("openai", false).await;
            assert!(manager.is_available("openai").await);
        }
        manager.record_health_check("openai", false).await;
        assert!(!manager.is_available("openai").await);

        manager.record_health_check("openai", true).await;
        assert!(manager.is_available("openai").await);
    }

    #[tokio::test]
    async fn disabled_blocks_dispatch_without_changing_state() {
        let manager = ConnectionManager::new(Duration::from_secs(30));
        manager.connect("openai", true).await;
        manager.set_enabled("openai", false).await;

        assert!(!manager.is_available("openai").await);
        let status = manager.status().await;
        assert_eq!(status["openai"].state, ConnectionState::Connected);
    }
}
