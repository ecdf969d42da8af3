use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::Client;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::{Metrics, Result};

/// Longest delay accepted for requeues, such as the periodic resync
pub const MAX_REQUEUE_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub mod addondiscovery;

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    /// The reconcile key most recently picked up by a worker
    pub last_key: Option<String>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            last_key: None,
        }
    }
}

/// State shared between the controller and the web server
#[derive(Clone)]
pub struct State {
    /// Diagnostics populated by the reconciler
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    pub registry: prometheus::Registry,

    /// The domain of the reserved `feature.<domain>/addon-<name>` labels
    label_domain: String,
    /// How many objects each controller reconciles concurrently
    workers: u16,
    /// Upper bound of the per-key retry backoff
    max_retry_backoff: Duration,
    /// How often every ManagedCluster gets a full resync regardless of events
    resync_interval: Duration,
}

/// State wrapper around the controller outputs for the web server
impl State {
    pub fn new(
        label_domain: String,
        workers: u16,
        max_retry_backoff: Duration,
        resync_interval: Duration,
    ) -> Self {
        Self {
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            registry: prometheus::Registry::default(),
            label_domain,
            workers: workers.max(1),
            max_retry_backoff: max_retry_backoff.min(MAX_REQUEUE_INTERVAL),
            resync_interval: resync_interval.min(MAX_REQUEUE_INTERVAL),
        }
    }

    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }
}

/// Connect to the cluster and run the controllers until `shutdown` is cancelled
pub async fn run(state: State, shutdown: CancellationToken) -> Result<()> {
    let client = Client::try_default().await?;
    let metrics = Metrics::default().register(&state.registry)?;
    addondiscovery::run(client, metrics, state, shutdown).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_bounds_settings() {
        let state = State::new(
            "open-cluster-management.io".into(),
            0,
            Duration::from_secs(u64::MAX),
            Duration::from_secs(u64::MAX),
        );
        assert_eq!(state.workers, 1);
        assert_eq!(state.max_retry_backoff, MAX_REQUEUE_INTERVAL);
        assert_eq!(state.resync_interval, MAX_REQUEUE_INTERVAL);

        let state = State::new(
            "example.com".into(),
            4,
            Duration::from_secs(30),
            Duration::from_secs(600),
        );
        assert_eq!(state.workers, 4);
        assert_eq!(state.resync_interval, Duration::from_secs(600));
    }
}
