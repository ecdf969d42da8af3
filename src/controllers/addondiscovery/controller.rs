use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::channel::mpsc;
use futures::{future, StreamExt};
use kube::{
    api::{Api, ListParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{self, Action, Controller},
        reflector,
        reflector::ObjectRef,
        watcher,
        watcher::Config,
        WatchStreamExt,
    },
    Resource,
};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::controllers::{Diagnostics, State};
use crate::resources::managedclusteraddons::{ManagedClusterAddOn, ADDON_CONDITION_AVAILABLE};
use crate::resources::managedclusters::ManagedCluster;
use crate::{telemetry, Error, Metrics, Result};

use super::cache::StoreCache;
use super::key::ReconcileKey;
use super::patcher::KubeLabelPatcher;
use super::reconcilers::labels::AddOnLabels;
use super::reconcilers::Reconciler;

const BASE_RETRY_BACKOFF: Duration = Duration::from_millis(5);

// Context for our reconciler
pub(super) struct Context {
    pub reconciler: Reconciler<StoreCache, KubeLabelPatcher>,
    pub cache: StoreCache,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
    /// Checked right before a label patch is sent
    pub shutdown: CancellationToken,
    pub retries: RetryBackoff,
    pub resync_interval: Duration,
}

impl Context {
    pub fn new(
        client: Client,
        metrics: Metrics,
        state: &State,
        cache: StoreCache,
        shutdown: CancellationToken,
    ) -> Arc<Context> {
        Arc::new(Context {
            reconciler: Reconciler::new(
                cache.clone(),
                KubeLabelPatcher::new(client),
                AddOnLabels::new(&state.label_domain),
            ),
            cache,
            diagnostics: state.diagnostics.clone(),
            metrics,
            shutdown,
            retries: RetryBackoff::new(state.max_retry_backoff),
            resync_interval: state.resync_interval,
        })
    }

    async fn reconcile(&self, key: &ReconcileKey) -> Result<()> {
        let _timer = self.metrics.count_and_measure(key);
        {
            let mut diagnostics = self.diagnostics.write().await;
            diagnostics.last_event = Utc::now();
            diagnostics.last_key = Some(key.to_string());
        }

        let res = async {
            self.cache.wait_until_ready().await?;
            self.reconciler.reconcile(key, &self.shutdown).await
        }
        .await;

        match res {
            Ok(patch) => {
                if patch.is_some() {
                    self.metrics.label_patch(key);
                }
                self.retries.reset(key);
                Ok(())
            }
            Err(err) => {
                self.metrics.reconcile_failure(key, &err);
                Err(err)
            }
        }
    }

    fn error_policy(&self, key: &ReconcileKey, error: &Error) -> Action {
        if let Error::Cancelled = error {
            debug!("Reconcile of {} cancelled", key);
            return Action::requeue(Duration::ZERO);
        }
        let backoff = self.retries.next_backoff(key);
        warn!(?backoff, "reconcile of {} failed: {}", key, error);
        Action::requeue(backoff)
    }
}

/// Per-key exponential backoff, doubling from 5ms up to a cap. A success resets the key.
pub(super) struct RetryBackoff {
    failures: Mutex<HashMap<ReconcileKey, u32>>,
    max: Duration,
}

impl RetryBackoff {
    pub fn new(max: Duration) -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
            max: max.max(BASE_RETRY_BACKOFF),
        }
    }

    pub fn next_backoff(&self, key: &ReconcileKey) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(key.clone()).or_insert(0);
        let backoff = 1u32
            .checked_shl(*count)
            .and_then(|factor| BASE_RETRY_BACKOFF.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max));
        *count = count.saturating_add(1);
        backoff
    }

    pub fn reset(&self, key: &ReconcileKey) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

/// Full resync of one ManagedCluster, repeated every resync interval
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any(), trace_id))]
async fn reconcile_cluster(cluster: Arc<ManagedCluster>, ctx: Arc<Context>) -> Result<Action> {
    if let Some(trace_id) = telemetry::get_trace_id() {
        Span::current().record("trace_id", field::display(&trace_id));
    }
    ctx.reconcile(&ReconcileKey::for_cluster(&cluster)).await?;
    Ok(Action::requeue(ctx.resync_interval))
}

/// Targeted resync of the label of one ManagedClusterAddOn
#[instrument(skip(addon, ctx), fields(addon = %addon.name_any(), trace_id))]
async fn reconcile_addon(addon: Arc<ManagedClusterAddOn>, ctx: Arc<Context>) -> Result<Action> {
    if let Some(trace_id) = telemetry::get_trace_id() {
        Span::current().record("trace_id", field::display(&trace_id));
    }
    let Some(key) = ReconcileKey::for_addon(&addon) else {
        debug!("Ignoring ManagedClusterAddOn without a namespace");
        return Ok(Action::await_change());
    };
    ctx.reconcile(&key).await?;
    Ok(Action::await_change())
}

fn cluster_error_policy(cluster: Arc<ManagedCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    ctx.error_policy(&ReconcileKey::for_cluster(&cluster), error)
}

fn addon_error_policy(addon: Arc<ManagedClusterAddOn>, error: &Error, ctx: Arc<Context>) -> Action {
    match ReconcileKey::for_addon(&addon) {
        Some(key) => ctx.error_policy(&key, error),
        None => Action::await_change(),
    }
}

/// Initialize the controllers and run them until `shutdown` is cancelled
pub async fn run(client: Client, metrics: Metrics, state: State, shutdown: CancellationToken) {
    let clusters = Api::<ManagedCluster>::all(client.clone());
    let addons = Api::<ManagedClusterAddOn>::all(client.clone());

    if let Err(e) = clusters.list(&ListParams::default().limit(1)).await {
        error!("ManagedCluster is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }
    if let Err(e) = addons.list(&ListParams::default().limit(1)).await {
        error!("ManagedClusterAddOn is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    let (cluster_store, cluster_writer) = reflector::store();
    let cluster_stream = reflector(
        cluster_writer,
        watcher(clusters, Config::default()).default_backoff(),
    )
    .map(|event| ensure_deletion_change(event))
    .touched_objects()
    .predicate_filter(cluster_predicate);

    // a deleted add-on is gone from the store before its key could be reconciled, so its
    // cluster gets a full resync instead
    let (deleted_tx, deleted_rx) = mpsc::unbounded::<ObjectRef<ManagedCluster>>();
    let (addon_store, addon_writer) = reflector::store();
    let addon_stream = reflector(
        addon_writer,
        watcher(addons, Config::default()).default_backoff(),
    )
    .map(|event| ensure_deletion_change(event))
    .map(move |event| {
        if let Ok(watcher::Event::Delete(addon)) = &event {
            if let Some(cluster) = addon.namespace() {
                let _ = deleted_tx.unbounded_send(ObjectRef::new(&cluster));
            }
        }
        event
    })
    .touched_objects()
    .predicate_filter(addon_predicate);

    let cache = StoreCache::new(cluster_store.clone(), addon_store.clone());
    let ctx = Context::new(client, metrics, &state, cache, shutdown.clone());
    let config = controller::Config::default().concurrency(state.workers);

    info!("Starting addon discovery controllers with {} workers each", state.workers);
    let cluster_controller = Controller::for_stream(cluster_stream, cluster_store)
        .with_config(config.clone())
        .reconcile_on(deleted_rx)
        .graceful_shutdown_on({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        })
        .run(reconcile_cluster, cluster_error_policy, ctx.clone())
        .for_each(|res| log_reconcile_result("ManagedCluster", res));

    let addon_controller = Controller::for_stream(addon_stream, addon_store)
        .with_config(config)
        .graceful_shutdown_on({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        })
        .run(reconcile_addon, addon_error_policy, ctx)
        .for_each(|res| log_reconcile_result("ManagedClusterAddOn", res));

    tokio::join!(cluster_controller, addon_controller);
    info!("addon discovery controllers stopped");
}

// reconciler failures are already reported by the error policies
fn log_reconcile_result<T, E: std::error::Error + 'static>(
    kind: &'static str,
    res: Result<T, controller::Error<Error, E>>,
) -> future::Ready<()> {
    match res {
        Ok(_) | Err(controller::Error::ReconcilerFailed(..)) => {}
        Err(controller::Error::ObjectNotFound(obj)) => {
            debug!("{} {} is gone, skipping reconcile", kind, obj.name);
        }
        Err(e) => warn!("{} controller error: {}", kind, e),
    }
    future::ready(())
}

// deletion apparently doesn't lead to any change in metadata otherwise, which means the predicates
// would drop them.
fn ensure_deletion_change<K: Resource, E>(
    mut event: Result<watcher::Event<K>, E>,
) -> Result<watcher::Event<K>, E> {
    if let Ok(watcher::Event::Delete(ref mut object)) = event {
        let meta = object.meta_mut();
        meta.generation = match meta.generation {
            Some(val) => Some(val + 1),
            None => Some(0),
        }
    }
    event
}

// a cluster needs a full resync when its labels change (someone else may have touched ours)
fn cluster_predicate(cluster: &ManagedCluster) -> Option<u64> {
    let mut hasher = DefaultHasher::new();
    cluster.meta().generation.hash(&mut hasher);
    cluster.metadata.deletion_timestamp.is_some().hash(&mut hasher);
    cluster.labels().hash(&mut hasher);
    Some(hasher.finish())
}

// only the Available condition and deletion affect the label of an add-on
fn addon_predicate(addon: &ManagedClusterAddOn) -> Option<u64> {
    let mut hasher = DefaultHasher::new();
    addon.meta().generation.hash(&mut hasher);
    addon.metadata.deletion_timestamp.is_some().hash(&mut hasher);
    addon
        .conditions()
        .iter()
        .find(|c| c.type_ == ADDON_CONDITION_AVAILABLE)
        .map(|c| c.status.as_str())
        .hash(&mut hasher);
    Some(hasher.finish())
}
