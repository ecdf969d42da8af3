use crate::controllers::addondiscovery::ReconcileKey;
use crate::Error;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, Registry};
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounter,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
    pub label_patches: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "addon_discovery_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["kind"],
        )
        .unwrap();
        let failures = IntCounterVec::new(
            opts!(
                "addon_discovery_reconciliation_errors_total",
                "reconciliation errors",
            ),
            &["kind", "error"],
        )
        .unwrap();
        let reconciliations =
            IntCounter::new("addon_discovery_reconciliations_total", "reconciliations").unwrap();
        let label_patches = IntCounterVec::new(
            opts!(
                "addon_discovery_label_patches_total",
                "label patches sent to ManagedClusters",
            ),
            &["kind"],
        )
        .unwrap();
        Metrics {
            reconciliations,
            failures,
            reconcile_duration,
            label_patches,
        }
    }
}

impl Metrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.label_patches.clone()))?;
        Ok(self)
    }

    pub fn reconcile_failure(&self, key: &ReconcileKey, e: &Error) {
        self.failures
            .with_label_values(&[key.kind(), e.metric_label()])
            .inc()
    }

    pub fn label_patch(&self, key: &ReconcileKey) {
        self.label_patches.with_label_values(&[key.kind()]).inc()
    }

    pub fn count_and_measure(&self, key: &ReconcileKey) -> ReconcileMeasurer {
        self.reconciliations.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
            kind: key.kind(),
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    metric: HistogramVec,
    kind: &'static str,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric.with_label_values(&[self.kind]).observe(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_are_labelled_by_reconcile_kind() {
        let registry = Registry::new();
        let metrics = Metrics::default().register(&registry).unwrap();

        let cluster = ReconcileKey::Cluster("cluster1".into());
        let addon = ReconcileKey::AddOn {
            cluster: "cluster1".into(),
            addon: "addon1".into(),
        };

        drop(metrics.count_and_measure(&cluster));
        drop(metrics.count_and_measure(&addon));
        metrics.label_patch(&addon);
        metrics.reconcile_failure(&cluster, &Error::Cancelled);
        // failures are not broken down per object
        metrics.reconcile_failure(&ReconcileKey::Cluster("cluster2".into()), &Error::Cancelled);

        assert_eq!(metrics.reconciliations.get(), 2);
        assert_eq!(metrics.label_patches.with_label_values(&["addon"]).get(), 1);
        assert_eq!(metrics.label_patches.with_label_values(&["cluster"]).get(), 0);
        assert_eq!(
            metrics
                .failures
                .with_label_values(&["cluster", "Cancelled"])
                .get(),
            2
        );
        assert_eq!(
            metrics
                .reconcile_duration
                .with_label_values(&["addon"])
                .get_sample_count(),
            1
        );
        assert_eq!(registry.gather().len(), 4);
    }
}
