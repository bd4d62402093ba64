use crate::controller::ControllerId;

use std::collections::HashMap;
use std::sync::Arc;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::{Registry, Unit};
use tokio::time::Instant;

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct ControllerLabel {
    pub controller: String,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct TriggerLabel {
    pub controller: String,
    pub action: String,
    pub triggered_by: String,
}

/// Per-controller metric handles over families registered once in the
/// process-wide registry.
pub struct Metrics {
    pub registry: Arc<Registry>,
    pub controllers: HashMap<ControllerId, Arc<ControllerMetrics>>,
}

impl Metrics {
    pub fn new(mut registry: Registry, controller_names: &[&'static str]) -> Self {
        let reconcile_operations = Family::<ControllerLabel, Counter>::default();
        let reconcile_failures = Family::<ControllerLabel, Counter>::default();
        let reconcile_duration = Family::<ControllerLabel, Histogram>::new_with_constructor(|| {
            Histogram::new([0.1, 0.5, 1.0, 5.0, 10.0].into_iter())
        });
        let status_update_errors = Family::<ControllerLabel, Counter>::default();
        let triggered = Family::<TriggerLabel, Counter>::default();
        let watch_operations_failed = Family::<ControllerLabel, Counter>::default();
        let ready = Family::<ControllerLabel, Gauge>::default();

        registry.register(
            "reconcile_operations",
            "Total number of reconcile operations",
            reconcile_operations.clone(),
        );
        registry.register(
            "reconcile_failures",
            "Number of errors that occurred during reconcile operations",
            reconcile_failures.clone(),
        );
        registry.register_with_unit(
            "reconcile_duration",
            "Histogram of reconcile operation latencies",
            Unit::Seconds,
            reconcile_duration.clone(),
        );
        registry.register(
            "status_update_errors",
            "Number of errors during updates to status subresources",
            status_update_errors.clone(),
        );
        registry.register(
            "triggered",
            "Number of watch events that triggered a reconciliation",
            triggered.clone(),
        );
        registry.register(
            "watch_operations_failed",
            "Total number of watch operations that failed",
            watch_operations_failed.clone(),
        );
        registry.register(
            "ready",
            "1 when the controller is ready to reconcile resources, 0 otherwise",
            ready.clone(),
        );

        let controllers = controller_names
            .iter()
            .map(|&id| {
                (
                    id,
                    Arc::new(ControllerMetrics {
                        label: ControllerLabel {
                            controller: id.to_string(),
                        },
                        reconcile_operations: reconcile_operations.clone(),
                        reconcile_failures: reconcile_failures.clone(),
                        reconcile_duration: reconcile_duration.clone(),
                        status_update_errors: status_update_errors.clone(),
                        triggered: triggered.clone(),
                        watch_operations_failed: watch_operations_failed.clone(),
                        ready: ready.clone(),
                    }),
                )
            })
            .collect::<HashMap<ControllerId, Arc<ControllerMetrics>>>();

        Self {
            registry: Arc::new(registry),
            controllers,
        }
    }
}

pub struct ControllerMetrics {
    label: ControllerLabel,
    reconcile_operations: Family<ControllerLabel, Counter>,
    reconcile_failures: Family<ControllerLabel, Counter>,
    reconcile_duration: Family<ControllerLabel, Histogram>,
    status_update_errors: Family<ControllerLabel, Counter>,
    triggered: Family<TriggerLabel, Counter>,
    watch_operations_failed: Family<ControllerLabel, Counter>,
    ready: Family<ControllerLabel, Gauge>,
}

impl ControllerMetrics {
    pub fn reconcile_count_and_measure(&self) -> ReconcileMeasurer {
        self.reconcile_operations.get_or_create(&self.label).inc();
        ReconcileMeasurer {
            start: Instant::now(),
            label: self.label.clone(),
            metric: self.reconcile_duration.clone(),
        }
    }

    pub fn reconcile_failure_inc(&self) {
        self.reconcile_failures.get_or_create(&self.label).inc();
    }

    pub fn status_update_errors_inc(&self) {
        self.status_update_errors.get_or_create(&self.label).inc();
    }

    pub fn triggered_inc(&self, action: Action, triggered_by: &str) {
        self.triggered
            .get_or_create(&TriggerLabel {
                controller: self.label.controller.clone(),
                action: action.as_str().to_string(),
                triggered_by: triggered_by.to_string(),
            })
            .inc();
    }

    pub fn watch_operations_failed_inc(&self) {
        self.watch_operations_failed
            .get_or_create(&self.label)
            .inc();
    }

    pub fn ready_set(&self, status: i64) {
        self.ready.get_or_create(&self.label).set(status);
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    label: ControllerLabel,
    metric: Family<ControllerLabel, Histogram>,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.metric.get_or_create(&self.label).observe(duration);
    }
}

#[derive(Clone, Debug)]
pub enum Action {
    Apply,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Apply => "apply",
            Action::Delete => "delete",
        }
    }
}
