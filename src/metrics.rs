use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use tracing::{trace, warn};

// Trace-based counters; the Prometheus recorder only serves what is recorded here.

static PROMETHEUS: Lazy<PrometheusHandle> = Lazy::new(|| {
    PrometheusBuilder::new()
        .install_recorder()
        .unwrap_or_else(|err| {
            warn!(target = "export.metrics", error = %err, "global recorder unavailable; metrics stay local");
            PrometheusBuilder::new().build_recorder().handle()
        })
});

/// Handle to the process-wide recorder. Installing happens on first use.
pub fn prometheus_handle() -> PrometheusHandle {
    PROMETHEUS.clone()
}

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "export.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "export.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn record_outcome(outcome: &'static str) {
    trace!(
        target = "export.metrics",
        outcome = outcome,
        "record_outcome_inc"
    );
}
