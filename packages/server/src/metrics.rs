//! DLQ metrics.
//!
//! Values go to the global `metrics` recorder (Prometheus when the binary
//! installs it) and are mirrored locally so the stats endpoint can report them
//! without a recorder.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

pub const DLQ_SIZE: &str = "dlq_size";
pub const DLQ_PENDING_SIZE: &str = "dlq_pending_size";
pub const DLQ_ADD_TOTAL: &str = "dlq_add_total";

/// Install the Prometheus recorder. Call once at startup.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_gauge!(DLQ_SIZE, "Dead letter items ever recorded");
    describe_gauge!(DLQ_PENDING_SIZE, "Dead letter items not yet requeued");
    describe_counter!(DLQ_ADD_TOTAL, "Jobs promoted to the dead letter queue");

    info!("Prometheus metrics initialized");
    Ok(handle)
}

#[derive(Debug, Default)]
struct Values {
    size: AtomicU64,
    pending: AtomicU64,
    added: AtomicU64,
}

/// Point-in-time copy of the DLQ metric values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub dlq_size: u64,
    pub dlq_pending_size: u64,
    pub dlq_add_total: u64,
}

#[derive(Debug, Clone, Default)]
pub struct DlqMetrics {
    values: Arc<Values>,
}

impl DlqMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one fresh promotion. Never called for duplicate hits.
    pub fn record_promotion(&self, queue_name: &str) {
        self.values.added.fetch_add(1, Ordering::Relaxed);
        counter!(DLQ_ADD_TOTAL, "queue" => queue_name.to_string()).increment(1);
    }

    pub fn set_size(&self, size: u64) {
        self.values.size.store(size, Ordering::Relaxed);
        gauge!(DLQ_SIZE).set(size as f64);
    }

    pub fn set_pending_size(&self, pending: u64) {
        self.values.pending.store(pending, Ordering::Relaxed);
        gauge!(DLQ_PENDING_SIZE).set(pending as f64);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            dlq_size: self.values.size.load(Ordering::Relaxed),
            dlq_pending_size: self.values.pending.load(Ordering::Relaxed),
            dlq_add_total: self.values.added.load(Ordering::Relaxed),
        }
    }
}
