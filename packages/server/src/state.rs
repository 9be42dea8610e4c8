use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use mq::JobQueue;
use sea_orm::DatabaseConnection;

use crate::extractors::auth::AdminAuthorizer;
use crate::metrics::DlqMetrics;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub queue: JobQueue,
    pub metrics: DlqMetrics,
    pub authorizer: Arc<dyn AdminAuthorizer>,
    /// `None` when no Prometheus recorder is installed (tests).
    pub prometheus: Option<PrometheusHandle>,
}
