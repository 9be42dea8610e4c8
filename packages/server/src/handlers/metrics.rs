use axum::extract::State;

use crate::state::AppState;

/// Prometheus text exposition. Empty when no recorder is installed.
pub async fn render_metrics(State(state): State<AppState>) -> String {
    state
        .prometheus
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default()
}
