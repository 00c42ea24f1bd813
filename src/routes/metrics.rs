use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics: Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the service records.
pub fn describe() {
    metrics::describe_histogram!(
        "gateway_request_seconds",
        "Latency of calls to the AI provider"
    );
    metrics::describe_counter!(
        "diagnosis_jobs_total",
        "Diagnosis jobs finished, by terminal status"
    );
    metrics::describe_histogram!(
        "diagnosis_job_seconds",
        "Time to run a diagnosis job end to end"
    );
    metrics::describe_gauge!(
        "diagnosis_queue_depth",
        "Pending jobs in the Redis diagnosis queue"
    );
}
