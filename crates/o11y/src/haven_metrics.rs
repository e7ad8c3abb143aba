use axum::{Router, routing::get};
use metrics::{Unit, describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

#[derive(Clone, Debug)]
pub struct Config {
    pub enable: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self { enable: true }
    }
}

pub fn init(cfg: &Config) -> Result<(), Box<dyn std::error::Error>> {
    if !cfg.enable {
        return Ok(());
    }

    if HANDLE.get().is_none() {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install recorder");
        HANDLE.set(handle).ok();
    }

    describe_metrics();
    Ok(())
}

/// Axum handler that renders the current metrics snapshot.
pub async fn metrics_handler() -> String {
    HANDLE
        .get()
        .map(|h| h.render())
        .unwrap_or_else(|| "# recorder not installed\n".into())
}

/// `/metrics` route to merge into the API router.
pub fn router_with_metrics() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

pub fn describe_metrics() {
    describe_counter!(
        "haven_payloads_observed_total",
        Unit::Count,
        "Payloads submitted to the learn path"
    );
    describe_counter!(
        "haven_schemas_synthesized_total",
        Unit::Count,
        "Schemas synthesized for brand-new resources"
    );
    describe_counter!(
        "haven_schema_expansions_total",
        Unit::Count,
        "Schema expansions forced by rejected payloads"
    );
    describe_counter!(
        "haven_schema_changes_total",
        Unit::Count,
        "Committed schema revisions (inferred or explicit)"
    );
    describe_counter!(
        "haven_validation_requests_total",
        Unit::Count,
        "validate_payload requests served"
    );
    describe_counter!(
        "haven_notifications_dropped_total",
        Unit::Count,
        "Notifications dropped because the queue was full"
    );
    describe_counter!("haven_panics_total", Unit::Count, "Panics captured");
    describe_histogram!(
        "haven_inference_seconds",
        Unit::Seconds,
        "Latency of a single apply-payload inference"
    );
}
