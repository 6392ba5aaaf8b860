use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub const PAGES_SERVED: &str = "timeline_pages_served_total";
const BUILD_INFO: &str = "timeline_web_build_info";

pub fn describe() {
    describe_gauge!(
        BUILD_INFO,
        "Build info for the timeline web server (value is always 1)."
    );
    describe_counter!(
        PAGES_SERVED,
        "Pages of entries served, by surface (timeline, scroll, all, leaderboard, api)."
    );
    describe_counter!(
        common::observability::ERROR_EVENTS_METRIC,
        "ERROR-level tracing events, by target."
    );
}

/// Count one page served on `surface`.
pub fn page_served(surface: &'static str) {
    metrics::counter!(PAGES_SERVED, "surface" => surface).increment(1);
}

/// Install the global Prometheus recorder once and return a handle for rendering `/metrics`.
///
/// Upkeep runs on each `/metrics` request rather than on a background task.
pub fn init_global() -> Result<PrometheusHandle> {
    if let Some(handle) = PROM_HANDLE.get() {
        return Ok(handle.clone());
    }

    describe();
    let installed = PrometheusBuilder::new()
        .install_recorder()
        .context("installing Prometheus recorder for web")?;
    let handle = PROM_HANDLE.get_or_init(|| installed).clone();

    let git_sha = std::env::var("GIT_SHA").unwrap_or_else(|_| "unknown".to_string());
    ::metrics::gauge!(
        BUILD_INFO,
        "version" => env!("CARGO_PKG_VERSION"),
        "git_sha" => git_sha,
    )
    .set(1.0);

    Ok(handle)
}
