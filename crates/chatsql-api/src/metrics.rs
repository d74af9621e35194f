//! Prometheus metrics recorder. Ambient observability stack (spec §7),
//! independent of the conversational domain logic it measures.

use std::sync::OnceLock;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the global recorder. Call exactly once at process startup,
/// before any `metrics::counter!`/`histogram!` call fires.
pub fn install() -> Result<(), BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = HANDLE.set(handle);
    Ok(())
}

/// Renders the current snapshot in Prometheus text exposition format, or
/// `None` if `install` was never called (unit tests don't install one).
pub fn render() -> Option<String> {
    HANDLE.get().map(|handle| handle.render())
}
