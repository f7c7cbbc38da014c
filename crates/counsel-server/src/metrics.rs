//! Prometheus metrics recorder and `/metrics` rendering.

use counsel_core::CoreError;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder. Call once, before anything is
/// recorded; a second call fails.
pub fn install_recorder() -> Result<PrometheusHandle, CoreError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| CoreError::configuration(format!("failed to install metrics recorder: {e}")))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Names recorded by this crate. The library crates record their own:
// `rpc_requests_total`, `rpc_request_duration_seconds`,
// `fanout_deliveries_total`, `fanout_pruned_total`, `bus_messages_total`,
// `cache_hits_total`, `cache_misses_total`, `cache_invalidations_total`.

/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Upgrades refused because the gateway is full (counter).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
/// Frames posted through the connection-management API (counter, labels: outcome).
pub const CONNECTION_POSTS_TOTAL: &str = "connection_posts_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!(WS_CONNECTIONS_TOTAL).increment(2);
        });
        assert!(handle.render().contains("ws_connections_total 2"));
    }

    #[test]
    fn metric_names_are_snake_case() {
        for name in [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTION_DURATION_SECONDS,
            WS_REJECTED_TOTAL,
            CONNECTION_POSTS_TOTAL,
        ] {
            assert!(name.chars().all(|c| c.is_ascii_lowercase() || c == '_'), "{name}");
        }
    }
}
