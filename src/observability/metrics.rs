//! Metrics collection and exposition.
//!
//! # Metrics
//! - `bridge_requests_total` (counter): requests by route, status
//! - `bridge_request_duration_seconds` (histogram): latency by route
//! - `bridge_heartbeats_total` (counter): heartbeat frames skipped
//! - `bridge_protocol_errors_total` (counter): bridge errors by kind
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const REQUESTS_TOTAL: &str = "bridge_requests_total";
pub const REQUEST_DURATION: &str = "bridge_request_duration_seconds";
pub const HEARTBEATS_TOTAL: &str = "bridge_heartbeats_total";
pub const PROTOCOL_ERRORS_TOTAL: &str = "bridge_protocol_errors_total";

/// Install the Prometheus recorder and serve it on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// One finished HTTP request.
pub fn record_request(route: &str, status: u16, start: Instant) {
    metrics::counter!(
        REQUESTS_TOTAL,
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(REQUEST_DURATION, "route" => route.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_heartbeats(count: u64) {
    if count > 0 {
        metrics::counter!(HEARTBEATS_TOTAL).increment(count);
    }
}

pub fn record_protocol_error(kind: &'static str) {
    metrics::counter!(PROTOCOL_ERRORS_TOTAL, "kind" => kind).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_into_local_recorder() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_request("users", 200, Instant::now());
            record_heartbeats(2);
            record_heartbeats(0);
            record_protocol_error("incomplete_frame");
        });

        let rendered = handle.render();
        assert!(rendered.contains(r#"bridge_requests_total{route="users",status="200"} 1"#));
        assert!(rendered.contains("bridge_heartbeats_total 2"));
        assert!(rendered.contains(r#"bridge_protocol_errors_total{kind="incomplete_frame"} 1"#));
    }

    #[test]
    fn no_recorder_is_noop() {
        record_protocol_error("hessian");
    }
}
