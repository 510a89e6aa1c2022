//! Prometheus metrics exposition
//!
//! - `reflector_requests_total` (counter): labels `endpoint`, `status`, `method`
//! - `reflector_request_duration_seconds` (histogram): label `endpoint`
//! - `reflector_body_parse_errors_total` (counter): labels `endpoint`, `error_type`

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_BUCKETS: &[f64] = &[0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("reflector_request_duration_seconds".to_string()),
            DURATION_BUCKETS,
        )
        .expect("bucket list is non-empty")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Duration is registered with explicit buckets so it renders as a histogram
/// (`_bucket` lines) rather than a summary.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed request with endpoint, status and method labels.
pub fn record_request(endpoint: &str, status: u16, method: &str, duration_secs: f64) {
    metrics::counter!(
        "reflector_requests_total",
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string(),
        "method" => method.to_string()
    )
    .increment(1);
    metrics::histogram!("reflector_request_duration_seconds", "endpoint" => endpoint.to_string())
        .record(duration_secs);
}

/// Record a request whose body could not be parsed.
pub fn record_parse_error(endpoint: &str, error_type: &'static str) {
    metrics::counter!(
        "reflector_body_parse_errors_total",
        "endpoint" => endpoint.to_string(),
        "error_type" => error_type
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_request("ep", 200, "GET", 0.05);
        record_parse_error("ep", "invalid_utf8");
    }

    /// Isolated recorder/handle pair; install_recorder() would claim the
    /// process-wide singleton and panic on a second call.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = builder().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_request_increments_counter_and_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request("reflecting-tcp", 200, "GET", 0.002);
        record_request("reflecting-tcp", 307, "POST", 0.2);

        let output = handle.render();
        assert!(output.contains("reflector_requests_total"));
        assert!(output.contains("endpoint=\"reflecting-tcp\""));
        assert!(output.contains("status=\"307\""));
        assert!(output.contains("method=\"POST\""));
        assert!(
            output.contains("reflector_request_duration_seconds_bucket"),
            "histogram must render _bucket lines"
        );
        assert!(output.contains("le=\"0.001\""), "1ms bucket must exist");
    }

    #[test]
    fn record_parse_error_carries_error_type() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_parse_error("ep", "malformed_percent_encoding");

        let output = handle.render();
        assert!(output.contains("reflector_body_parse_errors_total"));
        assert!(output.contains("error_type=\"malformed_percent_encoding\""));
    }
}
