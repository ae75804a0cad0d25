//! Request and token refresh metrics
//!
//! - `solid_pod_requests_total` (counter): labels `method`, `outcome`
//! - `solid_pod_request_duration_seconds` (histogram): label `method`
//! - `solid_pod_token_refresh_total` (counter): label `outcome`
//!
//! Recording is a no-op until the host installs a recorder.

pub const REQUESTS_TOTAL: &str = "solid_pod_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "solid_pod_request_duration_seconds";
pub const TOKEN_REFRESH_TOTAL: &str = "solid_pod_token_refresh_total";

/// Record one exchange with the pod.
pub fn record_request(method: &str, outcome: &'static str, duration_secs: f64) {
    metrics::counter!(REQUESTS_TOTAL, "method" => method.to_string(), "outcome" => outcome)
        .increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, "method" => method.to_string())
        .record(duration_secs);
}

/// Record one refresh attempt: `success`, `shared` (another caller already
/// refreshed), `rejected` or `error`.
pub fn record_refresh(outcome: &'static str) {
    metrics::counter!(TOKEN_REFRESH_TOTAL, "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_request("GET", "success", 0.01);
        record_refresh("success");
    }

    #[test]
    fn record_request_carries_method_and_outcome() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request("HEAD", "not_found", 0.02);
        record_request("PUT", "success", 0.3);

        let output = handle.render();
        assert!(output.contains("solid_pod_requests_total"));
        assert!(output.contains("method=\"HEAD\""));
        assert!(output.contains("outcome=\"not_found\""));
        assert!(output.contains("method=\"PUT\""));
        assert!(output.contains("solid_pod_request_duration_seconds"));
    }

    #[test]
    fn record_refresh_counts_by_outcome() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_refresh("success");
        record_refresh("success");
        record_refresh("rejected");

        let output = handle.render();
        assert!(output.contains("solid_pod_token_refresh_total{outcome=\"success\"} 2"));
        assert!(output.contains("solid_pod_token_refresh_total{outcome=\"rejected\"} 1"));
    }
}
