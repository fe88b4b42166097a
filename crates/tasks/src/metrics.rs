//! Metrics instrumentation for grab tasks.

use std::time::Instant;

/// Increment the poll counter.
pub fn record_poll() {
    metrics::counter!("grab_poll_count", 1);
}

/// Increment the power-on attempt counter.
pub fn record_power_on_attempt() {
    metrics::counter!("grab_power_on_attempts", 1);
}

/// Increment the successful grab counter.
pub fn record_success() {
    metrics::counter!("grab_success_count", 1);
}

/// Increment the swallowed API error counter.
pub fn record_api_error() {
    metrics::counter!("grab_api_errors", 1);
}

/// RAII timer recording platform call latency on drop.
pub struct ApiTimer {
    start: Instant,
}

impl ApiTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Drop for ApiTimer {
    fn drop(&mut self) {
        let duration_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        metrics::histogram!("grab_api_latency", duration_ms);
    }
}
