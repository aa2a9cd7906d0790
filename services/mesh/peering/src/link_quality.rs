//! Link quality tracking and the airtime link metric

use crate::config::AirtimeConfig;
use mesh_routing::MAX_METRIC;
use tracing::debug;

/// Airtime metric unit: 10.24 µs, expressed in nanoseconds
const METRIC_UNIT_NANOS: f64 = 10_240.0;

/// Rolling frame failure average for one peer
#[derive(Debug, Clone, Default)]
pub struct LinkQuality {
    /// Exponentially weighted failure rate in [0, 1]
    fail_avg: f64,
    /// Frames reported delivered
    successes: u64,
    /// Frames reported lost
    failures: u64,
}

impl LinkQuality {
    /// Fresh link with no recorded loss
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a delivered frame
    pub fn record_success(&mut self, weight: f64) {
        self.fail_avg *= 1.0 - weight;
        self.successes += 1;
    }

    /// Record a lost frame
    pub fn record_failure(&mut self, weight: f64) {
        self.fail_avg = self.fail_avg * (1.0 - weight) + weight;
        self.failures += 1;
        debug!(
            "Link failure recorded (avg {:.3}, {} failures)",
            self.fail_avg, self.failures
        );
    }

    /// Current failure average
    pub fn fail_avg(&self) -> f64 {
        self.fail_avg
    }

    /// Frames reported delivered
    pub fn successes(&self) -> u64 {
        self.successes
    }

    /// Frames reported lost
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Airtime cost of this link in 10.24 µs units
    pub fn airtime_metric(&self, config: &AirtimeConfig) -> u32 {
        airtime_metric(config, self.fail_avg)
    }
}

/// `(overhead + bits / rate) / (1 - fail_avg)` in 10.24 µs units, saturated to `MAX_METRIC`
pub fn airtime_metric(config: &AirtimeConfig, fail_avg: f64) -> u32 {
    if config.rate_bps == 0 || fail_avg >= 1.0 {
        return MAX_METRIC;
    }
    let tx_nanos = f64::from(config.test_frame_bits) * 1e9 / config.rate_bps as f64;
    let total_nanos = config.overhead.as_nanos() as f64 + tx_nanos;
    let metric = (total_nanos / (1.0 - fail_avg.max(0.0)) / METRIC_UNIT_NANOS).ceil();
    if !metric.is_finite() || metric >= f64::from(MAX_METRIC) {
        MAX_METRIC
    } else {
        (metric as u32).max(1)
    }
}
