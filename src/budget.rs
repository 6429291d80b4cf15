//! Byte budget and throughput estimation for the decision cycle.
//!
//! The monitor is fed explicit, caller-timed observations so its estimates are
//! deterministic: each retrieval barrier contributes one bandwidth sample equal
//! to the sum of the per-object throughputs observed in that barrier (the
//! downloads ran in parallel), and the estimate is the mean of a rolling window.
use std::collections::VecDeque;

use serde::Serialize;

/// Default number of barrier samples averaged by [`ThroughputMonitor`].
pub const DEFAULT_THROUGHPUT_WINDOW: usize = 10;

/// Bandwidth and segment duration for one decision cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BudgetSnapshot {
    pub bandwidth_bytes_per_sec: f64,
    pub segment_duration_secs: f64,
}

impl BudgetSnapshot {
    /// One segment per playback frame, so a segment lasts `1 / fps` seconds.
    pub fn for_frame_rate(bandwidth_bytes_per_sec: f64, target_fps: u32) -> Self {
        let segment_duration_secs = if target_fps == 0 {
            0.0
        } else {
            1.0 / f64::from(target_fps)
        };
        Self {
            bandwidth_bytes_per_sec,
            segment_duration_secs,
        }
    }

    /// Bytes that may be spent on the next segment; never negative.
    pub fn byte_budget(&self) -> f64 {
        let budget = self.bandwidth_bytes_per_sec * self.segment_duration_secs;
        if budget.is_finite() && budget > 0.0 {
            budget
        } else {
            0.0
        }
    }
}

/// Source of the current bandwidth estimate.
pub trait NetworkSpeedSampler {
    /// Bytes per second.
    fn current_bandwidth_estimate(&self) -> f64;

    /// Bytes decoded per second, if any decode has been observed.
    fn current_decode_speed_estimate(&self) -> Option<f64>;
}

/// Timing of one completed segment download.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DownloadTiming {
    pub bytes: u64,
    pub transfer_ms: f64,
    pub decode_ms: Option<f64>,
}

impl DownloadTiming {
    pub fn throughput_bytes_per_sec(&self) -> Option<f64> {
        rate(self.bytes, self.transfer_ms)
    }

    pub fn decode_bytes_per_sec(&self) -> Option<f64> {
        self.decode_ms.and_then(|ms| rate(self.bytes, ms))
    }
}

fn rate(bytes: u64, elapsed_ms: f64) -> Option<f64> {
    if elapsed_ms.is_finite() && elapsed_ms > 0.0 {
        Some(bytes as f64 * 1000.0 / elapsed_ms)
    } else {
        None
    }
}

/// Snapshot of the monitor's estimates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThroughputMetrics {
    pub bandwidth_bytes_per_sec: f64,
    pub decode_bytes_per_sec: Option<f64>,
    pub bandwidth_samples: usize,
    pub barriers_observed: u64,
}

/// Rolling-average bandwidth and decode-speed estimator.
#[derive(Debug, Clone)]
pub struct ThroughputMonitor {
    window: usize,
    initial_bandwidth: f64,
    bandwidth: VecDeque<f64>,
    decode: VecDeque<f64>,
    barriers_observed: u64,
}

impl ThroughputMonitor {
    /// A zero `window` is treated as a window of one.
    pub fn new(window: usize, initial_bandwidth_bytes_per_sec: f64) -> Self {
        let window = window.max(1);
        Self {
            window,
            initial_bandwidth: initial_bandwidth_bytes_per_sec,
            bandwidth: VecDeque::with_capacity(window),
            decode: VecDeque::with_capacity(window),
            barriers_observed: 0,
        }
    }

    /// Folds one retrieval barrier into the estimates.
    ///
    /// Downloads with a non-positive or non-finite elapsed time are ignored.
    /// Returns the bandwidth sample pushed, if any download was usable.
    pub fn record_barrier(&mut self, downloads: &[DownloadTiming]) -> Option<f64> {
        self.barriers_observed = self.barriers_observed.saturating_add(1);

        let mut bandwidth = None;
        let mut decode = None;
        for timing in downloads {
            if let Some(bps) = timing.throughput_bytes_per_sec() {
                *bandwidth.get_or_insert(0.0) += bps;
            }
            if let Some(bps) = timing.decode_bytes_per_sec() {
                *decode.get_or_insert(0.0) += bps;
            }
        }
        if let Some(sample) = decode {
            push_bounded(&mut self.decode, sample, self.window);
        }
        if let Some(sample) = bandwidth {
            push_bounded(&mut self.bandwidth, sample, self.window);
        }
        bandwidth
    }

    pub fn metrics(&self) -> ThroughputMetrics {
        ThroughputMetrics {
            bandwidth_bytes_per_sec: self.current_bandwidth_estimate(),
            decode_bytes_per_sec: self.current_decode_speed_estimate(),
            bandwidth_samples: self.bandwidth.len(),
            barriers_observed: self.barriers_observed,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }
}

impl NetworkSpeedSampler for ThroughputMonitor {
    fn current_bandwidth_estimate(&self) -> f64 {
        mean(&self.bandwidth).unwrap_or(self.initial_bandwidth)
    }

    fn current_decode_speed_estimate(&self) -> Option<f64> {
        mean(&self.decode)
    }
}

fn push_bounded(samples: &mut VecDeque<f64>, sample: f64, window: usize) {
    if samples.len() == window {
        samples.pop_front();
    }
    samples.push_back(sample);
}

fn mean(samples: &VecDeque<f64>) -> Option<f64> {
    if samples.is_empty() {
        None
    } else {
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing(bytes: u64, transfer_ms: f64) -> DownloadTiming {
        DownloadTiming {
            bytes,
            transfer_ms,
            decode_ms: None,
        }
    }

    #[test]
    fn byte_budget_is_bandwidth_times_segment() {
        let snap = BudgetSnapshot::for_frame_rate(240_000.0, 24);
        assert!((snap.byte_budget() - 10_000.0).abs() < 1e-9);
        assert_eq!(BudgetSnapshot::for_frame_rate(-5.0, 24).byte_budget(), 0.0);
    }

    #[test]
    fn initial_estimate_before_samples() {
        let monitor = ThroughputMonitor::new(DEFAULT_THROUGHPUT_WINDOW, 1_000.0);
        assert_eq!(monitor.current_bandwidth_estimate(), 1_000.0);
        assert_eq!(monitor.current_decode_speed_estimate(), None);
    }

    #[test]
    fn barrier_sums_parallel_downloads() {
        let mut monitor = ThroughputMonitor::new(4, 0.0);
        let sample = monitor.record_barrier(&[timing(1_000, 100.0), timing(3_000, 1_000.0)]);
        assert_eq!(sample, Some(13_000.0));
        assert_eq!(monitor.current_bandwidth_estimate(), 13_000.0);
    }

    #[test]
    fn rolling_window_evicts_old_samples() {
        let mut monitor = ThroughputMonitor::new(2, 0.0);
        monitor.record_barrier(&[timing(1_000, 1_000.0)]);
        monitor.record_barrier(&[timing(2_000, 1_000.0)]);
        monitor.record_barrier(&[timing(4_000, 1_000.0)]);
        assert_eq!(monitor.current_bandwidth_estimate(), 3_000.0);
        assert_eq!(monitor.metrics().barriers_observed, 3);
    }

    #[test]
    fn zero_elapsed_is_ignored() {
        let mut monitor = ThroughputMonitor::new(2, 500.0);
        assert_eq!(monitor.record_barrier(&[timing(1_000, 0.0)]), None);
        assert_eq!(monitor.current_bandwidth_estimate(), 500.0);
    }

    #[test]
    fn decode_speed_tracked_separately() {
        let mut monitor = ThroughputMonitor::new(2, 0.0);
        monitor.record_barrier(&[DownloadTiming {
            bytes: 2_000,
            transfer_ms: 1_000.0,
            decode_ms: Some(500.0),
        }]);
        assert_eq!(monitor.current_decode_speed_estimate(), Some(4_000.0));
    }
}
