//! Token-usage spike detection over a sliding window.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::config::AnomalyConfig;

/// Result of observing a single token total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    /// Whether this value is classified as anomalous.
    pub is_anomaly: bool,
    /// Signed z-score of the value against the window, 0.0 when undefined.
    pub z_score: f64,
    pub mean: f64,
    pub std_dev: f64,
    /// Window size after the value was pushed.
    pub samples: usize,
}

/// Z-score detector over a bounded FIFO of recent per-call token totals.
///
/// Purely observational: callers decide what to do with a flagged value.
pub struct AnomalyDetector {
    window_size: usize,
    min_samples: usize,
    z_threshold: f64,
    history: Mutex<VecDeque<f64>>,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(&AnomalyConfig::default())
    }
}

impl AnomalyDetector {
    pub fn new(config: &AnomalyConfig) -> Self {
        let window_size = config.window_size.max(1);
        Self {
            window_size,
            min_samples: config.min_samples,
            z_threshold: config.z_threshold,
            history: Mutex::new(VecDeque::with_capacity(window_size)),
        }
    }

    /// Push `value` into the window, evicting the oldest entry when full,
    /// then score it against the window including itself.
    pub fn observe(&self, value: f64) -> AnomalyResult {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.push_back(value);
        while history.len() > self.window_size {
            history.pop_front();
        }

        let samples = history.len();
        let data = history.make_contiguous();
        let mean_val = mean(data);
        let std_val = population_std(data, mean_val);

        if samples < self.min_samples || std_val == 0.0 {
            return AnomalyResult {
                is_anomaly: false,
                z_score: 0.0,
                mean: mean_val,
                std_dev: std_val,
                samples,
            };
        }

        let z_score = (value - mean_val) / std_val;
        AnomalyResult {
            is_anomaly: z_score.abs() > self.z_threshold,
            z_score,
            mean: mean_val,
            std_dev: std_val,
            samples,
        }
    }

    /// Convenience wrapper returning only the flag.
    pub fn is_anomaly(&self, value: f64) -> bool {
        self.observe(value).is_anomaly
    }

    /// Current number of values held.
    pub fn len(&self) -> usize {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }
}

fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Population standard deviation (divides by n).
fn population_std(data: &[f64], mean_val: f64) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let variance = data.iter().map(|x| (x - mean_val).powi(2)).sum::<f64>() / data.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_flags_below_min_samples() {
        let detector = AnomalyDetector::default();
        for _ in 0..8 {
            assert!(!detector.is_anomaly(100.0));
        }
        // ninth sample is a huge spike but the window is still too small
        assert!(!detector.is_anomaly(1_000_000.0));
        assert_eq!(detector.len(), 9);
    }

    #[test]
    fn test_flags_spike_after_warmup() {
        let detector = AnomalyDetector::default();
        for i in 0..40 {
            detector.observe(100.0 + (i % 5) as f64);
        }
        let result = detector.observe(5_000.0);
        assert!(result.is_anomaly);
        assert!(result.z_score > 3.0);
        assert_eq!(result.samples, 41);
    }

    #[test]
    fn test_zero_std_never_flags() {
        let detector = AnomalyDetector::default();
        for _ in 0..30 {
            let result = detector.observe(18.0);
            assert!(!result.is_anomaly);
            assert_eq!(result.std_dev, 0.0);
        }
    }

    #[test]
    fn test_window_evicts_oldest() {
        let detector = AnomalyDetector::new(&AnomalyConfig {
            window_size: 5,
            min_samples: 2,
            z_threshold: 3.0,
        });
        for v in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0] {
            detector.observe(v);
        }
        assert_eq!(detector.len(), 5);
        let history = detector.history.lock().unwrap();
        assert_eq!(history.front(), Some(&3.0));
    }

    #[test]
    fn test_exactly_min_samples_can_flag() {
        // nine values at 10 and one at 1000: population z of the spike is exactly 3.0
        let detector = AnomalyDetector::default();
        for _ in 0..9 {
            detector.observe(10.0);
        }
        let result = detector.observe(1000.0);
        assert_eq!(result.samples, 10);
        assert!((result.z_score - 3.0).abs() < 1e-9);
        assert!(!result.is_anomaly, "threshold is strict");
    }

    #[test]
    fn test_population_std() {
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let m = mean(&data);
        assert_eq!(m, 5.0);
        assert!((population_std(&data, m) - 2.0).abs() < 1e-12);
    }
}
