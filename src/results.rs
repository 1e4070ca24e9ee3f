// SPDX-License-Identifier: GPL-2.0-or-later
//
// tracebench - Estimate the per-event overhead of tracing backends

//! Collected samples and their summary. The set is append-only and keeps
//! insertion order; summarizing never mutates the stored sequence.

use std::fmt;

/// Ordered nanoseconds-per-event samples, one per successful iteration.
#[derive(Debug, Default)]
pub struct MeasurementSet {
    samples: Vec<f64>,
}

impl MeasurementSet {
    pub fn new() -> Self {
        MeasurementSet::default()
    }

    pub fn push(&mut self, sample: f64) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The full sample sequence in iteration order.
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Descriptive statistics over the samples, None while empty.
    pub fn summary(&self) -> Option<Summary> {
        Summary::of(&self.samples)
    }
}

/// Descriptive statistics of a sample sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

impl Summary {
    pub fn of(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let count = samples.len();
        let mean = samples.iter().sum::<f64>() / count as f64;

        // Sample standard deviation; zero for a single sample.
        let stddev = if count > 1 {
            let variance = samples
                .iter()
                .map(|s| (s - mean) * (s - mean))
                .sum::<f64>()
                / (count - 1) as f64;
            variance.sqrt()
        } else {
            0.0
        };

        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        Some(Summary {
            count,
            mean,
            stddev,
            min: sorted[0],
            max: sorted[count - 1],
            p50: quantile(&sorted, 0.50),
            p90: quantile(&sorted, 0.90),
            p99: quantile(&sorted, 0.99),
        })
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "count {}  mean {:.3}  stddev {:.3}  min {:.3}  p50 {:.3}  p90 {:.3}  p99 {:.3}  max {:.3}",
            self.count, self.mean, self.stddev, self.min, self.p50, self.p90, self.p99, self.max
        )
    }
}

/// Nearest-rank quantile over a sorted, non-empty slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let rank = (q * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_insertion_order() {
        let mut set = MeasurementSet::new();
        set.push(30.0);
        set.push(10.0);
        set.push(20.0);
        assert_eq!(set.samples(), &[30.0, 10.0, 20.0]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn summary_is_deterministic() {
        let summary = Summary::of(&[10.0, 20.0, 30.0]).unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.mean, 20.0);
        assert_eq!(summary.min, 10.0);
        assert_eq!(summary.max, 30.0);
        assert_eq!(summary.p50, 20.0);
        assert_eq!(summary.stddev, 10.0);
    }

    #[test]
    fn summary_does_not_reorder_samples() {
        let mut set = MeasurementSet::new();
        set.push(3.0);
        set.push(1.0);
        set.push(2.0);
        set.summary().unwrap();
        assert_eq!(set.samples(), &[3.0, 1.0, 2.0]);
    }

    #[test]
    fn single_sample_summary() {
        let summary = Summary::of(&[5.0]).unwrap();
        assert_eq!(summary.mean, 5.0);
        assert_eq!(summary.stddev, 0.0);
        assert_eq!(summary.min, 5.0);
        assert_eq!(summary.max, 5.0);
        assert_eq!(summary.p99, 5.0);
    }

    #[test]
    fn empty_set_has_no_summary() {
        assert!(MeasurementSet::new().summary().is_none());
    }
}
