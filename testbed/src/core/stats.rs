//! Elapsed-time statistics over a fan-out result set

use serde::Serialize;
use std::time::Duration;

/// Summary of per-node elapsed times, in seconds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElapsedStats {
    pub count: usize,
    pub mean: f64,
    /// Population standard deviation
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
}

impl ElapsedStats {
    pub fn from_durations(durations: &[Duration]) -> Option<Self> {
        let secs: Vec<f64> = durations.iter().map(Duration::as_secs_f64).collect();
        Self::from_secs(&secs)
    }

    /// `None` for an empty sample
    pub fn from_secs(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let n = samples.len() as f64;
        let sum: f64 = samples.iter().sum();
        let sum_sq: f64 = samples.iter().map(|x| x * x).sum();
        let mean = sum / n;
        // Rounding can push the variance a hair below zero.
        let variance = (sum_sq / n - mean * mean).max(0.0);

        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        Some(Self {
            count: samples.len(),
            mean,
            stddev: variance.sqrt(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            q1: quantile(&sorted, 0.25),
            median: quantile(&sorted, 0.5),
            q3: quantile(&sorted, 0.75),
        })
    }
}

/// Linear interpolation between closest ranks; `sorted` must be non-empty
fn quantile(sorted: &[f64], p: f64) -> f64 {
    let rank = p * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}
