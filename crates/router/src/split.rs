//! Primary selection.
//!
//! A [`SplitPolicy`] picks which response is authoritative for a call. The
//! deployed behaviour is weight 0: backend 0 always answers.

use rand::Rng;

pub trait SplitPolicy: Send + Sync + 'static {
    /// Index of the authoritative entry among `candidates` backends (or
    /// gathered responses). Must return 0 when `candidates` is 0.
    fn select(&self, candidates: usize) -> usize;

    /// Weight reported to metrics for each decision.
    fn weight(&self) -> f64;
}

/// Backend 0 is always the primary.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysPrimary;

impl SplitPolicy for AlwaysPrimary {
    fn select(&self, _candidates: usize) -> usize {
        0
    }

    fn weight(&self) -> f64 {
        0.0
    }
}

/// Hands authority to index 1 with probability `weight`.
#[derive(Debug, Clone, Copy)]
pub struct WeightedSplit {
    weight: f64,
}

impl WeightedSplit {
    /// `weight` is clamped into [0, 1]; NaN is treated as 0.
    pub fn new(weight: f64) -> Self {
        let weight = if weight.is_nan() {
            0.0
        } else {
            weight.clamp(0.0, 1.0)
        };
        Self { weight }
    }
}

impl SplitPolicy for WeightedSplit {
    fn select(&self, candidates: usize) -> usize {
        if candidates < 2 {
            return 0;
        }
        if rand::thread_rng().gen_bool(self.weight) {
            1
        } else {
            0
        }
    }

    fn weight(&self) -> f64 {
        self.weight
    }
}
