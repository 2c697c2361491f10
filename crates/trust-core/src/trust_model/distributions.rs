//! Incrementally-updated statistical primitives shared by the trust model
//! variants: a Beta distribution over boolean outcomes and a Gaussian over
//! continuous samples, both updated in O(1) memory, plus helpers for
//! evaluating an exponential reconsideration-time distribution.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Exp, Normal};

/// `Beta(alpha, beta)`, updated one good/bad observation at a time.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Beta {
    pub alpha: u32,
    pub beta: u32,
}

impl Beta {
    pub fn new(alpha: u32, beta: u32) -> Self {
        debug_assert!(alpha > 0 && beta > 0);
        Self { alpha, beta }
    }

    pub fn add_good(&mut self) {
        self.alpha += 1;
    }

    pub fn add_bad(&mut self) {
        self.beta += 1;
    }

    pub fn expected(&self) -> f64 {
        self.alpha as f64 / (self.alpha + self.beta) as f64
    }

    pub fn variance(&self) -> f64 {
        let sum = (self.alpha + self.beta) as f64;
        (self.alpha as f64 * self.beta as f64) / (sum * sum * (sum + 1.0))
    }

    /// Additive alpha/beta combine with another distribution (e.g. a
    /// stereotype prior), used to strengthen weak local evidence.
    pub fn combine(&self, other: &Beta) -> Beta {
        Beta::new(self.alpha + other.alpha, self.beta + other.beta)
    }
}

impl Default for Beta {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

/// An incrementally-updated Gaussian (Welford's online algorithm), updated
/// one sample at a time rather than via a batch estimator.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Gaussian {
    pub mean: f64,
    pub variance: f64,
    pub count: u32,
}

impl Gaussian {
    pub fn new(mean: f64, variance: f64) -> Self {
        Self {
            mean,
            variance,
            count: 1,
        }
    }

    /// An empty Gaussian with no samples yet; the first `update` bootstraps
    /// mean/variance from that sample rather than blending against zero.
    pub fn empty() -> Self {
        Self {
            mean: 0.0,
            variance: 0.0,
            count: 0,
        }
    }

    pub fn update(&mut self, value: f64) {
        if self.count == 0 {
            self.mean = value;
            self.variance = 0.0;
            self.count = 1;
            return;
        }

        let new_count = self.count + 1;
        let new_mean = self.mean + (value - self.mean) / new_count as f64;
        let new_variance = (self.variance * ((new_count as f64 - 2.0) / (new_count as f64 - 1.0)))
            + ((value - self.mean) * (value - self.mean)) / new_count as f64;

        self.mean = new_mean;
        self.variance = new_variance.max(0.0);
        self.count = new_count;
    }

    fn stddev(&self) -> f64 {
        self.variance.sqrt().max(1e-9)
    }

    /// `Pr(X >= threshold)` under this distribution.
    pub fn pr_at_least(&self, threshold: f64) -> f64 {
        let normal = Normal::new(self.mean, self.stddev()).unwrap_or_else(|_| Normal::new(0.0, 1.0).unwrap());
        1.0 - normal.cdf(threshold)
    }

    /// `Pr(X < threshold)` under this distribution.
    pub fn pr_less_than(&self, threshold: f64) -> f64 {
        let normal = Normal::new(self.mean, self.stddev()).unwrap_or_else(|_| Normal::new(0.0, 1.0).unwrap());
        normal.cdf(threshold)
    }
}

impl Default for Gaussian {
    fn default() -> Self {
        Self::empty()
    }
}

/// An exponential distribution over the inter-arrival time of good<->bad
/// transitions, used to decide when a bad edge may be reconsidered.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExponentialClock {
    pub rate: f64,
}

impl ExponentialClock {
    pub fn new(rate: f64) -> Self {
        Self { rate: rate.max(1e-9) }
    }

    /// `Pr(T <= elapsed_secs)`, the cumulative probability that a
    /// reconsideration interval of this length has elapsed.
    pub fn cdf(&self, elapsed_secs: f64) -> f64 {
        Exp::new(self.rate)
            .map(|dist| dist.cdf(elapsed_secs))
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beta_expected_matches_classic_formula() {
        let beta = Beta::new(3, 1);
        assert!((beta.expected() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn beta_add_good_and_bad_increment_respective_parameter() {
        let mut beta = Beta::default();
        beta.add_good();
        beta.add_good();
        beta.add_bad();
        assert_eq!(beta, Beta::new(3, 2));
    }

    #[test]
    fn gaussian_incremental_update_matches_batch_mean() {
        let mut g = Gaussian::new(1.0, 0.0);
        g.update(2.0);
        g.update(3.0);
        let expected_mean = (1.0 + 2.0 + 3.0) / 3.0;
        assert!((g.mean - expected_mean).abs() < 1e-9);
    }

    #[test]
    fn exponential_cdf_increases_with_elapsed_time() {
        let clock = ExponentialClock::new(0.01);
        assert!(clock.cdf(1.0) < clock.cdf(1000.0));
    }
}
