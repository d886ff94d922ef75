use serde::{Deserialize, Serialize};

/// Root mean squared error from a summed squared error and the number of
/// ratings behind it. `None` when there is nothing to average over.
pub fn rmse(sum_squared_error: f64, num_ratings: f64) -> Option<f64> {
    if num_ratings > 0.0 && sum_squared_error.is_finite() && sum_squared_error >= 0.0 {
        Some((sum_squared_error / num_ratings).sqrt())
    } else {
        None
    }
}

/// Training error observed after one steady-state SGD superstep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RmseSample {
    pub superstep: u64,
    pub rmse: f64,
}

/// Ranking loss of one training iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossSample {
    pub iteration: u64,
    pub loss: f64,
    pub examples: u64,
}

impl LossSample {
    pub fn new(iteration: u64, loss: f64, examples: f64) -> Self {
        Self {
            iteration,
            loss,
            examples: examples.max(0.0).round() as u64,
        }
    }

    /// Loss per training example, zero for an iteration without examples.
    pub fn mean_loss(&self) -> f64 {
        if self.examples == 0 {
            0.0
        } else {
            self.loss / self.examples as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rmse() {
        let value = rmse(8.0, 2.0).unwrap();
        assert!((value - 2.0).abs() < 1e-12);
        assert_eq!(rmse(0.0, 4.0), Some(0.0));
    }

    #[test]
    fn test_rmse_without_ratings_is_unavailable() {
        assert_eq!(rmse(3.0, 0.0), None);
        assert_eq!(rmse(f64::NAN, 2.0), None);
    }

    #[test]
    fn test_mean_loss() {
        assert_eq!(LossSample::new(1, 3.0, 6.0).mean_loss(), 0.5);
        assert_eq!(LossSample::new(1, 3.0, 0.0).mean_loss(), 0.0);
    }
}
