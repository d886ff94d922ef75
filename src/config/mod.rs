use crate::algorithms::initializer::InitMethod;
use crate::error::{Error, Result};
use crate::models::RatingBounds;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub sgd: SgdConfig,
    pub ranking: RankingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub workers: usize,
    /// Base seed; every vertex derives its own stream from it.
    pub seed: u64,
    pub max_supersteps: u64,
}

/// Stochastic gradient descent on explicit ratings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SgdConfig {
    pub dim: usize,
    /// Learning rate.
    pub gamma: f32,
    /// L2 regularization.
    pub lambda: f32,
    /// Last superstep index the controller lets run, warm-up included.
    pub iterations: u64,
    pub min_rating: f32,
    pub max_rating: f32,
    pub rmse_target: Option<f32>,
    /// Minimum squared change of a vector before it is broadcast again.
    pub tolerance: Option<f32>,
    pub init: InitMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub dim: usize,
    pub learn_rate: f32,
    pub iter: u64,
    pub reg: f32,
    pub min_item_id: Option<u64>,
    pub max_item_id: Option<u64>,
    pub min_score: f32,
    pub max_score: f32,
    pub max_sampling_rejections: usize,
    /// Negatives drawn per relevant item by the pointwise method.
    pub negative_ratio: f32,
    pub init: InitMethod,
}

/// Ranking hyperparameters after validation, with the item id bounds resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingParams {
    pub dim: usize,
    pub learn_rate: f32,
    pub iter: u64,
    pub reg: f32,
    pub min_item_id: u64,
    pub max_item_id: u64,
    pub score_bounds: RatingBounds,
    pub max_sampling_rejections: usize,
    pub negative_ratio: f32,
    pub init: InitMethod,
}

/// Declared valid interval of a numeric hyperparameter.
#[derive(Debug, Clone, Copy)]
pub struct ParamRange {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
}

impl ParamRange {
    pub const fn new(name: &'static str, min: f64, max: f64) -> Self {
        Self { name, min, max }
    }

    pub fn check(&self, value: f64) -> Result<()> {
        if value.is_finite() && value >= self.min && value <= self.max {
            Ok(())
        } else {
            Err(Error::OutOfRange {
                name: self.name,
                value,
                min: self.min,
                max: self.max,
            })
        }
    }
}

pub mod ranges {
    use super::ParamRange;

    pub const SGD_DIM: ParamRange = ParamRange::new("sgd.dim", 1.0, 1000.0);
    pub const SGD_GAMMA: ParamRange = ParamRange::new("sgd.gamma", 1e-6, 10.0);
    pub const SGD_LAMBDA: ParamRange = ParamRange::new("sgd.lambda", 0.0, 10.0);
    // A run takes iterations + 1 supersteps and must fit under the default guard.
    pub const SGD_ITERATIONS: ParamRange = ParamRange::new("sgd.iterations", 1.0, 99_999.0);
    pub const SGD_RMSE_TARGET: ParamRange = ParamRange::new("sgd.rmse_target", f64::MIN_POSITIVE, f64::MAX);
    pub const SGD_TOLERANCE: ParamRange = ParamRange::new("sgd.tolerance", f64::MIN_POSITIVE, f64::MAX);

    pub const RANKING_DIM: ParamRange = ParamRange::new("ranking.dim", 1.0, 1000.0);
    pub const RANKING_LEARN_RATE: ParamRange = ParamRange::new("ranking.learn_rate", 0.0001, 10.0);
    pub const RANKING_ITER: ParamRange = ParamRange::new("ranking.iter", 1.0, 1000.0);
    pub const RANKING_REG: ParamRange = ParamRange::new("ranking.reg", 0.00011, 2.0);
    pub const RANKING_MAX_SAMPLING_REJECTIONS: ParamRange =
        ParamRange::new("ranking.max_sampling_rejections", 1.0, 1e9);
    pub const RANKING_NEGATIVE_RATIO: ParamRange = ParamRange::new("ranking.negative_ratio", 0.01, 100.0);

    pub const ENGINE_WORKERS: ParamRange = ParamRange::new("engine.workers", 1.0, 4096.0);
    pub const ENGINE_MAX_SUPERSTEPS: ParamRange = ParamRange::new("engine.max_supersteps", 1.0, 1e12);
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            seed: 42,
            max_supersteps: 100_000,
        }
    }
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            dim: 50,
            gamma: 0.005,
            lambda: 0.01,
            iterations: 10,
            min_rating: 0.0,
            max_rating: 5.0,
            rmse_target: None,
            tolerance: None,
            init: InitMethod::Uniform { low: 0.0, high: 0.01 },
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            dim: 10,
            learn_rate: 0.001,
            iter: 10,
            reg: 0.01,
            min_item_id: None,
            max_item_id: None,
            min_score: -10.0,
            max_score: 10.0,
            max_sampling_rejections: 1_000_000,
            negative_ratio: 1.0,
            init: InitMethod::Uniform { low: 0.0, high: 1.0 },
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        ranges::ENGINE_WORKERS.check(self.workers as f64)?;
        ranges::ENGINE_MAX_SUPERSTEPS.check(self.max_supersteps as f64)?;
        Ok(())
    }
}

impl SgdConfig {
    pub fn validate(&self) -> Result<()> {
        ranges::SGD_DIM.check(self.dim as f64)?;
        ranges::SGD_GAMMA.check(self.gamma as f64)?;
        ranges::SGD_LAMBDA.check(self.lambda as f64)?;
        ranges::SGD_ITERATIONS.check(self.iterations as f64)?;
        if let Some(target) = self.rmse_target {
            ranges::SGD_RMSE_TARGET.check(target as f64)?;
        }
        if let Some(tolerance) = self.tolerance {
            ranges::SGD_TOLERANCE.check(tolerance as f64)?;
        }
        check_bounds("sgd.min_rating", self.min_rating, self.max_rating)?;
        self.init.validate()
    }

    pub fn rating_bounds(&self) -> RatingBounds {
        RatingBounds::new(self.min_rating, self.max_rating)
    }
}

impl RankingConfig {
    pub fn validate(&self) -> Result<RankingParams> {
        let min_item_id = self
            .min_item_id
            .ok_or(Error::MissingParameter("ranking.min_item_id"))?;
        let max_item_id = self
            .max_item_id
            .ok_or(Error::MissingParameter("ranking.max_item_id"))?;
        if min_item_id > max_item_id {
            return Err(Error::InvalidParameter(format!(
                "ranking.min_item_id ({}) is greater than ranking.max_item_id ({})",
                min_item_id, max_item_id
            )));
        }

        ranges::RANKING_DIM.check(self.dim as f64)?;
        ranges::RANKING_LEARN_RATE.check(self.learn_rate as f64)?;
        ranges::RANKING_ITER.check(self.iter as f64)?;
        ranges::RANKING_REG.check(self.reg as f64)?;
        ranges::RANKING_MAX_SAMPLING_REJECTIONS.check(self.max_sampling_rejections as f64)?;
        ranges::RANKING_NEGATIVE_RATIO.check(self.negative_ratio as f64)?;
        check_bounds("ranking.min_score", self.min_score, self.max_score)?;
        self.init.validate()?;

        Ok(RankingParams {
            dim: self.dim,
            learn_rate: self.learn_rate,
            iter: self.iter,
            reg: self.reg,
            min_item_id,
            max_item_id,
            score_bounds: RatingBounds::new(self.min_score, self.max_score),
            max_sampling_rejections: self.max_sampling_rejections,
            negative_ratio: self.negative_ratio,
            init: self.init,
        })
    }
}

fn check_bounds(name: &'static str, min: f32, max: f32) -> Result<()> {
    if !min.is_finite() || !max.is_finite() || min >= max {
        return Err(Error::InvalidParameter(format!(
            "{} must be finite and below its maximum (got [{}, {}])",
            name, min, max
        )));
    }
    Ok(())
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("BSPREC").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
