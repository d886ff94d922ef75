use crate::error::{Error, Result};
use crate::models::{FactorVector, Vertex, VertexId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::f32::consts::PI;
use std::hash::{Hash, Hasher};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum InitMethod {
    Uniform { low: f32, high: f32 },
    XavierUniform,
    Normal { mean: f32, std_dev: f32 },
}

impl InitMethod {
    pub fn validate(&self) -> Result<()> {
        match *self {
            InitMethod::Uniform { low, high } if !(low.is_finite() && high.is_finite() && low < high) => {
                Err(Error::InvalidParameter(format!(
                    "uniform initialization needs low < high (got [{}, {}))",
                    low, high
                )))
            }
            InitMethod::Normal { mean, std_dev } if !(mean.is_finite() && std_dev.is_finite() && std_dev >= 0.0) => {
                Err(Error::InvalidParameter(format!(
                    "normal initialization needs a finite mean and std_dev >= 0 (got {}, {})",
                    mean, std_dev
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn sample<R: Rng>(&self, rng: &mut R, dim: usize) -> Vec<f32> {
        match *self {
            InitMethod::Uniform { low, high } => (0..dim).map(|_| rng.gen_range(low..high)).collect(),
            InitMethod::XavierUniform => {
                let limit = (6.0 / dim as f32).sqrt();
                (0..dim).map(|_| rng.gen_range(-limit..limit)).collect()
            }
            InitMethod::Normal { mean, std_dev } => (0..dim)
                .map(|_| {
                    // Box-Muller; 1 - u keeps ln away from zero.
                    let u1: f32 = 1.0 - rng.gen::<f32>();
                    let u2: f32 = rng.gen();
                    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
                    z0 * std_dev + mean
                })
                .collect(),
        }
    }
}

/// Random stream owned by one vertex, independent of evaluation order.
///
/// `stream` separates uses within a run, e.g. the superstep a draw happens in.
pub fn vertex_rng(seed: u64, id: VertexId, stream: u64) -> StdRng {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    id.hash(&mut hasher);
    stream.hash(&mut hasher);
    StdRng::seed_from_u64(hasher.finish())
}

#[derive(Debug, Clone)]
pub struct FactorInitializer {
    method: InitMethod,
    dim: usize,
    seed: u64,
}

impl FactorInitializer {
    pub fn new(method: InitMethod, dim: usize, seed: u64) -> Self {
        Self { method, dim, seed }
    }

    pub fn initialize(&self, id: VertexId) -> FactorVector {
        let mut rng = vertex_rng(self.seed, id, u64::MAX);
        FactorVector::from_vec(self.method.sample(&mut rng, self.dim))
    }

    /// Gives `vertex` fresh factors when it has none or the wrong size.
    /// Returns whether it did.
    pub fn ensure(&self, vertex: &mut Vertex) -> bool {
        match vertex.value() {
            Some(value) if value.len() == self.dim => false,
            current => {
                if let Some(value) = current {
                    warn!(
                        "Re-initializing {} with {} factors (expected {})",
                        vertex.id(),
                        value.len(),
                        self.dim
                    );
                }
                let fresh = self.initialize(vertex.id());
                vertex.set_value(fresh);
                true
            }
        }
    }
}
