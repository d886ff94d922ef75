//! Pointwise logistic ranking: relevant items are labelled 1, sampled
//! irrelevant items 0, and each prediction is pushed towards its label
//! independently.

use super::{RankingMethod, RankingUpdate};
use crate::config::RankingParams;
use crate::models::{FactorVector, RatingBounds, VertexId};
use crate::utils::{sigmoid, softplus};

#[derive(Debug, Clone)]
pub struct Pointwise {
    learn_rate: f32,
    reg: f32,
    bounds: RatingBounds,
    negative_ratio: f32,
}

impl Pointwise {
    pub fn new(params: &RankingParams) -> Self {
        Self {
            learn_rate: params.learn_rate,
            reg: params.reg,
            bounds: params.score_bounds,
            negative_ratio: params.negative_ratio,
        }
    }
}

impl RankingMethod for Pointwise {
    fn name(&self) -> &'static str {
        "pointwise"
    }

    fn buffer_size(&self, num_relevant: usize) -> usize {
        (self.negative_ratio * num_relevant as f32).ceil() as usize
    }

    fn gradient_update(
        &self,
        user: &FactorVector,
        positives: &[(VertexId, FactorVector)],
        negatives: &[(VertexId, FactorVector)],
    ) -> RankingUpdate {
        let mut user_gradient = FactorVector::zeros(user.len());
        let mut item_deltas = Vec::with_capacity(positives.len() + negatives.len());
        let mut loss = 0.0f64;

        let labelled = positives
            .iter()
            .map(|item| (item, 1.0f32))
            .chain(negatives.iter().map(|item| (item, 0.0f32)));
        for ((id, factors), label) in labelled {
            let score = self.bounds.clamp(user.dot(factors));
            let residual = label - sigmoid(score);
            // Cross-entropy: -ln sigmoid(s) for label 1, -ln(1 - sigmoid(s)) for 0.
            loss += if label > 0.5 { softplus(-score) } else { softplus(score) } as f64;

            user_gradient = user_gradient.add_scaled(factors, residual);
            let step = user.scale(residual).add_scaled(factors, -self.reg).scale(self.learn_rate);
            item_deltas.push((*id, step));
        }

        let examples = item_deltas.len();
        let user_delta = if examples == 0 {
            FactorVector::zeros(user.len())
        } else {
            user_gradient.add_scaled(user, -self.reg).scale(self.learn_rate)
        };

        RankingUpdate {
            user_delta,
            item_deltas,
            loss,
            examples,
        }
    }
}
