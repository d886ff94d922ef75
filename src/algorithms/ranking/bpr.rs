//! Bayesian personalized ranking.
//!
//! Each relevant item `i` is paired with a sampled irrelevant item `j` and the
//! user ascends `ln sigmoid(x_ui - x_uj)` with L2 regularization on all three
//! vectors.

use super::{RankingMethod, RankingUpdate};
use crate::config::RankingParams;
use crate::models::{FactorVector, RatingBounds, VertexId};
use crate::utils::{sigmoid, softplus};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Bpr {
    learn_rate: f32,
    reg: f32,
    bounds: RatingBounds,
}

impl Bpr {
    pub fn new(params: &RankingParams) -> Self {
        Self {
            learn_rate: params.learn_rate,
            reg: params.reg,
            bounds: params.score_bounds,
        }
    }
}

impl RankingMethod for Bpr {
    fn name(&self) -> &'static str {
        "bpr"
    }

    /// One irrelevant item per relevant one.
    fn buffer_size(&self, num_relevant: usize) -> usize {
        num_relevant
    }

    fn gradient_update(
        &self,
        user: &FactorVector,
        positives: &[(VertexId, FactorVector)],
        negatives: &[(VertexId, FactorVector)],
    ) -> RankingUpdate {
        let mut user_gradient = FactorVector::zeros(user.len());
        let mut item_deltas: BTreeMap<VertexId, FactorVector> = BTreeMap::new();
        let mut loss = 0.0f64;

        let pairs = if positives.is_empty() || negatives.is_empty() {
            0
        } else {
            positives.len().max(negatives.len())
        };

        for k in 0..pairs {
            let (pos_id, pos) = &positives[k % positives.len()];
            let (neg_id, neg) = &negatives[k % negatives.len()];

            let x_ui = self.bounds.clamp(user.dot(pos));
            let x_uj = self.bounds.clamp(user.dot(neg));
            let x_uij = x_ui - x_uj;
            // d/dx ln sigmoid(x) = sigmoid(-x)
            let z = sigmoid(-x_uij);
            loss += softplus(-x_uij) as f64;

            user_gradient = user_gradient.add_scaled(&pos.sub(neg), z);

            let pos_step = user.scale(z).add_scaled(pos, -self.reg).scale(self.learn_rate);
            let neg_step = user.scale(-z).add_scaled(neg, -self.reg).scale(self.learn_rate);
            accumulate(&mut item_deltas, *pos_id, pos_step);
            accumulate(&mut item_deltas, *neg_id, neg_step);
        }

        let user_delta = if pairs == 0 {
            FactorVector::zeros(user.len())
        } else {
            user_gradient.add_scaled(user, -self.reg).scale(self.learn_rate)
        };

        RankingUpdate {
            user_delta,
            item_deltas: item_deltas.into_iter().collect(),
            loss,
            examples: pairs,
        }
    }
}

fn accumulate(deltas: &mut BTreeMap<VertexId, FactorVector>, id: VertexId, step: FactorVector) {
    match deltas.get_mut(&id) {
        Some(delta) => *delta = delta.add(&step),
        None => {
            deltas.insert(id, step);
        }
    }
}
