//! Rating prediction by stochastic gradient descent.
//!
//! Users and items exchange their factors along rating edges every superstep
//! and each side moves its own vector against the squared prediction error.
//! Two warm-up supersteps seed the vectors: users first, then items, which
//! also store the reverse item-to-user edges.

use super::initializer::FactorInitializer;
use super::{ComputeContext, Phase, VertexComputation};
use crate::config::SgdConfig;
use crate::error::{Error, Result};
use crate::models::{Edge, FactorVector, Message, Payload, RatingBounds, Vertex, VertexId};
use tracing::debug;

/// Sum of squared prediction errors after each steady-state update.
pub const RMSE_AGGREGATOR: &str = "sgd.rmse.aggregator";
/// Number of observed ratings, contributed by users while they initialize.
pub const NUM_RATINGS_AGGREGATOR: &str = "sgd.num_ratings";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SgdPhase {
    InitUsers,
    InitItems,
    SteadyState,
}

impl SgdPhase {
    pub fn next(self) -> Self {
        match self {
            SgdPhase::InitUsers => SgdPhase::InitItems,
            SgdPhase::InitItems | SgdPhase::SteadyState => SgdPhase::SteadyState,
        }
    }
}

impl Phase for SgdPhase {
    fn name(&self) -> &'static str {
        match self {
            SgdPhase::InitUsers => "init-users",
            SgdPhase::InitItems => "init-items",
            SgdPhase::SteadyState => "sgd",
        }
    }
}

/// One SGD step of `value` against a single observed rating:
///
/// `v' = v - gamma * (lambda * v + err * u)` with
/// `err = clamp(v . u) - rating`.
pub fn sgd_update(
    value: &FactorVector,
    peer: &FactorVector,
    rating: f32,
    bounds: RatingBounds,
    lambda: f32,
    gamma: f32,
) -> FactorVector {
    let err = bounds.clamp(value.dot(peer)) - rating;
    let gradient = value.scale(lambda).add_scaled(peer, err);
    value.add_scaled(&gradient, -gamma)
}

#[derive(Debug, Clone)]
pub struct Sgd {
    lambda: f32,
    gamma: f32,
    bounds: RatingBounds,
    tolerance: Option<f32>,
    initializer: FactorInitializer,
}

impl Sgd {
    pub fn new(config: &SgdConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            lambda: config.lambda,
            gamma: config.gamma,
            bounds: config.rating_bounds(),
            tolerance: config.tolerance,
            initializer: FactorInitializer::new(config.init, config.dim, seed),
        })
    }

    fn init_users(&self, vertex: &mut Vertex, ctx: &mut dyn ComputeContext) {
        if !vertex.id().is_user() {
            return;
        }
        let value = self.initializer.initialize(vertex.id());
        vertex.set_value(value.clone());

        for edge in vertex.edges() {
            ctx.send_message(edge.target, Message::factors(vertex.id(), value.clone(), Some(edge.weight)));
        }
        ctx.aggregate(NUM_RATINGS_AGGREGATOR, vertex.num_edges() as f64);
    }

    fn init_items(&self, vertex: &mut Vertex, messages: &[Message], ctx: &mut dyn ComputeContext) -> Result<()> {
        if !vertex.id().is_item() {
            return Ok(());
        }
        let value = self.initializer.initialize(vertex.id());
        vertex.set_value(value.clone());

        for msg in messages {
            match msg.payload {
                Payload::Factors { rating: Some(rating), .. } => {
                    vertex.add_edge(Edge { target: msg.sender, weight: rating });
                }
                ref other => return Err(self.unexpected(vertex, msg.sender, other, SgdPhase::InitItems)),
            }
        }

        ctx.send_message_to_all_edges(vertex, Message::factors(vertex.id(), value, None));
        Ok(())
    }

    fn steady_state(&self, vertex: &mut Vertex, messages: &[Message], ctx: &mut dyn ComputeContext) -> Result<()> {
        self.initializer.ensure(vertex);
        let old_value = vertex
            .value()
            .cloned()
            .unwrap_or_else(|| self.initializer.initialize(vertex.id()));

        let mut observed = Vec::with_capacity(messages.len());
        let mut value = old_value.clone();
        for msg in messages {
            let factors = match &msg.payload {
                Payload::Factors { factors, .. } => factors,
                other => return Err(self.unexpected(vertex, msg.sender, other, SgdPhase::SteadyState)),
            };
            if factors.len() != value.len() {
                return Err(Error::DimensionMismatch {
                    expected: value.len(),
                    actual: factors.len(),
                });
            }
            let rating = vertex.edge_value(&msg.sender).ok_or(Error::MissingEdge {
                vertex: vertex.id(),
                sender: msg.sender,
            })?;

            value = sgd_update(&value, factors, rating, self.bounds, self.lambda, self.gamma);
            observed.push((factors, rating));
        }

        let squared_error: f64 = observed
            .iter()
            .map(|(factors, rating)| {
                let err = self.bounds.clamp(value.dot(factors)) - rating;
                (err * err) as f64
            })
            .sum();
        ctx.aggregate(RMSE_AGGREGATOR, squared_error);

        let broadcast = match self.tolerance {
            Some(tolerance) => value.distance2(&old_value) > tolerance,
            None => true,
        };
        vertex.set_value(value.clone());

        if broadcast {
            ctx.send_message_to_all_edges(vertex, Message::factors(vertex.id(), value, None));
        } else {
            debug!("{} converged locally, not broadcasting", vertex.id());
        }
        Ok(())
    }

    fn unexpected(&self, vertex: &Vertex, sender: VertexId, payload: &Payload, phase: SgdPhase) -> Error {
        Error::UnexpectedMessage {
            vertex: vertex.id(),
            sender,
            kind: payload.kind(),
            phase: phase.name(),
        }
    }
}

impl VertexComputation for Sgd {
    type Phase = SgdPhase;

    fn compute(
        &self,
        phase: SgdPhase,
        vertex: &mut Vertex,
        messages: &[Message],
        ctx: &mut dyn ComputeContext,
    ) -> Result<()> {
        match phase {
            SgdPhase::InitUsers => self.init_users(vertex, ctx),
            SgdPhase::InitItems => self.init_items(vertex, messages, ctx)?,
            SgdPhase::SteadyState => self.steady_state(vertex, messages, ctx)?,
        }
        vertex.vote_to_halt();
        Ok(())
    }
}
