//! Implicit-feedback ranking by negative sampling.
//!
//! One training iteration is a cycle of four supersteps:
//!
//! 1. `Sample`: every user collects its relevant items, draws irrelevant ones
//!    and asks all of them for their factors.
//! 2. `Respond`: items answer each request with their current factors.
//! 3. `Update`: users run the method's gradient step, apply their own delta
//!    and send every answering item its delta.
//! 4. `Propagate`: items apply the deltas and acknowledge, which keeps the
//!    users active for the next cycle.
//!
//! After the last iteration every user wakes itself and its rated items once
//! more (`Finalize`), and a `Drain` superstep consumes those messages, so the
//! final superstep sees every rated vertex. Items that were only ever sampled
//! as negatives stay asleep there but keep their factors for the output.
//!
//! The loss and the update rule are supplied by a [`RankingMethod`].

pub mod bpr;
pub mod pointwise;

pub use bpr::Bpr;
pub use pointwise::Pointwise;

use super::initializer::{vertex_rng, FactorInitializer};
use super::{ComputeContext, Phase, VertexComputation};
use crate::config::RankingParams;
use crate::error::{Error, Result};
use crate::models::{FactorVector, Message, Payload, Relevance, Vertex, VertexId};
use rand::Rng;
use std::collections::BTreeSet;
use tracing::debug;

/// Sum of the method's loss over the examples seen in an `Update` superstep.
pub const LOSS_AGGREGATOR: &str = "ranking.loss";
/// Number of training examples behind [`LOSS_AGGREGATOR`].
pub const EXAMPLES_AGGREGATOR: &str = "ranking.examples";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankingPhase {
    Sample,
    Respond,
    Update,
    Propagate,
    Finalize,
    Drain,
}

impl RankingPhase {
    /// Transition table. `more_iterations` tells whether another training
    /// cycle follows the current one; `None` means the run is over.
    pub fn next(self, more_iterations: bool) -> Option<Self> {
        match self {
            RankingPhase::Sample => Some(RankingPhase::Respond),
            RankingPhase::Respond => Some(RankingPhase::Update),
            RankingPhase::Update => Some(RankingPhase::Propagate),
            RankingPhase::Propagate if more_iterations => Some(RankingPhase::Sample),
            RankingPhase::Propagate => Some(RankingPhase::Finalize),
            RankingPhase::Finalize => Some(RankingPhase::Drain),
            RankingPhase::Drain => None,
        }
    }
}

impl Phase for RankingPhase {
    fn name(&self) -> &'static str {
        match self {
            RankingPhase::Sample => "sample",
            RankingPhase::Respond => "respond",
            RankingPhase::Update => "update",
            RankingPhase::Propagate => "propagate",
            RankingPhase::Finalize => "finalize",
            RankingPhase::Drain => "drain",
        }
    }
}

/// Result of one user's gradient step.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingUpdate {
    /// Added to the user's own factors.
    pub user_delta: FactorVector,
    /// Added by each item to its factors.
    pub item_deltas: Vec<(VertexId, FactorVector)>,
    pub loss: f64,
    pub examples: usize,
}

/// Loss-specific part of a ranking method.
pub trait RankingMethod: Send + Sync {
    fn name(&self) -> &'static str;

    /// How many irrelevant items to sample for a user with `num_relevant` items.
    fn buffer_size(&self, num_relevant: usize) -> usize;

    /// Gradient step for `user` given the factors of its relevant (`positives`)
    /// and sampled irrelevant (`negatives`) items, both ordered by id.
    fn gradient_update(
        &self,
        user: &FactorVector,
        positives: &[(VertexId, FactorVector)],
        negatives: &[(VertexId, FactorVector)],
    ) -> RankingUpdate;
}

/// Draws `budget` distinct item ids uniformly from `[min_item_id, max_item_id]`
/// that are not in `relevant`.
///
/// A draw that hits a relevant or already sampled item counts as a rejection;
/// more than `max_rejections` of them is fatal.
pub fn sample_negatives<R: Rng>(
    rng: &mut R,
    user: VertexId,
    relevant: &BTreeSet<VertexId>,
    budget: usize,
    min_item_id: u64,
    max_item_id: u64,
    max_rejections: usize,
) -> Result<BTreeSet<VertexId>> {
    let mut negatives = BTreeSet::new();
    let mut rejections = 0usize;
    while negatives.len() < budget {
        let candidate = VertexId::item(rng.gen_range(min_item_id..=max_item_id));
        if relevant.contains(&candidate) || !negatives.insert(candidate) {
            rejections += 1;
            if rejections > max_rejections {
                return Err(Error::SamplingExhausted { user, rejections });
            }
        }
    }
    Ok(negatives)
}

pub struct Ranking<M> {
    method: M,
    params: RankingParams,
    initializer: FactorInitializer,
    seed: u64,
}

impl<M: RankingMethod> Ranking<M> {
    pub fn new(method: M, params: RankingParams, seed: u64) -> Self {
        Self {
            method,
            initializer: FactorInitializer::new(params.init, params.dim, seed),
            params,
            seed,
        }
    }

    fn sample(&self, vertex: &Vertex, ctx: &mut dyn ComputeContext) -> Result<()> {
        if !vertex.id().is_user() {
            return Ok(());
        }
        let relevant: BTreeSet<VertexId> = vertex
            .edges()
            .map(|edge| edge.target)
            .filter(VertexId::is_item)
            .collect();
        let budget = self.method.buffer_size(relevant.len());
        let mut rng = vertex_rng(self.seed, vertex.id(), ctx.superstep());
        let negatives = sample_negatives(
            &mut rng,
            vertex.id(),
            &relevant,
            budget,
            self.params.min_item_id,
            self.params.max_item_id,
            self.params.max_sampling_rejections,
        )?;

        debug!(
            "{} asks for {} relevant and {} irrelevant factors",
            vertex.id(),
            relevant.len(),
            negatives.len()
        );
        for item in relevant {
            ctx.send_message(item, Message::new(vertex.id(), Payload::Request(Relevance::Relevant)));
        }
        for item in negatives {
            ctx.send_message(item, Message::new(vertex.id(), Payload::Request(Relevance::Irrelevant)));
        }
        Ok(())
    }

    fn respond(&self, vertex: &Vertex, messages: &[Message], ctx: &mut dyn ComputeContext) -> Result<()> {
        let factors = self.current(vertex);
        for msg in messages {
            match msg.payload {
                Payload::Request(relevance) => {
                    let reply = Payload::Response {
                        relevance,
                        factors: factors.clone(),
                    };
                    ctx.send_message(msg.sender, Message::new(vertex.id(), reply));
                }
                ref other => return Err(unexpected(vertex, msg.sender, other, RankingPhase::Respond)),
            }
        }
        Ok(())
    }

    fn update(&self, vertex: &mut Vertex, messages: &[Message], ctx: &mut dyn ComputeContext) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let user = self.current(vertex);
        let mut positives = Vec::new();
        let mut negatives = Vec::new();
        for msg in messages {
            match &msg.payload {
                Payload::Response { relevance, factors } => {
                    if factors.len() != user.len() {
                        return Err(Error::DimensionMismatch {
                            expected: user.len(),
                            actual: factors.len(),
                        });
                    }
                    let bucket = match relevance {
                        Relevance::Relevant => &mut positives,
                        Relevance::Irrelevant => &mut negatives,
                    };
                    bucket.push((msg.sender, factors.clone()));
                }
                other => return Err(unexpected(vertex, msg.sender, other, RankingPhase::Update)),
            }
        }
        positives.sort_by_key(|(id, _)| *id);
        negatives.sort_by_key(|(id, _)| *id);

        let update = self.method.gradient_update(&user, &positives, &negatives);
        vertex.set_value(user.add(&update.user_delta));
        for (item, delta) in update.item_deltas {
            ctx.send_message(item, Message::new(vertex.id(), Payload::Delta(delta)));
        }
        ctx.aggregate(LOSS_AGGREGATOR, update.loss);
        ctx.aggregate(EXAMPLES_AGGREGATOR, update.examples as f64);
        Ok(())
    }

    fn propagate(&self, vertex: &mut Vertex, messages: &[Message], ctx: &mut dyn ComputeContext) -> Result<()> {
        let mut value = self.current(vertex);
        for msg in messages {
            match &msg.payload {
                Payload::Delta(delta) => {
                    if delta.len() != value.len() {
                        return Err(Error::DimensionMismatch {
                            expected: value.len(),
                            actual: delta.len(),
                        });
                    }
                    value = value.add(delta);
                    ctx.send_message(msg.sender, Message::ack(vertex.id()));
                }
                other => return Err(unexpected(vertex, msg.sender, other, RankingPhase::Propagate)),
            }
        }
        vertex.set_value(value);
        Ok(())
    }

    fn finalize(&self, vertex: &Vertex, ctx: &mut dyn ComputeContext) {
        ctx.send_message(vertex.id(), Message::ack(vertex.id()));
        ctx.send_message_to_all_edges(vertex, Message::ack(vertex.id()));
    }

    fn current(&self, vertex: &Vertex) -> FactorVector {
        vertex
            .value()
            .cloned()
            .unwrap_or_else(|| self.initializer.initialize(vertex.id()))
    }
}

/// Acks are only ever used to keep vertices active; anything else arriving in
/// a phase that does not consume it is a protocol error.
fn expect_acks(vertex: &Vertex, messages: &[Message], phase: RankingPhase) -> Result<()> {
    match messages.iter().find(|msg| msg.payload != Payload::Ack) {
        Some(msg) => Err(unexpected(vertex, msg.sender, &msg.payload, phase)),
        None => Ok(()),
    }
}

fn unexpected(vertex: &Vertex, sender: VertexId, payload: &Payload, phase: RankingPhase) -> Error {
    Error::UnexpectedMessage {
        vertex: vertex.id(),
        sender,
        kind: payload.kind(),
        phase: phase.name(),
    }
}

impl<M: RankingMethod> VertexComputation for Ranking<M> {
    type Phase = RankingPhase;

    fn compute(
        &self,
        phase: RankingPhase,
        vertex: &mut Vertex,
        messages: &[Message],
        ctx: &mut dyn ComputeContext,
    ) -> Result<()> {
        self.initializer.ensure(vertex);
        let id = vertex.id();
        match phase {
            RankingPhase::Sample => {
                expect_acks(vertex, messages, phase)?;
                self.sample(vertex, ctx)?;
            }
            RankingPhase::Respond if id.is_item() => self.respond(vertex, messages, ctx)?,
            RankingPhase::Update if id.is_user() => self.update(vertex, messages, ctx)?,
            RankingPhase::Propagate if id.is_item() => self.propagate(vertex, messages, ctx)?,
            RankingPhase::Finalize if id.is_user() => {
                expect_acks(vertex, messages, phase)?;
                self.finalize(vertex, ctx);
            }
            // Drain, and every phase the vertex's role sits out.
            _ => expect_acks(vertex, messages, phase)?,
        }
        vertex.vote_to_halt();
        Ok(())
    }
}
