//! Vertex programs and their controllers.
//!
//! A [`VertexComputation`] holds the per-vertex logic of one training protocol
//! and is invoked once per superstep for every active vertex. The matching
//! [`MasterCompute`] runs once per superstep before the vertices, reads the
//! previous superstep's aggregates and picks the phase the vertices execute
//! next, or halts the run.

pub mod initializer;
pub mod master;
pub mod ranking;
pub mod sgd;

use crate::engine::aggregators::Aggregates;
use crate::error::Result;
use crate::models::{Message, Vertex, VertexId};
use std::fmt::Debug;

/// What a vertex program may ask of the engine while it runs.
pub trait ComputeContext {
    fn superstep(&self) -> u64;

    /// Queue `message` for `target`; it is delivered at the next superstep.
    fn send_message(&mut self, target: VertexId, message: Message);

    /// Add `value` to the global sum `key` of this superstep.
    fn aggregate(&mut self, key: &'static str, value: f64);

    /// Global sum of `key` from the previous superstep.
    fn aggregated_value(&self, key: &str) -> f64;

    fn send_message_to_all_edges(&mut self, vertex: &Vertex, message: Message) {
        for edge in vertex.edges() {
            self.send_message(edge.target, message.clone());
        }
    }
}

pub trait Phase: Copy + Debug + Send + Sync {
    fn name(&self) -> &'static str;
}

pub trait VertexComputation: Sync {
    type Phase: Phase;

    fn compute(
        &self,
        phase: Self::Phase,
        vertex: &mut Vertex,
        messages: &[Message],
        ctx: &mut dyn ComputeContext,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterDecision<P> {
    Continue(P),
    Halt,
}

/// Global view handed to the controller at the start of a superstep.
#[derive(Debug, Clone, Copy)]
pub struct MasterContext<'a> {
    pub superstep: u64,
    pub aggregates: &'a Aggregates,
}

impl MasterContext<'_> {
    pub fn aggregated_value(&self, key: &str) -> f64 {
        self.aggregates.get(key)
    }
}

pub trait MasterCompute {
    type Phase: Phase;

    /// Once this returns [`MasterDecision::Halt`] no further superstep runs.
    fn compute(&mut self, ctx: &MasterContext<'_>) -> Result<MasterDecision<Self::Phase>>;
}
