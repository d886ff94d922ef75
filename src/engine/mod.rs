//! In-process bulk-synchronous-parallel engine.
//!
//! Vertices are evaluated in parallel on a rayon pool. Messages sent during
//! superstep `n` are buffered and handed to their recipients at `n + 1`;
//! aggregates follow the same one-superstep delay. Outboxes are merged in
//! vertex id order, so a run is reproducible for a fixed seed regardless of
//! the number of workers.

pub mod aggregators;

use crate::algorithms::{ComputeContext, MasterCompute, MasterContext, MasterDecision, Phase, VertexComputation};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::models::{Edge, Message, Vertex, VertexId};
use aggregators::Aggregates;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::{debug, info};

/// Engine side of [`ComputeContext`] for a single vertex invocation.
#[derive(Debug)]
pub struct VertexContext<'a> {
    superstep: u64,
    previous: &'a Aggregates,
    outbox: Vec<(VertexId, Message)>,
    partial: Aggregates,
}

impl<'a> VertexContext<'a> {
    pub fn new(superstep: u64, previous: &'a Aggregates) -> Self {
        Self {
            superstep,
            previous,
            outbox: Vec::new(),
            partial: Aggregates::new(),
        }
    }

    pub fn outbox(&self) -> &[(VertexId, Message)] {
        &self.outbox
    }

    pub fn partial(&self) -> &Aggregates {
        &self.partial
    }

    pub fn into_parts(self) -> (Vec<(VertexId, Message)>, Aggregates) {
        (self.outbox, self.partial)
    }
}

impl ComputeContext for VertexContext<'_> {
    fn superstep(&self) -> u64 {
        self.superstep
    }

    fn send_message(&mut self, target: VertexId, message: Message) {
        self.outbox.push((target, message));
    }

    fn aggregate(&mut self, key: &'static str, value: f64) {
        self.partial.add(key, value);
    }

    fn aggregated_value(&self, key: &str) -> f64 {
        self.previous.get(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltReason {
    /// The controller decided to stop.
    Master,
    /// Every vertex voted to halt and no message was in flight.
    Quiescent,
    /// The engine's superstep guard was reached.
    SuperstepLimit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuperstepStats {
    pub superstep: u64,
    pub phase: String,
    pub active_vertices: u64,
    pub messages_sent: u64,
    pub aggregates: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Number of supersteps that executed vertex logic.
    pub supersteps: u64,
    pub halt_reason: HaltReason,
    pub history: Vec<SuperstepStats>,
}

pub struct LocalEngine {
    config: EngineConfig,
    vertices: Vec<Vertex>,
    index: HashMap<VertexId, usize>,
    pool: rayon::ThreadPool,
}

impl LocalEngine {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .build()?;

        Ok(Self {
            config: config.clone(),
            vertices: Vec::new(),
            index: HashMap::new(),
            pool,
        })
    }

    /// Adds a directed edge, creating `source` if needed. `target` only comes
    /// into existence once a message is addressed to it.
    pub fn add_edge(&mut self, source: VertexId, target: VertexId, weight: f32) {
        let slot = self.ensure_vertex(source);
        self.vertices[slot].add_edge(Edge { target, weight });
    }

    pub fn add_vertex(&mut self, id: VertexId) {
        self.ensure_vertex(id);
    }

    pub fn vertex(&self, id: &VertexId) -> Option<&Vertex> {
        self.index.get(id).map(|&slot| &self.vertices[slot])
    }

    /// All vertices in id order.
    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        let mut ordered: Vec<&Vertex> = self.vertices.iter().collect();
        ordered.sort_by_key(|v| v.id());
        ordered.into_iter()
    }

    pub fn num_vertices(&self) -> u64 {
        self.vertices.len() as u64
    }

    pub fn num_edges(&self) -> u64 {
        self.vertices.iter().map(|v| v.num_edges() as u64).sum()
    }

    fn ensure_vertex(&mut self, id: VertexId) -> usize {
        if let Some(&slot) = self.index.get(&id) {
            return slot;
        }
        let slot = self.vertices.len();
        self.vertices.push(Vertex::new(id));
        self.index.insert(id, slot);
        slot
    }

    /// Runs supersteps until `master` halts, the graph goes quiet, or the
    /// superstep guard is hit. An error from any vertex aborts the run.
    ///
    /// Vertex values and edges carry over between runs; activity and
    /// undelivered messages do not.
    pub fn run<C, M>(&mut self, computation: &C, master: &mut M) -> Result<RunSummary>
    where
        C: VertexComputation,
        M: MasterCompute<Phase = C::Phase>,
    {
        // Sorted storage makes outbox concatenation, and therefore delivery
        // order and aggregate summation order, independent of insertion order.
        self.vertices.sort_by_key(|v| v.id());
        self.reindex();
        // Every vertex starts a run active, without mail left over from the last one.
        for vertex in &mut self.vertices {
            vertex.mailbox.clear();
            vertex.wake();
        }

        let started = Instant::now();
        let mut previous = Aggregates::new();
        let mut history = Vec::new();
        let mut superstep = 0u64;

        let halt_reason = loop {
            if superstep >= self.config.max_supersteps {
                break HaltReason::SuperstepLimit;
            }

            let master_ctx = MasterContext {
                superstep,
                aggregates: &previous,
            };
            let phase = match master.compute(&master_ctx)? {
                MasterDecision::Continue(phase) => phase,
                MasterDecision::Halt => break HaltReason::Master,
            };

            let (outbox, partial, active) = self.execute(computation, phase, superstep, &previous)?;
            let messages_sent = outbox.len() as u64;
            debug!(
                "Superstep {} ({}): {} active vertices sent {} messages",
                superstep,
                phase.name(),
                active,
                messages_sent
            );

            history.push(SuperstepStats {
                superstep,
                phase: phase.name().to_string(),
                active_vertices: active,
                messages_sent,
                aggregates: partial.to_owned_map(),
            });

            self.deliver(outbox);
            previous = partial;
            superstep += 1;

            if messages_sent == 0 && self.vertices.iter().all(|v| v.is_halted()) {
                break HaltReason::Quiescent;
            }
        };

        info!(
            "Run finished after {} supersteps ({:?}) in {:?}",
            superstep,
            halt_reason,
            started.elapsed()
        );

        Ok(RunSummary {
            supersteps: superstep,
            halt_reason,
            history,
        })
    }

    fn execute<C: VertexComputation>(
        &mut self,
        computation: &C,
        phase: C::Phase,
        superstep: u64,
        previous: &Aggregates,
    ) -> Result<(Vec<(VertexId, Message)>, Aggregates, u64)> {
        let vertices = &mut self.vertices;
        let outcomes: Vec<Result<Option<(Vec<(VertexId, Message)>, Aggregates)>>> = self.pool.install(|| {
            vertices
                .par_iter_mut()
                .map(|vertex| {
                    let messages = std::mem::take(&mut vertex.mailbox);
                    if vertex.is_halted() && messages.is_empty() {
                        return Ok(None);
                    }
                    vertex.wake();
                    let mut ctx = VertexContext::new(superstep, previous);
                    computation.compute(phase, vertex, &messages, &mut ctx)?;
                    Ok(Some(ctx.into_parts()))
                })
                .collect()
        });

        let mut outbox = Vec::new();
        let mut aggregates = Aggregates::new();
        let mut active = 0u64;
        for outcome in outcomes {
            if let Some((messages, partial)) = outcome? {
                active += 1;
                outbox.extend(messages);
                aggregates = aggregates.merge(partial);
            }
        }
        Ok((outbox, aggregates, active))
    }

    fn deliver(&mut self, outbox: Vec<(VertexId, Message)>) {
        let mut created = false;
        for (target, message) in outbox {
            let slot = match self.index.get(&target) {
                Some(&slot) => slot,
                None => {
                    created = true;
                    self.ensure_vertex(target)
                }
            };
            self.vertices[slot].mailbox.push(message);
        }
        if created {
            self.vertices.sort_by_key(|v| v.id());
            self.reindex();
        }
    }

    fn reindex(&mut self) {
        self.index = self
            .vertices
            .iter()
            .enumerate()
            .map(|(slot, v)| (v.id(), slot))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::{FactorVector, Payload};

    #[derive(Debug, Clone, Copy)]
    struct Relay;

    impl Phase for Relay {
        fn name(&self) -> &'static str {
            "relay"
        }
    }

    /// Every vertex records what it received and forwards an ack along its edges.
    struct RelayComputation;

    impl VertexComputation for RelayComputation {
        type Phase = Relay;

        fn compute(
            &self,
            _phase: Relay,
            vertex: &mut Vertex,
            messages: &[Message],
            ctx: &mut dyn ComputeContext,
        ) -> Result<()> {
            let received = messages.len() as f32;
            vertex.set_value(FactorVector::from_vec(vec![ctx.superstep() as f32, received]));
            ctx.aggregate("received", received as f64);
            if ctx.superstep() < 2 {
                ctx.send_message_to_all_edges(vertex, Message::ack(vertex.id()));
            }
            vertex.vote_to_halt();
            Ok(())
        }
    }

    struct Forever {
        seen: Vec<f64>,
    }

    impl MasterCompute for Forever {
        type Phase = Relay;

        fn compute(&mut self, ctx: &MasterContext<'_>) -> Result<MasterDecision<Relay>> {
            self.seen.push(ctx.aggregated_value("received"));
            Ok(MasterDecision::Continue(Relay))
        }
    }

    fn engine() -> LocalEngine {
        let config = EngineConfig {
            workers: 2,
            ..EngineConfig::default()
        };
        LocalEngine::new(&config).unwrap()
    }

    #[test]
    fn test_messages_arrive_exactly_one_superstep_later() {
        let mut engine = engine();
        engine.add_edge(VertexId::user(1), VertexId::item(1), 1.0);
        engine.add_edge(VertexId::user(1), VertexId::item(2), 1.0);
        assert_eq!(engine.num_vertices(), 1);

        let mut master = Forever { seen: Vec::new() };
        let summary = engine.run(&RelayComputation, &mut master).unwrap();

        // Superstep 0: u1 sends two acks. Superstep 1: both items wake up with
        // one message each and have no edges. Then the graph is quiet.
        assert_eq!(summary.halt_reason, HaltReason::Quiescent);
        assert_eq!(summary.supersteps, 2);
        assert_eq!(engine.num_vertices(), 3);
        for item in [VertexId::item(1), VertexId::item(2)] {
            let value = engine.vertex(&item).and_then(|v| v.value()).unwrap();
            assert_eq!(value.as_slice(), &[1.0, 1.0]);
        }
        // Aggregates become visible to the master one superstep later.
        assert_eq!(master.seen, vec![0.0, 0.0]);
        assert_eq!(summary.history[1].aggregates.get("received"), Some(&2.0));
    }

    #[test]
    fn test_superstep_guard() {
        let config = EngineConfig {
            workers: 1,
            max_supersteps: 1,
            ..EngineConfig::default()
        };
        let mut engine = LocalEngine::new(&config).unwrap();
        engine.add_edge(VertexId::user(1), VertexId::item(1), 1.0);
        let summary = engine
            .run(&RelayComputation, &mut Forever { seen: Vec::new() })
            .unwrap();
        assert_eq!(summary.supersteps, 1);
        assert_eq!(summary.halt_reason, HaltReason::SuperstepLimit);
    }

    #[test]
    fn test_second_run_starts_from_a_fresh_superstep() {
        let mut engine = engine();
        engine.add_edge(VertexId::user(1), VertexId::item(1), 1.0);
        engine.add_edge(VertexId::user(1), VertexId::item(2), 1.0);

        let first = engine
            .run(&RelayComputation, &mut Forever { seen: Vec::new() })
            .unwrap();
        // Every vertex voted to halt at the end of the first run.
        let mut master = Forever { seen: Vec::new() };
        let second = engine.run(&RelayComputation, &mut master).unwrap();

        assert_eq!(second.supersteps, first.supersteps);
        assert_eq!(second.halt_reason, HaltReason::Quiescent);
        assert_eq!(second.history[0].active_vertices, 3);
        // Items were created by the first run and now have no edges of their own.
        assert_eq!(second.history[0].aggregates.get("received"), Some(&0.0));
        assert_eq!(master.seen, vec![0.0, 0.0]);
    }

    struct Failing;

    impl VertexComputation for Failing {
        type Phase = Relay;

        fn compute(&self, _: Relay, vertex: &mut Vertex, _: &[Message], _: &mut dyn ComputeContext) -> Result<()> {
            Err(Error::UnexpectedMessage {
                vertex: vertex.id(),
                sender: vertex.id(),
                kind: Payload::Ack.kind(),
                phase: "relay",
            })
        }
    }

    #[test]
    fn test_vertex_error_aborts_run() {
        let mut engine = engine();
        engine.add_vertex(VertexId::user(4));
        let result = engine.run(&Failing, &mut Forever { seen: Vec::new() });
        assert!(matches!(result, Err(Error::UnexpectedMessage { .. })));
    }
}
