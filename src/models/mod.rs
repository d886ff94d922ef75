use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VertexKind {
    User,
    Item,
}

/// Graph key of a user or item vertex. Users and items live in separate id spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VertexId {
    pub kind: VertexKind,
    pub id: u64,
}

impl VertexId {
    pub fn user(id: u64) -> Self {
        Self { kind: VertexKind::User, id }
    }

    pub fn item(id: u64) -> Self {
        Self { kind: VertexKind::Item, id }
    }

    pub fn is_user(&self) -> bool {
        self.kind == VertexKind::User
    }

    pub fn is_item(&self) -> bool {
        self.kind == VertexKind::Item
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            VertexKind::User => write!(f, "u{}", self.id),
            VertexKind::Item => write!(f, "i{}", self.id),
        }
    }
}

/// Latent factors of one vertex.
///
/// Updates always produce a new vector; a vector that was handed to a message
/// is never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorVector(DVector<f32>);

impl FactorVector {
    pub fn from_vec(values: Vec<f32>) -> Self {
        Self(DVector::from_vec(values))
    }

    pub fn zeros(dim: usize) -> Self {
        Self(DVector::zeros(dim))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        self.0.as_slice()
    }

    pub fn dot(&self, other: &FactorVector) -> f32 {
        self.0.dot(&other.0)
    }

    /// Squared euclidean distance.
    pub fn distance2(&self, other: &FactorVector) -> f32 {
        (&self.0 - &other.0).norm_squared()
    }

    pub fn add(&self, other: &FactorVector) -> FactorVector {
        Self(&self.0 + &other.0)
    }

    pub fn sub(&self, other: &FactorVector) -> FactorVector {
        Self(&self.0 - &other.0)
    }

    pub fn scale(&self, factor: f32) -> FactorVector {
        Self(self.0.scale(factor))
    }

    /// `self + factor * other` as a new vector.
    pub fn add_scaled(&self, other: &FactorVector, factor: f32) -> FactorVector {
        Self(&self.0 + other.0.scale(factor))
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|x| x.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub target: VertexId,
    pub weight: f32,
}

/// Closed interval predictions are clamped into before computing an error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingBounds {
    pub min: f32,
    pub max: f32,
}

impl RatingBounds {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, predicted: f32) -> f32 {
        predicted.min(self.max).max(self.min)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Relevance {
    Relevant,
    Irrelevant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Current factors of the sender. The first user-to-item exchange also
    /// carries the rating, so the item can store the reverse edge.
    Factors {
        factors: FactorVector,
        rating: Option<f32>,
    },
    /// A user asking an item for its factors.
    Request(Relevance),
    /// An item answering a request, echoing the relevance it was asked with.
    Response {
        relevance: Relevance,
        factors: FactorVector,
    },
    /// Additive update an item applies to its own factors.
    Delta(FactorVector),
    /// Empty message keeping the recipient active for the next superstep.
    Ack,
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Factors { .. } => "factors",
            Payload::Request(_) => "request",
            Payload::Response { .. } => "response",
            Payload::Delta(_) => "delta",
            Payload::Ack => "ack",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub sender: VertexId,
    pub payload: Payload,
}

impl Message {
    pub fn new(sender: VertexId, payload: Payload) -> Self {
        Self { sender, payload }
    }

    pub fn factors(sender: VertexId, factors: FactorVector, rating: Option<f32>) -> Self {
        Self::new(sender, Payload::Factors { factors, rating })
    }

    pub fn ack(sender: VertexId) -> Self {
        Self::new(sender, Payload::Ack)
    }
}

#[derive(Debug, Clone)]
pub struct Vertex {
    id: VertexId,
    value: Option<FactorVector>,
    edges: BTreeMap<VertexId, f32>,
    halted: bool,
    pub(crate) mailbox: Vec<Message>,
}

impl Vertex {
    pub fn new(id: VertexId) -> Self {
        Self {
            id,
            value: None,
            edges: BTreeMap::new(),
            halted: false,
            mailbox: Vec::new(),
        }
    }

    pub fn id(&self) -> VertexId {
        self.id
    }

    pub fn value(&self) -> Option<&FactorVector> {
        self.value.as_ref()
    }

    pub fn set_value(&mut self, value: FactorVector) {
        self.value = Some(value);
    }

    /// Outgoing edges in target order. A repeated target keeps the last weight.
    pub fn edges(&self) -> impl Iterator<Item = Edge> + '_ {
        self.edges
            .iter()
            .map(|(&target, &weight)| Edge { target, weight })
    }

    pub fn edge_value(&self, target: &VertexId) -> Option<f32> {
        self.edges.get(target).copied()
    }

    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.insert(edge.target, edge.weight);
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn vote_to_halt(&mut self) {
        self.halted = true;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub(crate) fn wake(&mut self) {
        self.halted = false;
    }
}
