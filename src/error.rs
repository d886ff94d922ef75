use crate::models::VertexId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("parameter {name}={value} outside valid range [{min}, {max}]")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("could not sample an irrelevant item for {user} after {rejections} rejected draws")]
    SamplingExhausted { user: VertexId, rejections: usize },

    #[error("vertex {vertex} has no edge to message sender {sender}")]
    MissingEdge { vertex: VertexId, sender: VertexId },

    #[error("unexpected {kind} message from {sender} at {vertex} during {phase}")]
    UnexpectedMessage {
        vertex: VertexId,
        sender: VertexId,
        kind: &'static str,
        phase: &'static str,
    },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error("worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, Error>;
