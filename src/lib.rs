//! Latent-factor recommendation training as vertex programs on a
//! bulk-synchronous-parallel engine.
//!
//! Users and items are vertices, ratings are edges, and each vertex owns its
//! factor vector. [`algorithms::sgd`] fits explicit ratings,
//! [`algorithms::ranking`] learns from implicit feedback with sampled
//! negatives, and [`algorithms::master`] decides per superstep what runs next.

pub mod algorithms;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use engine::{HaltReason, LocalEngine, RunSummary};
pub use error::{Error, Result};
pub use models::*;
pub use services::training::{Algorithm, TrainingReport, TrainingService};

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
