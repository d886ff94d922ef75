use crate::algorithms::master::{RankingMaster, SgdMaster};
use crate::algorithms::ranking::{Bpr, Pointwise, Ranking, RankingMethod};
use crate::algorithms::sgd::Sgd;
use crate::config::{Config, RankingParams};
use crate::engine::{HaltReason, LocalEngine, RunSummary};
use crate::models::VertexId;
use crate::services::graph_io::{self, RatingRecord};
use crate::utils::metrics::{LossSample, RmseSample};
use crate::utils::validation::validate_factors;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Rating prediction by stochastic gradient descent.
    Sgd,
    /// Pairwise ranking with sampled negatives.
    Bpr,
    /// Per-item logistic ranking with sampled negatives.
    Pointwise,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub algorithm: Algorithm,
    pub supersteps: u64,
    pub halt_reason: HaltReason,
    pub num_vertices: u64,
    pub num_edges: u64,
    pub final_rmse: Option<f64>,
    pub rmse_history: Vec<RmseSample>,
    pub loss_history: Vec<LossSample>,
    /// Vertices whose factors ended up non-finite or mis-sized.
    pub invalid_vertices: usize,
    pub elapsed_ms: u64,
}

/// Owns one graph and trains it with the configured algorithm.
pub struct TrainingService {
    config: Config,
    engine: LocalEngine,
}

impl TrainingService {
    pub fn new(config: Config) -> Result<Self> {
        let engine = LocalEngine::new(&config.engine).context("Failed to create BSP engine")?;
        Ok(Self { config, engine })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &LocalEngine {
        &self.engine
    }

    pub fn add_rating(&mut self, user: u64, item: u64, rating: f32) {
        self.engine
            .add_edge(VertexId::user(user), VertexId::item(item), rating);
    }

    pub fn add_ratings(&mut self, records: &[RatingRecord]) {
        graph_io::load_ratings(&mut self.engine, records);
    }

    pub fn load_ratings<R: BufRead>(&mut self, reader: R) -> Result<usize> {
        let records = graph_io::read_ratings(reader).context("Failed to parse ratings")?;
        self.add_ratings(&records);
        Ok(records.len())
    }

    pub fn load_ratings_file<P: AsRef<Path>>(&mut self, path: P) -> Result<usize> {
        let path = path.as_ref();
        let records = graph_io::read_ratings_file(path)
            .with_context(|| format!("Failed to read ratings from {}", path.display()))?;
        self.add_ratings(&records);
        Ok(records.len())
    }

    pub fn train(&mut self, algorithm: Algorithm) -> Result<TrainingReport> {
        info!(
            "Training {:?} on {} vertices and {} edges",
            algorithm,
            self.engine.num_vertices(),
            self.engine.num_edges()
        );
        let started = Instant::now();
        let seed = self.config.engine.seed;

        let (summary, rmse_history, loss_history, dim) = match algorithm {
            Algorithm::Sgd => {
                let sgd = Sgd::new(&self.config.sgd, seed).context("Invalid SGD configuration")?;
                let mut master = SgdMaster::new(&self.config.sgd);
                let summary = self.engine.run(&sgd, &mut master).context("SGD run failed")?;
                (summary, master.rmse_history().to_vec(), Vec::new(), self.config.sgd.dim)
            }
            Algorithm::Bpr => {
                let params = self.ranking_params()?;
                let (summary, history) = self.run_ranking(Bpr::new(&params), params)?;
                (summary, Vec::new(), history, params.dim)
            }
            Algorithm::Pointwise => {
                let params = self.ranking_params()?;
                let (summary, history) = self.run_ranking(Pointwise::new(&params), params)?;
                (summary, Vec::new(), history, params.dim)
            }
        };

        let invalid_vertices = self.count_invalid(dim);
        if invalid_vertices > 0 {
            warn!("{} vertices ended with invalid factors", invalid_vertices);
        }

        let report = TrainingReport {
            algorithm,
            supersteps: summary.supersteps,
            halt_reason: summary.halt_reason,
            num_vertices: self.engine.num_vertices(),
            num_edges: self.engine.num_edges(),
            final_rmse: rmse_history.last().map(|sample| sample.rmse),
            rmse_history,
            loss_history,
            invalid_vertices,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            "Training finished: {} supersteps, halt reason {:?}, final RMSE {:?}",
            report.supersteps, report.halt_reason, report.final_rmse
        );
        Ok(report)
    }

    pub fn write_factors<W: Write>(&self, writer: &mut W) -> Result<usize> {
        graph_io::write_factors(writer, self.engine.vertices()).context("Failed to write factors")
    }

    fn ranking_params(&self) -> Result<RankingParams> {
        self.config
            .ranking
            .validate()
            .context("Invalid ranking configuration")
    }

    fn run_ranking<M: RankingMethod>(
        &mut self,
        method: M,
        params: RankingParams,
    ) -> Result<(RunSummary, Vec<LossSample>)> {
        let name = method.name();
        let ranking = Ranking::new(method, params, self.config.engine.seed);
        let mut master = RankingMaster::new(&params);
        let summary = self
            .engine
            .run(&ranking, &mut master)
            .with_context(|| format!("{} ranking run failed", name))?;
        Ok((summary, master.loss_history().to_vec()))
    }

    fn count_invalid(&self, dim: usize) -> usize {
        self.engine
            .vertices()
            .filter_map(|vertex| vertex.value())
            .filter(|value| validate_factors(value, dim).is_err())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn service() -> TrainingService {
        let mut config = Config {
            engine: EngineConfig {
                workers: 2,
                ..EngineConfig::default()
            },
            ..Config::default()
        };
        config.sgd.dim = 4;
        config.sgd.iterations = 5;
        config.ranking.dim = 4;
        config.ranking.iter = 2;
        config.ranking.min_item_id = Some(1);
        config.ranking.max_item_id = Some(20);
        TrainingService::new(config).unwrap()
    }

    #[test]
    fn test_sgd_report() {
        let mut service = service();
        let loaded = service
            .load_ratings("1 1 1.0\n1 2 2.0\n2 1 3.0\n2 2 4.0\n".as_bytes())
            .unwrap();
        assert_eq!(loaded, 4);

        let report = service.train(Algorithm::Sgd).unwrap();
        assert_eq!(report.supersteps, 6);
        assert_eq!(report.halt_reason, HaltReason::Master);
        assert_eq!(report.num_vertices, 4);
        // Items store the reverse edges.
        assert_eq!(report.num_edges, 8);
        // One sample per steady-state superstep, 2 through 5.
        assert_eq!(report.rmse_history.len(), 4);
        assert_eq!(report.rmse_history[0].superstep, 2);
        assert_eq!(report.invalid_vertices, 0);
        assert!(report.loss_history.is_empty());

        let mut out = Vec::new();
        assert_eq!(service.write_factors(&mut out).unwrap(), 4);
    }

    #[test]
    fn test_training_twice_repeats_the_run() {
        let mut service = service();
        service
            .load_ratings("1 1 1.0\n1 2 2.0\n2 1 3.0\n2 2 4.0\n".as_bytes())
            .unwrap();

        let first = service.train(Algorithm::Sgd).unwrap();
        let second = service.train(Algorithm::Sgd).unwrap();

        assert_eq!(second.supersteps, 6);
        assert_eq!(second.halt_reason, HaltReason::Master);
        assert_eq!(second.rmse_history, first.rmse_history);

        let ranked = service.train(Algorithm::Bpr).unwrap();
        assert_eq!(ranked.supersteps, 4 * 2 + 2);
        assert_eq!(ranked.loss_history.len(), 2);
    }

    #[test]
    fn test_ranking_requires_item_bounds() {
        let mut service = service();
        service.config.ranking.max_item_id = None;
        service.add_rating(1, 1, 1.0);
        assert!(service.train(Algorithm::Bpr).is_err());
    }

    #[test]
    fn test_algorithm_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Algorithm::Pointwise).unwrap(), "\"pointwise\"");
    }
}
