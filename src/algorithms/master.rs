//! Global controllers: one decision per superstep, taken before the vertices run.

use super::ranking::{RankingPhase, EXAMPLES_AGGREGATOR, LOSS_AGGREGATOR};
use super::sgd::{SgdPhase, NUM_RATINGS_AGGREGATOR, RMSE_AGGREGATOR};
use super::{MasterCompute, MasterContext, MasterDecision};
use crate::config::{RankingParams, SgdConfig};
use crate::error::Result;
use crate::utils::metrics::{rmse, LossSample, RmseSample};
use tracing::{info, warn};

/// Drives SGD through its two warm-up supersteps into steady state and stops
/// once the superstep index passes `iterations` or the RMSE drops below the
/// configured target.
#[derive(Debug, Clone)]
pub struct SgdMaster {
    max_iterations: u64,
    rmse_target: Option<f64>,
    phase: Option<SgdPhase>,
    num_ratings: f64,
    history: Vec<RmseSample>,
    halted: bool,
}

impl SgdMaster {
    pub fn new(config: &SgdConfig) -> Self {
        Self {
            max_iterations: config.iterations,
            rmse_target: config.rmse_target.map(f64::from),
            phase: None,
            num_ratings: 0.0,
            history: Vec::new(),
            halted: false,
        }
    }

    pub fn rmse_history(&self) -> &[RmseSample] {
        &self.history
    }

    pub fn last_rmse(&self) -> Option<f64> {
        self.history.last().map(|sample| sample.rmse)
    }

    pub fn num_ratings(&self) -> f64 {
        self.num_ratings
    }

    /// RMSE of the superstep that just finished, when it ran SGD updates.
    fn observe(&mut self, ctx: &MasterContext<'_>) -> Option<f64> {
        match self.phase {
            Some(SgdPhase::InitUsers) => {
                self.num_ratings = ctx.aggregated_value(NUM_RATINGS_AGGREGATOR);
                info!("Training on {} ratings", self.num_ratings);
                None
            }
            Some(SgdPhase::SteadyState) => {
                let sum = ctx.aggregated_value(RMSE_AGGREGATOR);
                match rmse(sum, self.num_ratings) {
                    Some(value) => {
                        let superstep = ctx.superstep - 1;
                        info!("Superstep {}: RMSE {:.6}", superstep, value);
                        self.history.push(RmseSample { superstep, rmse: value });
                        Some(value)
                    }
                    None => {
                        warn!(
                            "RMSE unavailable after superstep {} (sum {}, {} ratings)",
                            ctx.superstep - 1,
                            sum,
                            self.num_ratings
                        );
                        None
                    }
                }
            }
            _ => None,
        }
    }
}

impl MasterCompute for SgdMaster {
    type Phase = SgdPhase;

    fn compute(&mut self, ctx: &MasterContext<'_>) -> Result<MasterDecision<SgdPhase>> {
        if self.halted {
            return Ok(MasterDecision::Halt);
        }

        let current = self.observe(ctx);
        let target_reached = matches!(
            (current, self.rmse_target),
            (Some(value), Some(target)) if value < target
        );
        if ctx.superstep > self.max_iterations || target_reached {
            info!(
                "Halting at superstep {} (RMSE {:?}, target {:?})",
                ctx.superstep, current, self.rmse_target
            );
            self.halted = true;
            return Ok(MasterDecision::Halt);
        }

        let next = self.phase.map_or(SgdPhase::InitUsers, SgdPhase::next);
        self.phase = Some(next);
        Ok(MasterDecision::Continue(next))
    }
}

/// Runs `iter` four-superstep ranking cycles, then the finalization supersteps.
#[derive(Debug, Clone)]
pub struct RankingMaster {
    iterations: u64,
    completed: u64,
    phase: Option<RankingPhase>,
    history: Vec<LossSample>,
    halted: bool,
}

impl RankingMaster {
    pub fn new(params: &RankingParams) -> Self {
        Self {
            iterations: params.iter,
            completed: 0,
            phase: None,
            history: Vec::new(),
            halted: false,
        }
    }

    pub fn loss_history(&self) -> &[LossSample] {
        &self.history
    }

    pub fn completed_iterations(&self) -> u64 {
        self.completed
    }
}

impl MasterCompute for RankingMaster {
    type Phase = RankingPhase;

    fn compute(&mut self, ctx: &MasterContext<'_>) -> Result<MasterDecision<RankingPhase>> {
        if self.halted {
            return Ok(MasterDecision::Halt);
        }

        let next = match self.phase {
            None => Some(RankingPhase::Sample),
            Some(phase) => {
                match phase {
                    RankingPhase::Update => {
                        let sample = LossSample::new(
                            self.completed + 1,
                            ctx.aggregated_value(LOSS_AGGREGATOR),
                            ctx.aggregated_value(EXAMPLES_AGGREGATOR),
                        );
                        info!(
                            "Iteration {}: loss {:.6} over {} examples",
                            sample.iteration,
                            sample.mean_loss(),
                            sample.examples
                        );
                        self.history.push(sample);
                    }
                    RankingPhase::Propagate => self.completed += 1,
                    _ => {}
                }
                phase.next(self.completed < self.iterations)
            }
        };

        match next {
            Some(phase) => {
                self.phase = Some(phase);
                Ok(MasterDecision::Continue(phase))
            }
            None => {
                info!("Ranking finished after {} iterations", self.completed);
                self.halted = true;
                Ok(MasterDecision::Halt)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::initializer::InitMethod;
    use crate::engine::aggregators::Aggregates;
    use crate::models::RatingBounds;

    fn decide<M: MasterCompute>(master: &mut M, superstep: u64, aggregates: &Aggregates) -> MasterDecision<M::Phase> {
        let ctx = MasterContext { superstep, aggregates };
        master.compute(&ctx).unwrap()
    }

    fn sgd_config(iterations: u64, rmse_target: Option<f32>) -> SgdConfig {
        SgdConfig {
            iterations,
            rmse_target,
            ..SgdConfig::default()
        }
    }

    #[test]
    fn test_sgd_schedule_halts_past_iteration_bound() {
        let mut master = SgdMaster::new(&sgd_config(3, None));
        let empty = Aggregates::new();
        let mut ratings = Aggregates::new();
        ratings.add(NUM_RATINGS_AGGREGATOR, 4.0);

        assert_eq!(decide(&mut master, 0, &empty), MasterDecision::Continue(SgdPhase::InitUsers));
        assert_eq!(decide(&mut master, 1, &ratings), MasterDecision::Continue(SgdPhase::InitItems));
        assert_eq!(decide(&mut master, 2, &empty), MasterDecision::Continue(SgdPhase::SteadyState));
        assert_eq!(decide(&mut master, 3, &empty), MasterDecision::Continue(SgdPhase::SteadyState));
        assert_eq!(decide(&mut master, 4, &empty), MasterDecision::Halt);
        assert_eq!(master.num_ratings(), 4.0);
    }

    #[test]
    fn test_sgd_halts_on_rmse_target() {
        let mut master = SgdMaster::new(&sgd_config(100, Some(0.5)));
        let empty = Aggregates::new();
        let mut ratings = Aggregates::new();
        ratings.add(NUM_RATINGS_AGGREGATOR, 4.0);
        decide(&mut master, 0, &empty);
        decide(&mut master, 1, &ratings);
        // The init phases report no error, so a zero sum must not end the run.
        assert_eq!(decide(&mut master, 2, &empty), MasterDecision::Continue(SgdPhase::SteadyState));

        let mut high = Aggregates::new();
        high.add(RMSE_AGGREGATOR, 4.0);
        assert_eq!(decide(&mut master, 3, &high), MasterDecision::Continue(SgdPhase::SteadyState));
        assert_eq!(master.last_rmse(), Some(1.0));

        let mut low = Aggregates::new();
        low.add(RMSE_AGGREGATOR, 0.25);
        assert_eq!(decide(&mut master, 4, &low), MasterDecision::Halt);
        assert_eq!(master.rmse_history().len(), 2);
        assert_eq!(master.rmse_history()[1], RmseSample { superstep: 3, rmse: 0.25 });

        // Halting is final even if the error goes back up.
        assert_eq!(decide(&mut master, 5, &high), MasterDecision::Halt);
    }

    #[test]
    fn test_sgd_without_ratings_keeps_running() {
        let mut master = SgdMaster::new(&sgd_config(10, Some(0.5)));
        let empty = Aggregates::new();
        for superstep in 0..4 {
            assert!(matches!(decide(&mut master, superstep, &empty), MasterDecision::Continue(_)));
        }
        assert_eq!(master.last_rmse(), None);
    }

    fn ranking_params(iter: u64) -> RankingParams {
        RankingParams {
            dim: 2,
            learn_rate: 0.01,
            iter,
            reg: 0.01,
            min_item_id: 1,
            max_item_id: 10,
            score_bounds: RatingBounds::new(-10.0, 10.0),
            max_sampling_rejections: 100,
            negative_ratio: 1.0,
            init: InitMethod::Uniform { low: 0.0, high: 1.0 },
        }
    }

    #[test]
    fn test_ranking_schedule() {
        let mut master = RankingMaster::new(&ranking_params(2));
        let mut loss = Aggregates::new();
        loss.add(LOSS_AGGREGATOR, 3.0);
        loss.add(EXAMPLES_AGGREGATOR, 6.0);

        let mut phases = Vec::new();
        let mut superstep = 0;
        while let MasterDecision::Continue(phase) = decide(&mut master, superstep, &loss) {
            phases.push(phase);
            superstep += 1;
        }

        use RankingPhase::*;
        assert_eq!(
            phases,
            vec![Sample, Respond, Update, Propagate, Sample, Respond, Update, Propagate, Finalize, Drain]
        );
        assert_eq!(master.completed_iterations(), 2);
        let history = master.loss_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].iteration, 1);
        assert_eq!(history[1].mean_loss(), 0.5);
        assert_eq!(decide(&mut master, superstep + 1, &loss), MasterDecision::Halt);
    }
}
