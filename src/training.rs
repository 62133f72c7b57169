//! Training and evaluation loops over session-parallel blocks.
use std::time::Instant;

use failure;
use tracing::info;

use crate::batching::{prefetch_for_each, Block, SessionParallelBatcher};
use crate::config::Config;
use crate::data::Sessions;
use crate::evaluation::hit_rate_at_k;
use crate::models::SessionParallelModel;
use crate::FittingError;

/// Averages over one pass through a set of sessions.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EpochSummary {
    pub epoch: usize,
    pub num_blocks: usize,
    /// Mean per-lane loss. Zero for evaluation passes.
    pub loss: f32,
    pub hit_rate: f32,
}

/// Running averages, reported every `log_every` blocks.
struct Progress {
    epoch: usize,
    log_every: usize,
    num_blocks: usize,
    loss: f32,
    hit_rate: f32,
    window_blocks: usize,
    window_loss: f32,
    window_hit_rate: f32,
    window_start: Instant,
}

impl Progress {
    fn new(epoch: usize, log_every: usize) -> Self {
        Progress {
            epoch,
            log_every,
            num_blocks: 0,
            loss: 0.0,
            hit_rate: 0.0,
            window_blocks: 0,
            window_loss: 0.0,
            window_hit_rate: 0.0,
            window_start: Instant::now(),
        }
    }

    fn record(&mut self, loss: f32, hit_rate: f32) {
        self.num_blocks += 1;
        self.loss += loss;
        self.hit_rate += hit_rate;

        self.window_blocks += 1;
        self.window_loss += loss;
        self.window_hit_rate += hit_rate;

        if self.log_every > 0 && self.num_blocks % self.log_every == 0 {
            let denominator = self.window_blocks as f32;

            info!(
                epoch = self.epoch,
                step = self.num_blocks,
                loss = self.window_loss / denominator,
                hit_rate = self.window_hit_rate / denominator,
                elapsed = ?self.window_start.elapsed(),
                "Progress"
            );

            self.window_blocks = 0;
            self.window_loss = 0.0;
            self.window_hit_rate = 0.0;
            self.window_start = Instant::now();
        }
    }

    fn finish(self) -> Result<EpochSummary, FittingError> {
        if self.num_blocks == 0 {
            return Err(FittingError::NoInteractions);
        }

        let denominator = self.num_blocks as f32;

        Ok(EpochSummary {
            epoch: self.epoch,
            num_blocks: self.num_blocks,
            loss: self.loss / denominator,
            hit_rate: self.hit_rate / denominator,
        })
    }
}

/// Runs models over the blocks of a set of sessions.
#[derive(Clone, Debug)]
pub struct Trainer {
    config: Config,
}

impl Trainer {
    pub fn new(config: Config) -> Self {
        Trainer { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fit for `config.num_epochs` passes and return one summary per pass.
    pub fn fit<M: SessionParallelModel>(
        &self,
        model: &mut M,
        sessions: &Sessions,
    ) -> Result<Vec<EpochSummary>, failure::Error> {
        (0..self.config.num_epochs)
            .map(|epoch| self.fit_epoch(model, sessions, epoch))
            .collect()
    }

    /// One pass over a fresh batcher, taking a gradient step per block.
    pub fn fit_epoch<M: SessionParallelModel>(
        &self,
        model: &mut M,
        sessions: &Sessions,
        epoch: usize,
    ) -> Result<EpochSummary, failure::Error> {
        let k = self.config.hit_rate_k;

        let summary = self.run(model, sessions, epoch, |model, block| {
            let fit = model.fit_block(block)?;
            let hit_rate = hit_rate_at_k(&fit.scores, block.targets(), k)?;

            Ok((fit.loss, hit_rate))
        })?;

        info!(
            epoch = summary.epoch,
            blocks = summary.num_blocks,
            loss = summary.loss,
            hit_rate = summary.hit_rate,
            "Finished epoch"
        );

        Ok(summary)
    }

    /// One pass without parameter updates, measuring hit-rate@k.
    pub fn evaluate<M: SessionParallelModel>(
        &self,
        model: &mut M,
        sessions: &Sessions,
    ) -> Result<EpochSummary, failure::Error> {
        let k = self.config.hit_rate_k;

        let summary = self.run(model, sessions, 0, |model, block| {
            model.advance(block)?;
            let hit_rate = hit_rate_at_k(&model.lane_scores()?, block.targets(), k)?;

            Ok((0.0, hit_rate))
        })?;

        info!(
            blocks = summary.num_blocks,
            hit_rate = summary.hit_rate,
            "Finished evaluation"
        );

        Ok(summary)
    }

    fn run<M, F>(
        &self,
        model: &mut M,
        sessions: &Sessions,
        epoch: usize,
        mut step: F,
    ) -> Result<EpochSummary, failure::Error>
    where
        M: SessionParallelModel,
        F: FnMut(&mut M, &Block) -> Result<(f32, f32), failure::Error>,
    {
        let batcher = SessionParallelBatcher::new(sessions, &self.config)?;

        if batcher.batch_size() != model.num_lanes() {
            return Err(FittingError::BatchSizeMismatch {
                expected: model.num_lanes(),
                found: batcher.batch_size(),
            }
            .into());
        }

        model.reset();

        let mut progress = Progress::new(epoch, self.config.log_every);
        let mut consume = |block: Block| -> Result<(), failure::Error> {
            let (loss, hit_rate) = step(model, &block)?;
            progress.record(loss, hit_rate);

            Ok(())
        };

        if self.config.prefetch {
            prefetch_for_each(batcher, consume)?;
        } else {
            for block in batcher {
                consume(block)?;
            }
        }

        Ok(progress.finish()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ewma::Hyperparameters;
    use crate::models::BlockFit;
    use crate::PredictionError;

    /// Scores the next item of a fixed cycle highest.
    struct Oracle {
        lanes: usize,
        num_items: usize,
        last_inputs: Vec<usize>,
        blocks_seen: usize,
        resets: usize,
    }

    impl Oracle {
        fn new(lanes: usize, num_items: usize) -> Self {
            Oracle {
                lanes,
                num_items,
                last_inputs: vec![0; lanes],
                blocks_seen: 0,
                resets: 0,
            }
        }
    }

    impl SessionParallelModel for Oracle {
        fn num_lanes(&self) -> usize {
            self.lanes
        }

        fn fit_block(&mut self, block: &Block) -> Result<BlockFit, FittingError> {
            self.advance(block)?;

            Ok(BlockFit {
                loss: 1.0,
                scores: self.lane_scores()?,
            })
        }

        fn advance(&mut self, block: &Block) -> Result<(), PredictionError> {
            self.blocks_seen += 1;
            self.last_inputs = block.inputs().to_vec();
            Ok(())
        }

        fn lane_scores(&self) -> Result<Vec<Vec<f32>>, PredictionError> {
            Ok(self
                .last_inputs
                .iter()
                .map(|&input| {
                    let mut scores = vec![0.0; self.num_items];
                    scores[input % (self.num_items - 1) + 1] = 1.0;
                    scores
                })
                .collect())
        }

        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    /// Scores highest whatever targets it was last fitted on.
    struct Memorizer {
        lanes: usize,
        num_items: usize,
        learned: Vec<usize>,
    }

    impl SessionParallelModel for Memorizer {
        fn num_lanes(&self) -> usize {
            self.lanes
        }

        fn fit_block(&mut self, block: &Block) -> Result<BlockFit, FittingError> {
            let scores = self.lane_scores()?;
            self.learned = block.targets().to_vec();

            Ok(BlockFit { loss: 0.0, scores })
        }

        fn advance(&mut self, _: &Block) -> Result<(), PredictionError> {
            Ok(())
        }

        fn lane_scores(&self) -> Result<Vec<Vec<f32>>, PredictionError> {
            Ok(self
                .learned
                .iter()
                .map(|&item_id| {
                    let mut scores = vec![0.0; self.num_items];
                    scores[item_id] = 1.0;
                    scores
                })
                .collect())
        }

        fn reset(&mut self) {}
    }

    fn cyclic_sessions(num_users: usize) -> Sessions {
        (0..num_users)
            .map(|user| {
                let items = (0..6).map(|idx| 1 + (user + idx) % 4).collect();
                (user + 1, items)
            })
            .collect()
    }

    #[test]
    fn summaries_average_over_blocks() {
        let sessions = cyclic_sessions(40);

        for &prefetch in &[true, false] {
            let config = Config::default()
                .batch_size(4)
                .num_epochs(3)
                .log_every(2)
                .hit_rate_k(1)
                .prefetch(prefetch);
            let expected_blocks = SessionParallelBatcher::new(&sessions, &config)
                .unwrap()
                .count();

            let mut model = Oracle::new(4, 5);
            let summaries = Trainer::new(config).fit(&mut model, &sessions).unwrap();

            assert_eq!(summaries.len(), 3);
            assert_eq!(model.resets, 3);
            assert_eq!(model.blocks_seen, 3 * expected_blocks);

            for (epoch, summary) in summaries.iter().enumerate() {
                assert_eq!(summary.epoch, epoch);
                assert_eq!(summary.num_blocks, expected_blocks);
                assert_eq!(summary.loss, 1.0);
                assert_eq!(summary.hit_rate, 1.0);
            }
        }
    }

    #[test]
    fn training_hit_rate_uses_scores_before_the_update() {
        let sessions = cyclic_sessions(40);
        let trainer = Trainer::new(Config::default().batch_size(4).hit_rate_k(1));

        let mut model = Memorizer {
            lanes: 4,
            num_items: 5,
            learned: vec![1; 4],
        };
        let summary = trainer.fit_epoch(&mut model, &sessions, 0).unwrap();

        // Consecutive targets within a cyclic session always differ.
        assert!(summary.hit_rate < 0.5, "hit rate {}", summary.hit_rate);
    }

    #[test]
    fn lane_count_must_match() {
        let sessions = cyclic_sessions(40);
        let trainer = Trainer::new(Config::default().batch_size(4));

        let mut model = Oracle::new(3, 5);

        assert!(trainer.fit_epoch(&mut model, &sessions, 0).is_err());
        assert_eq!(model.blocks_seen, 0);
    }

    #[test]
    fn evaluation_does_not_report_loss() {
        let sessions = cyclic_sessions(40);
        let trainer = Trainer::new(Config::default().batch_size(4).hit_rate_k(1));

        let mut model = Oracle::new(4, 5);
        let summary = trainer.evaluate(&mut model, &sessions).unwrap();

        assert_eq!(summary.loss, 0.0);
        assert_eq!(summary.hit_rate, 1.0);
    }

    #[test]
    fn ewma_model_trains() {
        let sessions = cyclic_sessions(64);
        let config = Config::default()
            .batch_size(8)
            .num_epochs(2)
            .embedding_dim(8)
            .learning_rate(0.05);

        let mut model = Hyperparameters::from_config(5, &config).build();
        let trainer = Trainer::new(config);

        let summaries = trainer.fit(&mut model, &sessions).unwrap();
        assert!(summaries.iter().all(|summary| summary.loss.is_finite()));

        let evaluation = trainer.evaluate(&mut model, &sessions).unwrap();
        assert!(evaluation.hit_rate >= 0.0 && evaluation.hit_rate <= 1.0);
    }
}
