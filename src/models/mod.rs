//! Models module.
pub mod ewma;

use crate::batching::Block;
use crate::{FittingError, PredictionError};

/// The loss used for training the model.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Loss {
    /// Bayesian Personalised Ranking.
    BPR,
    /// Pairwise hinge loss.
    Hinge,
}

/// Optimizer used to train the model.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Optimizer {
    /// Adagrad.
    Adagrad,
    /// Adam.
    Adam,
}

/// Outcome of one training step.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockFit {
    /// Mean per-lane loss.
    pub loss: f32,
    /// Per-lane item scores from the forward pass, before the parameter
    /// update.
    pub scores: Vec<Vec<f32>>,
}

/// A model consuming session-parallel blocks.
///
/// The model keeps one hidden state per lane. Each block advances every
/// lane by one item; lanes flagged in [`Block::session_starts`] begin a
/// new user and must start from a fresh state.
pub trait SessionParallelModel {
    /// Number of lanes the model was built for.
    fn num_lanes(&self) -> usize;
    /// Advance every lane by one block and take a gradient step on the
    /// block's targets. The returned scores are those the model held
    /// before the step.
    fn fit_block(&mut self, block: &Block) -> Result<BlockFit, FittingError>;
    /// Advance every lane by one block without updating parameters.
    fn advance(&mut self, block: &Block) -> Result<(), PredictionError>;
    /// Score every item id for every lane, given the current lane states.
    fn lane_scores(&self) -> Result<Vec<Vec<f32>>, PredictionError>;
    /// Clear all lane states.
    fn reset(&mut self);
}
