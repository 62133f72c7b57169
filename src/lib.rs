//! # sprec
//!
//! `sprec` turns user/item rating logs into session-parallel minibatches
//! and trains sequence models that predict the next item a user will
//! interact with.
//!
//! Every user's interactions, in log order, form a session. The
//! [`batching::SessionParallelBatcher`] lays `batch_size` sessions side
//! by side in lanes and advances all of them one item per step; when a
//! lane runs out of items it is handed the next unused user. Each step is
//! a rectangular [`batching::Block`] of `(input, target)` pairs, so a
//! model can carry per-lane hidden state from block to block.
//!
//! ## Example
//! ```rust,no_run
//! # extern crate sprec;
//! use sprec::config::Config;
//! use sprec::models::ewma::Hyperparameters;
//! use sprec::pipeline::SessionData;
//! use sprec::training::Trainer;
//!
//! let config = Config::default().batch_size(16).num_epochs(5);
//! let store = sprec::datasets::load_movielens_1m("ml-1m").unwrap();
//! let data = SessionData::prepare(&store, &config).unwrap();
//!
//! let mut model = Hyperparameters::from_config(data.vocabulary().num_items(), &config).build();
//! let trainer = Trainer::new(config);
//!
//! for summary in trainer.fit(&mut model, data.train()).unwrap() {
//!     println!("{:?}", summary);
//! }
//! println!("{:?}", trainer.evaluate(&mut model, data.valid()).unwrap());
//! ```
#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate itertools;

#[macro_use]
extern crate failure;

pub mod batching;
pub mod config;
pub mod data;
pub mod datasets;
pub mod evaluation;
pub mod models;
pub mod pipeline;
pub mod training;

/// Alias for user ids.
pub type UserId = usize;
/// Alias for item ids.
pub type ItemId = usize;
/// Alias for timestamps.
pub type Timestamp = usize;

/// Errors raised while preparing session data.
///
/// None of these are recoverable by retrying: the inputs are static, so
/// the same call fails the same way.
#[derive(Debug, Fail, PartialEq)]
pub enum DataError {
    /// The item or the user table is empty.
    #[fail(display = "No items or no users loaded.")]
    EmptyVocabulary,
    /// Fewer users than lanes.
    #[fail(
        display = "Need at least {} users to fill every lane, found {}.",
        required, available
    )]
    InsufficientUsers {
        /// Users available.
        available: usize,
        /// Users required (the batch size).
        required: usize,
    },
    /// Item id absent from the item table.
    #[fail(display = "Item {} not found.", item_id)]
    NotFound {
        /// The missing id.
        item_id: ItemId,
    },
    /// A session too short to produce an `(input, target)` pair was
    /// selected for a lane.
    #[fail(
        display = "Session of user {} has {} items; at least 2 are required.",
        user_id, length
    )]
    DegenerateSession {
        /// Owner of the session.
        user_id: UserId,
        /// Its length.
        length: usize,
    },
    /// Train/validation ratio outside of (0, 1).
    #[fail(display = "Split ratio must lie in (0, 1), got {}.", ratio)]
    InvalidSplitRatio {
        /// The rejected ratio.
        ratio: f64,
    },
    /// Zero lanes requested.
    #[fail(display = "Batch size must be positive.")]
    InvalidBatchSize,
}

/// Fitting error types.
#[derive(Debug, Fail)]
pub enum FittingError {
    /// No block could be produced from the supplied sessions.
    #[fail(display = "No interactions to fit on.")]
    NoInteractions,
    /// The loss diverged.
    #[fail(display = "Loss is not finite.")]
    InvalidLoss,
    /// Lane scores of the block were not finite.
    #[fail(display = "Scores of the fitted block are not finite.")]
    InvalidScores,
    /// Blocks and model disagree on the number of lanes.
    #[fail(display = "Model has {} lanes but blocks have {}.", expected, found)]
    BatchSizeMismatch {
        /// Lanes of the model.
        expected: usize,
        /// Lanes of the blocks.
        found: usize,
    },
}

/// Prediction error types.
#[derive(Debug, Fail)]
pub enum PredictionError {
    /// Failed prediction due to numerical issues.
    #[fail(display = "Invalid prediction value: non-finite or not a number.")]
    InvalidPredictionValue,
}

impl From<PredictionError> for FittingError {
    fn from(_: PredictionError) -> Self {
        FittingError::InvalidScores
    }
}
