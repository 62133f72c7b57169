//! Run configuration.
//!
//! A single immutable [`Config`] is handed to every stage of the pipeline:
//! the user split, the batcher, the model and the training loop.
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use failure;
use rand::prng::XorShiftRng;
use rand::SeedableRng;
use serde_json;

use crate::DataError;

/// Options recognised by the pipeline.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Window length for [`Sessions::windows`](crate::data::Sessions::windows).
    /// The session-parallel batcher does not use it.
    pub session_length: usize,
    /// Number of lanes in every block.
    pub batch_size: usize,
    /// Fraction of users assigned to the training partition.
    pub split_ratio: f64,
    /// Seed for the user shuffle and for negative sampling.
    pub seed: u64,
    pub learning_rate: f32,
    pub num_epochs: usize,
    pub embedding_dim: usize,
    /// `k` in hit-rate@k.
    pub hit_rate_k: usize,
    /// Report progress every this many blocks.
    pub log_every: usize,
    /// Produce the next block on a separate thread while the current one
    /// is being consumed.
    pub prefetch: bool,
    /// Drop sessions shorter than two items before lanes are assigned. When
    /// false, such sessions fail batching with `DegenerateSession`.
    pub skip_short_sessions: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            session_length: 5,
            batch_size: 16,
            split_ratio: 0.8,
            seed: 10,
            learning_rate: 0.01,
            num_epochs: 100,
            embedding_dim: 32,
            hit_rate_k: 5,
            log_every: 500,
            prefetch: true,
            skip_short_sessions: true,
        }
    }
}

impl Config {
    /// Read a configuration from a JSON file. Missing keys take their
    /// default values.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, failure::Error> {
        let reader = BufReader::new(File::open(path)?);
        let config: Config = serde_json::from_reader(reader)?;
        config.validate()?;

        Ok(config)
    }

    /// Check the options the data pipeline depends on.
    pub fn validate(&self) -> Result<(), DataError> {
        if self.batch_size == 0 {
            return Err(DataError::InvalidBatchSize);
        }

        if !(self.split_ratio > 0.0 && self.split_ratio < 1.0) {
            return Err(DataError::InvalidSplitRatio {
                ratio: self.split_ratio,
            });
        }

        Ok(())
    }

    /// A fresh generator seeded from `seed`. Every call returns an
    /// identically seeded generator.
    pub fn rng(&self) -> XorShiftRng {
        let mut seed = [0; 16];
        seed[..8].copy_from_slice(&self.seed.to_le_bytes());
        seed[8..].copy_from_slice(&(!self.seed).to_le_bytes());

        XorShiftRng::from_seed(seed)
    }

    /// Set the window length.
    pub fn session_length(mut self, session_length: usize) -> Self {
        self.session_length = session_length;
        self
    }

    /// Set the number of lanes.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the training fraction.
    pub fn split_ratio(mut self, split_ratio: f64) -> Self {
        self.split_ratio = split_ratio;
        self
    }

    /// Set the seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the learning rate.
    pub fn learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the number of epochs.
    pub fn num_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = num_epochs;
        self
    }

    /// Set the embedding dimensionality.
    pub fn embedding_dim(mut self, embedding_dim: usize) -> Self {
        self.embedding_dim = embedding_dim;
        self
    }

    pub fn hit_rate_k(mut self, hit_rate_k: usize) -> Self {
        self.hit_rate_k = hit_rate_k;
        self
    }

    pub fn log_every(mut self, log_every: usize) -> Self {
        self.log_every = log_every;
        self
    }

    pub fn prefetch(mut self, prefetch: bool) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn skip_short_sessions(mut self, skip_short_sessions: bool) -> Self {
        self.skip_short_sessions = skip_short_sessions;
        self
    }
}
