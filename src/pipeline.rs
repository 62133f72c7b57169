//! Preparation of train and validation sessions from a record store.
use tracing::info;

use crate::batching::SessionParallelBatcher;
use crate::config::Config;
use crate::data::{user_split, RecordStore, Sessions, UserSplit, Vocabulary};
use crate::{DataError, ItemId};

/// Everything derived from the record store before training starts.
#[derive(Clone, Debug)]
pub struct SessionData {
    vocabulary: Vocabulary,
    split: UserSplit,
    train: Sessions,
    valid: Sessions,
}

impl SessionData {
    /// Size the vocabularies, split the users and collect the sessions of
    /// both partitions.
    pub fn prepare(store: &RecordStore, config: &Config) -> Result<Self, DataError> {
        config.validate()?;

        let vocabulary = store.vocabulary()?;
        let split = user_split(&store.user_ids(), config)?;

        let train = store.collect_sessions(&split.train);
        let valid = store.collect_sessions(&split.valid);

        info!(
            item_vocab_size = vocabulary.item_vocab_size,
            user_count = vocabulary.user_count,
            train_interactions = train.num_interactions(),
            valid_interactions = valid.num_interactions(),
            "Prepared sessions"
        );

        Ok(SessionData {
            vocabulary,
            split,
            train,
            valid,
        })
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn split(&self) -> &UserSplit {
        &self.split
    }

    pub fn train(&self) -> &Sessions {
        &self.train
    }

    pub fn valid(&self) -> &Sessions {
        &self.valid
    }

    /// Blocks over the training sessions.
    pub fn train_blocks(&self, config: &Config) -> Result<SessionParallelBatcher, DataError> {
        SessionParallelBatcher::new(&self.train, config)
    }

    /// The whole training stream as aligned input and target vectors.
    pub fn train_pairs(&self, config: &Config) -> Result<(Vec<ItemId>, Vec<ItemId>), DataError> {
        Ok(self.train_blocks(config)?.materialize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Interaction, Movie, User};

    fn store(num_users: usize) -> RecordStore {
        let movies = (1..=20)
            .map(|item_id| Movie {
                item_id,
                title: format!("Movie {}", item_id),
            })
            .collect();
        let users = (1..=num_users).map(|user_id| User { user_id }).collect();

        let mut interactions = Vec::new();
        for step in 0..10 {
            for user_id in 1..=num_users {
                if step < 2 + user_id % 7 {
                    let item_id = 1 + (user_id * 3 + step) % 20;
                    interactions.push(Interaction::new(user_id, item_id, 4.0, step));
                }
            }
        }

        RecordStore::new(movies, interactions, users)
    }

    #[test]
    fn partitions_keep_shuffled_order() {
        let store = store(50);
        let config = Config::default().batch_size(4);

        let data = SessionData::prepare(&store, &config).unwrap();

        assert_eq!(data.vocabulary().item_vocab_size, 20);
        assert_eq!(data.vocabulary().user_count, 50);
        assert_eq!(data.split().train.len(), 40);
        assert_eq!(data.train().user_ids(), data.split().train.as_slice());
        assert_eq!(data.valid().user_ids(), data.split().valid.as_slice());
        assert_eq!(
            data.train().num_interactions() + data.valid().num_interactions(),
            store.len()
        );
    }

    #[test]
    fn training_stream_pairs_consecutive_items() {
        let store = store(50);
        let config = Config::default().batch_size(4);
        let data = SessionData::prepare(&store, &config).unwrap();

        let (inputs, targets) = data.train_pairs(&config).unwrap();

        assert!(!inputs.is_empty());
        assert_eq!(inputs.len() % 4, 0);

        for (&input, &target) in inputs.iter().zip(&targets) {
            assert!(data.train().iter().any(|session| session
                .item_ids
                .windows(2)
                .any(|pair| pair[0] == input && pair[1] == target)));
        }

        let first = data.train_blocks(&config).unwrap().next().unwrap();
        let expected: Vec<_> = data
            .train()
            .iter()
            .filter(|session| session.len() >= 2)
            .take(4)
            .map(|session| session.user_id)
            .collect();
        assert_eq!(first.user_ids(), expected.as_slice());
    }

    #[test]
    fn too_few_users() {
        let store = store(3);
        let config = Config::default().batch_size(4);

        assert_eq!(
            SessionData::prepare(&store, &config).unwrap_err(),
            DataError::InsufficientUsers {
                available: 3,
                required: 4,
            }
        );
    }
}
