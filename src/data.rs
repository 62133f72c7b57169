//! Rating tables, the user split and per-user session collection.
//!
//! The interaction log is expected to be chronological per user: row order
//! is session order. Logs that are not should be passed through
//! [`RecordStore::sort_by_timestamp`] before sessions are collected.
use std::collections::{HashMap, HashSet};

use rand::Rng;
use tracing::info;

use crate::config::Config;
use crate::{DataError, ItemId, Timestamp, UserId};

/// One row of the interaction log.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Interaction {
    user_id: UserId,
    item_id: ItemId,
    rating: f32,
    timestamp: Timestamp,
}

impl Interaction {
    pub fn new(user_id: UserId, item_id: ItemId, rating: f32, timestamp: Timestamp) -> Self {
        Interaction {
            user_id,
            item_id,
            rating,
            timestamp,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    pub fn rating(&self) -> f32 {
        self.rating
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

/// One row of the item catalog.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Movie {
    pub item_id: ItemId,
    pub title: String,
}

/// One row of the user catalog.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct User {
    pub user_id: UserId,
}

/// Upper bounds of the id spaces. Ids are not remapped, so dense
/// per-id arrays need `max_id + 1` rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Vocabulary {
    /// Largest item id in the item table.
    pub item_vocab_size: usize,
    /// Largest user id in the user table.
    pub user_count: usize,
}

impl Vocabulary {
    /// Rows needed to index any item id.
    pub fn num_items(&self) -> usize {
        self.item_vocab_size + 1
    }

    /// Rows needed to index any user id.
    pub fn num_users(&self) -> usize {
        self.user_count + 1
    }
}

/// The three input tables.
#[derive(Debug, Clone)]
pub struct RecordStore {
    movies: Vec<Movie>,
    users: Vec<User>,
    interactions: Vec<Interaction>,
    movie_index: HashMap<ItemId, usize>,
}

impl RecordStore {
    pub fn new(movies: Vec<Movie>, interactions: Vec<Interaction>, users: Vec<User>) -> Self {
        let mut movie_index = HashMap::with_capacity(movies.len());

        for (idx, movie) in movies.iter().enumerate() {
            movie_index.entry(movie.item_id).or_insert(idx);
        }

        RecordStore {
            movies,
            users,
            interactions,
            movie_index,
        }
    }

    pub fn movies(&self) -> &[Movie] {
        &self.movies
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// Largest item and user ids.
    pub fn vocabulary(&self) -> Result<Vocabulary, DataError> {
        let item_vocab_size = self.movies.iter().map(|x| x.item_id).max();
        let user_count = self.users.iter().map(|x| x.user_id).max();

        match (item_vocab_size, user_count) {
            (Some(item_vocab_size), Some(user_count)) => Ok(Vocabulary {
                item_vocab_size,
                user_count,
            }),
            _ => Err(DataError::EmptyVocabulary),
        }
    }

    /// Distinct user ids in user-table order.
    pub fn user_ids(&self) -> Vec<UserId> {
        let mut seen = HashSet::with_capacity(self.users.len());

        self.users
            .iter()
            .map(|x| x.user_id)
            .filter(|&user_id| seen.insert(user_id))
            .collect()
    }

    /// Title of the given item.
    pub fn get_movie(&self, item_id: ItemId) -> Result<&str, DataError> {
        self.movie_index
            .get(&item_id)
            .map(|&idx| self.movies[idx].title.as_str())
            .ok_or(DataError::NotFound { item_id })
    }

    /// Reorder the log by timestamp. The sort is stable, so rows with equal
    /// timestamps keep their relative order.
    pub fn sort_by_timestamp(&mut self) {
        self.interactions.sort_by_key(|x| x.timestamp());
    }

    /// Collect the session of every user in `user_ids`.
    ///
    /// The result lists users in the order given (repeated ids are kept
    /// once). Users without interactions get an empty session.
    pub fn collect_sessions(&self, user_ids: &[UserId]) -> Sessions {
        let mut positions = HashMap::with_capacity(user_ids.len());
        let mut ordered_users = Vec::with_capacity(user_ids.len());

        for &user_id in user_ids {
            if !positions.contains_key(&user_id) {
                positions.insert(user_id, ordered_users.len());
                ordered_users.push(user_id);
            }
        }

        let mut buckets = vec![Vec::new(); ordered_users.len()];

        for interaction in &self.interactions {
            if let Some(&position) = positions.get(&interaction.user_id()) {
                buckets[position].push(interaction.item_id());
            }
        }

        ordered_users.into_iter().zip(buckets.into_iter()).collect()
    }
}

/// Train and validation users, each in shuffled order.
#[derive(Clone, Debug, PartialEq)]
pub struct UserSplit {
    pub train: Vec<UserId>,
    pub valid: Vec<UserId>,
}

/// Shuffle `users` with a generator seeded from `config.seed` and split
/// them: the first `floor(len * split_ratio)` go to training.
pub fn user_split(users: &[UserId], config: &Config) -> Result<UserSplit, DataError> {
    config.validate()?;

    if users.len() < config.batch_size {
        return Err(DataError::InsufficientUsers {
            available: users.len(),
            required: config.batch_size,
        });
    }

    let mut shuffled = users.to_owned();
    config.rng().shuffle(&mut shuffled);

    let cutoff = (shuffled.len() as f64 * config.split_ratio).floor() as usize;
    let valid = shuffled.split_off(cutoff);

    info!(train = shuffled.len(), valid = valid.len(), "Split users");

    Ok(UserSplit {
        train: shuffled,
        valid,
    })
}

/// Sessions of a set of users, stored contiguously.
///
/// Iteration order is the insertion order of the users, which the batcher
/// uses as the order in which users are assigned to lanes.
#[derive(Clone, Debug, PartialEq)]
pub struct Sessions {
    user_ids: Vec<UserId>,
    user_pointers: Vec<usize>,
    item_ids: Vec<ItemId>,
    positions: HashMap<UserId, usize>,
}

/// One user's session.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Session<'a> {
    pub user_id: UserId,
    pub item_ids: &'a [ItemId],
}

impl<'a> Session<'a> {
    pub fn len(&self) -> usize {
        self.item_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.item_ids.is_empty()
    }
}

/// A fixed-length window of a session with its next-item targets.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LabelledWindow<'a> {
    pub user_id: UserId,
    pub inputs: &'a [ItemId],
    pub targets: &'a [ItemId],
}

impl Sessions {
    /// Number of users.
    pub fn len(&self) -> usize {
        self.user_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
    }

    /// Users in insertion order.
    pub fn user_ids(&self) -> &[UserId] {
        &self.user_ids
    }

    /// Total number of interactions over all sessions.
    pub fn num_interactions(&self) -> usize {
        self.item_ids.len()
    }

    pub fn get(&self, user_id: UserId) -> Option<&[ItemId]> {
        self.positions
            .get(&user_id)
            .map(|&position| self.session_at(position).item_ids)
    }

    pub fn iter(&self) -> SessionsIterator {
        SessionsIterator {
            sessions: self,
            idx: 0,
        }
    }

    /// Cut every session into non-overlapping windows of `session_length`
    /// inputs, each paired with the same window shifted by one item.
    ///
    /// A session of length `n` yields `(n - 1) / session_length` windows;
    /// the remainder is dropped.
    pub fn windows(&self, session_length: usize) -> Vec<LabelledWindow> {
        if session_length == 0 {
            return Vec::new();
        }

        self.iter()
            .flat_map(|session| {
                let num_windows = session.len().saturating_sub(1) / session_length;

                (0..num_windows).map(move |idx| {
                    let start = idx * session_length;
                    let stop = start + session_length;

                    LabelledWindow {
                        user_id: session.user_id,
                        inputs: &session.item_ids[start..stop],
                        targets: &session.item_ids[start + 1..stop + 1],
                    }
                })
            })
            .collect()
    }

    fn session_at(&self, position: usize) -> Session {
        let start = self.user_pointers[position];
        let stop = self.user_pointers[position + 1];

        Session {
            user_id: self.user_ids[position],
            item_ids: &self.item_ids[start..stop],
        }
    }
}

/// Builds sessions in iteration order. A repeated user id keeps its first
/// session.
impl std::iter::FromIterator<(UserId, Vec<ItemId>)> for Sessions {
    fn from_iter<T: IntoIterator<Item = (UserId, Vec<ItemId>)>>(iter: T) -> Self {
        let mut user_ids = Vec::new();
        let mut user_pointers = vec![0];
        let mut item_ids = Vec::new();
        let mut positions = HashMap::new();

        for (user_id, items) in iter {
            if positions.contains_key(&user_id) {
                continue;
            }

            positions.insert(user_id, user_ids.len());
            user_ids.push(user_id);
            item_ids.extend_from_slice(&items);
            user_pointers.push(item_ids.len());
        }

        Sessions {
            user_ids,
            user_pointers,
            item_ids,
            positions,
        }
    }
}

pub struct SessionsIterator<'a> {
    sessions: &'a Sessions,
    idx: usize,
}

impl<'a> Iterator for SessionsIterator<'a> {
    type Item = Session<'a>;
    fn next(&mut self) -> Option<Self::Item> {
        let value = if self.idx >= self.sessions.len() {
            None
        } else {
            Some(self.sessions.session_at(self.idx))
        };

        self.idx += 1;

        value
    }
}
