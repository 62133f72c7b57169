//! Session-parallel minibatches.
//!
//! `batch_size` lanes each walk through one user's session, one item per
//! step. A step emits a [`Block`] holding, for every lane, the current item
//! as input and the following item as target. When a lane reaches the last
//! pair of its session it is rebound to the next user that has not been
//! seen yet, so every block stays rectangular. Once no unseen user is left,
//! the first lane to exhaust its session ends the stream and the block it
//! was part of is discarded.
//!
//! ```text
//!          step 1  step 2  step 3
//! lane 0:  u1[0]   u1[1]   u4[0]
//! lane 1:  u2[0]   u3[0]   u3[1]   <- u3 done, no users left: step 3 dropped
//! ```
use std::sync::mpsc;
use std::thread;

use tracing::{debug, warn};

use crate::config::Config;
use crate::data::{Session, Sessions};
use crate::{DataError, ItemId, UserId};

/// One step of the session-parallel stream: an `(input, target)` pair per lane.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    inputs: Vec<ItemId>,
    targets: Vec<ItemId>,
    user_ids: Vec<UserId>,
    session_starts: Vec<bool>,
}

impl Block {
    fn with_capacity(capacity: usize) -> Self {
        Block {
            inputs: Vec::with_capacity(capacity),
            targets: Vec::with_capacity(capacity),
            user_ids: Vec::with_capacity(capacity),
            session_starts: Vec::with_capacity(capacity),
        }
    }

    /// Number of lanes.
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Current item of every lane.
    pub fn inputs(&self) -> &[ItemId] {
        &self.inputs
    }

    /// Next item of every lane.
    pub fn targets(&self) -> &[ItemId] {
        &self.targets
    }

    /// User occupying every lane.
    pub fn user_ids(&self) -> &[UserId] {
        &self.user_ids
    }

    /// Whether the lane's pair is the first of its user's session. Models
    /// carrying per-lane state across blocks reset it here.
    pub fn session_starts(&self) -> &[bool] {
        &self.session_starts
    }
}

#[derive(Clone, Copy, Debug)]
struct Lane {
    key: usize,
    cursor: usize,
    fresh: bool,
}

impl Lane {
    fn new(key: usize) -> Self {
        Lane {
            key,
            cursor: 0,
            fresh: true,
        }
    }
}

/// Iterator over the blocks of a set of sessions.
///
/// Users enter lanes in the iteration order of the [`Sessions`] it was
/// built from. The stream is finite and cannot be restarted: build a new
/// batcher to go over the data again.
#[derive(Clone, Debug)]
pub struct SessionParallelBatcher<'a> {
    keys: Vec<Session<'a>>,
    lanes: Vec<Lane>,
    next_unassigned: usize,
    num_skipped: usize,
    finished: bool,
}

impl<'a> SessionParallelBatcher<'a> {
    /// Bind the first `config.batch_size` usable sessions to the lanes.
    ///
    /// Sessions shorter than two items cannot produce a pair. They are
    /// dropped when `config.skip_short_sessions` is set and rejected with
    /// [`DataError::DegenerateSession`] otherwise.
    pub fn new(sessions: &'a Sessions, config: &Config) -> Result<Self, DataError> {
        let batch_size = config.batch_size;

        if batch_size == 0 {
            return Err(DataError::InvalidBatchSize);
        }

        let mut keys = Vec::with_capacity(sessions.len());
        let mut num_skipped = 0;

        for session in sessions.iter() {
            if session.len() >= 2 {
                keys.push(session);
            } else if config.skip_short_sessions {
                num_skipped += 1;
            } else {
                return Err(DataError::DegenerateSession {
                    user_id: session.user_id,
                    length: session.len(),
                });
            }
        }

        if num_skipped > 0 {
            warn!(num_skipped, "Skipped sessions shorter than two items");
        }

        if keys.len() < batch_size {
            return Err(DataError::InsufficientUsers {
                available: keys.len(),
                required: batch_size,
            });
        }

        Ok(SessionParallelBatcher {
            keys,
            lanes: (0..batch_size).map(Lane::new).collect(),
            next_unassigned: batch_size,
            num_skipped,
            finished: false,
        })
    }

    /// Number of lanes.
    pub fn batch_size(&self) -> usize {
        self.lanes.len()
    }

    /// Number of sessions that will be assigned to lanes.
    pub fn num_sessions(&self) -> usize {
        self.keys.len()
    }

    /// Number of sessions dropped for being too short.
    pub fn num_skipped(&self) -> usize {
        self.num_skipped
    }

    /// Run the stream to completion and flatten it into aligned input and
    /// target vectors, block after block.
    pub fn materialize(self) -> (Vec<ItemId>, Vec<ItemId>) {
        let mut inputs = Vec::new();
        let mut targets = Vec::new();

        for block in self {
            inputs.extend_from_slice(block.inputs());
            targets.extend_from_slice(block.targets());
        }

        (inputs, targets)
    }
}

impl<'a> Iterator for SessionParallelBatcher<'a> {
    type Item = Block;
    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut block = Block::with_capacity(self.lanes.len());
        let mut num_rebound = 0;

        for lane in self.lanes.iter_mut() {
            let session = self.keys[lane.key];

            block.inputs.push(session.item_ids[lane.cursor]);
            block.targets.push(session.item_ids[lane.cursor + 1]);
            block.user_ids.push(session.user_id);
            block.session_starts.push(lane.fresh);

            lane.cursor += 1;
            lane.fresh = false;

            if lane.cursor >= session.len() - 1 {
                if self.next_unassigned < self.keys.len() {
                    *lane = Lane::new(self.next_unassigned);
                    self.next_unassigned += 1;
                    num_rebound += 1;
                } else {
                    // Out of users: this step cannot be completed.
                    self.finished = true;
                    return None;
                }
            }
        }

        if num_rebound > 0 {
            debug!(
                num_rebound,
                remaining = self.keys.len() - self.next_unassigned,
                "Rebound lanes"
            );
        }

        Some(block)
    }
}

/// Drive `func` over every block of `batcher`, producing the next block on
/// a separate thread while the current one is being consumed.
///
/// At most one block is buffered and blocks arrive in step order. An
/// error from `func` stops production and is returned.
pub fn prefetch_for_each<F, E>(batcher: SessionParallelBatcher, mut func: F) -> Result<(), E>
where
    F: FnMut(Block) -> Result<(), E>,
{
    let (sender, receiver) = mpsc::sync_channel(1);

    thread::scope(|scope| {
        scope.spawn(move || {
            for block in batcher {
                if sender.send(block).is_err() {
                    break;
                }
            }
        });

        for block in receiver {
            func(block)?;
        }

        Ok(())
    })
}
