//! Model based on exponentially-weighted average (EWMA) of past embeddings,
//! trained on session-parallel blocks.
//!
//! The model estimates three sets of parameters:
//!
//! - n-dimensional item embeddings
//! - item biases (capturing item popularity), and
//! - an n-dimensional `alpha` parameter, capturing the rate at which past interactions should be decayed.
//!
//! Every lane carries a state `h` across blocks:
//! ```text
//! h_t = sigmoid(alpha) * h_{t-1} + (1.0 - sigmoid(alpha)) * i_t
//! ```
//! where `i_t` is the embedding of the lane's current item. The state is
//! zeroed whenever a lane starts a new session. The score of item `j` is
//! `h_t . i_j + b_j`.
use std::sync::Arc;

use rand::distributions::{Distribution, Normal, Uniform};
use rand::prng::XorShiftRng;
use rand::{Rng, SeedableRng};

use wyrm;
use wyrm::optim::{Optimizer as Optim, Optimizers};
use wyrm::{Arr, BoxedNode, DataInput, Variable};

use super::{BlockFit, Loss, Optimizer, SessionParallelModel};
use crate::batching::Block;
use crate::config::Config;
use crate::{FittingError, PredictionError};

fn embedding_init<T: Rng>(rows: usize, cols: usize, rng: &mut T) -> wyrm::Arr {
    let normal = Normal::new(0.0, 1.0 / cols as f64);
    Arr::zeros((rows, cols)).map(|_| normal.sample(rng) as f32)
}

fn row(values: &[f32]) -> wyrm::Arr {
    let mut arr = Arr::zeros((1, values.len()));

    for (dst, &src) in arr.iter_mut().zip(values) {
        *dst = src;
    }

    arr
}

/// Hyperparameters describing the EWMA model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hyperparameters {
    num_items: usize,
    num_lanes: usize,
    item_embedding_dim: usize,
    learning_rate: f32,
    l2_penalty: f32,
    loss: Loss,
    optimizer: Optimizer,
    seed: [u8; 16],
}

impl Hyperparameters {
    /// Build new hyperparameters for `num_items` item rows (the largest item
    /// id plus one) and `num_lanes` lanes.
    pub fn new(num_items: usize, num_lanes: usize) -> Self {
        Hyperparameters {
            num_items: num_items,
            num_lanes: num_lanes,
            item_embedding_dim: 16,
            learning_rate: 0.01,
            l2_penalty: 0.0,
            loss: Loss::BPR,
            optimizer: Optimizer::Adam,
            seed: [42; 16],
        }
    }

    /// Take lanes, dimensionality, learning rate and seed from the run
    /// configuration.
    pub fn from_config(num_items: usize, config: &Config) -> Self {
        let mut seed = [0; 16];
        config.rng().fill(&mut seed);

        Hyperparameters::new(num_items, config.batch_size)
            .embedding_dim(config.embedding_dim)
            .learning_rate(config.learning_rate)
            .from_seed(seed)
    }

    /// Set the learning rate.
    pub fn learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the L2 penalty.
    pub fn l2_penalty(mut self, l2_penalty: f32) -> Self {
        self.l2_penalty = l2_penalty;
        self
    }

    /// Set the embedding dimensionality.
    pub fn embedding_dim(mut self, embedding_dim: usize) -> Self {
        self.item_embedding_dim = embedding_dim;
        self
    }

    /// Set the loss function.
    pub fn loss(mut self, loss: Loss) -> Self {
        self.loss = loss;
        self
    }

    /// Set the optimizer type.
    pub fn optimizer(mut self, optimizer: Optimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Seed parameter initialisation and negative sampling.
    pub fn from_seed(mut self, seed: [u8; 16]) -> Self {
        self.seed = seed;
        self
    }

    fn build_params(&self, rng: &mut XorShiftRng) -> Parameters {
        let item_embeddings = Arc::new(wyrm::HogwildParameter::new(embedding_init(
            self.num_items,
            self.item_embedding_dim,
            rng,
        )));

        let item_biases = Arc::new(wyrm::HogwildParameter::new(Arr::zeros((self.num_items, 1))));
        let alpha = Arc::new(wyrm::HogwildParameter::new(Arr::zeros((
            1,
            self.item_embedding_dim,
        ))));

        Parameters {
            item_embedding: item_embeddings,
            item_biases: item_biases,
            alpha: alpha,
        }
    }

    /// Build the implicit EWMA model.
    pub fn build(self) -> ImplicitEWMAModel {
        let mut rng = XorShiftRng::from_seed(self.seed);
        let params = self.build_params(&mut rng);
        let graph = params.build(&self);

        let optimizer = match self.optimizer {
            Optimizer::Adagrad => Optimizers::Adagrad(
                wyrm::optim::Adagrad::new()
                    .learning_rate(self.learning_rate)
                    .l2_penalty(self.l2_penalty),
            ),

            Optimizer::Adam => Optimizers::Adam(
                wyrm::optim::Adam::new()
                    .learning_rate(self.learning_rate)
                    .l2_penalty(self.l2_penalty),
            ),
        };

        ImplicitEWMAModel {
            states: vec![vec![0.0; self.item_embedding_dim]; self.num_lanes],
            negative_item_range: Uniform::new(1, self.num_items.max(2)),
            hyper: self,
            params,
            graph,
            optimizer,
            rng,
        }
    }
}

#[derive(Debug)]
struct Parameters {
    item_embedding: Arc<wyrm::HogwildParameter>,
    item_biases: Arc<wyrm::HogwildParameter>,
    alpha: Arc<wyrm::HogwildParameter>,
}

impl Parameters {
    fn build(&self, hyper: &Hyperparameters) -> Graph {
        let item_embeddings = wyrm::ParameterNode::shared(self.item_embedding.clone());
        let item_biases = wyrm::ParameterNode::shared(self.item_biases.clone());
        let alpha = wyrm::ParameterNode::shared(self.alpha.clone()).sigmoid();
        let one_minus_alpha = 1.0 - alpha.clone();

        let mut lanes = Vec::with_capacity(hyper.num_lanes);
        let mut losses = Vec::with_capacity(hyper.num_lanes);

        for _ in 0..hyper.num_lanes {
            let input = wyrm::IndexInputNode::new(&vec![0; 1]);
            let target = wyrm::IndexInputNode::new(&vec![0; 1]);
            let negative = wyrm::IndexInputNode::new(&vec![0; 1]);
            let previous = wyrm::InputNode::new(Arr::zeros((1, hyper.item_embedding_dim)));

            let state = (alpha.clone() * previous.clone()
                + one_minus_alpha.clone() * item_embeddings.index(&input))
            .boxed();

            let positive_prediction =
                state.vector_dot(&item_embeddings.index(&target)) + item_biases.index(&target);
            let negative_prediction =
                state.vector_dot(&item_embeddings.index(&negative)) + item_biases.index(&negative);

            let loss = match hyper.loss {
                Loss::BPR => (negative_prediction - positive_prediction).sigmoid().boxed(),
                Loss::Hinge => (1.0 + negative_prediction - positive_prediction)
                    .relu()
                    .boxed(),
            };

            losses.push(loss);
            lanes.push(LaneGraph {
                input,
                target,
                negative,
                previous,
                state,
            });
        }

        let mut losses = losses.into_iter();
        let first = losses
            .next()
            .unwrap_or_else(|| wyrm::InputNode::new(Arr::zeros((1, 1))).boxed());
        let loss = losses.fold(first, |total, loss| (total + loss).boxed());

        Graph { lanes, loss }
    }
}

struct LaneGraph {
    input: Variable<wyrm::IndexInputNode>,
    target: Variable<wyrm::IndexInputNode>,
    negative: Variable<wyrm::IndexInputNode>,
    previous: Variable<wyrm::InputNode>,
    state: Variable<BoxedNode>,
}

struct Graph {
    lanes: Vec<LaneGraph>,
    loss: Variable<BoxedNode>,
}

/// Implicit EWMA model.
pub struct ImplicitEWMAModel {
    hyper: Hyperparameters,
    params: Parameters,
    graph: Graph,
    states: Vec<Vec<f32>>,
    optimizer: Optimizers,
    negative_item_range: Uniform<usize>,
    rng: XorShiftRng,
}

impl ImplicitEWMAModel {
    /// The hyperparameters the model was built with.
    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyper
    }

    fn load_block(&mut self, block: &Block) {
        let dim = self.hyper.item_embedding_dim;

        for (lane, state, &input_idx, &output_idx, &session_start) in izip!(
            &self.graph.lanes,
            &mut self.states,
            block.inputs(),
            block.targets(),
            block.session_starts()
        ) {
            if session_start {
                *state = vec![0.0; dim];
            }

            lane.previous.set_value(&row(state));
            lane.input.set_value(input_idx);
            lane.target.set_value(output_idx);
            lane.negative
                .set_value(self.negative_item_range.sample(&mut self.rng));
        }
    }

    fn store_states(&mut self) {
        for (lane, state) in self.graph.lanes.iter().zip(self.states.iter_mut()) {
            *state = lane.state.value().iter().cloned().collect();
        }
    }
}

impl SessionParallelModel for ImplicitEWMAModel {
    fn num_lanes(&self) -> usize {
        self.hyper.num_lanes
    }

    fn fit_block(&mut self, block: &Block) -> Result<BlockFit, FittingError> {
        self.load_block(block);

        self.graph.loss.forward();
        let loss_value = self.graph.loss.value().scalar_sum() / self.hyper.num_lanes as f32;

        if !loss_value.is_finite() {
            return Err(FittingError::InvalidLoss);
        }

        self.store_states();
        let scores = self.lane_scores()?;

        let loss = &mut self.graph.loss;
        loss.backward(1.0);
        self.optimizer.step(loss.parameters());
        loss.zero_gradient();

        Ok(BlockFit {
            loss: loss_value,
            scores,
        })
    }

    fn advance(&mut self, block: &Block) -> Result<(), PredictionError> {
        self.load_block(block);

        self.graph.loss.forward();
        self.store_states();
        self.graph.loss.zero_gradient();

        if self.states.iter().flatten().all(|x| x.is_finite()) {
            Ok(())
        } else {
            Err(PredictionError::InvalidPredictionValue)
        }
    }

    fn lane_scores(&self) -> Result<Vec<Vec<f32>>, PredictionError> {
        let embeddings = self.params.item_embedding.value();
        let biases = self.params.item_biases.value();

        self.states
            .iter()
            .map(|state| {
                embeddings
                    .outer_iter()
                    .zip(biases.iter())
                    .map(|(embedding, &bias)| {
                        let prediction =
                            bias + embedding.iter().zip(state).map(|(x, y)| x * y).sum::<f32>();

                        if prediction.is_finite() {
                            Ok(prediction)
                        } else {
                            Err(PredictionError::InvalidPredictionValue)
                        }
                    })
                    .collect()
            })
            .collect()
    }

    fn reset(&mut self) {
        let dim = self.hyper.item_embedding_dim;

        for state in &mut self.states {
            *state = vec![0.0; dim];
        }
    }
}
