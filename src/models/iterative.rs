//! The shared stochastic gradient descent loop.
//!
//! [`IterativeRecommender`] owns the factor matrices and the per-epoch
//! training state of one model. It runs epochs over the nonzero training
//! ratings in row-major order, hands every rating to an [`SgdModel`] for
//! the actual update, and after every epoch checks for divergence and
//! convergence and adapts the learning rate.
use std::fs::create_dir_all;
use std::path::Path;

use failure;
use rand::XorShiftRng;

use super::{load_json, save_json, Decay, HyperParams, InitStrategy};
use data::{seeded_rng, DenseMatrix, DenseVector, SparseMatrix};
use {FittingError, ItemId, PredictionError, Recommender, UserId};

const CONVERGENCE_THRESHOLD: f64 = 1e-5;

/// Latent factors and optional biases of a trained model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Factors {
    /// One row per user.
    pub user_factors: DenseMatrix,
    /// One row per item.
    pub item_factors: DenseMatrix,
    /// Present for models with biases.
    pub user_biases: Option<DenseVector>,
    /// Present for models with biases.
    pub item_biases: Option<DenseVector>,
}

impl Factors {
    fn new(num_users: usize, num_items: usize, num_factors: usize, biases: bool) -> Self {
        Factors {
            user_factors: DenseMatrix::zeros(num_users, num_factors),
            item_factors: DenseMatrix::zeros(num_items, num_factors),
            user_biases: if biases {
                Some(DenseVector::zeros(num_users))
            } else {
                None
            },
            item_biases: if biases {
                Some(DenseVector::zeros(num_items))
            } else {
                None
            },
        }
    }

    fn initialize(&mut self, init: InitStrategy, rng: &mut XorShiftRng) {
        match init {
            InitStrategy::Gaussian { mean, std } => {
                self.user_factors.init_gaussian(mean, std, rng);
                self.item_factors.init_gaussian(mean, std, rng);
                if let Some(ref mut biases) = self.user_biases {
                    biases.init_gaussian(mean, std, rng);
                }
                if let Some(ref mut biases) = self.item_biases {
                    biases.init_gaussian(mean, std, rng);
                }
            }
            InitStrategy::Uniform => {
                self.user_factors.init_uniform(0.0, 0.01, rng);
                self.item_factors.init_uniform(0.0, 0.01, rng);
                if let Some(ref mut biases) = self.user_biases {
                    biases.init_uniform(0.0, 0.01, rng);
                }
                if let Some(ref mut biases) = self.item_biases {
                    biases.init_uniform(0.0, 0.01, rng);
                }
            }
        }
    }

    /// Zero the factor rows of users and items without training ratings.
    fn zero_cold_rows(&mut self, train: &SparseMatrix) {
        for user in 0..self.user_factors.num_rows() {
            if user >= train.num_rows() || train.row_size(user) == 0 {
                self.user_factors.set_row(user, 0.0);
            }
        }
        for item in 0..self.item_factors.num_rows() {
            if item >= train.num_columns() || train.col_size(item) == 0 {
                self.item_factors.set_row(item, 0.0);
            }
        }
    }

    /// Number of user rows.
    pub fn num_users(&self) -> usize {
        self.user_factors.num_rows()
    }

    /// Number of item rows.
    pub fn num_items(&self) -> usize {
        self.item_factors.num_rows()
    }

    /// Inner product of the user and item factors.
    pub fn dot(&self, user: UserId, item: ItemId) -> f64 {
        DenseMatrix::row_mult(&self.user_factors, user, &self.item_factors, item)
    }

    /// One regularized SGD step on the factors of `user` and `item` for a
    /// prediction error of `error`. Returns the regularization loss at
    /// the factor values before the step.
    pub fn sgd_step(
        &mut self,
        user: UserId,
        item: ItemId,
        error: f64,
        learning_rate: f64,
        reg_u: f64,
        reg_i: f64,
    ) -> f64 {
        let mut user_row = self.user_factors.row_mut(user);
        let mut item_row = self.item_factors.row_mut(item);
        let mut loss = 0.0;

        for (puf, qif) in izip!(user_row.iter_mut(), item_row.iter_mut()) {
            let (pu, qi) = (*puf, *qif);

            *puf += learning_rate * (error * qi - reg_u * pu);
            *qif += learning_rate * (error * pu - reg_i * qi);

            loss += reg_u * pu * pu + reg_i * qi * qi;
        }

        loss
    }

    /// Bias of `user`, zero without biases.
    pub fn user_bias(&self, user: UserId) -> f64 {
        self.user_biases.as_ref().map_or(0.0, |biases| biases.get(user))
    }

    /// Bias of `item`, zero without biases.
    pub fn item_bias(&self, item: ItemId) -> f64 {
        self.item_biases.as_ref().map_or(0.0, |biases| biases.get(item))
    }
}

/// Per-epoch scalars of a training run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    /// Learning rate for the next epoch.
    pub learning_rate: f64,
    /// Half the summed squared error of the last epoch.
    pub errs: f64,
    /// Half the regularized loss of the last epoch.
    pub loss: f64,
    /// `errs` of the last accepted epoch.
    pub last_errs: f64,
    /// `loss` of the last accepted epoch.
    pub last_loss: f64,
    /// Number of epochs run.
    pub iterations: usize,
    /// Loss of every epoch, including epochs the bold driver undid.
    pub loss_history: Vec<f64>,
    /// Learning rate in effect after every epoch.
    pub learning_rates: Vec<f64>,
}

/// Squared error and loss contributed by one training example.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ExampleLoss {
    /// Squared prediction error.
    pub squared_error: f64,
    /// Squared error plus the regularization terms.
    pub loss: f64,
}

/// The model-specific half of an SGD recommender.
pub trait SgdModel {
    /// Display name of the algorithm.
    fn name(&self) -> &'static str;

    /// Whether the model learns user and item biases.
    fn has_biases(&self) -> bool {
        false
    }

    /// Compute statistics of the training data the model needs, such as
    /// the global mean.
    fn prepare(&mut self, _train: &SparseMatrix) {}

    /// Unbounded rating prediction.
    fn predict(&self, factors: &Factors, user: UserId, item: ItemId) -> f64;

    /// Apply the SGD update for one observed rating.
    fn update_on_example(
        &self,
        factors: &mut Factors,
        hyper: &HyperParams,
        learning_rate: f64,
        user: UserId,
        item: ItemId,
        rating: f64,
    ) -> ExampleLoss;
}

/// An SGD-trained recommender.
#[derive(Clone, Debug)]
pub struct IterativeRecommender<M> {
    hyper: HyperParams,
    model: M,
    factors: Option<Factors>,
    state: TrainingState,
    rng: XorShiftRng,
    fold: Option<usize>,
}

impl<M: SgdModel> IterativeRecommender<M> {
    /// An untrained recommender. Initial factors are drawn from stream 0 of
    /// the hyperparameter seed.
    pub fn new(model: M, hyper: HyperParams) -> Self {
        let rng = seeded_rng(hyper.seed, 0);

        IterativeRecommender {
            hyper: hyper,
            model: model,
            factors: None,
            state: TrainingState::default(),
            rng: rng,
            fold: None,
        }
    }

    /// Mark the model as belonging to cross-validation fold `fold`.
    ///
    /// Every fold draws its initial factors from its own random stream.
    pub fn with_fold(mut self, fold: usize) -> Self {
        self.rng = seeded_rng(self.hyper.seed, fold as u64 + 1);
        self.fold = Some(fold);
        self
    }

    /// Hyperparameters in use.
    pub fn hyperparameters(&self) -> &HyperParams {
        &self.hyper
    }

    /// The model-specific half.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Factors, once initialized, trained or loaded.
    pub fn factors(&self) -> Option<&Factors> {
        self.factors.as_ref()
    }

    /// Training state of the last run.
    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    fn fold_info(&self) -> String {
        self.fold
            .map_or_else(String::new, |fold| format!(" fold [{}]", fold + 1))
    }

    /// Check the finished epoch. Returns whether training has converged.
    fn is_converged(
        &mut self,
        iteration: usize,
        factors: &mut Factors,
        snapshot: &mut Factors,
    ) -> Result<bool, FittingError> {
        if self.hyper.verbose {
            debug!(
                "{}{} iter {}: errs = {}, delta_errs = {}, loss = {}, delta_loss = {}, learn_rate = {}",
                self.model.name(),
                self.fold_info(),
                iteration,
                self.state.errs,
                self.state.last_errs - self.state.errs,
                self.state.loss,
                self.state.last_loss.abs() - self.state.loss.abs(),
                self.state.learning_rate
            );
        }

        if !self.state.loss.is_finite() {
            error!(
                "{}{}: loss = {} at iteration {}, current settings cannot train the recommender",
                self.model.name(),
                self.fold_info(),
                self.state.loss,
                iteration
            );
            return Err(FittingError::Diverged {
                iteration: iteration,
            });
        }

        let (errs, last_errs) = (self.state.errs, self.state.last_errs);
        let converged = errs.abs() < CONVERGENCE_THRESHOLD
            || (last_errs >= errs && last_errs - errs < CONVERGENCE_THRESHOLD);

        if !converged {
            self.update_learning_rate(iteration, factors, snapshot);
        }

        Ok(converged)
    }

    fn update_learning_rate(&mut self, iteration: usize, factors: &mut Factors, snapshot: &mut Factors) {
        let initial = self.hyper.learning_rate;
        let mut accepted = true;

        if self.hyper.bold_driver && iteration > 1 {
            if self.state.last_loss.abs() > self.state.loss.abs() {
                self.state.learning_rate *= 1.05;
                *snapshot = factors.clone();
            } else {
                self.state.learning_rate *= 0.5;
                *factors = snapshot.clone();
                accepted = false;

                if self.hyper.verbose {
                    debug!(
                        "{}{} iter {}: undo last weight changes and sharply decrease the learning rate",
                        self.model.name(),
                        self.fold_info(),
                        iteration
                    );
                }
            }
        } else {
            if self.hyper.bold_driver {
                *snapshot = factors.clone();
            }

            match self.hyper.decay {
                Decay::Exponential(decay) if decay > 0.0 && decay < 1.0 => {
                    self.state.learning_rate *= decay;
                }
                Decay::InverseTime => {
                    self.state.learning_rate =
                        initial / (1.0 + initial * self.hyper.reg_u * iteration as f64);
                }
                _ => {}
            }
        }

        if let Some(max) = self.hyper.max_learning_rate {
            self.state.learning_rate = self.state.learning_rate.min(max);
        }

        // An undone epoch leaves the loss history of the last accepted one.
        if accepted {
            self.state.last_loss = self.state.loss;
            self.state.last_errs = self.state.errs;
        }
    }

    fn check_ids(&self, factors: &Factors, user: UserId, item: ItemId) -> Result<(), PredictionError> {
        if user >= factors.num_users() || item >= factors.num_items() {
            return Err(PredictionError::UnknownId {
                user: user,
                item: item,
            });
        }

        Ok(())
    }
}

impl<M: SgdModel> Recommender for IterativeRecommender<M> {
    fn name(&self) -> &str {
        self.model.name()
    }

    fn settings(&self) -> String {
        self.hyper.to_string()
    }

    fn init_model(&mut self, train: &SparseMatrix) -> Result<(), FittingError> {
        if train.is_empty() {
            return Err(FittingError::NoInteractions);
        }

        let mut factors = Factors::new(
            train.num_rows(),
            train.num_columns(),
            self.hyper.num_factors,
            self.model.has_biases(),
        );
        factors.initialize(self.hyper.init, &mut self.rng);
        factors.zero_cold_rows(train);

        self.model.prepare(train);
        self.factors = Some(factors);
        self.state = TrainingState {
            learning_rate: self.hyper.learning_rate,
            ..TrainingState::default()
        };

        Ok(())
    }

    fn build_model(&mut self, train: &SparseMatrix) -> Result<(), FittingError> {
        let mut factors = self.factors.take().ok_or(FittingError::NotFitted)?;
        let mut snapshot = factors.clone();

        for iteration in 1..self.hyper.max_iters + 1 {
            let mut errs = 0.0;
            let mut loss = 0.0;

            for entry in train {
                if entry.value <= 0.0 {
                    continue;
                }

                let example = self.model.update_on_example(
                    &mut factors,
                    &self.hyper,
                    self.state.learning_rate,
                    entry.row,
                    entry.column,
                    entry.value,
                );
                errs += example.squared_error;
                loss += example.loss;
            }

            self.state.errs = 0.5 * errs;
            self.state.loss = 0.5 * loss;
            self.state.iterations = iteration;
            self.state.loss_history.push(self.state.loss);

            let converged = self.is_converged(iteration, &mut factors, &mut snapshot);
            self.state.learning_rates.push(self.state.learning_rate);

            match converged {
                Ok(true) => break,
                Ok(false) => {}
                Err(err) => {
                    self.factors = Some(factors);
                    return Err(err);
                }
            }
        }

        self.factors = Some(factors);

        Ok(())
    }

    fn predict(&self, user: UserId, item: ItemId) -> Result<f64, PredictionError> {
        let factors = self.factors.as_ref().ok_or(PredictionError::NotFitted)?;
        self.check_ids(factors, user, item)?;

        let prediction = self.model.predict(factors, user, item);
        if prediction.is_finite() {
            Ok(prediction)
        } else {
            Err(PredictionError::InvalidPredictionValue)
        }
    }

    fn save_model(
        &self,
        dir: &Path,
        train: &SparseMatrix,
        test: &SparseMatrix,
    ) -> Result<(), failure::Error> {
        let factors = self.factors.as_ref().ok_or(PredictionError::NotFitted)?;
        create_dir_all(dir)?;

        save_json(train, dir.join("trainMatrix"))?;
        save_json(test, dir.join("testMatrix"))?;
        save_json(&factors.user_factors, dir.join("userFactors"))?;
        save_json(&factors.item_factors, dir.join("itemFactors"))?;
        if let Some(ref biases) = factors.user_biases {
            save_json(biases, dir.join("userBiases"))?;
        }
        if let Some(ref biases) = factors.item_biases {
            save_json(biases, dir.join("itemBiases"))?;
        }

        info!("{}{}: model saved to {}", self.name(), self.fold_info(), dir.display());

        Ok(())
    }

    fn load_model(&mut self, dir: &Path) -> Result<(SparseMatrix, SparseMatrix), failure::Error> {
        let train: SparseMatrix = load_json(dir.join("trainMatrix"))?;
        let test: SparseMatrix = load_json(dir.join("testMatrix"))?;

        let (user_biases, item_biases) = if self.model.has_biases() {
            (
                Some(load_json(dir.join("userBiases"))?),
                Some(load_json(dir.join("itemBiases"))?),
            )
        } else {
            (None, None)
        };

        self.factors = Some(Factors {
            user_factors: load_json(dir.join("userFactors"))?,
            item_factors: load_json(dir.join("itemFactors"))?,
            user_biases: user_biases,
            item_biases: item_biases,
        });
        self.model.prepare(&train);

        Ok((train, test))
    }
}
