#![deny(missing_docs)]
//! # mfrec
//!
//! `mfrec` implements matrix-factorization recommenders for explicit
//! (user, item, rating) data. Every model is trained by the same
//! stochastic gradient descent loop, which owns the user and item factor
//! matrices, detects convergence and divergence, and adapts the learning
//! rate. Around it sit dual-layout sparse rating matrices, sparse rating
//! tensors, rating file loading, train/test splitting and an evaluation
//! driver that runs cross-validation folds in parallel.
//!
//! ## Example
//! Train a biased matrix factorization model on a rating file and
//! evaluate it with five-fold cross-validation:
//!
//! ```rust,no_run
//! # extern crate failure;
//! # extern crate mfrec;
//! use mfrec::data::{DataDao, RatingsSetup};
//! use mfrec::driver::{EvaluationDriver, EvaluationPlan};
//! use mfrec::models::{Algorithm, HyperParams};
//!
//! let dataset = DataDao::new("ratings.txt")
//!     .read(&RatingsSetup::default())
//!     .unwrap();
//!
//! let hyper = HyperParams::new()
//!     .num_factors(10)
//!     .learning_rate(0.01)
//!     .max_iters(100)
//!     .regularization(0.05)
//!     .seed(42);
//!
//! let driver = EvaluationDriver::new(&dataset, 42);
//! let report = driver
//!     .run(
//!         &EvaluationPlan::CrossValidation { folds: 5, parallel: true },
//!         |fold| -> Result<_, failure::Error> {
//!             Ok(Algorithm::BiasedMf.build(hyper.clone(), fold))
//!         },
//!     )
//!     .unwrap();
//!
//! println!("{}", report);
//! ```
#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate itertools;

extern crate csv;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;
extern crate ndarray;
extern crate rand;
extern crate rayon;
extern crate serde;
extern crate serde_json;
extern crate siphasher;

#[cfg(test)]
extern crate tempfile;

use std::path::Path;

pub mod config;
pub mod data;
pub mod driver;
pub mod evaluation;
pub mod models;

use data::{RatingScale, SparseMatrix};
use evaluation::Measures;

/// Alias for user indices.
pub type UserId = usize;
/// Alias for item indices.
pub type ItemId = usize;
/// Alias for timestamps.
pub type Timestamp = usize;

/// Prediction error types.
#[derive(Debug, Fail)]
pub enum PredictionError {
    /// The model has not been fitted or loaded.
    #[fail(display = "Model must be fitted before predicting.")]
    NotFitted,
    /// The user or item id is outside the model.
    #[fail(display = "Unknown user {} or item {}.", user, item)]
    UnknownId {
        /// Requested user.
        user: UserId,
        /// Requested item.
        item: ItemId,
    },
    /// Failed prediction due to numerical issues.
    #[fail(display = "Invalid prediction value: non-finite or not a number.")]
    InvalidPredictionValue,
}

/// Fitting error types.
#[derive(Debug, Fail)]
pub enum FittingError {
    /// The loss became NaN or infinite.
    #[fail(
        display = "Loss diverged at iteration {}: current settings cannot train the recommender, try other hyperparameters.",
        iteration
    )]
    Diverged {
        /// Epoch at which the loss stopped being finite.
        iteration: usize,
    },
    /// No interactions were given.
    #[fail(display = "No interactions were supplied.")]
    NoInteractions,
    /// Training started before the model was initialized.
    #[fail(display = "Model must be initialized before training.")]
    NotFitted,
}

/// Trait describing rating prediction models.
///
/// Models are initialized and trained on a training matrix and then
/// predict the rating of any (user, item) pair inside its shape.
pub trait Recommender {
    /// Display name of the algorithm.
    fn name(&self) -> &str;

    /// Hyperparameter settings, comma separated.
    fn settings(&self) -> String;

    /// Allocate and initialize model parameters for `train`.
    fn init_model(&mut self, train: &SparseMatrix) -> Result<(), FittingError>;

    /// Train an initialized model on `train`.
    fn build_model(&mut self, train: &SparseMatrix) -> Result<(), FittingError>;

    /// Initialize and train in one go.
    fn fit(&mut self, train: &SparseMatrix) -> Result<(), FittingError> {
        self.init_model(train)?;
        self.build_model(train)
    }

    /// Predict the rating of `user` for `item`.
    fn predict(&self, user: UserId, item: ItemId) -> Result<f64, PredictionError>;

    /// Rating accuracy on `test`, with predictions clamped to `scale`.
    fn evaluate(&self, test: &SparseMatrix, scale: &RatingScale) -> Result<Measures, PredictionError>
    where
        Self: Sized + Sync,
    {
        evaluation::rating_measures(self, test, scale)
    }

    /// Persist the model parameters along with its train and test data.
    fn save_model(
        &self,
        dir: &Path,
        train: &SparseMatrix,
        test: &SparseMatrix,
    ) -> Result<(), failure::Error>;

    /// Restore a model written by `save_model`, returning its train and
    /// test data.
    fn load_model(&mut self, dir: &Path) -> Result<(SparseMatrix, SparseMatrix), failure::Error>;
}
