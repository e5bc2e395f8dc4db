//! Matrix-factorization models trained by stochastic gradient descent.
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use failure;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json;

use data::SparseMatrix;
use {FittingError, ItemId, PredictionError, Recommender, UserId};

pub mod biasedmf;
pub mod iterative;
pub mod regsvd;

pub use self::biasedmf::BiasedMf;
pub use self::iterative::{Factors, IterativeRecommender, SgdModel, TrainingState};
pub use self::regsvd::RegSvd;

/// How factor matrices and biases are initialized.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum InitStrategy {
    /// Independent Gaussian samples.
    Gaussian {
        /// Mean of the samples.
        mean: f64,
        /// Standard deviation of the samples.
        std: f64,
    },
    /// Uniform samples from `[0, 0.01)`.
    Uniform,
}

/// Learning rate schedule applied after every epoch when the bold driver
/// is off.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Decay {
    /// Keep the learning rate constant.
    None,
    /// Multiply the learning rate by a factor in `(0, 1)`.
    Exponential(f64),
    /// `η₀ / (1 + η₀ · reg_u · iteration)`.
    InverseTime,
}

/// Hyperparameters shared by all SGD models.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HyperParams {
    num_factors: usize,
    max_iters: usize,
    learning_rate: f64,
    max_learning_rate: Option<f64>,
    bold_driver: bool,
    decay: Decay,
    reg_u: f64,
    reg_i: f64,
    reg_b: f64,
    init: InitStrategy,
    verbose: bool,
    seed: u64,
}

impl Default for HyperParams {
    fn default() -> Self {
        HyperParams {
            num_factors: 10,
            max_iters: 100,
            learning_rate: 0.01,
            max_learning_rate: None,
            bold_driver: false,
            decay: Decay::None,
            reg_u: 0.1,
            reg_i: 0.1,
            reg_b: 0.1,
            init: InitStrategy::Gaussian {
                mean: 0.0,
                std: 0.1,
            },
            verbose: false,
            seed: 1,
        }
    }
}

impl HyperParams {
    /// Defaults: 10 factors, 100 epochs, learning rate 0.01, regularization
    /// 0.1, Gaussian(0, 0.1) initialization, seed 1.
    pub fn new() -> Self {
        HyperParams::default()
    }

    /// Set the number of latent factors.
    pub fn num_factors(mut self, num_factors: usize) -> Self {
        self.num_factors = num_factors;
        self
    }

    /// Set the maximum number of training epochs.
    pub fn max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    /// Set the initial learning rate.
    pub fn learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Cap the learning rate. Non-positive values remove the cap.
    pub fn max_learning_rate(mut self, max_learning_rate: f64) -> Self {
        self.max_learning_rate = if max_learning_rate > 0.0 {
            Some(max_learning_rate)
        } else {
            None
        };
        self
    }

    /// Adapt the learning rate with the bold driver heuristic.
    pub fn bold_driver(mut self, bold_driver: bool) -> Self {
        self.bold_driver = bold_driver;
        self
    }

    /// Set the learning rate schedule used when the bold driver is off.
    pub fn decay(mut self, decay: Decay) -> Self {
        self.decay = decay;
        self
    }

    /// Set user, item and bias regularization at once.
    pub fn regularization(mut self, reg: f64) -> Self {
        self.reg_u = reg;
        self.reg_i = reg;
        self.reg_b = reg;
        self
    }

    /// Set the regularization of user factors and biases.
    pub fn reg_u(mut self, reg_u: f64) -> Self {
        self.reg_u = reg_u;
        self
    }

    /// Set the regularization of item factors and biases.
    pub fn reg_i(mut self, reg_i: f64) -> Self {
        self.reg_i = reg_i;
        self
    }

    /// Set the separate bias regularization. Reported with the settings;
    /// BiasedMF regularizes each bias with the weight of its side instead.
    pub fn reg_b(mut self, reg_b: f64) -> Self {
        self.reg_b = reg_b;
        self
    }

    /// Set the initialization of factors and biases.
    pub fn init(mut self, init: InitStrategy) -> Self {
        self.init = init;
        self
    }

    /// Log per-epoch diagnostics.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set the master random seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Number of latent factors.
    pub fn get_num_factors(&self) -> usize {
        self.num_factors
    }

    /// Maximum number of epochs.
    pub fn get_max_iters(&self) -> usize {
        self.max_iters
    }

    /// Initial learning rate.
    pub fn get_learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Master random seed.
    pub fn get_seed(&self) -> u64 {
        self.seed
    }
}

impl fmt::Display for HyperParams {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{},{}",
            self.learning_rate,
            self.reg_u,
            self.reg_i,
            self.reg_b,
            self.num_factors,
            self.max_iters,
            self.bold_driver
        )
    }
}

/// The available algorithms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Algorithm {
    /// Regularized SVD.
    RegSvd,
    /// Biased matrix factorization.
    BiasedMf,
}

impl Algorithm {
    /// Look an algorithm up by its configuration name, ignoring case.
    pub fn from_name(name: &str) -> Option<Algorithm> {
        match name.to_lowercase().as_str() {
            "regsvd" => Some(Algorithm::RegSvd),
            "biasedmf" => Some(Algorithm::BiasedMf),
            _ => None,
        }
    }

    /// Display name, as reported in evaluation results.
    pub fn name(&self) -> &'static str {
        match *self {
            Algorithm::RegSvd => "RegSVD",
            Algorithm::BiasedMf => "BiasedMF",
        }
    }

    /// Build an untrained model for one fold.
    pub fn build(&self, hyper: HyperParams, fold: usize) -> Model {
        match *self {
            Algorithm::RegSvd => {
                Model::RegSvd(IterativeRecommender::new(RegSvd, hyper).with_fold(fold))
            }
            Algorithm::BiasedMf => Model::BiasedMf(
                IterativeRecommender::new(BiasedMf::new(), hyper).with_fold(fold),
            ),
        }
    }
}

/// A model of any of the available algorithms.
#[derive(Clone, Debug)]
pub enum Model {
    /// Regularized SVD.
    RegSvd(IterativeRecommender<RegSvd>),
    /// Biased matrix factorization.
    BiasedMf(IterativeRecommender<BiasedMf>),
}

macro_rules! dispatch {
    (mut $model:expr, $inner:ident => $call:expr) => {
        match $model {
            Model::RegSvd(ref mut $inner) => $call,
            Model::BiasedMf(ref mut $inner) => $call,
        }
    };
    ($model:expr, $inner:ident => $call:expr) => {
        match $model {
            Model::RegSvd(ref $inner) => $call,
            Model::BiasedMf(ref $inner) => $call,
        }
    };
}

impl Recommender for Model {
    fn name(&self) -> &str {
        dispatch!(*self, model => model.name())
    }

    fn settings(&self) -> String {
        dispatch!(*self, model => model.settings())
    }

    fn init_model(&mut self, train: &SparseMatrix) -> Result<(), FittingError> {
        dispatch!(mut *self, model => model.init_model(train))
    }

    fn build_model(&mut self, train: &SparseMatrix) -> Result<(), FittingError> {
        dispatch!(mut *self, model => model.build_model(train))
    }

    fn predict(&self, user: UserId, item: ItemId) -> Result<f64, PredictionError> {
        dispatch!(*self, model => model.predict(user, item))
    }

    fn save_model(
        &self,
        dir: &Path,
        train: &SparseMatrix,
        test: &SparseMatrix,
    ) -> Result<(), failure::Error> {
        dispatch!(*self, model => model.save_model(dir, train, test))
    }

    fn load_model(&mut self, dir: &Path) -> Result<(SparseMatrix, SparseMatrix), failure::Error> {
        dispatch!(mut *self, model => model.load_model(dir))
    }
}

/// Write `value` as JSON to `path`.
pub fn save_json<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<(), failure::Error> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(writer, value)?;

    Ok(())
}

/// Read a JSON value from `path`.
pub fn load_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T, failure::Error> {
    let reader = BufReader::new(File::open(path)?);

    Ok(serde_json::from_reader(reader)?)
}
