//! Evaluation plans and the driver that runs them.
//!
//! A plan turns a dataset into one or more (train, test) pairs. Every
//! pair is handed to a fresh model built by a caller-supplied factory;
//! the per-pair measures are then combined into one report.
use std::fmt;
use std::fs::create_dir_all;
use std::path::{Path, PathBuf};

use failure;
use rayon;
use rayon::prelude::*;

use data::{DataDao, DataSplitter, Dataset, DateOrder, RatingsSetup, SparseMatrix};
use evaluation::{self, Measures};
use models::{load_json, save_json};
use Recommender;

/// How a dataset is turned into train and test data.
#[derive(Clone, Debug, PartialEq)]
pub enum EvaluationPlan {
    /// k-fold cross-validation, folds run in parallel or one by one.
    CrossValidation {
        /// Number of folds.
        folds: usize,
        /// Run folds on one worker each.
        parallel: bool,
    },
    /// One trial per rating, holding that rating out. Trials run on
    /// `threads` workers.
    LeaveOneOut {
        /// Worker count.
        threads: usize,
    },
    /// Train on the whole dataset, test on a second file read with the
    /// same id maps.
    TestSet {
        /// Rating file of the test data.
        path: PathBuf,
    },
    /// Keep `n` random ratings of every user for training.
    GivenN(usize),
    /// Keep a fraction of the ratings of every user for training.
    GivenRatio(f64),
    /// Train on a fraction of all ratings, at random or chronologically.
    TrainRatio {
        /// Fraction of ratings used for training.
        ratio: f64,
        /// Chronological grouping; `None` splits at random.
        by_date: Option<DateOrder>,
    },
}

impl fmt::Display for EvaluationPlan {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            EvaluationPlan::CrossValidation { folds, parallel } => {
                write!(f, "cv -k {}{}", folds, if parallel { " -p" } else { "" })
            }
            EvaluationPlan::LeaveOneOut { threads } => write!(f, "leave-one-out -t {}", threads),
            EvaluationPlan::TestSet { ref path } => write!(f, "test-set -f {}", path.display()),
            EvaluationPlan::GivenN(n) => write!(f, "given-n -n {}", n),
            EvaluationPlan::GivenRatio(ratio) => write!(f, "given-ratio -r {}", ratio),
            EvaluationPlan::TrainRatio { ratio, by_date } => {
                write!(f, "train-ratio -r {}", ratio)?;
                match by_date {
                    Some(DateOrder::User) => write!(f, " --by-user-date"),
                    Some(DateOrder::Item) => write!(f, " --by-item-date"),
                    Some(DateOrder::Rating) => write!(f, " --by-rating-date"),
                    None => Ok(()),
                }
            }
        }
    }
}

/// Combined result of one plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Name of the evaluated algorithm.
    pub algorithm: String,
    /// Hyperparameter settings of the evaluated models.
    pub settings: String,
    /// Measures averaged over folds or trials.
    pub measures: Measures,
    /// Measures of every fold, in fold order.
    pub folds: Vec<Measures>,
}

impl EvaluationReport {
    /// Write the report as JSON, creating missing parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), failure::Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }

        save_json(self, path)
    }

    /// Read a report written by [`save`](#method.save).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, failure::Error> {
        load_json(path)
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{},{},{}",
            self.algorithm,
            evaluation::format_measures(&self.measures),
            self.settings
        )
    }
}

struct FoldOutcome {
    algorithm: String,
    settings: String,
    measures: Measures,
}

/// Runs evaluation plans over one dataset.
pub struct EvaluationDriver<'a> {
    dataset: &'a Dataset,
    seed: u64,
    setup: RatingsSetup,
    save_dir: Option<PathBuf>,
}

impl<'a> EvaluationDriver<'a> {
    /// Driver splitting `dataset` with the given seed.
    pub fn new(dataset: &'a Dataset, seed: u64) -> Self {
        EvaluationDriver {
            dataset: dataset,
            seed: seed,
            setup: RatingsSetup::default(),
            save_dir: None,
        }
    }

    /// Column setup used to read a separate test file.
    pub fn ratings_setup(mut self, setup: RatingsSetup) -> Self {
        self.setup = setup;
        self
    }

    /// Persist every trained model under `dir`.
    pub fn save_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.save_dir = Some(dir.as_ref().to_owned());
        self
    }

    /// Run `plan`, building one model per fold with `factory`.
    ///
    /// Every fold runs even if another fails. Failures are logged with
    /// their fold number and the first one is returned; otherwise the
    /// measures are averaged uniformly over folds.
    pub fn run<R, F>(&self, plan: &EvaluationPlan, factory: F) -> Result<EvaluationReport, failure::Error>
    where
        R: Recommender + Sync,
        F: Fn(usize) -> Result<R, failure::Error> + Sync,
    {
        info!("Evaluating with {}", plan);
        let matrix = self.dataset.rate_matrix();

        let outcomes = match *plan {
            EvaluationPlan::CrossValidation { folds, parallel } => {
                let kfold = DataSplitter::new(matrix, self.seed).k_fold(folds)?;
                let threads = if parallel { Some(folds) } else { None };

                self.run_folds(folds, threads, |fold| {
                    let (train, test) = kfold.kth_fold(fold)?;
                    self.evaluate_fold(fold, &train, &test, &factory)
                })?
            }
            EvaluationPlan::LeaveOneOut { threads } => {
                let entries: Vec<_> = matrix.iter().collect();

                self.run_folds(entries.len(), Some(threads.max(1)), |trial| {
                    let held_out = entries[trial];
                    let mut train = matrix.clone();
                    train.set(held_out.row, held_out.column, 0.0)?;
                    let test = SparseMatrix::from_triplets(
                        matrix.num_rows(),
                        matrix.num_columns(),
                        vec![(held_out.row, held_out.column, held_out.value)],
                    )?;

                    self.evaluate_fold(trial, &train, &test, &factory)
                })?
            }
            EvaluationPlan::TestSet { ref path } => {
                let (user_ids, item_ids) = (self.dataset.user_ids(), self.dataset.item_ids());
                let test = DataDao::with_ids(path, user_ids.clone(), item_ids.clone())
                    .rating_offset(self.dataset.scale().epsilon())
                    .read(&self.setup)?;

                self.run_folds(1, None, |fold| {
                    self.evaluate_fold(fold, matrix, test.rate_matrix(), &factory)
                })?
            }
            EvaluationPlan::GivenN(n) => {
                let (train, test) = DataSplitter::new(matrix, self.seed).given_n(n)?;
                self.run_folds(1, None, |fold| self.evaluate_fold(fold, &train, &test, &factory))?
            }
            EvaluationPlan::GivenRatio(ratio) => {
                let (train, test) = DataSplitter::new(matrix, self.seed).given_ratio(ratio)?;
                self.run_folds(1, None, |fold| self.evaluate_fold(fold, &train, &test, &factory))?
            }
            EvaluationPlan::TrainRatio { ratio, by_date } => {
                let splitter = DataSplitter::new(matrix, self.seed);
                let (train, test) = match by_date {
                    Some(order) => splitter.ratio_by_date(ratio, order, self.dataset.timestamps())?,
                    None => splitter.ratio(ratio)?,
                };
                self.run_folds(1, None, |fold| self.evaluate_fold(fold, &train, &test, &factory))?
            }
        };

        let report = aggregate(outcomes)?;
        info!("{}", report);

        Ok(report)
    }

    /// Run `task` for folds `0..num`, on a pool of `threads` workers or
    /// sequentially. Results come back in fold order either way.
    fn run_folds<T>(
        &self,
        num: usize,
        threads: Option<usize>,
        task: T,
    ) -> Result<Vec<Result<FoldOutcome, failure::Error>>, failure::Error>
    where
        T: Fn(usize) -> Result<FoldOutcome, failure::Error> + Sync,
    {
        match threads {
            Some(threads) => {
                let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
                Ok(pool.install(|| (0..num).into_par_iter().map(|fold| task(fold)).collect()))
            }
            None => Ok((0..num).map(|fold| task(fold)).collect()),
        }
    }

    fn evaluate_fold<R, F>(
        &self,
        fold: usize,
        train: &SparseMatrix,
        test: &SparseMatrix,
        factory: &F,
    ) -> Result<FoldOutcome, failure::Error>
    where
        R: Recommender + Sync,
        F: Fn(usize) -> Result<R, failure::Error>,
    {
        let mut model = factory(fold)?;
        let measures = evaluation::execute(&mut model, train, test, self.dataset.scale())?;

        if let Some(ref dir) = self.save_dir {
            let dir = dir.join(model.name()).join(format!("fold-{}", fold + 1));
            model.save_model(&dir, train, test)?;
        }

        debug!(
            "{} fold {}: {}",
            model.name(),
            fold + 1,
            evaluation::format_measures(&measures)
        );

        Ok(FoldOutcome {
            algorithm: model.name().to_owned(),
            settings: model.settings(),
            measures: measures,
        })
    }
}

fn aggregate(outcomes: Vec<Result<FoldOutcome, failure::Error>>) -> Result<EvaluationReport, failure::Error> {
    let mut first_error = None;
    let mut algorithm = String::new();
    let mut settings = String::new();
    let mut folds = Vec::with_capacity(outcomes.len());

    for (fold, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(outcome) => {
                algorithm = outcome.algorithm;
                settings = outcome.settings;
                folds.push(outcome.measures);
            }
            Err(err) => {
                error!("Fold {} failed: {}", fold + 1, err);
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }

    Ok(EvaluationReport {
        algorithm: algorithm,
        settings: settings,
        measures: evaluation::mean(&folds),
        folds: folds,
    })
}
