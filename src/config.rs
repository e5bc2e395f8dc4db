//! Run configuration read from `key=value` files.
//!
//! Values of option keys are lines of the form `main -flag v1 v2 -switch`,
//! parsed by [`LineOptions`].
use std;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rayon;

use data::{DateOrder, RatingsSetup};
use driver::EvaluationPlan;
use models::{Algorithm, Decay, HyperParams, InitStrategy};

/// Configuration error types.
#[derive(Debug, Fail)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[fail(display = "Cannot read configuration {}: {}", path, cause)]
    Io {
        /// Configuration file.
        path: String,
        /// Underlying error.
        #[cause]
        cause: io::Error,
    },
    /// A line is neither a comment nor a `key=value` pair.
    #[fail(display = "Line {} is not a key=value pair: '{}'.", line, text)]
    Syntax {
        /// One-based line number.
        line: usize,
        /// Offending line.
        text: String,
    },
    /// A required key is absent.
    #[fail(display = "Missing configuration key '{}'.", _0)]
    MissingKey(String),
    /// A value could not be parsed.
    #[fail(display = "Invalid value '{}' for '{}'.", value, key)]
    InvalidValue {
        /// Key, or key and option, holding the value.
        key: String,
        /// Value as written.
        value: String,
    },
    /// No recommender of that name exists.
    #[fail(display = "Unknown recommender '{}'.", _0)]
    UnknownRecommender(String),
    /// No evaluation plan of that name exists.
    #[fail(display = "Unknown evaluation plan '{}'.", _0)]
    UnknownPlan(String),
}

fn invalid<K: Into<String>, V: Into<String>>(key: K, value: V) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.into(),
        value: value.into(),
    }
}

/// A token is a flag if it starts with a dash followed by a letter or a
/// second dash, so that negative numbers stay values.
fn is_flag(token: &str) -> bool {
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some('-'), Some(next)) => next.is_alphabetic() || next == '-',
        _ => false,
    }
}

/// An option line: a main parameter followed by flags with their values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LineOptions {
    main: String,
    options: BTreeMap<String, Vec<String>>,
}

impl LineOptions {
    /// Split a value line into its main parameter and `-flag` options.
    pub fn parse(line: &str) -> Self {
        let mut main = Vec::new();
        let mut options = BTreeMap::new();
        let mut current: Option<String> = None;

        for token in line.split_whitespace() {
            if is_flag(token) {
                options.entry(token.to_owned()).or_insert_with(Vec::new);
                current = Some(token.to_owned());
            } else {
                match current {
                    Some(ref flag) => options
                        .entry(flag.clone())
                        .or_insert_with(Vec::new)
                        .push(token.to_owned()),
                    None => main.push(token),
                }
            }
        }

        LineOptions {
            main: main.join(" "),
            options: options,
        }
    }

    /// Tokens before the first flag.
    pub fn main_param(&self) -> &str {
        &self.main
    }

    /// Whether `flag` was given, with or without values.
    pub fn contains(&self, flag: &str) -> bool {
        self.options.contains_key(flag)
    }

    /// First value of `flag`.
    pub fn value(&self, flag: &str) -> Option<&str> {
        self.values(flag).first().map(|value| value.as_str())
    }

    /// Values following `flag`; empty if the flag is absent.
    pub fn values(&self, flag: &str) -> &[String] {
        self.options
            .get(flag)
            .map_or(&[][..], |values| values.as_slice())
    }

    /// Parse the first value of `flag`, falling back to `default` when the
    /// flag is absent.
    pub fn parsed<T: FromStr>(&self, key: &str, flag: &str, default: T) -> Result<T, ConfigError> {
        match self.value(flag) {
            Some(value) => value
                .parse()
                .map_err(|_| invalid(format!("{} {}", key, flag), value)),
            None if self.contains(flag) => Err(invalid(format!("{} {}", key, flag), "")),
            None => Ok(default),
        }
    }

    /// Parse the main parameter, falling back to `default` when it is empty.
    pub fn parsed_main<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        if self.main.is_empty() {
            Ok(default)
        } else {
            self.main.parse().map_err(|_| invalid(key, self.main.as_str()))
        }
    }
}

/// Key-value run configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Config {
    values: BTreeMap<String, String>,
}

impl Config {
    /// An empty configuration.
    pub fn new() -> Self {
        Config::default()
    }

    /// Read a configuration file. Blank lines and lines starting with `#`
    /// are skipped.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let io_error = |cause: io::Error| ConfigError::Io {
            path: path.display().to_string(),
            cause: cause,
        };

        let file = File::open(path).map_err(&io_error)?;
        let mut contents = String::new();
        for line in BufReader::new(file).lines() {
            contents.push_str(&line.map_err(&io_error)?);
            contents.push('\n');
        }

        contents.parse()
    }

    /// Set or replace a value.
    pub fn set<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.values.insert(key.into(), value.into());
    }

    /// Raw value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|value| value.as_str())
    }

    /// Value of a required key.
    pub fn get_required(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingKey(key.to_owned()))
    }

    /// Parse the value of `key`, falling back to `default` when absent.
    pub fn get_parsed<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            Some(value) => value.parse().map_err(|_| invalid(key, value)),
            None => Ok(default),
        }
    }

    /// `on`, `true` or `yes` (any case) enable a switch.
    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).map_or(false, |value| {
            let value = value.to_lowercase();
            value == "on" || value == "true" || value == "yes"
        })
    }

    /// The value of `key` parsed as an option line, if present.
    pub fn line_options(&self, key: &str) -> Option<LineOptions> {
        self.get(key).map(LineOptions::parse)
    }

    /// Path of the rating file.
    pub fn ratings_path(&self) -> Result<PathBuf, ConfigError> {
        self.get_required("dataset.ratings").map(PathBuf::from)
    }

    /// Path of the optional social link file.
    pub fn social_path(&self) -> Option<PathBuf> {
        self.get("dataset.social").map(PathBuf::from)
    }

    /// Directory to persist trained models to.
    pub fn save_dir(&self) -> Option<PathBuf> {
        self.get("model.save.dir").map(PathBuf::from)
    }

    /// JSON file to write the evaluation report to.
    pub fn results_path(&self) -> Option<PathBuf> {
        self.get("results.file").map(PathBuf::from)
    }

    /// Master random seed, `random.seed`, 1 by default.
    pub fn seed(&self) -> Result<u64, ConfigError> {
        self.get_parsed("random.seed", 1)
    }

    /// Whether `is.verbose` is on.
    pub fn is_verbose(&self) -> bool {
        self.get_bool("is.verbose")
    }

    /// The configured recommender.
    pub fn algorithm(&self) -> Result<Algorithm, ConfigError> {
        let name = self.get_required("recommender")?.trim();
        Algorithm::from_name(name).ok_or_else(|| ConfigError::UnknownRecommender(name.to_owned()))
    }

    /// Column layout and threshold of the rating file.
    pub fn ratings_setup(&self) -> Result<RatingsSetup, ConfigError> {
        const KEY: &str = "ratings.setup";
        let options = match self.line_options(KEY) {
            Some(options) => options,
            None => return Ok(RatingsSetup::default()),
        };

        let mut setup = if options.contains("-columns") {
            let columns = options.values("-columns").join(",");
            columns
                .parse::<RatingsSetup>()
                .map_err(|_| invalid(format!("{} -columns", KEY), columns.as_str()))?
        } else {
            RatingsSetup::default()
        };

        let threshold = options.parsed(KEY, "-threshold", -1.0)?;
        setup = setup.threshold(threshold);

        Ok(setup)
    }

    /// Training hyperparameters.
    pub fn hyper_params(&self) -> Result<HyperParams, ConfigError> {
        let mut hyper = HyperParams::new()
            .num_factors(self.get_parsed("num.factors", 10)?)
            .max_iters(self.get_parsed("num.max.iter", 100)?)
            .verbose(self.is_verbose())
            .seed(self.seed()?);

        if let Some(options) = self.line_options("learn.rate") {
            const KEY: &str = "learn.rate";
            hyper = hyper
                .learning_rate(options.parsed_main(KEY, 0.01)?)
                .max_learning_rate(options.parsed(KEY, "-max", -1.0)?)
                .bold_driver(options.contains("-bold-driver"));

            if options.contains("-decay") {
                let decay: f64 = options.parsed(KEY, "-decay", 0.0)?;
                hyper = hyper.decay(if decay == 0.0 {
                    Decay::InverseTime
                } else if decay > 0.0 && decay < 1.0 {
                    Decay::Exponential(decay)
                } else {
                    return Err(invalid(format!("{} -decay", KEY), decay.to_string()));
                });
            }
            if options.contains("-momentum") {
                debug!("Ignoring learn.rate -momentum: SGD models train without momentum");
            }
        }

        if let Some(options) = self.line_options("reg.lambda") {
            const KEY: &str = "reg.lambda";
            let reg = options.parsed_main(KEY, 0.1)?;
            hyper = hyper
                .regularization(reg)
                .reg_u(options.parsed(KEY, "-u", reg)?)
                .reg_i(options.parsed(KEY, "-i", reg)?)
                .reg_b(options.parsed(KEY, "-b", reg)?);
        }

        if let Some(options) = self.line_options("init.model") {
            const KEY: &str = "init.model";
            let init = match options.main_param().to_lowercase().as_str() {
                "" | "gaussian" => InitStrategy::Gaussian {
                    mean: options.parsed(KEY, "-mean", 0.0)?,
                    std: options.parsed(KEY, "-std", 0.1)?,
                },
                "uniform" => InitStrategy::Uniform,
                other => return Err(invalid(KEY, other)),
            };
            hyper = hyper.init(init);
        }

        Ok(hyper)
    }

    /// The evaluation plan; five-fold cross-validation when unset.
    pub fn evaluation_plan(&self) -> Result<EvaluationPlan, ConfigError> {
        const KEY: &str = "evaluation.setup";
        let options = self.line_options(KEY)
            .unwrap_or_else(|| LineOptions::parse("cv -k 5"));

        let required = |flag: &str| {
            options
                .value(flag)
                .ok_or_else(|| ConfigError::MissingKey(format!("{} {}", KEY, flag)))
                .and_then(|value| {
                    value
                        .parse::<f64>()
                        .map_err(|_| invalid(format!("{} {}", KEY, flag), value))
                })
        };

        let plan = match options.main_param().to_lowercase().as_str() {
            "cv" => EvaluationPlan::CrossValidation {
                folds: options.parsed(KEY, "-k", 5)?,
                parallel: options.contains("-p"),
            },
            "leave-one-out" | "loocv" => EvaluationPlan::LeaveOneOut {
                threads: options.parsed(KEY, "-t", rayon::current_num_threads())?,
            },
            "test-set" => EvaluationPlan::TestSet {
                path: PathBuf::from(options
                    .value("-f")
                    .ok_or_else(|| ConfigError::MissingKey(format!("{} -f", KEY)))?),
            },
            "given-n" => {
                let n = required("-n")?;
                if n < 1.0 || n.fract() != 0.0 {
                    return Err(invalid(format!("{} -n", KEY), n.to_string()));
                }
                EvaluationPlan::GivenN(n as usize)
            }
            "given-ratio" => EvaluationPlan::GivenRatio(required("-r")?),
            "train-ratio" => EvaluationPlan::TrainRatio {
                ratio: options.parsed(KEY, "-r", 0.8)?,
                by_date: date_order(&options),
            },
            other => return Err(ConfigError::UnknownPlan(other.to_owned())),
        };

        Ok(plan)
    }
}

/// Chronological ordering selected by a `--by-*-date` flag.
pub fn date_order(options: &LineOptions) -> Option<DateOrder> {
    if options.contains("--by-user-date") {
        Some(DateOrder::User)
    } else if options.contains("--by-item-date") {
        Some(DateOrder::Item)
    } else if options.contains("--by-rating-date") {
        Some(DateOrder::Rating)
    } else {
        None
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut config = Config::new();

        for (number, line) in s.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match line.find('=') {
                Some(split) => config.set(line[..split].trim(), line[split + 1..].trim()),
                None => {
                    return Err(ConfigError::Syntax {
                        line: number + 1,
                        text: line.to_owned(),
                    })
                }
            }
        }

        Ok(config)
    }
}

impl std::fmt::Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for (key, value) in &self.values {
            writeln!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile;

    use super::*;

    const CONFIG: &str = "
# Biased MF on a rating file
dataset.ratings=data/ratings.txt
ratings.setup=-columns 0 1 2 -threshold -1
recommender=BiasedMF
evaluation.setup=cv -k 4 -p
num.factors=5
num.max.iter=30
learn.rate=0.02 -max 0.05 -bold-driver -momentum 0.8
reg.lambda=0.1 -i 0.01 -b 0.5
init.model=gaussian -std 0.05
random.seed=11
is.verbose=on
results.file=out/results.json
";

    #[test]
    fn option_lines() {
        let options = LineOptions::parse("0.01 -max -1 -bold-driver --by-user-date -decay 0.9");

        assert_eq!(options.main_param(), "0.01");
        assert_eq!(options.value("-max"), Some("-1"));
        assert!(options.contains("-bold-driver"));
        assert!(options.values("-bold-driver").is_empty());
        assert!(options.contains("--by-user-date"));
        assert_eq!(options.parsed("learn.rate", "-decay", 0.0).unwrap(), 0.9);
        assert_eq!(options.parsed("learn.rate", "-missing", 3).unwrap(), 3);
        assert!(options.parsed::<f64>("learn.rate", "-bold-driver", 0.0).is_err());
    }

    #[test]
    fn full_configuration() {
        let config: Config = CONFIG.parse().unwrap();

        assert_eq!(config.ratings_path().unwrap(), PathBuf::from("data/ratings.txt"));
        assert_eq!(config.algorithm().unwrap(), Algorithm::BiasedMf);
        assert_eq!(
            config.evaluation_plan().unwrap(),
            EvaluationPlan::CrossValidation {
                folds: 4,
                parallel: true
            }
        );
        assert_eq!(config.seed().unwrap(), 11);
        assert!(config.is_verbose());
        assert_eq!(config.results_path(), Some(PathBuf::from("out/results.json")));
        assert_eq!(config.save_dir(), None);

        let setup = config.ratings_setup().unwrap();
        assert_eq!(setup.rating_column, Some(2));
        assert_eq!(setup.timestamp_column, None);
        assert_eq!(setup.threshold, None);

        let expected = HyperParams::new()
            .num_factors(5)
            .max_iters(30)
            .learning_rate(0.02)
            .max_learning_rate(0.05)
            .bold_driver(true)
            .regularization(0.1)
            .reg_i(0.01)
            .reg_b(0.5)
            .init(InitStrategy::Gaussian {
                mean: 0.0,
                std: 0.05,
            })
            .verbose(true)
            .seed(11);
        assert_eq!(config.hyper_params().unwrap(), expected);
    }

    #[test]
    fn evaluation_plans() {
        let plan = |setup: &str| {
            let mut config = Config::new();
            config.set("evaluation.setup", setup);
            config.evaluation_plan()
        };

        assert_eq!(
            plan("cv -k 10").unwrap(),
            EvaluationPlan::CrossValidation {
                folds: 10,
                parallel: false
            }
        );
        assert_eq!(
            plan("leave-one-out -t 2").unwrap(),
            EvaluationPlan::LeaveOneOut { threads: 2 }
        );
        assert_eq!(
            plan("test-set -f test.txt").unwrap(),
            EvaluationPlan::TestSet {
                path: PathBuf::from("test.txt")
            }
        );
        assert_eq!(plan("given-n -n 3").unwrap(), EvaluationPlan::GivenN(3));
        assert_eq!(plan("given-ratio -r 0.5").unwrap(), EvaluationPlan::GivenRatio(0.5));
        assert_eq!(
            plan("train-ratio -r 0.7 --by-item-date").unwrap(),
            EvaluationPlan::TrainRatio {
                ratio: 0.7,
                by_date: Some(DateOrder::Item)
            }
        );

        match plan("bootstrap") {
            Err(ConfigError::UnknownPlan(ref name)) if name == "bootstrap" => {}
            other => panic!("Unexpected {:?}", other),
        }
        match plan("given-n") {
            Err(ConfigError::MissingKey(_)) => {}
            other => panic!("Unexpected {:?}", other),
        }
        assert!(plan("test-set").is_err());
        assert!(plan("given-n -n 2.5").is_err());
    }

    #[test]
    fn decay_schedules() {
        let decay = |line: &str| {
            let mut config = Config::new();
            config.set("learn.rate", line);
            config.hyper_params()
        };

        assert_eq!(
            decay("0.01 -decay 0.9").unwrap(),
            HyperParams::new().decay(Decay::Exponential(0.9))
        );
        assert_eq!(
            decay("0.01 -decay 0").unwrap(),
            HyperParams::new().decay(Decay::InverseTime)
        );
        assert!(decay("0.01 -decay 1.5").is_err());
    }

    #[test]
    fn errors() {
        let config = Config::new();
        match config.algorithm() {
            Err(ConfigError::MissingKey(ref key)) if key == "recommender" => {}
            other => panic!("Unexpected {:?}", other),
        }

        let mut config = Config::new();
        config.set("recommender", "PMF");
        match config.algorithm() {
            Err(ConfigError::UnknownRecommender(_)) => {}
            other => panic!("Unexpected {:?}", other),
        }

        config.set("num.factors", "ten");
        assert!(config.hyper_params().is_err());

        assert!("no separator here".parse::<Config>().is_err());
    }

    #[test]
    fn reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mfrec.conf");
        File::create(&path).unwrap().write_all(CONFIG.as_bytes()).unwrap();

        let config = Config::from_path(&path).unwrap();
        assert_eq!(config.get("num.factors"), Some("5"));
        assert_eq!(config.to_string().lines().count(), 12);

        assert!(Config::from_path(dir.path().join("missing.conf")).is_err());
    }
}
