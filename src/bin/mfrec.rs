extern crate env_logger;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;
extern crate mfrec;

use std::env;
use std::path::{Path, PathBuf};
use std::process;

use mfrec::config::{date_order, Config, LineOptions};
use mfrec::data::{DataDao, DataSplitter, Dataset, DateOrder, RatingsSetup};
use mfrec::driver::EvaluationDriver;
use mfrec::models::Model;
use mfrec::FittingError;

const DEFAULT_CONFIG: &str = "mfrec.conf";

const USAGE: &str = "Usage: mfrec [-c CONFIG] [-v] [--version] [--dataset-spec]
             [--dataset-split TRAIN [VAL] [--by-user-date|--by-item-date|--by-rating-date]]";

#[derive(Debug, PartialEq)]
enum Command {
    Version,
    Notice,
    Evaluate,
    DatasetSpec,
    DatasetSplit {
        train: f64,
        validation: Option<f64>,
        by_date: Option<DateOrder>,
    },
}

fn parse_ratio(value: Option<&String>) -> Result<f64, failure::Error> {
    let value = value.ok_or_else(|| failure::err_msg("--dataset-split needs a train ratio"))?;
    value
        .parse()
        .map_err(|_| format_err!("Invalid split ratio '{}'", value))
}

fn parse_args(args: &[String]) -> Result<(PathBuf, Command), failure::Error> {
    let mut config = PathBuf::from(DEFAULT_CONFIG);
    let mut command = Command::Evaluate;
    let mut position = 0;

    while position < args.len() {
        match args[position].as_str() {
            "-c" => {
                position += 1;
                config = args.get(position)
                    .map(PathBuf::from)
                    .ok_or_else(|| failure::err_msg("-c needs a configuration path"))?;
            }
            "-v" => command = Command::Version,
            "--version" => command = Command::Notice,
            "--dataset-spec" => command = Command::DatasetSpec,
            "--dataset-split" => {
                position += 1;
                let train = parse_ratio(args.get(position))?;

                let validation = match args.get(position + 1) {
                    Some(value) if !value.starts_with('-') => {
                        position += 1;
                        Some(parse_ratio(Some(value))?)
                    }
                    _ => None,
                };

                let flags = args[position + 1..]
                    .iter()
                    .take_while(|arg| arg.starts_with("--by-"))
                    .cloned()
                    .collect::<Vec<_>>();
                position += flags.len();

                command = Command::DatasetSplit {
                    train: train,
                    validation: validation,
                    by_date: date_order(&LineOptions::parse(&flags.join(" "))),
                };
            }
            other => return Err(format_err!("Unknown argument '{}'\n{}", other, USAGE)),
        }
        position += 1;
    }

    Ok((config, command))
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn read_dataset(config: &Config) -> Result<(Dataset, RatingsSetup), failure::Error> {
    let setup = config.ratings_setup()?;
    let mut dataset = DataDao::new(config.ratings_path()?).read(&setup)?;

    if let Some(path) = config.social_path() {
        dataset.read_social(&path)?;
        if let Some(links) = dataset.social_links() {
            info!(
                "Read {} social links between {} users from {}",
                links.size(),
                links.num_rows(),
                path.display()
            );
        }
    }

    Ok((dataset, setup))
}

fn split_dataset(
    config: &Config,
    dataset: &Dataset,
    train: f64,
    validation: Option<f64>,
    by_date: Option<DateOrder>,
) -> Result<(), failure::Error> {
    let splitter = DataSplitter::new(dataset.rate_matrix(), config.seed()?);
    let dir = dataset
        .path()
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("split");
    std::fs::create_dir_all(&dir)?;

    let parts = match (validation, by_date) {
        (Some(validation), None) => {
            let (train, validation, test) = splitter.ratio_with_validation(train, validation)?;
            vec![("train", train), ("validation", validation), ("test", test)]
        }
        (Some(_), Some(_)) => {
            return Err(failure::err_msg(
                "Chronological splits do not support a validation part",
            ))
        }
        (None, Some(order)) => {
            let (train, test) = splitter.ratio_by_date(train, order, dataset.timestamps())?;
            vec![("train", train), ("test", test)]
        }
        (None, None) => {
            let (train, test) = splitter.ratio(train)?;
            vec![("train", train), ("test", test)]
        }
    };

    for (name, matrix) in parts {
        let path = dir.join(format!("{}.txt", name));
        dataset.write_matrix(&matrix, &path)?;
        info!("Wrote {} ratings to {}", matrix.size(), path.display());
    }

    Ok(())
}

fn evaluate(config: &Config, dataset: &Dataset, setup: RatingsSetup) -> Result<(), failure::Error> {
    let algorithm = config.algorithm()?;
    let hyper = config.hyper_params()?;
    let plan = config.evaluation_plan()?;

    let mut driver = EvaluationDriver::new(dataset, config.seed()?).ratings_setup(setup);
    if let Some(dir) = config.save_dir() {
        driver = driver.save_dir(dir);
    }

    let report = driver.run(&plan, |fold| -> Result<Model, failure::Error> {
        Ok(algorithm.build(hyper.clone(), fold))
    })?;
    println!("{}", report);

    if let Some(path) = config.results_path() {
        report.save(&path)?;
        info!("Wrote results to {}", path.display());
    }

    Ok(())
}

fn run(config_path: &Path, command: Command) -> Result<(), failure::Error> {
    let config = Config::from_path(config_path)?;
    init_logging(config.is_verbose());

    let (dataset, setup) = read_dataset(&config)?;

    match command {
        Command::DatasetSpec => println!("{}", dataset.specs()),
        Command::DatasetSplit {
            train,
            validation,
            by_date,
        } => split_dataset(&config, &dataset, train, validation, by_date)?,
        _ => evaluate(&config, &dataset, setup)?,
    }

    Ok(())
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    let (config_path, command) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("{}", err);
            process::exit(1);
        }
    };

    match command {
        Command::Version => {
            println!("mfrec {}", env!("CARGO_PKG_VERSION"));
            return;
        }
        Command::Notice => {
            println!(
                "mfrec {}\n{}\nAuthors: {}",
                env!("CARGO_PKG_VERSION"),
                env!("CARGO_PKG_DESCRIPTION"),
                env!("CARGO_PKG_AUTHORS")
            );
            return;
        }
        _ => {}
    }

    if let Err(err) = run(&config_path, command) {
        error!("{}", err);
        eprintln!("Error: {}", err);

        match err.downcast_ref::<FittingError>() {
            Some(&FittingError::Diverged { .. }) => process::exit(-1),
            _ => process::exit(1),
        }
    }
}
