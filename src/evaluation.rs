//! Rating prediction accuracy measures.
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use failure;
use rayon::prelude::*;

use data::{MatrixEntry, RatingScale, SparseMatrix};
use {PredictionError, Recommender};

/// Tolerance under which a rounded prediction counts as a hit.
const HIT_TOLERANCE: f64 = 1e-5;

/// Evaluation measures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Measure {
    /// Mean absolute error.
    Mae,
    /// Root mean squared error.
    Rmse,
    /// MAE divided by the width of the rating scale.
    Nmae,
    /// MAE of predictions rounded to the rating scale.
    RoundedMae,
    /// RMSE of predictions rounded to the rating scale.
    RoundedRmse,
    /// Fraction of rounded predictions that miss the rating.
    Mpe,
    /// Training time in milliseconds.
    TrainTime,
    /// Testing time in milliseconds.
    TestTime,
}

impl Measure {
    /// Accuracy measures, in reporting order.
    pub fn accuracy() -> &'static [Measure] {
        const ACCURACY: [Measure; 6] = [
            Measure::Mae,
            Measure::Rmse,
            Measure::Nmae,
            Measure::RoundedMae,
            Measure::RoundedRmse,
            Measure::Mpe,
        ];
        &ACCURACY
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            Measure::Mae => "MAE",
            Measure::Rmse => "RMSE",
            Measure::Nmae => "NMAE",
            Measure::RoundedMae => "rMAE",
            Measure::RoundedRmse => "rRMSE",
            Measure::Mpe => "MPE",
            Measure::TrainTime => "TrainTime",
            Measure::TestTime => "TestTime",
        };
        write!(f, "{}", name)
    }
}

/// Values of the measures of one evaluation.
pub type Measures = BTreeMap<Measure, f64>;

/// Clamp a prediction into the rating scale.
pub fn bound(prediction: f64, scale: &RatingScale) -> f64 {
    if scale.levels().is_empty() {
        prediction
    } else {
        prediction.max(scale.min()).min(scale.max())
    }
}

/// Compute the accuracy measures of `model` on the nonzero entries of
/// `test`.
///
/// Predictions are computed in parallel but accumulated in row-major
/// order, so the result does not depend on thread scheduling.
pub fn rating_measures<R: Recommender + Sync + ?Sized>(
    model: &R,
    test: &SparseMatrix,
    scale: &RatingScale,
) -> Result<Measures, PredictionError> {
    let entries: Vec<MatrixEntry> = test.iter().filter(|entry| entry.value > 0.0).collect();

    let predictions = entries
        .par_iter()
        .map(|entry| {
            model
                .predict(entry.row, entry.column)
                .map(|prediction| bound(prediction, scale))
        })
        .collect::<Result<Vec<f64>, _>>()?;

    let mut absolute = 0.0;
    let mut squared = 0.0;
    let mut rounded_absolute = 0.0;
    let mut rounded_squared = 0.0;
    let mut misses = 0;

    for (entry, &prediction) in entries.iter().zip(predictions.iter()) {
        let error = (entry.value - prediction).abs();
        absolute += error;
        squared += error * error;

        let rounded_error = (entry.value - scale.round(prediction)).abs();
        rounded_absolute += rounded_error;
        rounded_squared += rounded_error * rounded_error;
        if rounded_error > HIT_TOLERANCE {
            misses += 1;
        }
    }

    let num = entries.len().max(1) as f64;
    let mae = absolute / num;
    let range = scale.max() - scale.min();

    let mut measures = Measures::new();
    measures.insert(Measure::Mae, mae);
    measures.insert(Measure::Rmse, (squared / num).sqrt());
    measures.insert(Measure::Nmae, if range > 0.0 { mae / range } else { mae });
    measures.insert(Measure::RoundedMae, rounded_absolute / num);
    measures.insert(Measure::RoundedRmse, (rounded_squared / num).sqrt());
    measures.insert(Measure::Mpe, misses as f64 / num);

    Ok(measures)
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs() as f64 * 1e3 + f64::from(duration.subsec_nanos()) / 1e6
}

/// Train `model` on `train` and evaluate it on `test`, recording the
/// training and testing times.
pub fn execute<R: Recommender + Sync + ?Sized>(
    model: &mut R,
    train: &SparseMatrix,
    test: &SparseMatrix,
    scale: &RatingScale,
) -> Result<Measures, failure::Error> {
    let start = Instant::now();
    model.fit(train)?;
    let train_time = millis(start.elapsed());

    let start = Instant::now();
    let mut measures = rating_measures(model, test, scale)?;
    let test_time = millis(start.elapsed());

    measures.insert(Measure::TrainTime, train_time);
    measures.insert(Measure::TestTime, test_time);

    Ok(measures)
}

/// Sum measures over several evaluations.
pub fn sum(all: &[Measures]) -> Measures {
    let mut total = Measures::new();

    for measures in all {
        for (&measure, &value) in measures {
            *total.entry(measure).or_insert(0.0) += value;
        }
    }

    total
}

/// Uniform mean of measures over several evaluations.
pub fn mean(all: &[Measures]) -> Measures {
    divide(sum(all), all.len())
}

/// Divide every measure by `count`.
pub fn divide(mut measures: Measures, count: usize) -> Measures {
    if count > 0 {
        for value in measures.values_mut() {
            *value /= count as f64;
        }
    }

    measures
}

/// Format measures as comma-separated values, accuracy measures first.
pub fn format_measures(measures: &Measures) -> String {
    measures
        .iter()
        .map(|(measure, value)| match *measure {
            Measure::TrainTime | Measure::TestTime => format!("{}={:.0}ms", measure, value),
            _ => format!("{}={:.6}", measure, value),
        })
        .collect::<Vec<_>>()
        .join(",")
}
