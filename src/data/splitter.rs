//! Train/test splitting of rating matrices.
//!
//! Every split keeps the shape of the source matrix, so inner ids stay
//! valid on both sides even for users or items that end up with no
//! ratings on one of them.
use rand::Rng;

use super::dao::Timestamps;
use super::seeded_rng;
use super::sparse::{MatrixEntry, MatrixError, SparseMatrix};

/// Errors raised when a split cannot be made.
#[derive(Debug, Fail)]
pub enum SplitError {
    /// Ratios must lie strictly between zero and one.
    #[fail(display = "Invalid split ratio: {}.", _0)]
    InvalidRatio(f64),
    /// Cross-validation needs at least two folds and no more folds than ratings.
    #[fail(display = "Invalid number of folds: {}.", _0)]
    InvalidFolds(usize),
    /// One side of the split has no ratings.
    #[fail(display = "The {} part of the split is empty.", _0)]
    EmptySplit(&'static str),
    /// A chronological split found a rating without a timestamp.
    #[fail(display = "Rating ({}, {}) has no timestamp.", row, column)]
    MissingTimestamps {
        /// User of the rating.
        row: usize,
        /// Item of the rating.
        column: usize,
    },
    /// Fold index past the number of folds.
    #[fail(display = "Fold {} requested out of {}.", fold, num_folds)]
    FoldOutOfRange {
        /// Requested fold.
        fold: usize,
        /// Number of folds.
        num_folds: usize,
    },
    /// Rebuilding a matrix failed.
    #[fail(display = "Cannot build split matrix: {}", _0)]
    Matrix(#[cause] MatrixError),
}

impl From<MatrixError> for SplitError {
    fn from(err: MatrixError) -> Self {
        SplitError::Matrix(err)
    }
}

/// Grouping used by chronological splits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DateOrder {
    /// Earliest ratings of every user go to train.
    User,
    /// Earliest ratings of every item go to train.
    Item,
    /// Earliest ratings overall go to train.
    Rating,
}

fn check_ratio(ratio: f64) -> Result<(), SplitError> {
    if ratio > 0.0 && ratio < 1.0 {
        Ok(())
    } else {
        Err(SplitError::InvalidRatio(ratio))
    }
}

fn round_count(ratio: f64, count: usize) -> usize {
    (ratio * count as f64).round() as usize
}

/// Build one matrix per part from a part assignment of every entry.
fn assemble(
    shape: (usize, usize),
    entries: &[MatrixEntry],
    parts: &[usize],
    names: &[&'static str],
) -> Result<Vec<SparseMatrix>, SplitError> {
    let mut matrices = Vec::with_capacity(names.len());

    for (part, &name) in names.iter().enumerate() {
        let triplets: Vec<_> = entries
            .iter()
            .zip(parts.iter())
            .filter(|&(_, &p)| p == part)
            .map(|(entry, _)| (entry.row, entry.column, entry.value))
            .collect();

        if triplets.is_empty() && name != "validation" {
            return Err(SplitError::EmptySplit(name));
        }

        matrices.push(SparseMatrix::from_triplets(shape.0, shape.1, triplets)?);
    }

    Ok(matrices)
}

fn train_test(
    shape: (usize, usize),
    entries: &[MatrixEntry],
    in_train: &[bool],
) -> Result<(SparseMatrix, SparseMatrix), SplitError> {
    let parts: Vec<usize> = in_train.iter().map(|&train| if train { 0 } else { 1 }).collect();
    let mut matrices = assemble(shape, entries, &parts, &["train", "test"])?;

    let test = matrices.remove(1);
    let train = matrices.remove(0);

    Ok((train, test))
}

/// Seeded splitter over one rating matrix.
pub struct DataSplitter<'a> {
    matrix: &'a SparseMatrix,
    entries: Vec<MatrixEntry>,
    seed: u64,
}

impl<'a> DataSplitter<'a> {
    /// Splitter over the nonzero entries of `matrix`. All random choices
    /// derive from `seed`.
    pub fn new(matrix: &'a SparseMatrix, seed: u64) -> Self {
        DataSplitter {
            matrix: matrix,
            entries: matrix.iter().collect(),
            seed: seed,
        }
    }

    fn shuffled_positions(&self) -> Vec<usize> {
        let mut positions: Vec<usize> = (0..self.entries.len()).collect();
        seeded_rng(self.seed, 0).shuffle(&mut positions);
        positions
    }

    /// Each rating lands in train independently with probability `ratio`.
    pub fn ratio(&self, ratio: f64) -> Result<(SparseMatrix, SparseMatrix), SplitError> {
        check_ratio(ratio)?;

        let mut rng = seeded_rng(self.seed, 0);
        let in_train: Vec<bool> = self.entries.iter().map(|_| rng.gen_bool(ratio)).collect();

        train_test(self.matrix.shape(), &self.entries, &in_train)
    }

    /// Split into train, validation and test parts.
    pub fn ratio_with_validation(
        &self,
        train_ratio: f64,
        validation_ratio: f64,
    ) -> Result<(SparseMatrix, SparseMatrix, SparseMatrix), SplitError> {
        if train_ratio <= 0.0 {
            return Err(SplitError::InvalidRatio(train_ratio));
        }
        if validation_ratio < 0.0 {
            return Err(SplitError::InvalidRatio(validation_ratio));
        }
        if train_ratio + validation_ratio >= 1.0 {
            return Err(SplitError::InvalidRatio(train_ratio + validation_ratio));
        }

        let num_train = round_count(train_ratio, self.entries.len());
        let num_validation = round_count(validation_ratio, self.entries.len());
        let mut parts = vec![2; self.entries.len()];

        for (rank, &position) in self.shuffled_positions().iter().enumerate() {
            if rank < num_train {
                parts[position] = 0;
            } else if rank < num_train + num_validation {
                parts[position] = 1;
            }
        }

        let mut matrices = assemble(
            self.matrix.shape(),
            &self.entries,
            &parts,
            &["train", "validation", "test"],
        )?;
        let test = matrices.remove(2);
        let validation = matrices.remove(1);
        let train = matrices.remove(0);

        Ok((train, validation, test))
    }

    /// Chronological split: within every group the earliest
    /// `floor(ratio * n)` ratings go to train.
    pub fn ratio_by_date(
        &self,
        ratio: f64,
        order: DateOrder,
        timestamps: &Timestamps,
    ) -> Result<(SparseMatrix, SparseMatrix), SplitError> {
        check_ratio(ratio)?;

        let mut dated = Vec::with_capacity(self.entries.len());
        for (position, entry) in self.entries.iter().enumerate() {
            let timestamp = timestamps
                .get(&(entry.row, entry.column))
                .ok_or(SplitError::MissingTimestamps {
                    row: entry.row,
                    column: entry.column,
                })?;
            let group = match order {
                DateOrder::User => entry.row,
                DateOrder::Item => entry.column,
                DateOrder::Rating => 0,
            };
            dated.push((group, *timestamp, position));
        }
        dated.sort();

        let mut in_train = vec![false; self.entries.len()];
        let mut start = 0;
        while start < dated.len() {
            let group = dated[start].0;
            let end = dated[start..]
                .iter()
                .position(|&(g, _, _)| g != group)
                .map_or(dated.len(), |offset| start + offset);

            let num_train = (ratio * (end - start) as f64).floor() as usize;
            for &(_, _, position) in &dated[start..start + num_train] {
                in_train[position] = true;
            }

            start = end;
        }

        train_test(self.matrix.shape(), &self.entries, &in_train)
    }

    /// Per-user split keeping `count(rated)` random ratings of every user in train.
    fn per_user<F: Fn(usize) -> usize>(&self, count: F) -> Result<(SparseMatrix, SparseMatrix), SplitError> {
        let mut rng = seeded_rng(self.seed, 0);
        let mut in_train = vec![false; self.entries.len()];

        let mut start = 0;
        while start < self.entries.len() {
            let user = self.entries[start].row;
            let end = self.entries[start..]
                .iter()
                .position(|entry| entry.row != user)
                .map_or(self.entries.len(), |offset| start + offset);

            let mut positions: Vec<usize> = (start..end).collect();
            rng.shuffle(&mut positions);
            for &position in positions.iter().take(count(end - start)) {
                in_train[position] = true;
            }

            start = end;
        }

        train_test(self.matrix.shape(), &self.entries, &in_train)
    }

    /// Keep `min(n, rated)` random ratings of every user in train.
    pub fn given_n(&self, n: usize) -> Result<(SparseMatrix, SparseMatrix), SplitError> {
        self.per_user(|rated| n.min(rated))
    }

    /// Keep `round(ratio * rated)` random ratings of every user in train.
    pub fn given_ratio(&self, ratio: f64) -> Result<(SparseMatrix, SparseMatrix), SplitError> {
        check_ratio(ratio)?;
        self.per_user(|rated| round_count(ratio, rated))
    }

    /// Assign ratings to `k` folds of near-equal size.
    pub fn k_fold(&self, k: usize) -> Result<KFold, SplitError> {
        if k < 2 || k > self.entries.len() {
            return Err(SplitError::InvalidFolds(k));
        }

        let mut folds = vec![0; self.entries.len()];
        for (rank, &position) in self.shuffled_positions().iter().enumerate() {
            folds[position] = rank % k;
        }

        Ok(KFold {
            shape: self.matrix.shape(),
            entries: self.entries.clone(),
            folds: folds,
            num_folds: k,
        })
    }
}

/// A fixed assignment of ratings to cross-validation folds.
#[derive(Clone, Debug)]
pub struct KFold {
    shape: (usize, usize),
    entries: Vec<MatrixEntry>,
    folds: Vec<usize>,
    num_folds: usize,
}

impl KFold {
    /// Number of folds.
    pub fn num_folds(&self) -> usize {
        self.num_folds
    }

    /// Fold `fold` (zero-based) as test, the others as train.
    pub fn kth_fold(&self, fold: usize) -> Result<(SparseMatrix, SparseMatrix), SplitError> {
        if fold >= self.num_folds {
            return Err(SplitError::FoldOutOfRange {
                fold: fold,
                num_folds: self.num_folds,
            });
        }

        let in_train: Vec<bool> = self.folds.iter().map(|&f| f != fold).collect();
        train_test(self.shape, &self.entries, &in_train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thousand_ratings() -> SparseMatrix {
        let triplets = (0..50).flat_map(|user| {
            (0..20).map(move |j| (user, (user * 7 + j * 3) % 50, (1 + (user + j) % 5) as f64))
        });

        SparseMatrix::from_triplets(50, 50, triplets).unwrap()
    }

    fn assert_partition(original: &SparseMatrix, parts: &[&SparseMatrix]) {
        for part in parts {
            assert_eq!(part.shape(), original.shape());
        }
        assert_eq!(
            parts.iter().map(|part| part.size()).sum::<usize>(),
            original.size()
        );

        for entry in original {
            let holders: Vec<_> = parts
                .iter()
                .filter(|part| part.get(entry.row, entry.column) != 0.0)
                .collect();
            assert_eq!(holders.len(), 1);
            assert_eq!(holders[0].get(entry.row, entry.column), entry.value);
        }
    }

    #[test]
    fn seeded_ratio_split() {
        let matrix = thousand_ratings();
        assert_eq!(matrix.size(), 1000);

        let (train, test) = DataSplitter::new(&matrix, 42).ratio(0.8).unwrap();

        assert!(train.size() >= 780 && train.size() <= 820);
        assert_eq!(test.size(), 1000 - train.size());
        assert_partition(&matrix, &[&train, &test]);

        let (again, _) = DataSplitter::new(&matrix, 42).ratio(0.8).unwrap();
        assert_eq!(again, train);
    }

    #[test]
    fn ratio_draws_every_rating_independently() {
        let matrix = thousand_ratings();

        let sizes: Vec<usize> = (0..10)
            .map(|seed| DataSplitter::new(&matrix, seed).ratio(0.8).unwrap().0.size())
            .collect();

        assert!(sizes.iter().any(|&size| size != sizes[0]));
        for &size in &sizes {
            assert!(size >= 750 && size <= 850, "Train size {}", size);
        }
    }

    #[test]
    fn invalid_ratios_are_rejected() {
        let matrix = thousand_ratings();
        let splitter = DataSplitter::new(&matrix, 1);

        assert!(splitter.ratio(0.0).is_err());
        assert!(splitter.ratio(1.0).is_err());
        assert!(splitter.given_ratio(1.5).is_err());
        assert!(splitter.ratio_with_validation(0.7, 0.3).is_err());
        assert!(splitter.ratio_with_validation(0.7, -0.1).is_err());
    }

    #[test]
    fn validation_split() {
        let matrix = thousand_ratings();
        let (train, validation, test) = DataSplitter::new(&matrix, 3)
            .ratio_with_validation(0.6, 0.2)
            .unwrap();

        assert_eq!(train.size(), 600);
        assert_eq!(validation.size(), 200);
        assert_eq!(test.size(), 200);
        assert_partition(&matrix, &[&train, &validation, &test]);
    }

    #[test]
    fn chronological_splits() {
        let matrix = thousand_ratings();
        let timestamps: Timestamps = matrix
            .iter()
            .map(|entry| ((entry.row, entry.column), 1000 - entry.row * 3 - entry.column))
            .collect();
        let splitter = DataSplitter::new(&matrix, 5);

        let (train, test) = splitter
            .ratio_by_date(0.8, DateOrder::User, &timestamps)
            .unwrap();
        assert_partition(&matrix, &[&train, &test]);
        for user in 0..matrix.num_rows() {
            assert_eq!(train.row_size(user), 16);
            let latest_train = train
                .row(user)
                .indices()
                .iter()
                .map(|&item| timestamps[&(user, item)])
                .max()
                .unwrap();
            assert!(test.row(user)
                .indices()
                .iter()
                .all(|&item| timestamps[&(user, item)] >= latest_train));
        }

        let (train, test) = splitter
            .ratio_by_date(0.5, DateOrder::Rating, &timestamps)
            .unwrap();
        assert_eq!(train.size(), 500);
        let latest_train = train.iter().map(|e| timestamps[&(e.row, e.column)]).max().unwrap();
        assert!(test.iter().all(|e| timestamps[&(e.row, e.column)] >= latest_train));

        let (train, test) = splitter
            .ratio_by_date(0.5, DateOrder::Item, &timestamps)
            .unwrap();
        assert_partition(&matrix, &[&train, &test]);

        let mut partial = timestamps.clone();
        partial.remove(&(0, 0));
        match splitter.ratio_by_date(0.5, DateOrder::User, &partial) {
            Err(SplitError::MissingTimestamps { row: 0, column: 0 }) => {}
            _ => panic!("Expected a missing timestamp error."),
        }
    }

    #[test]
    fn given_n_and_given_ratio() {
        let matrix = thousand_ratings();
        let splitter = DataSplitter::new(&matrix, 9);

        let (train, test) = splitter.given_n(5).unwrap();
        assert_partition(&matrix, &[&train, &test]);
        assert!((0..50).all(|user| train.row_size(user) == 5));

        let (train, _) = splitter.given_ratio(0.25).unwrap();
        assert!((0..50).all(|user| train.row_size(user) == 5));

        match splitter.given_n(20) {
            Err(SplitError::EmptySplit("test")) => {}
            _ => panic!("Expected an empty test split."),
        }
    }

    #[test]
    fn k_fold_partitions_ratings() {
        let matrix = thousand_ratings();
        let folds = DataSplitter::new(&matrix, 11).k_fold(5).unwrap();

        let tests: Vec<SparseMatrix> = (0..5)
            .map(|fold| {
                let (train, test) = folds.kth_fold(fold).unwrap();
                assert_partition(&matrix, &[&train, &test]);
                assert_eq!(test.size(), 200);
                test
            })
            .collect();
        assert_partition(&matrix, &tests.iter().collect::<Vec<_>>());

        assert!(folds.kth_fold(5).is_err());
        assert!(DataSplitter::new(&matrix, 11).k_fold(1).is_err());
    }
}
