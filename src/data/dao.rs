//! Reading rating files into sparse matrices.
//!
//! A rating file holds one observation per line, `user item rating
//! [timestamp]`, separated by tabs, commas or spaces. Raw user and item
//! identifiers are mapped to dense inner ids in first-seen order.
use std;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use csv;
use itertools::Itertools;

use super::sparse::{ColumnMap, MatrixError, SparseMatrix, Table};
use {ItemId, Timestamp, UserId};

/// Offset added to every rating when the lowest rating is zero.
pub const EPSILON: f64 = 1e-5;

/// Errors raised while reading or writing rating files.
#[derive(Debug, Fail)]
pub enum DataError {
    /// The file could not be opened, read or written.
    #[fail(display = "I/O error on {}: {}", path, cause)]
    Io {
        /// File being accessed.
        path: String,
        /// Underlying error.
        #[cause]
        cause: io::Error,
    },
    /// A line could not be understood.
    #[fail(display = "{}:{}: {}", path, line, message)]
    Parse {
        /// File being read.
        path: String,
        /// One-based line number.
        line: u64,
        /// What went wrong.
        message: String,
    },
    /// The file held no usable ratings.
    #[fail(display = "No ratings found in {}.", _0)]
    Empty(String),
    /// The rating matrix could not be assembled.
    #[fail(display = "Cannot build rating matrix: {}", _0)]
    Matrix(#[cause] MatrixError),
}

impl From<MatrixError> for DataError {
    fn from(err: MatrixError) -> Self {
        DataError::Matrix(err)
    }
}

/// Timestamps of observed ratings.
pub type Timestamps = HashMap<(UserId, ItemId), Timestamp>;

/// Bidirectional map between raw string ids and dense inner ids.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IdMap {
    raw_to_inner: HashMap<String, usize>,
    inner_to_raw: Vec<String>,
}

impl IdMap {
    /// An empty map.
    pub fn new() -> Self {
        IdMap::default()
    }

    /// Inner id of `raw`, assigning the next free id if it is new.
    pub fn get_or_insert(&mut self, raw: &str) -> usize {
        if let Some(&inner) = self.raw_to_inner.get(raw) {
            return inner;
        }

        let inner = self.inner_to_raw.len();
        self.raw_to_inner.insert(raw.to_owned(), inner);
        self.inner_to_raw.push(raw.to_owned());

        inner
    }

    /// Inner id of `raw`, if known.
    pub fn inner(&self, raw: &str) -> Option<usize> {
        self.raw_to_inner.get(raw).cloned()
    }

    /// Raw id of `inner`, if assigned.
    pub fn raw(&self, inner: usize) -> Option<&str> {
        self.inner_to_raw.get(inner).map(|raw| raw.as_str())
    }

    /// Number of mapped ids.
    pub fn len(&self) -> usize {
        self.inner_to_raw.len()
    }

    /// Whether no ids are mapped.
    pub fn is_empty(&self) -> bool {
        self.inner_to_raw.is_empty()
    }
}

/// The distinct rating values of a dataset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RatingScale {
    levels: Vec<f64>,
    distribution: Vec<(f64, usize)>,
    epsilon: f64,
}

impl RatingScale {
    /// Build the scale from observed ratings.
    pub fn from_ratings<I: IntoIterator<Item = f64>>(ratings: I) -> Self {
        let mut ratings: Vec<f64> = ratings.into_iter().collect();
        ratings.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

        let distribution: Vec<(f64, usize)> = ratings
            .iter()
            .group_by(|&&rating| rating)
            .into_iter()
            .map(|(rating, group)| (rating, group.count()))
            .collect();

        RatingScale {
            levels: distribution.iter().map(|&(rating, _)| rating).collect(),
            distribution: distribution,
            epsilon: 0.0,
        }
    }

    /// Shift every level by `epsilon`.
    fn shift(&mut self, epsilon: f64) {
        for level in self.levels.iter_mut() {
            *level += epsilon;
        }
        for entry in self.distribution.iter_mut() {
            entry.0 += epsilon;
        }
        self.epsilon += epsilon;
    }

    /// Sorted distinct rating values.
    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    /// Number of ratings at every level.
    pub fn distribution(&self) -> &[(f64, usize)] {
        &self.distribution
    }

    /// Lowest level; zero for an empty scale.
    pub fn min(&self) -> f64 {
        self.levels.first().cloned().unwrap_or(0.0)
    }

    /// Highest level; zero for an empty scale.
    pub fn max(&self) -> f64 {
        self.levels.last().cloned().unwrap_or(0.0)
    }

    /// Offset applied to all ratings on load, zero unless the lowest
    /// raw rating was zero.
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Half of the smallest step between two adjacent levels.
    pub fn quantum(&self) -> f64 {
        self.levels
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .fold(None, |min: Option<f64>, step| {
                Some(min.map_or(step, |min| min.min(step)))
            })
            .map_or(0.0, |step| step / 2.0)
    }

    /// Round a prediction to the nearest rating level.
    ///
    /// A prediction exactly half a step between two levels rounds up.
    pub fn round(&self, prediction: f64) -> f64 {
        let quantum = self.quantum();

        self.levels
            .iter()
            .cloned()
            .find(|&level| prediction < level + quantum)
            .unwrap_or_else(|| self.max())
    }
}

/// Which columns of a rating file to read, and how.
#[derive(Clone, Debug, PartialEq)]
pub struct RatingsSetup {
    /// Column of the user id.
    pub user_column: usize,
    /// Column of the item id.
    pub item_column: usize,
    /// Without a rating column every observation counts as 1.0.
    pub rating_column: Option<usize>,
    /// Optional column of integer timestamps.
    pub timestamp_column: Option<usize>,
    /// Ratings above the threshold become 1.0, the others 0.0.
    pub threshold: Option<f64>,
}

impl Default for RatingsSetup {
    fn default() -> Self {
        RatingsSetup {
            user_column: 0,
            item_column: 1,
            rating_column: Some(2),
            timestamp_column: Some(3),
            threshold: None,
        }
    }
}

impl RatingsSetup {
    /// Build a setup from a list of two to four column indices.
    pub fn from_columns(columns: &[usize]) -> Option<Self> {
        match columns.len() {
            2 | 3 | 4 => Some(RatingsSetup {
                user_column: columns[0],
                item_column: columns[1],
                rating_column: columns.get(2).cloned(),
                timestamp_column: columns.get(3).cloned(),
                threshold: None,
            }),
            _ => None,
        }
    }

    /// Binarize ratings around `threshold`. Negative thresholds disable it.
    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = if threshold >= 0.0 {
            Some(threshold)
        } else {
            None
        };
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum IdMode {
    Grow,
    Frozen,
    Shared,
}

/// Reads one rating file.
pub struct DataDao {
    path: PathBuf,
    user_ids: IdMap,
    item_ids: IdMap,
    mode: IdMode,
    epsilon: Option<f64>,
}

impl DataDao {
    /// Read a file with fresh id maps.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        DataDao {
            path: path.as_ref().to_owned(),
            user_ids: IdMap::new(),
            item_ids: IdMap::new(),
            mode: IdMode::Grow,
            epsilon: None,
        }
    }

    /// Read a file against existing id maps.
    ///
    /// The maps are not extended: lines naming unknown users or items are
    /// skipped with a warning, so the resulting matrix lines up with the
    /// dataset the maps came from.
    pub fn with_ids<P: AsRef<Path>>(path: P, user_ids: IdMap, item_ids: IdMap) -> Self {
        DataDao {
            path: path.as_ref().to_owned(),
            user_ids: user_ids,
            item_ids: item_ids,
            mode: IdMode::Frozen,
            epsilon: None,
        }
    }

    /// Read a file whose two id columns both hold users, such as trust
    /// links, extending `user_ids`.
    pub fn social<P: AsRef<Path>>(path: P, user_ids: IdMap) -> Self {
        DataDao {
            path: path.as_ref().to_owned(),
            user_ids: user_ids,
            item_ids: IdMap::new(),
            mode: IdMode::Shared,
            epsilon: None,
        }
    }

    /// Offset every rating by `epsilon`, whatever the lowest rating of
    /// this file is. Used to read a test file on the scale of its
    /// training file.
    pub fn rating_offset(mut self, epsilon: f64) -> Self {
        self.epsilon = Some(epsilon);
        self
    }

    fn path_string(&self) -> String {
        self.path.display().to_string()
    }

    fn io_error(&self, cause: io::Error) -> DataError {
        DataError::Io {
            path: self.path_string(),
            cause: cause,
        }
    }

    fn parse_error<S: Into<String>>(&self, line: u64, message: S) -> DataError {
        DataError::Parse {
            path: self.path_string(),
            line: line,
            message: message.into(),
        }
    }

    fn csv_error(&self, err: csv::Error) -> DataError {
        let line = err.position().map_or(0, |position| position.line());
        match err.into_kind() {
            csv::ErrorKind::Io(cause) => self.io_error(cause),
            kind => self.parse_error(line, format!("{:?}", kind)),
        }
    }

    /// Read the file into a dataset.
    pub fn read(mut self, setup: &RatingsSetup) -> Result<Dataset, DataError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b',')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_path(&self.path)
            .map_err(|e| self.csv_error(e))?;

        let mut table = Table::new();
        let mut timestamps = Timestamps::new();
        let mut dropped = 0;
        let mut previous_line = 0;

        let required = [
            Some(setup.user_column),
            Some(setup.item_column),
            setup.rating_column,
        ].iter()
            .filter_map(|&column| column)
            .max()
            .unwrap_or(0) + 1;

        for record in reader.records() {
            let record = record.map_err(|e| self.csv_error(e))?;
            let line = record.position().map_or(previous_line + 1, |p| p.line());

            if line > previous_line + 1 {
                return Err(self.parse_error(previous_line + 1, "blank line"));
            }
            previous_line = line;

            let fields: Vec<&str> = record
                .iter()
                .flat_map(|field| field.split(|c: char| c == ' ' || c == '\t'))
                .filter(|field| !field.is_empty())
                .collect();

            if fields.is_empty() {
                return Err(self.parse_error(line, "blank line"));
            }
            if fields.len() < required {
                return Err(self.parse_error(
                    line,
                    format!("expected at least {} columns, found {}", required, fields.len()),
                ));
            }

            let mut rating = match setup.rating_column {
                Some(column) => fields[column].parse::<f64>().map_err(|_| {
                    self.parse_error(line, format!("invalid rating '{}'", fields[column]))
                })?,
                None => 1.0,
            };
            if let Some(threshold) = setup.threshold {
                rating = if rating > threshold { 1.0 } else { 0.0 };
            }

            let timestamp = match setup.timestamp_column.and_then(|c| fields.get(c)) {
                Some(raw) => Some(raw.parse::<Timestamp>().map_err(|_| {
                    self.parse_error(line, format!("invalid timestamp '{}'", raw))
                })?),
                None => None,
            };

            let (raw_user, raw_item) = (fields[setup.user_column], fields[setup.item_column]);
            let ids = match self.mode {
                IdMode::Grow => Some((
                    self.user_ids.get_or_insert(raw_user),
                    self.item_ids.get_or_insert(raw_item),
                )),
                IdMode::Shared => Some((
                    self.user_ids.get_or_insert(raw_user),
                    self.user_ids.get_or_insert(raw_item),
                )),
                IdMode::Frozen => match (self.user_ids.inner(raw_user), self.item_ids.inner(raw_item)) {
                    (Some(user), Some(item)) => Some((user, item)),
                    _ => None,
                },
            };

            match ids {
                Some((user, item)) => {
                    table.insert((user, item), rating);
                    if let Some(timestamp) = timestamp {
                        timestamps.insert((user, item), timestamp);
                    }
                }
                None => dropped += 1,
            }
        }

        if dropped > 0 {
            warn!(
                "Skipped {} ratings of unknown users or items in {}",
                dropped,
                self.path_string()
            );
        }
        if table.is_empty() {
            return Err(DataError::Empty(self.path_string()));
        }

        let mut scale = RatingScale::from_ratings(table.values().cloned());
        let epsilon = match self.epsilon {
            Some(epsilon) => epsilon,
            None if scale.min() == 0.0 => EPSILON,
            None => 0.0,
        };
        if epsilon != 0.0 {
            scale.shift(epsilon);
            for value in table.values_mut() {
                *value += epsilon;
            }
        }

        if self.mode == IdMode::Shared {
            self.item_ids = self.user_ids.clone();
        }

        let mut column_map = ColumnMap::new();
        for &(user, item) in table.keys() {
            column_map.entry(item).or_insert_with(Vec::new).push(user);
        }

        let rate_matrix =
            SparseMatrix::new(self.user_ids.len(), self.item_ids.len(), &table, &column_map)?;

        debug!(
            "Read {} ratings of {} users and {} items from {}, scale {:?}",
            table.len(),
            self.user_ids.len(),
            self.item_ids.len(),
            self.path_string(),
            scale.levels()
        );

        Ok(Dataset {
            path: self.path,
            rate_matrix: rate_matrix,
            scale: scale,
            timestamps: timestamps,
            user_ids: self.user_ids,
            item_ids: self.item_ids,
            item_as_user: self.mode == IdMode::Shared,
            social: None,
        })
    }
}

/// A loaded rating file.
#[derive(Clone, Debug)]
pub struct Dataset {
    path: PathBuf,
    rate_matrix: SparseMatrix,
    scale: RatingScale,
    timestamps: Timestamps,
    user_ids: IdMap,
    item_ids: IdMap,
    item_as_user: bool,
    social: Option<SparseMatrix>,
}

impl Dataset {
    /// Wrap an in-memory matrix; raw ids are the decimal inner ids.
    pub fn from_matrix(rate_matrix: SparseMatrix, timestamps: Timestamps) -> Self {
        let mut user_ids = IdMap::new();
        for user in 0..rate_matrix.num_rows() {
            user_ids.get_or_insert(&user.to_string());
        }
        let mut item_ids = IdMap::new();
        for item in 0..rate_matrix.num_columns() {
            item_ids.get_or_insert(&item.to_string());
        }

        Dataset {
            path: PathBuf::new(),
            scale: RatingScale::from_ratings(rate_matrix.iter().map(|entry| entry.value)),
            rate_matrix: rate_matrix,
            timestamps: timestamps,
            user_ids: user_ids,
            item_ids: item_ids,
            item_as_user: false,
            social: None,
        }
    }

    /// File the dataset was read from; empty for in-memory data.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Users by items rating matrix.
    pub fn rate_matrix(&self) -> &SparseMatrix {
        &self.rate_matrix
    }

    /// Rating levels after any zero shift.
    pub fn scale(&self) -> &RatingScale {
        &self.scale
    }

    /// Timestamps keyed by inner `(user, item)`.
    pub fn timestamps(&self) -> &Timestamps {
        &self.timestamps
    }

    /// Raw to inner user ids.
    pub fn user_ids(&self) -> &IdMap {
        &self.user_ids
    }

    /// Raw to inner item ids.
    pub fn item_ids(&self) -> &IdMap {
        &self.item_ids
    }

    /// Number of distinct users.
    pub fn num_users(&self) -> usize {
        self.user_ids.len()
    }

    /// Number of distinct items.
    pub fn num_items(&self) -> usize {
        self.item_ids.len()
    }

    /// Whether both id columns hold users.
    pub fn is_item_as_user(&self) -> bool {
        self.item_as_user
    }

    /// Read a file of user-to-user links, such as trust statements, and
    /// keep its link matrix.
    ///
    /// Both ends are mapped through the user ids of this dataset. Users
    /// who only appear in the link file get ids from `num_users()` on;
    /// the rating matrix is left as it is.
    pub fn read_social<P: AsRef<Path>>(&mut self, path: P) -> Result<(), DataError> {
        let setup = RatingsSetup {
            rating_column: None,
            timestamp_column: None,
            ..RatingsSetup::default()
        };
        let links = DataDao::social(path, self.user_ids.clone()).read(&setup)?;
        self.social = Some(links.rate_matrix);

        Ok(())
    }

    /// Social links attached with [`read_social`](#method.read_social).
    pub fn social_links(&self) -> Option<&SparseMatrix> {
        self.social.as_ref()
    }

    /// Summary statistics of the dataset.
    pub fn specs(&self) -> DatasetSpecs {
        let mut ratings: Vec<f64> = self.rate_matrix.iter().map(|entry| entry.value).collect();
        ratings.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

        let mode = self.scale
            .distribution()
            .iter()
            .fold(None, |best: Option<(f64, usize)>, &(level, count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((level, count)),
            })
            .map_or(0.0, |(level, _)| level);

        let user_counts: Vec<f64> = (0..self.rate_matrix.num_rows())
            .map(|user| self.rate_matrix.row_size(user))
            .filter(|&count| count > 0)
            .map(|count| count as f64)
            .collect();
        let item_counts: Vec<f64> = (0..self.rate_matrix.num_columns())
            .map(|item| self.rate_matrix.col_size(item))
            .filter(|&count| count > 0)
            .map(|count| count as f64)
            .collect();

        DatasetSpecs {
            path: self.path.display().to_string(),
            num_users: self.num_users(),
            num_items: if self.item_as_user {
                None
            } else {
                Some(self.num_items())
            },
            num_ratings: ratings.len(),
            distribution: self.scale.distribution().to_vec(),
            mean: mean(&ratings),
            std: std_dev(&ratings),
            mode: mode,
            median: median(&ratings),
            user_mean: mean(&user_counts),
            user_std: std_dev(&user_counts),
            item_mean: mean(&item_counts),
            item_std: std_dev(&item_counts),
            num_social_links: self.social.as_ref().map(|links| links.size()),
        }
    }

    /// Write the nonzero entries of `matrix` as `user item rating [timestamp]`
    /// lines using the raw ids of this dataset.
    pub fn write_matrix<P: AsRef<Path>>(&self, matrix: &SparseMatrix, path: P) -> Result<(), DataError> {
        let path_string = path.as_ref().display().to_string();
        let to_error = |err: csv::Error| DataError::Io {
            path: path_string.clone(),
            cause: err.into(),
        };

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b' ')
            .has_headers(false)
            .flexible(true)
            .from_path(path.as_ref())
            .map_err(&to_error)?;

        for entry in matrix {
            let user = self.user_ids.raw(entry.row).unwrap_or("");
            let item = self.item_ids.raw(entry.column).unwrap_or("");
            let rating = entry.value.to_string();

            let written = match self.timestamps.get(&(entry.row, entry.column)) {
                Some(timestamp) => {
                    let timestamp = timestamp.to_string();
                    writer.write_record(&[user, item, rating.as_str(), timestamp.as_str()])
                }
                None => writer.write_record(&[user, item, rating.as_str()]),
            };
            written.map_err(&to_error)?;
        }

        writer.flush().map_err(|cause| DataError::Io {
            path: path_string.clone(),
            cause: cause,
        })
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

/// Median of sorted values.
fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

/// Summary statistics of a dataset.
#[derive(Clone, Debug, Serialize)]
pub struct DatasetSpecs {
    /// File the dataset was read from.
    pub path: String,
    /// Number of users.
    pub num_users: usize,
    /// Absent when both id columns hold users.
    pub num_items: Option<usize>,
    /// Number of nonzero ratings.
    pub num_ratings: usize,
    /// Count of ratings at every level.
    pub distribution: Vec<(f64, usize)>,
    /// Mean rating.
    pub mean: f64,
    /// Sample standard deviation of the ratings.
    pub std: f64,
    /// Most frequent rating.
    pub mode: f64,
    /// Median rating.
    pub median: f64,
    /// Mean number of ratings per rating user.
    pub user_mean: f64,
    /// Standard deviation of the ratings per rating user.
    pub user_std: f64,
    /// Mean number of ratings per rated item.
    pub item_mean: f64,
    /// Standard deviation of the ratings per rated item.
    pub item_std: f64,
    /// Present when social links were read.
    pub num_social_links: Option<usize>,
}

impl fmt::Display for DatasetSpecs {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "*****************************************************")?;
        writeln!(f, "Dataset: {}", self.path)?;
        writeln!(f, "User amount: {}", self.num_users)?;
        if let Some(num_items) = self.num_items {
            writeln!(f, "Item amount: {}", num_items)?;
        }
        writeln!(f, "Rate amount: {}", self.num_ratings)?;
        writeln!(
            f,
            "Scales dist: [{}]",
            self.distribution
                .iter()
                .map(|&(level, count)| format!("{} x {}", level, count))
                .join(", ")
        )?;
        writeln!(f, "Mean: {:.6}", self.mean)?;
        writeln!(f, "Std : {:.6}", self.std)?;
        writeln!(f, "Mode: {:.6}", self.mode)?;
        writeln!(f, "Median: {:.6}", self.median)?;
        writeln!(f, "User mean: {:.6}", self.user_mean)?;
        writeln!(f, "User Std : {:.6}", self.user_std)?;
        if self.num_items.is_some() {
            writeln!(f, "Item mean: {:.6}", self.item_mean)?;
            writeln!(f, "Item Std : {:.6}", self.item_std)?;
        }
        if let Some(links) = self.num_social_links {
            writeln!(f, "Social links: {}", links)?;
        }
        write!(f, "*****************************************************")
    }
}

impl std::str::FromStr for RatingsSetup {
    type Err = String;

    /// Parse a comma-separated column list such as `0,1,2,3`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let columns = s.split(',')
            .map(|column| column.trim().parse::<usize>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| format!("invalid column list '{}'", s))?;

        RatingsSetup::from_columns(&columns).ok_or_else(|| format!("expected two to four columns, got '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;

    use tempfile;

    use super::*;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn reads_tab_separated_ratings() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "ratings.txt",
            "u1\ti1\t4\t100\nu2\ti1\t3\t200\nu1\ti2\t5\t300\nu3\ti3\t4\n",
        );

        let dataset = DataDao::new(&path).read(&RatingsSetup::default()).unwrap();

        assert_eq!(dataset.num_users(), 3);
        assert_eq!(dataset.num_items(), 3);
        assert_eq!(dataset.rate_matrix().size(), 4);
        assert_eq!(dataset.user_ids().inner("u2"), Some(1));
        assert_eq!(dataset.item_ids().raw(1), Some("i2"));
        assert_eq!(dataset.rate_matrix().get(0, 1), 5.0);
        assert_eq!(dataset.timestamps().get(&(1, 0)), Some(&200));
        assert_eq!(dataset.timestamps().len(), 3);
        assert_eq!(dataset.scale().levels(), &[3.0, 4.0, 5.0]);
        assert_eq!(dataset.scale().distribution(), &[(3.0, 1), (4.0, 2), (5.0, 1)]);
        assert_eq!(dataset.scale().epsilon(), 0.0);
    }

    #[test]
    fn zero_ratings_are_shifted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "ratings.csv", "a,x,0\na,y,1\nb,x,1\n");

        let dataset = DataDao::new(&path).read(&RatingsSetup::default()).unwrap();

        assert_eq!(dataset.rate_matrix().size(), 3);
        assert_eq!(dataset.rate_matrix().get(0, 0), EPSILON);
        assert_eq!(dataset.rate_matrix().get(0, 1), 1.0 + EPSILON);
        assert_eq!(dataset.scale().min(), EPSILON);
        assert_eq!(dataset.scale().epsilon(), EPSILON);
    }

    #[test]
    fn columns_and_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "ratings.txt", "x 10 a 2\ny 11 b 5\ny 12 a 4\n");

        let setup = RatingsSetup::from_columns(&[2, 0, 3]).unwrap().threshold(3.0);
        let dataset = DataDao::new(&path).read(&setup).unwrap();

        assert_eq!(dataset.num_users(), 2);
        assert_eq!(dataset.num_items(), 2);
        assert_eq!(dataset.rate_matrix().get(0, 0), EPSILON);
        assert_eq!(dataset.rate_matrix().get(0, 1), 1.0 + EPSILON);
        assert_eq!(dataset.rate_matrix().get(1, 1), 1.0 + EPSILON);

        let implicit = "0,1".parse::<RatingsSetup>().unwrap();
        let dataset = DataDao::new(&path).read(&implicit).unwrap();
        assert_eq!(dataset.scale().levels(), &[1.0]);
    }

    #[test]
    fn parse_errors_carry_the_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "bad.txt", "u1 i1 4\nu2 i2 four\n");

        match DataDao::new(&path).read(&RatingsSetup::default()) {
            Err(DataError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("Unexpected result: {:?}", other.map(|d| d.num_users())),
        }

        let path = write_file(&dir, "blank.txt", "u1 i1 4\n\nu2 i2 3\n");
        assert!(DataDao::new(&path).read(&RatingsSetup::default()).is_err());

        let path = write_file(&dir, "empty.txt", "");
        match DataDao::new(&path).read(&RatingsSetup::default()) {
            Err(DataError::Empty(_)) => {}
            _ => panic!("Expected an empty-file error."),
        }

        assert!(DataDao::new(dir.path().join("missing.txt"))
            .read(&RatingsSetup::default())
            .is_err());
    }

    #[test]
    fn frozen_ids_drop_unknown_entries() {
        let dir = tempfile::tempdir().unwrap();
        let train = write_file(&dir, "train.txt", "u1 i1 4\nu2 i2 3\n");
        let test = write_file(&dir, "test.txt", "u2 i1 5\nu9 i1 2\nu1 i7 1\n");

        let train = DataDao::new(&train).read(&RatingsSetup::default()).unwrap();
        let test = DataDao::with_ids(&test, train.user_ids().clone(), train.item_ids().clone())
            .read(&RatingsSetup::default())
            .unwrap();

        assert_eq!(test.rate_matrix().shape(), (2, 2));
        assert_eq!(test.rate_matrix().size(), 1);
        assert_eq!(test.rate_matrix().get(1, 0), 5.0);
    }

    #[test]
    fn separators_may_vary_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "mixed.txt", "196\t242 3\n186,302,3\n22 ,377\t1\n");

        let dataset = DataDao::new(&path).read(&RatingsSetup::default()).unwrap();

        assert_eq!(dataset.rate_matrix().size(), 3);
        assert_eq!(dataset.user_ids().raw(1), Some("186"));
        assert_eq!(dataset.item_ids().raw(1), Some("302"));
        assert_eq!(dataset.rate_matrix().get(0, 0), 3.0);
        assert_eq!(dataset.rate_matrix().get(1, 1), 3.0);
        assert_eq!(dataset.rate_matrix().get(2, 2), 1.0);
    }

    #[test]
    fn test_files_follow_the_training_offset() {
        let dir = tempfile::tempdir().unwrap();
        let train = write_file(&dir, "train.txt", "u1 i1 0\nu2 i2 3\n");
        let test = write_file(&dir, "test.txt", "u2 i1 5\nu1 i2 2\n");

        let train = DataDao::new(&train).read(&RatingsSetup::default()).unwrap();
        assert_eq!(train.scale().epsilon(), EPSILON);

        let own = DataDao::with_ids(&test, train.user_ids().clone(), train.item_ids().clone())
            .read(&RatingsSetup::default())
            .unwrap();
        assert_eq!(own.rate_matrix().get(1, 0), 5.0);

        let shifted = DataDao::with_ids(&test, train.user_ids().clone(), train.item_ids().clone())
            .rating_offset(train.scale().epsilon())
            .read(&RatingsSetup::default())
            .unwrap();
        assert_eq!(shifted.rate_matrix().get(1, 0), 5.0 + EPSILON);
        assert_eq!(shifted.rate_matrix().get(0, 1), 2.0 + EPSILON);
        assert_eq!(shifted.scale().epsilon(), EPSILON);
        assert_eq!(shifted.scale().levels(), &[2.0 + EPSILON, 5.0 + EPSILON]);
    }

    #[test]
    fn social_links_attach_to_ratings() {
        let dir = tempfile::tempdir().unwrap();
        let ratings = write_file(&dir, "ratings.txt", "a x 4\nb y 3\n");
        let trust = write_file(&dir, "trust.txt", "a b\nb c\n");

        let mut dataset = DataDao::new(&ratings).read(&RatingsSetup::default()).unwrap();
        assert!(dataset.social_links().is_none());
        assert!(dataset.specs().num_social_links.is_none());

        dataset.read_social(&trust).unwrap();

        let links = dataset.social_links().unwrap();
        assert_eq!(links.shape(), (3, 3));
        assert_eq!(links.get(0, 1), 1.0);
        assert_eq!(links.get(1, 2), 1.0);
        assert_eq!(dataset.num_users(), 2);
        assert_eq!(dataset.rate_matrix().shape(), (2, 2));
        assert_eq!(dataset.specs().num_social_links, Some(2));
        assert!(dataset.specs().to_string().contains("Social links: 2"));
    }

    #[test]
    fn social_links_share_one_id_space() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "trust.txt", "a b 1\nb c 1\n");

        let social = DataDao::social(&path, IdMap::new())
            .read(&RatingsSetup::default())
            .unwrap();

        assert!(social.is_item_as_user());
        assert_eq!(social.rate_matrix().shape(), (3, 3));
        assert_eq!(social.rate_matrix().get(1, 2), 1.0);
        assert!(social.specs().num_items.is_none());
    }

    #[test]
    fn specs_and_split_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "ratings.txt", "a x 1\na y 3\nb x 3\nc z 5\n");
        let dataset = DataDao::new(&path).read(&RatingsSetup::default()).unwrap();

        let specs = dataset.specs();
        assert_eq!(specs.num_ratings, 4);
        assert_eq!(specs.mean, 3.0);
        assert_eq!(specs.mode, 3.0);
        assert_eq!(specs.median, 3.0);
        assert_eq!(specs.user_mean, 4.0 / 3.0);
        assert!(specs.to_string().contains("Rate amount: 4"));

        let out = dir.path().join("copy.txt");
        dataset.write_matrix(dataset.rate_matrix(), &out).unwrap();
        let copy = DataDao::new(&out).read(&RatingsSetup::default()).unwrap();

        assert_eq!(copy.rate_matrix().size(), 4);
        for entry in copy.rate_matrix() {
            let user = dataset
                .user_ids()
                .inner(copy.user_ids().raw(entry.row).unwrap())
                .unwrap();
            let item = dataset
                .item_ids()
                .inner(copy.item_ids().raw(entry.column).unwrap())
                .unwrap();
            assert_eq!(dataset.rate_matrix().get(user, item), entry.value);
        }
    }

    #[test]
    fn scale_rounding() {
        let scale = RatingScale::from_ratings(vec![1.0, 2.0, 3.0, 4.0, 5.0, 3.0]);

        assert_eq!(scale.quantum(), 0.5);
        assert_eq!(scale.round(2.4), 2.0);
        assert_eq!(scale.round(2.5), 3.0);
        assert_eq!(scale.round(-1.0), 1.0);
        assert_eq!(scale.round(7.0), 5.0);
    }
}
