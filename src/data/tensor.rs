//! Sparse N-dimensional tensors of ratings under context.
//!
//! Entries are stored as parallel key columns, one per dimension, plus a
//! value column. Lookups go through per-dimension hash indices from key to
//! entry positions. An index is built the first time a lookup needs it and
//! is kept in sync by every later structural change.
use std::cell::RefCell;
use std::collections::HashMap;

use rand::Rng;

use super::sparse::{MatrixError, SparseMatrix, SparseVector};

/// Errors raised by tensor operations.
#[derive(Debug, Fail)]
pub enum TensorError {
    /// Tensors need at least three dimensions.
    #[fail(display = "A tensor needs at least three dimensions, got {}.", _0)]
    TooFewDimensions(usize),
    /// Wrong number of keys for the operation.
    #[fail(display = "Expected {} keys, got {}.", expected, actual)]
    ArityMismatch {
        /// Keys the operation needs.
        expected: usize,
        /// Keys supplied.
        actual: usize,
    },
    /// A key does not fit the size of its dimension.
    #[fail(
        display = "Key {} is out of range for dimension {} of size {}.",
        key, dimension, size
    )]
    KeyOutOfRange {
        /// Offending key.
        key: usize,
        /// Dimension the key was given for.
        dimension: usize,
        /// Size of that dimension.
        size: usize,
    },
    /// Two tensors do not have the same shape.
    #[fail(display = "Tensor dimensions {:?} and {:?} do not match.", _0, _1)]
    DimensionMismatch(Vec<usize>, Vec<usize>),
    /// The requested dimensions cannot be projected onto.
    #[fail(display = "Invalid projection onto dimensions {:?}.", _0)]
    InvalidProjection(Vec<usize>),
    /// Building a projected matrix failed.
    #[fail(display = "Cannot build projected matrix: {}", _0)]
    Matrix(#[cause] MatrixError),
}

impl From<MatrixError> for TensorError {
    fn from(err: MatrixError) -> Self {
        TensorError::Matrix(err)
    }
}

/// One entry of a tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct TensorEntry {
    /// One key per dimension.
    pub keys: Vec<usize>,
    /// Stored value.
    pub value: f64,
}

type KeyIndex = HashMap<usize, Vec<usize>>;

/// Sparse tensor of three or more dimensions, stored as one key column per
/// dimension plus a value column. Key indices for fast slicing are built
/// per dimension on demand.
#[derive(Clone, Debug)]
pub struct SparseTensor {
    dimensions: Vec<usize>,
    keys: Vec<Vec<usize>>,
    values: Vec<f64>,
    indices: RefCell<Vec<Option<KeyIndex>>>,
    user_dimension: usize,
    item_dimension: usize,
}

impl SparseTensor {
    /// Create an empty tensor. Dimension 0 holds users and dimension 1 items.
    pub fn new(dimensions: Vec<usize>) -> Result<Self, TensorError> {
        let nd = dimensions.len();
        if nd < 3 {
            return Err(TensorError::TooFewDimensions(nd));
        }

        Ok(SparseTensor {
            dimensions: dimensions,
            keys: vec![Vec::new(); nd],
            values: Vec::new(),
            indices: RefCell::new(vec![None; nd]),
            user_dimension: 0,
            item_dimension: 1,
        })
    }

    /// Mark which dimensions hold users and items.
    pub fn with_user_item_dimensions(
        mut self,
        user_dimension: usize,
        item_dimension: usize,
    ) -> Result<Self, TensorError> {
        let nd = self.num_dimensions();
        if user_dimension >= nd || item_dimension >= nd || user_dimension == item_dimension {
            return Err(TensorError::InvalidProjection(vec![user_dimension, item_dimension]));
        }
        self.user_dimension = user_dimension;
        self.item_dimension = item_dimension;

        Ok(self)
    }

    /// Number of dimensions.
    pub fn num_dimensions(&self) -> usize {
        self.dimensions.len()
    }

    /// Size of every dimension.
    pub fn dimensions(&self) -> &[usize] {
        &self.dimensions
    }

    /// Dimension holding users.
    pub fn user_dimension(&self) -> usize {
        self.user_dimension
    }

    /// Dimension holding items.
    pub fn item_dimension(&self) -> usize {
        self.item_dimension
    }

    /// Number of stored entries.
    pub fn size(&self) -> usize {
        self.values.len()
    }

    /// Whether no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Key of dimension `d` at an entry position.
    pub fn key(&self, d: usize, position: usize) -> usize {
        self.keys[d][position]
    }

    /// Value at an entry position.
    pub fn value(&self, position: usize) -> f64 {
        self.values[position]
    }

    fn keys_at(&self, position: usize) -> Vec<usize> {
        self.keys.iter().map(|column| column[position]).collect()
    }

    /// Entries in insertion order.
    pub fn iter<'a>(&'a self) -> impl Iterator<Item = TensorEntry> + 'a {
        (0..self.size()).map(move |position| TensorEntry {
            keys: self.keys_at(position),
            value: self.values[position],
        })
    }

    fn check_keys(&self, keys: &[usize]) -> Result<(), TensorError> {
        if keys.len() != self.num_dimensions() {
            return Err(TensorError::ArityMismatch {
                expected: self.num_dimensions(),
                actual: keys.len(),
            });
        }

        for (d, (&key, &size)) in keys.iter().zip(self.dimensions.iter()).enumerate() {
            if key >= size {
                return Err(TensorError::KeyOutOfRange {
                    key: key,
                    dimension: d,
                    size: size,
                });
            }
        }

        Ok(())
    }

    /// (Re)build the key index of dimension `d`.
    pub fn build_index(&self, d: usize) {
        let mut index = KeyIndex::new();
        for (position, &key) in self.keys[d].iter().enumerate() {
            index.entry(key).or_insert_with(Vec::new).push(position);
        }

        self.indices.borrow_mut()[d] = Some(index);
    }

    /// Build the key index of every dimension.
    pub fn build_indices(&self) {
        for d in 0..self.num_dimensions() {
            self.build_index(d);
        }
    }

    /// Dimensions whose key index is currently built.
    pub fn indexed_dimensions(&self) -> Vec<usize> {
        self.indices
            .borrow()
            .iter()
            .enumerate()
            .filter(|&(_, index)| index.is_some())
            .map(|(d, _)| d)
            .collect()
    }

    /// Pick an indexed dimension outside `excluded`, building one if needed.
    fn lookup_dimension(&self, excluded: &[usize]) -> usize {
        let indexed = self.indexed_dimensions();

        if let Some(&d) = indexed.iter().find(|d| !excluded.contains(d)) {
            return d;
        }

        let d = (0..self.num_dimensions())
            .find(|d| !excluded.contains(d))
            .unwrap_or(0);
        self.build_index(d);

        d
    }

    fn candidates(&self, d: usize, key: usize) -> Vec<usize> {
        self.indices.borrow()[d]
            .as_ref()
            .and_then(|index| index.get(&key).cloned())
            .unwrap_or_default()
    }

    /// Positions of the entries whose key in dimension `d` equals `key`.
    pub fn key_positions(&self, d: usize, key: usize) -> Vec<usize> {
        if self.indices.borrow()[d].is_none() {
            self.build_index(d);
        }
        self.candidates(d, key)
    }

    /// Keys of dimension `td` that co-occur with `key` in dimension `sd`.
    pub fn keys_related(&self, sd: usize, key: usize, td: usize) -> Vec<usize> {
        self.key_positions(sd, key)
            .into_iter()
            .map(|position| self.keys[td][position])
            .collect()
    }

    fn find_position(&self, keys: &[usize]) -> Option<usize> {
        let d = self.lookup_dimension(&[]);

        self.candidates(d, keys[d]).into_iter().find(|&position| {
            self.keys
                .iter()
                .zip(keys.iter())
                .all(|(column, &key)| column[position] == key)
        })
    }

    fn insert(&mut self, value: f64, keys: &[usize]) {
        let position = self.values.len();

        for (column, &key) in self.keys.iter_mut().zip(keys.iter()) {
            column.push(key);
        }
        self.values.push(value);

        for (index, &key) in self.indices.get_mut().iter_mut().zip(keys.iter()) {
            if let Some(ref mut index) = *index {
                index.entry(key).or_insert_with(Vec::new).push(position);
            }
        }
    }

    /// Set the value at `keys`, inserting the entry if absent.
    pub fn set(&mut self, value: f64, keys: &[usize]) -> Result<(), TensorError> {
        self.check_keys(keys)?;

        match self.find_position(keys) {
            Some(position) => self.values[position] = value,
            None => self.insert(value, keys),
        }

        Ok(())
    }

    /// Add to the value at `keys`, inserting the entry if absent.
    pub fn add(&mut self, value: f64, keys: &[usize]) -> Result<(), TensorError> {
        self.check_keys(keys)?;

        match self.find_position(keys) {
            Some(position) => self.values[position] += value,
            None => self.insert(value, keys),
        }

        Ok(())
    }

    /// Value at `keys`, zero if there is no such entry.
    pub fn get(&self, keys: &[usize]) -> Result<f64, TensorError> {
        self.check_keys(keys)?;

        Ok(self.find_position(keys)
            .map_or(0.0, |position| self.values[position]))
    }

    /// Whether an entry is stored at `keys`.
    pub fn contains(&self, keys: &[usize]) -> Result<bool, TensorError> {
        self.check_keys(keys)?;

        Ok(self.find_position(keys).is_some())
    }

    /// Remove the entry at `keys`. Returns whether an entry was removed.
    pub fn remove(&mut self, keys: &[usize]) -> Result<bool, TensorError> {
        self.check_keys(keys)?;

        let position = match self.find_position(keys) {
            Some(position) => position,
            None => return Ok(false),
        };
        let last = self.values.len() - 1;
        let moved_keys = self.keys_at(last);

        for column in self.keys.iter_mut() {
            column.swap_remove(position);
        }
        self.values.swap_remove(position);

        for (d, index) in self.indices.get_mut().iter_mut().enumerate() {
            if let Some(ref mut index) = *index {
                let now_empty = match index.get_mut(&keys[d]) {
                    Some(positions) => {
                        positions.retain(|&p| p != position);
                        positions.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    index.remove(&keys[d]);
                }

                if position != last {
                    if let Some(positions) = index.get_mut(&moved_keys[d]) {
                        for p in positions.iter_mut() {
                            if *p == last {
                                *p = position;
                            }
                        }
                    }
                }
            }
        }

        Ok(true)
    }

    /// Positions of the entries matching `fixed` (dimension, key) pairs.
    fn matching_positions(&self, fixed: &[(usize, usize)], varying: &[usize]) -> Vec<usize> {
        let d = self.lookup_dimension(varying);
        let key = fixed
            .iter()
            .find(|&&(dim, _)| dim == d)
            .map(|&(_, key)| key);

        let key = match key {
            Some(key) => key,
            None => return Vec::new(),
        };

        self.candidates(d, key)
            .into_iter()
            .filter(|&position| {
                fixed
                    .iter()
                    .all(|&(dim, key)| self.keys[dim][position] == key)
            })
            .collect()
    }

    fn fixed_keys(&self, varying: &[usize], other_keys: &[usize]) -> Result<Vec<(usize, usize)>, TensorError> {
        let nd = self.num_dimensions();
        if varying.iter().any(|&d| d >= nd) {
            return Err(TensorError::InvalidProjection(varying.to_vec()));
        }

        let fixed_dims: Vec<usize> = (0..nd).filter(|d| !varying.contains(d)).collect();
        if other_keys.len() != fixed_dims.len() {
            return Err(TensorError::ArityMismatch {
                expected: fixed_dims.len(),
                actual: other_keys.len(),
            });
        }

        Ok(fixed_dims.into_iter().zip(other_keys.iter().cloned()).collect())
    }

    /// The fiber along `dim` with every other dimension fixed.
    ///
    /// `other_keys` gives the keys of the remaining dimensions in order.
    pub fn fiber(&self, dim: usize, other_keys: &[usize]) -> Result<SparseVector, TensorError> {
        let fixed = self.fixed_keys(&[dim], other_keys)?;
        let mut fiber = SparseVector::new(self.dimensions[dim]);

        for position in self.matching_positions(&fixed, &[dim]) {
            fiber.set(self.keys[dim][position], self.values[position]);
        }

        Ok(fiber)
    }

    /// The slice over `(row_dim, col_dim)` with every other dimension fixed.
    pub fn slice(
        &self,
        row_dim: usize,
        col_dim: usize,
        other_keys: &[usize],
    ) -> Result<SparseMatrix, TensorError> {
        if row_dim == col_dim {
            return Err(TensorError::InvalidProjection(vec![row_dim, col_dim]));
        }
        let fixed = self.fixed_keys(&[row_dim, col_dim], other_keys)?;

        let triplets: Vec<_> = self.matching_positions(&fixed, &[row_dim, col_dim])
            .into_iter()
            .map(|position| {
                (
                    self.keys[row_dim][position],
                    self.keys[col_dim][position],
                    self.values[position],
                )
            })
            .collect();

        Ok(SparseMatrix::from_triplets(
            self.dimensions[row_dim],
            self.dimensions[col_dim],
            triplets,
        )?)
    }

    /// Mode-`n` matricization.
    ///
    /// Rows are indexed by dimension `n`; the remaining dimensions, in
    /// increasing order, form the columns with the earliest dimension
    /// varying fastest.
    pub fn unfold(&self, n: usize) -> Result<SparseMatrix, TensorError> {
        let nd = self.num_dimensions();
        if n >= nd {
            return Err(TensorError::InvalidProjection(vec![n]));
        }

        let mut place_values = vec![0; nd];
        let mut num_columns = 1;
        for d in (0..nd).filter(|&d| d != n) {
            place_values[d] = num_columns;
            num_columns *= self.dimensions[d];
        }

        let triplets: Vec<_> = (0..self.size())
            .map(|position| {
                let column = (0..nd)
                    .filter(|&d| d != n)
                    .map(|d| self.keys[d][position] * place_values[d])
                    .sum();
                (self.keys[n][position], column, self.values[position])
            })
            .collect();

        Ok(SparseMatrix::from_triplets(self.dimensions[n], num_columns, triplets)?)
    }

    /// Project onto the (user, item) dimensions.
    ///
    /// When several contexts share a (user, item) pair the entry stored
    /// last wins.
    pub fn rate_matrix(&self) -> Result<SparseMatrix, TensorError> {
        let (u, i) = (self.user_dimension, self.item_dimension);
        let triplets = (0..self.size()).map(|p| (self.keys[u][p], self.keys[i][p], self.values[p]));

        Ok(SparseMatrix::from_triplets(
            self.dimensions[u],
            self.dimensions[i],
            triplets,
        )?)
    }

    /// Randomly permute the entry order, rebuilding any built indices.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        let mut permutation: Vec<usize> = (0..self.size()).collect();
        rng.shuffle(&mut permutation);

        for column in self.keys.iter_mut() {
            *column = permutation.iter().map(|&p| column[p]).collect();
        }
        self.values = permutation.iter().map(|&p| self.values[p]).collect();

        for d in self.indexed_dimensions() {
            self.build_index(d);
        }
    }

    /// Inner product with a tensor of the same shape.
    pub fn inner(&self, other: &SparseTensor) -> Result<f64, TensorError> {
        if self.dimensions != other.dimensions {
            return Err(TensorError::DimensionMismatch(
                self.dimensions.clone(),
                other.dimensions.clone(),
            ));
        }

        let mut result = 0.0;
        for entry in self.iter() {
            result += entry.value * other.get(&entry.keys)?;
        }

        Ok(result)
    }

    /// Frobenius norm.
    pub fn norm(&self) -> f64 {
        self.values.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    /// Whether all dimensions have the same size.
    pub fn is_cubical(&self) -> bool {
        self.dimensions.windows(2).all(|pair| pair[0] == pair[1])
    }

    /// Whether every nonzero entry has all of its keys equal.
    pub fn is_diagonal(&self) -> bool {
        (0..self.size())
            .filter(|&p| self.values[p] != 0.0)
            .all(|p| self.keys.iter().all(|column| column[p] == self.keys[0][p]))
    }
}

#[cfg(test)]
mod tests {
    use data::seeded_rng;

    use super::*;

    fn example_tensor() -> SparseTensor {
        let mut tensor = SparseTensor::new(vec![4, 4, 6]).unwrap();

        tensor.set(1.0, &[1, 0, 0]).unwrap();
        tensor.set(2.0, &[1, 1, 0]).unwrap();
        tensor.set(3.0, &[2, 0, 0]).unwrap();
        tensor.set(4.0, &[1, 3, 0]).unwrap();
        tensor.set(5.0, &[1, 0, 5]).unwrap();
        tensor.set(6.0, &[3, 1, 4]).unwrap();

        tensor
    }

    #[test]
    fn lookups_and_upserts() {
        let mut tensor = example_tensor();

        assert_eq!(tensor.get(&[1, 0, 0]).unwrap(), 1.0);
        assert_eq!(tensor.get(&[1, 2, 0]).unwrap(), 0.0);
        assert_eq!(tensor.get(&[3, 1, 4]).unwrap(), 6.0);
        assert_eq!(tensor.size(), 6);

        tensor.set(1.5, &[1, 0, 0]).unwrap();
        assert_eq!(tensor.get(&[1, 0, 0]).unwrap(), 1.5);
        assert_eq!(tensor.size(), 6);

        tensor.add(0.25, &[1, 0, 0]).unwrap();
        assert_eq!(tensor.get(&[1, 0, 0]).unwrap(), 1.75);

        tensor.add(2.0, &[0, 0, 0]).unwrap();
        assert_eq!(tensor.size(), 7);
        assert!(tensor.contains(&[0, 0, 0]).unwrap());
    }

    #[test]
    fn bad_keys_are_rejected() {
        let mut tensor = example_tensor();

        assert!(tensor.get(&[1, 0]).is_err());
        assert!(tensor.set(1.0, &[4, 0, 0]).is_err());
        assert!(SparseTensor::new(vec![2, 2]).is_err());
    }

    #[test]
    fn indices_follow_mutations() {
        let mut tensor = example_tensor();
        tensor.build_indices();

        assert_eq!(tensor.key_positions(0, 1).len(), 4);
        assert!(tensor.remove(&[1, 1, 0]).unwrap());
        assert!(!tensor.remove(&[1, 1, 0]).unwrap());

        assert_eq!(tensor.size(), 5);
        assert_eq!(tensor.key_positions(0, 1).len(), 3);
        assert_eq!(tensor.get(&[3, 1, 4]).unwrap(), 6.0);
        assert_eq!(tensor.get(&[1, 1, 0]).unwrap(), 0.0);

        let mut related = tensor.keys_related(0, 1, 1);
        related.sort();
        assert_eq!(related, vec![0, 0, 3]);

        // Every built index still matches a fresh rebuild.
        for d in tensor.indexed_dimensions() {
            for key in 0..tensor.dimensions()[d] {
                let mut positions = tensor.key_positions(d, key);
                positions.sort();
                let expected: Vec<usize> = (0..tensor.size())
                    .filter(|&p| tensor.key(d, p) == key)
                    .collect();
                assert_eq!(positions, expected);
            }
        }
    }

    #[test]
    fn fibers_and_slices() {
        let tensor = example_tensor();

        let fiber = tensor.fiber(1, &[1, 0]).unwrap();
        assert_eq!(fiber.indices(), &[0, 1, 3]);
        assert_eq!(fiber.values(), &[1.0, 2.0, 4.0]);

        let slice = tensor.slice(0, 1, &[0]).unwrap();
        assert_eq!(slice.shape(), (4, 4));
        assert_eq!(slice.size(), 4);
        assert_eq!(slice.get(2, 0), 3.0);
        assert_eq!(slice.get(1, 3), 4.0);

        assert!(tensor.fiber(1, &[1]).is_err());
    }

    #[test]
    fn mode_n_unfolding() {
        let mut tensor = SparseTensor::new(vec![2, 3, 4]).unwrap();
        tensor.set(1.0, &[1, 2, 3]).unwrap();
        tensor.set(2.0, &[0, 1, 2]).unwrap();

        let unfolded = tensor.unfold(1).unwrap();
        assert_eq!(unfolded.shape(), (3, 8));
        assert_eq!(unfolded.get(2, 1 + 2 * 3), 1.0);
        assert_eq!(unfolded.get(1, 2 * 2), 2.0);

        let unfolded = tensor.unfold(0).unwrap();
        assert_eq!(unfolded.shape(), (2, 12));
        assert_eq!(unfolded.get(1, 2 + 3 * 3), 1.0);
    }

    #[test]
    fn rate_matrix_projection() {
        let mut tensor = SparseTensor::new(vec![3, 4, 2])
            .unwrap()
            .with_user_item_dimensions(0, 1)
            .unwrap();
        tensor.set(4.0, &[0, 1, 0]).unwrap();
        tensor.set(2.0, &[2, 3, 1]).unwrap();
        tensor.set(5.0, &[1, 1, 1]).unwrap();

        let matrix = tensor.rate_matrix().unwrap();

        assert_eq!(matrix.shape(), (3, 4));
        for entry in tensor.iter() {
            assert_eq!(matrix.get(entry.keys[0], entry.keys[1]), entry.value);
        }
    }

    #[test]
    fn shuffle_inner_and_norm() {
        let mut tensor = example_tensor();
        let copy = tensor.clone();
        tensor.build_index(2);
        tensor.shuffle(&mut seeded_rng(3, 0));

        for entry in copy.iter() {
            assert_eq!(tensor.get(&entry.keys).unwrap(), entry.value);
        }

        let squared: f64 = (1..7).map(|x| (x * x) as f64).sum();
        assert!((tensor.inner(&copy).unwrap() - squared).abs() < 1e-12);
        assert!((tensor.norm() - squared.sqrt()).abs() < 1e-12);

        let other = SparseTensor::new(vec![4, 4, 5]).unwrap();
        assert!(tensor.inner(&other).is_err());
    }

    #[test]
    fn shape_predicates() {
        let mut tensor = SparseTensor::new(vec![3, 3, 3]).unwrap();
        tensor.set(1.0, &[0, 0, 0]).unwrap();
        tensor.set(2.0, &[2, 2, 2]).unwrap();

        assert!(tensor.is_cubical());
        assert!(tensor.is_diagonal());

        tensor.set(1.0, &[0, 1, 2]).unwrap();
        assert!(!tensor.is_diagonal());
        assert!(!example_tensor().is_cubical());
    }
}
