//! Compressed sparse rating matrices.
//!
//! A [`SparseMatrix`] keeps its nonzero entries twice: once in compressed
//! row storage (CRS) for fast per-user traversal and once in compressed
//! column storage (CCS) for fast per-item traversal. The structure is fixed
//! at construction: values can be changed in place, but inserting a new
//! position requires building a new matrix.
//!
//! Zero means "unobserved". Slots whose value has been set to zero are kept
//! in the structure but are skipped by [`SparseMatrix::iter`], the row and
//! column views and the size counters.
use std;
use std::collections::HashMap;
use std::fmt;

/// Map from `(row, column)` to value used to build a matrix.
pub type Table = HashMap<(usize, usize), f64>;
/// Map from a column to the rows that have an entry in it.
pub type ColumnMap = HashMap<usize, Vec<usize>>;

/// Structural errors raised by sparse matrices.
#[derive(Debug, Fail)]
pub enum MatrixError {
    /// The matrix structure is fixed; only existing positions can be written.
    #[fail(display = "Entry ({}, {}) is not in the matrix structure.", row, column)]
    EntryNotInStructure {
        /// Row of the missing entry.
        row: usize,
        /// Column of the missing entry.
        column: usize,
    },
    /// An index lies outside the matrix dimensions.
    #[fail(
        display = "Entry ({}, {}) is outside a {}x{} matrix.",
        row, column, num_rows, num_columns
    )]
    IndexOutOfBounds {
        /// Offending row.
        row: usize,
        /// Offending column.
        column: usize,
        /// Number of rows of the matrix.
        num_rows: usize,
        /// Number of columns of the matrix.
        num_columns: usize,
    },
    /// The column map does not describe the same positions as the data table.
    #[fail(display = "Column map disagrees with the data table at column {}.", column)]
    InconsistentColumnMap {
        /// First column found to disagree.
        column: usize,
    },
}

/// A single nonzero entry of a sparse matrix.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatrixEntry {
    /// Row index.
    pub row: usize,
    /// Column index.
    pub column: usize,
    /// Stored value.
    pub value: f64,
}

/// Sparse vector with sorted indices.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    dimension: usize,
    indices: Vec<usize>,
    values: Vec<f64>,
}

impl SparseVector {
    /// An empty vector over `dimension` positions.
    pub fn new(dimension: usize) -> Self {
        SparseVector {
            dimension: dimension,
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Set the value at `idx`, inserting it if absent.
    pub fn set(&mut self, idx: usize, value: f64) {
        match self.indices.binary_search(&idx) {
            Ok(position) => self.values[position] = value,
            Err(position) => {
                self.indices.insert(position, idx);
                self.values.insert(position, value);
            }
        }
    }

    /// Add to the value at `idx`, inserting it if absent.
    pub fn add(&mut self, idx: usize, value: f64) {
        match self.indices.binary_search(&idx) {
            Ok(position) => self.values[position] += value,
            Err(position) => {
                self.indices.insert(position, idx);
                self.values.insert(position, value);
            }
        }
    }

    /// Value at `idx`, zero if absent.
    pub fn get(&self, idx: usize) -> f64 {
        match self.indices.binary_search(&idx) {
            Ok(position) => self.values[position],
            Err(_) => 0.0,
        }
    }

    /// Whether `idx` has a stored entry.
    pub fn contains(&self, idx: usize) -> bool {
        self.indices.binary_search(&idx).is_ok()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Length of the dense vector this sparse vector represents.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Sorted indices of the stored entries.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Stored values, in index order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// `(index, value)` pairs in index order.
    pub fn iter<'a>(&'a self) -> impl Iterator<Item = (usize, f64)> + 'a {
        self.indices.iter().cloned().zip(self.values.iter().cloned())
    }

    /// Sum of the stored values.
    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    /// Mean of the stored entries; zero for an empty vector.
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            0.0
        } else {
            self.sum() / self.values.len() as f64
        }
    }

    /// Inner product with another sparse vector.
    pub fn inner(&self, other: &SparseVector) -> f64 {
        let (mut i, mut j) = (0, 0);
        let mut result = 0.0;

        while i < self.indices.len() && j < other.indices.len() {
            if self.indices[i] == other.indices[j] {
                result += self.values[i] * other.values[j];
                i += 1;
                j += 1;
            } else if self.indices[i] < other.indices[j] {
                i += 1;
            } else {
                j += 1;
            }
        }

        result
    }
}

/// Sparse matrix with both compressed row and compressed column storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SparseMatrix {
    num_rows: usize,
    num_columns: usize,

    // CRS
    row_pointers: Vec<usize>,
    column_indices: Vec<usize>,
    row_data: Vec<f64>,

    // CCS
    column_pointers: Vec<usize>,
    row_indices: Vec<usize>,
    column_data: Vec<f64>,
}

impl SparseMatrix {
    /// Build a matrix from a data table and the precomputed rows of every column.
    pub fn new(
        num_rows: usize,
        num_columns: usize,
        table: &Table,
        column_map: &ColumnMap,
    ) -> Result<Self, MatrixError> {
        let mut rows: Vec<Vec<usize>> = vec![Vec::new(); num_rows];

        for &(row, column) in table.keys() {
            if row >= num_rows || column >= num_columns {
                return Err(MatrixError::IndexOutOfBounds {
                    row: row,
                    column: column,
                    num_rows: num_rows,
                    num_columns: num_columns,
                });
            }
            rows[row].push(column);
        }

        let (row_pointers, column_indices) = compress(rows);

        let mut columns: Vec<Vec<usize>> = vec![Vec::new(); num_columns];
        for (&column, column_rows) in column_map {
            if column >= num_columns {
                return Err(MatrixError::InconsistentColumnMap { column: column });
            }
            for &row in column_rows {
                if !table.contains_key(&(row, column)) {
                    return Err(MatrixError::InconsistentColumnMap { column: column });
                }
                columns[column].push(row);
            }
        }
        for column in columns.iter_mut() {
            column.sort();
            column.dedup();
        }

        let (column_pointers, row_indices) = compress(columns);

        if row_indices.len() != column_indices.len() {
            let column = (0..num_columns)
                .find(|&c| {
                    let in_map = column_pointers[c + 1] - column_pointers[c];
                    let in_table = table.keys().filter(|&&(_, col)| col == c).count();
                    in_map != in_table
                })
                .unwrap_or(0);
            return Err(MatrixError::InconsistentColumnMap { column: column });
        }

        let nnz = column_indices.len();
        let mut matrix = SparseMatrix {
            num_rows: num_rows,
            num_columns: num_columns,
            row_pointers: row_pointers,
            column_indices: column_indices,
            row_data: vec![0.0; nnz],
            column_pointers: column_pointers,
            row_indices: row_indices,
            column_data: vec![0.0; nnz],
        };

        for (&(row, column), &value) in table {
            matrix.set(row, column, value)?;
        }

        Ok(matrix)
    }

    /// Build a matrix from `(row, column, value)` triplets. Later duplicates win.
    pub fn from_triplets<I>(num_rows: usize, num_columns: usize, triplets: I) -> Result<Self, MatrixError>
    where
        I: IntoIterator<Item = (usize, usize, f64)>,
    {
        let mut table = Table::new();
        for (row, column, value) in triplets {
            table.insert((row, column), value);
        }

        let mut column_map = ColumnMap::new();
        for &(row, column) in table.keys() {
            column_map.entry(column).or_insert_with(Vec::new).push(row);
        }

        SparseMatrix::new(num_rows, num_columns, &table, &column_map)
    }

    /// An empty matrix with the given shape.
    pub fn empty(num_rows: usize, num_columns: usize) -> Self {
        SparseMatrix {
            num_rows: num_rows,
            num_columns: num_columns,
            row_pointers: vec![0; num_rows + 1],
            column_indices: Vec::new(),
            row_data: Vec::new(),
            column_pointers: vec![0; num_columns + 1],
            row_indices: Vec::new(),
            column_data: Vec::new(),
        }
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Number of columns.
    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    /// `(num_rows, num_columns)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.num_rows, self.num_columns)
    }

    /// Offsets of every row into the CRS arrays, with a final end offset.
    pub fn row_pointers(&self) -> &[usize] {
        &self.row_pointers
    }

    /// Column index of every CRS slot.
    pub fn column_indices(&self) -> &[usize] {
        &self.column_indices
    }

    /// Values in row-major (CRS) order, including zeroed slots.
    pub fn data(&self) -> &[f64] {
        &self.row_data
    }

    /// Number of nonzero entries.
    pub fn size(&self) -> usize {
        self.row_data.iter().filter(|&&value| value != 0.0).count()
    }

    /// Whether the matrix has no nonzero entries.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Mean of the nonzero entries; zero for an empty matrix.
    pub fn mean(&self) -> f64 {
        let (sum, count) = self.iter()
            .fold((0.0, 0), |(sum, count), entry| (sum + entry.value, count + 1));

        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    fn crs_index(&self, row: usize, column: usize) -> Option<usize> {
        if row >= self.num_rows {
            return None;
        }
        let start = self.row_pointers[row];
        let stop = self.row_pointers[row + 1];

        self.column_indices[start..stop]
            .binary_search(&column)
            .ok()
            .map(|offset| start + offset)
    }

    fn ccs_index(&self, row: usize, column: usize) -> Option<usize> {
        if column >= self.num_columns {
            return None;
        }
        let start = self.column_pointers[column];
        let stop = self.column_pointers[column + 1];

        self.row_indices[start..stop]
            .binary_search(&row)
            .ok()
            .map(|offset| start + offset)
    }

    fn indices_of(&self, row: usize, column: usize) -> Result<(usize, usize), MatrixError> {
        match (self.crs_index(row, column), self.ccs_index(row, column)) {
            (Some(crs), Some(ccs)) => Ok((crs, ccs)),
            _ => Err(MatrixError::EntryNotInStructure {
                row: row,
                column: column,
            }),
        }
    }

    /// Value at `(row, column)`, or zero if the position is not stored.
    pub fn get(&self, row: usize, column: usize) -> f64 {
        self.crs_index(row, column)
            .map_or(0.0, |idx| self.row_data[idx])
    }

    /// Whether `(row, column)` is part of the structure, whatever its value.
    pub fn contains(&self, row: usize, column: usize) -> bool {
        self.crs_index(row, column).is_some()
    }

    /// Overwrite an existing position in both storage layouts.
    pub fn set(&mut self, row: usize, column: usize, value: f64) -> Result<(), MatrixError> {
        let (crs, ccs) = self.indices_of(row, column)?;

        self.row_data[crs] = value;
        self.column_data[ccs] = value;

        Ok(())
    }

    /// Add to an existing position in both storage layouts.
    pub fn add(&mut self, row: usize, column: usize, value: f64) -> Result<(), MatrixError> {
        let (crs, ccs) = self.indices_of(row, column)?;

        self.row_data[crs] += value;
        self.column_data[ccs] += value;

        Ok(())
    }

    /// Nonzero entries of a row.
    pub fn row(&self, row: usize) -> SparseVector {
        self.row_filtered(row, None)
    }

    /// Nonzero entries of a row, leaving out column `except`.
    pub fn row_except(&self, row: usize, except: usize) -> SparseVector {
        self.row_filtered(row, Some(except))
    }

    fn row_filtered(&self, row: usize, except: Option<usize>) -> SparseVector {
        let mut vector = SparseVector::new(self.num_columns);

        for idx in self.row_pointers[row]..self.row_pointers[row + 1] {
            let column = self.column_indices[idx];
            let value = self.row_data[idx];

            if value != 0.0 && Some(column) != except {
                vector.indices.push(column);
                vector.values.push(value);
            }
        }

        vector
    }

    /// Nonzero entries of a column, read from the column storage.
    pub fn col(&self, column: usize) -> SparseVector {
        let mut vector = SparseVector::new(self.num_rows);

        for idx in self.column_pointers[column]..self.column_pointers[column + 1] {
            let value = self.column_data[idx];

            if value != 0.0 {
                vector.indices.push(self.row_indices[idx]);
                vector.values.push(value);
            }
        }

        vector
    }

    /// Number of nonzero entries in a row.
    pub fn row_size(&self, row: usize) -> usize {
        self.row_data[self.row_pointers[row]..self.row_pointers[row + 1]]
            .iter()
            .filter(|&&value| value != 0.0)
            .count()
    }

    /// Number of nonzero entries in a column.
    pub fn col_size(&self, column: usize) -> usize {
        self.column_data[self.column_pointers[column]..self.column_pointers[column + 1]]
            .iter()
            .filter(|&&value| value != 0.0)
            .count()
    }

    /// Iterate over the nonzero entries in row-major order.
    pub fn iter(&self) -> Entries {
        Entries {
            matrix: self,
            row: 0,
            cursor: 0,
        }
    }

    /// Zero every entry for which `keep` returns false.
    ///
    /// Storage is not compacted: the zeroed positions stay in the
    /// structure and can be written again with `set`.
    pub fn retain<F: FnMut(&MatrixEntry) -> bool>(&mut self, mut keep: F) {
        let dropped: Vec<MatrixEntry> = self.iter().filter(|entry| !keep(entry)).collect();

        for entry in dropped {
            if let Ok((crs, ccs)) = self.indices_of(entry.row, entry.column) {
                self.row_data[crs] = 0.0;
                self.column_data[ccs] = 0.0;
            }
        }
    }
}

fn compress(lists: Vec<Vec<usize>>) -> (Vec<usize>, Vec<usize>) {
    let mut pointers = vec![0; lists.len() + 1];
    let mut indices = Vec::with_capacity(lists.iter().map(|list| list.len()).sum());

    for (idx, mut list) in lists.into_iter().enumerate() {
        list.sort();
        pointers[idx + 1] = pointers[idx] + list.len();
        indices.extend(list);
    }

    (pointers, indices)
}

/// Row-major iterator over the nonzero entries of a [`SparseMatrix`].
pub struct Entries<'a> {
    matrix: &'a SparseMatrix,
    row: usize,
    cursor: usize,
}

impl<'a> Iterator for Entries<'a> {
    type Item = MatrixEntry;

    fn next(&mut self) -> Option<Self::Item> {
        while self.cursor < self.matrix.row_data.len() {
            while self.cursor >= self.matrix.row_pointers[self.row + 1] {
                self.row += 1;
            }

            let cursor = self.cursor;
            self.cursor += 1;

            let value = self.matrix.row_data[cursor];
            if value != 0.0 {
                return Some(MatrixEntry {
                    row: self.row,
                    column: self.matrix.column_indices[cursor],
                    value: value,
                });
            }
        }

        None
    }
}

impl<'a> IntoIterator for &'a SparseMatrix {
    type Item = MatrixEntry;
    type IntoIter = Entries<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for SparseMatrix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}\t{}\t{}", self.num_rows, self.num_columns, self.size())?;

        for entry in self.iter() {
            writeln!(f, "{}\t{}\t{}", entry.row + 1, entry.column + 1, entry.value)?;
        }

        Ok(())
    }
}

impl std::ops::Index<(usize, usize)> for SparseMatrix {
    type Output = f64;

    fn index(&self, (row, column): (usize, usize)) -> &f64 {
        const ZERO: f64 = 0.0;
        match self.crs_index(row, column) {
            Some(idx) => &self.row_data[idx],
            None => &ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // http://netlib.org/linalg/html_templates/node91.html
    pub fn netlib_matrix() -> SparseMatrix {
        let triplets = vec![
            (0, 0, 10.0),
            (0, 4, -2.0),
            (1, 0, 3.0),
            (1, 1, 9.0),
            (1, 5, 3.0),
            (2, 1, 7.0),
            (2, 2, 8.0),
            (2, 3, 7.0),
            (3, 0, 3.0),
            (3, 2, 8.0),
            (3, 3, 7.0),
            (3, 4, 5.0),
            (4, 1, 8.0),
            (4, 3, 9.0),
            (4, 4, 9.0),
            (4, 5, 13.0),
            (5, 1, 4.0),
            (5, 4, 2.0),
            (5, 5, -1.0),
        ];

        SparseMatrix::from_triplets(6, 6, triplets).unwrap()
    }

    #[test]
    fn netlib_rows_and_columns() {
        let mat = netlib_matrix();

        assert_eq!(mat.size(), 19);
        assert_eq!(mat.row_pointers(), &[0, 2, 5, 8, 12, 16, 19]);
        assert_eq!(&mat.column_indices()[..5], &[0, 4, 0, 1, 5]);

        let row = mat.row(1);
        assert_eq!(row.indices(), &[0, 1, 5]);
        assert_eq!(row.values(), &[3.0, 9.0, 3.0]);

        let col = mat.col(1);
        assert_eq!(col.indices(), &[1, 2, 4, 5]);
        assert_eq!(col.values(), &[9.0, 7.0, 8.0, 4.0]);

        assert_eq!(mat.row_size(3), 4);
        assert_eq!(mat.col_size(4), 4);
        assert_eq!(mat.get(2, 0), 0.0);
        assert_eq!(mat[(4, 5)], 13.0);
    }

    #[test]
    fn row_and_column_storage_agree() {
        let mut mat = netlib_matrix();
        mat.add(3, 2, 1.5).unwrap();
        mat.set(5, 5, 6.0).unwrap();

        for u in 0..mat.num_rows() {
            for i in 0..mat.num_columns() {
                assert_eq!(mat.get(u, i), mat.col(i).get(u));
                assert_eq!(mat.row(u).get(i), mat.col(i).get(u));
            }
        }

        assert_eq!(mat.get(3, 2), 9.5);
        assert_eq!(mat.col(2).get(3), 9.5);
        assert_eq!(mat.col(5).get(5), 6.0);
    }

    #[test]
    fn structure_is_fixed() {
        let mut mat = netlib_matrix();

        match mat.set(0, 1, 1.0) {
            Err(MatrixError::EntryNotInStructure { row: 0, column: 1 }) => {}
            other => panic!("Unexpected result {:?}", other),
        }
        assert!(mat.add(5, 0, 1.0).is_err());
        assert_eq!(mat.size(), 19);
    }

    #[test]
    fn iteration_covers_every_entry() {
        let triplets = vec![(0, 2, 1.0), (3, 0, 2.0), (3, 4, 3.0), (7, 1, 4.0)];
        let mat = SparseMatrix::from_triplets(8, 5, triplets.clone()).unwrap();

        let entries: Vec<_> = mat.iter()
            .map(|entry| (entry.row, entry.column, entry.value))
            .collect();

        assert_eq!(entries, triplets);
        assert_eq!(entries.len(), mat.size());
    }

    #[test]
    fn retain_zeroes_without_compacting() {
        let mut mat = netlib_matrix();
        mat.retain(|entry| entry.value > 5.0);

        assert_eq!(mat.size(), 11);
        assert_eq!(mat.iter().count(), 11);
        assert_eq!(mat.row(1).indices(), &[1]);
        assert_eq!(mat.col(0).indices(), &[0]);
        assert!(mat.contains(1, 0));

        // Zeroed slots can be written again.
        mat.set(1, 0, 2.0).unwrap();
        assert_eq!(mat.col(0).get(1), 2.0);
        assert_eq!(mat.row_except(1, 1).indices(), &[0]);
    }

    #[test]
    fn inconsistent_column_map_is_rejected() {
        let mut table = Table::new();
        table.insert((0, 0), 1.0);
        table.insert((1, 1), 2.0);

        let mut column_map = ColumnMap::new();
        column_map.insert(0, vec![0]);

        assert!(SparseMatrix::new(2, 2, &table, &column_map).is_err());

        column_map.insert(1, vec![0]);
        assert!(SparseMatrix::new(2, 2, &table, &column_map).is_err());

        column_map.insert(1, vec![1]);
        assert!(SparseMatrix::new(2, 2, &table, &column_map).is_ok());
    }

    #[test]
    fn out_of_range_triplets_are_rejected() {
        assert!(SparseMatrix::from_triplets(2, 2, vec![(2, 0, 1.0)]).is_err());
    }

    #[test]
    fn display_uses_one_based_triplets() {
        let mat = SparseMatrix::from_triplets(2, 3, vec![(1, 2, 4.0)]).unwrap();
        assert_eq!(format!("{}", mat), "2\t3\t1\n2\t3\t4\n");
    }

    #[test]
    fn sparse_vector_operations() {
        let mut a = SparseVector::new(10);
        a.set(5, 1.0);
        a.set(1, 2.0);
        a.add(5, 1.0);
        a.add(7, 3.0);

        assert_eq!(a.indices(), &[1, 5, 7]);
        assert_eq!(a.get(5), 2.0);
        assert_eq!(a.sum(), 7.0);

        let mut b = SparseVector::new(10);
        b.set(5, 4.0);
        b.set(9, 1.0);

        assert_eq!(a.inner(&b), 8.0);
        assert!(!b.contains(1));
    }
}
