//! Dense factor matrices and vectors.
use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1};
use rand::distributions::{Distribution, Normal, Uniform};
use rand::Rng;

/// Row-major dense matrix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DenseMatrix {
    data: Array2<f64>,
}

impl DenseMatrix {
    /// A `num_rows` by `num_columns` matrix of zeros.
    pub fn zeros(num_rows: usize, num_columns: usize) -> Self {
        DenseMatrix {
            data: Array2::zeros((num_rows, num_columns)),
        }
    }

    /// Fill with independent Gaussian samples.
    ///
    /// Small values make the model easier to train; large ones call for a
    /// very small learning rate, especially with many factors.
    pub fn init_gaussian<R: Rng>(&mut self, mean: f64, std: f64, rng: &mut R) {
        let normal = Normal::new(mean, std);
        for value in self.data.iter_mut() {
            *value = normal.sample(rng);
        }
    }

    /// Fill with uniform samples from `[low, high)`.
    pub fn init_uniform<R: Rng>(&mut self, low: f64, high: f64, rng: &mut R) {
        let uniform = Uniform::new(low, high);
        for value in self.data.iter_mut() {
            *value = uniform.sample(rng);
        }
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.data.nrows()
    }

    /// Number of columns.
    pub fn num_columns(&self) -> usize {
        self.data.ncols()
    }

    /// Value at `(row, column)`.
    pub fn get(&self, row: usize, column: usize) -> f64 {
        self.data[[row, column]]
    }

    /// Overwrite the value at `(row, column)`.
    pub fn set(&mut self, row: usize, column: usize, value: f64) {
        self.data[[row, column]] = value;
    }

    /// Add `value` to the entry at `(row, column)`.
    pub fn add(&mut self, row: usize, column: usize, value: f64) {
        self.data[[row, column]] += value;
    }

    /// View of one row.
    pub fn row(&self, row: usize) -> ArrayView1<f64> {
        self.data.row(row)
    }

    /// Mutable view of one row.
    pub fn row_mut(&mut self, row: usize) -> ArrayViewMut1<f64> {
        self.data.row_mut(row)
    }

    /// Set every element of a row to `value`.
    pub fn set_row(&mut self, row: usize, value: f64) {
        self.data.row_mut(row).fill(value);
    }

    /// Euclidean norm of a row.
    pub fn row_norm(&self, row: usize) -> f64 {
        let row = self.data.row(row);
        row.dot(&row).sqrt()
    }

    /// Inner product of row `a_row` of `a` and row `b_row` of `b`.
    pub fn row_mult(a: &DenseMatrix, a_row: usize, b: &DenseMatrix, b_row: usize) -> f64 {
        debug_assert_eq!(a.num_columns(), b.num_columns());
        a.data.row(a_row).dot(&b.data.row(b_row))
    }

    /// Multiply every entry by `factor`.
    pub fn scale(&mut self, factor: f64) {
        self.data.mapv_inplace(|value| value * factor);
    }

    /// Frobenius norm.
    pub fn norm(&self) -> f64 {
        self.data.iter().map(|value| value * value).sum::<f64>().sqrt()
    }
}

/// Dense vector, used for user and item biases.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DenseVector {
    data: Array1<f64>,
}

impl DenseVector {
    /// A vector of `size` zeros.
    pub fn zeros(size: usize) -> Self {
        DenseVector {
            data: Array1::zeros(size),
        }
    }

    /// Fill with independent Gaussian samples.
    pub fn init_gaussian<R: Rng>(&mut self, mean: f64, std: f64, rng: &mut R) {
        let normal = Normal::new(mean, std);
        for value in self.data.iter_mut() {
            *value = normal.sample(rng);
        }
    }

    /// Fill with uniform samples from `[low, high)`.
    pub fn init_uniform<R: Rng>(&mut self, low: f64, high: f64, rng: &mut R) {
        let uniform = Uniform::new(low, high);
        for value in self.data.iter_mut() {
            *value = uniform.sample(rng);
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the vector has no entries.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Value at `idx`.
    pub fn get(&self, idx: usize) -> f64 {
        self.data[idx]
    }

    /// Overwrite the value at `idx`.
    pub fn set(&mut self, idx: usize, value: f64) {
        self.data[idx] = value;
    }

    /// Add `value` to the entry at `idx`.
    pub fn add(&mut self, idx: usize, value: f64) {
        self.data[idx] += value;
    }

    /// Inner product with `other`.
    pub fn inner(&self, other: &DenseVector) -> f64 {
        self.data.dot(&other.data)
    }

    /// Entries as a contiguous slice.
    pub fn as_slice(&self) -> &[f64] {
        self.data
            .as_slice()
            .expect("Owned one-dimensional arrays are contiguous.")
    }
}

#[cfg(test)]
mod tests {
    use data::seeded_rng;

    use super::*;

    #[test]
    fn gaussian_init_has_requested_moments() {
        let mut rng = seeded_rng(7, 0);
        let mut mat = DenseMatrix::zeros(200, 50);
        mat.init_gaussian(0.5, 0.1, &mut rng);

        let n = (mat.num_rows() * mat.num_columns()) as f64;
        let mean = (0..mat.num_rows())
            .map(|row| mat.row(row).sum())
            .sum::<f64>() / n;

        assert!((mean - 0.5).abs() < 0.01);
    }

    #[test]
    fn uniform_init_stays_in_range() {
        let mut rng = seeded_rng(7, 1);
        let mut vec = DenseVector::zeros(1000);
        vec.init_uniform(0.0, 0.01, &mut rng);

        assert!(vec.as_slice().iter().all(|&x| x >= 0.0 && x < 0.01));
    }

    #[test]
    fn row_operations() {
        let mut a = DenseMatrix::zeros(2, 3);
        let mut b = DenseMatrix::zeros(4, 3);

        for f in 0..3 {
            a.set(1, f, (f + 1) as f64);
            b.set(2, f, 2.0);
        }

        assert_eq!(DenseMatrix::row_mult(&a, 1, &b, 2), 12.0);
        assert_eq!(DenseMatrix::row_mult(&a, 0, &b, 2), 0.0);

        a.add(1, 0, 1.0);
        assert_eq!(a.get(1, 0), 2.0);

        a.set_row(1, 0.0);
        assert_eq!(a.row_norm(1), 0.0);

        b.scale(0.5);
        assert_eq!(b.row_norm(2), 3.0f64.sqrt());
    }
}
