use faer::sparse::{SparseColMat, Triplet};
use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1, Axis};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatrixError {
    #[error("Failed to assemble sparse design matrix from triplets: {0}")]
    SparseConstruction(String),
    #[error("Row index {index} is out of bounds for a design matrix with {nrows} rows.")]
    RowOutOfBounds { index: usize, nrows: usize },
}

/// Unified design matrix representation for dense and sparse workflows.
///
/// Every algorithm in the crate talks to the design through the column
/// primitives below; the storage `match` lives here and nowhere else.
#[derive(Clone)]
pub enum DesignMatrix {
    Dense(Array2<f64>),
    Sparse(SparseColMat<usize, f64>),
}

impl From<Array2<f64>> for DesignMatrix {
    fn from(matrix: Array2<f64>) -> Self {
        Self::Dense(matrix)
    }
}

impl From<SparseColMat<usize, f64>> for DesignMatrix {
    fn from(matrix: SparseColMat<usize, f64>) -> Self {
        Self::Sparse(matrix)
    }
}

impl DesignMatrix {
    /// Builds a compressed sparse column design from `(row, col, value)` entries.
    /// Duplicate entries are summed.
    pub fn sparse_from_triplets(
        nrows: usize,
        ncols: usize,
        entries: &[(usize, usize, f64)],
    ) -> Result<Self, MatrixError> {
        let triplets: Vec<Triplet<usize, usize, f64>> = entries
            .iter()
            .map(|&(row, col, value)| Triplet::new(row, col, value))
            .collect();
        let matrix = SparseColMat::<usize, f64>::try_new_from_triplets(nrows, ncols, &triplets)
            .map_err(|e| MatrixError::SparseConstruction(format!("{e:?}")))?;
        Ok(Self::Sparse(matrix))
    }

    /// Converts a dense array into compressed sparse column storage, keeping only
    /// the non-zero entries.
    pub fn sparse_from_dense(dense: &Array2<f64>) -> Result<Self, MatrixError> {
        let entries: Vec<(usize, usize, f64)> = dense
            .indexed_iter()
            .filter(|&(_, &value)| value != 0.0)
            .map(|((row, col), &value)| (row, col, value))
            .collect();
        Self::sparse_from_triplets(dense.nrows(), dense.ncols(), &entries)
    }

    pub fn nrows(&self) -> usize {
        match self {
            Self::Dense(matrix) => matrix.nrows(),
            Self::Sparse(matrix) => matrix.nrows(),
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            Self::Dense(matrix) => matrix.ncols(),
            Self::Sparse(matrix) => matrix.ncols(),
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, Self::Sparse(_))
    }

    pub fn to_dense(&self) -> Array2<f64> {
        match self {
            Self::Dense(matrix) => matrix.clone(),
            Self::Sparse(matrix) => {
                let dense = matrix.as_ref().to_dense();
                Array2::from_shape_fn((dense.nrows(), dense.ncols()), |(i, j)| dense[(i, j)])
            }
        }
    }

    /// Squared Euclidean norm of every column.
    ///
    /// For sparse storage only the stored entries are visited, so the result is
    /// the same quantity the dense path computes, up to summation order.
    pub fn column_squared_norms(&self) -> Array1<f64> {
        match self {
            Self::Dense(matrix) => matrix.map_axis(Axis(0), |column| column.dot(&column)),
            Self::Sparse(matrix) => {
                let (symbolic, values) = matrix.parts();
                let col_ptr = symbolic.col_ptr();
                Array1::from_shape_fn(matrix.ncols(), |col| {
                    values[col_ptr[col]..col_ptr[col + 1]]
                        .iter()
                        .map(|v| v * v)
                        .sum()
                })
            }
        }
    }

    /// `X[:, j]ᵀ vector`
    pub fn column_dot(&self, col: usize, vector: ArrayView1<'_, f64>) -> f64 {
        match self {
            Self::Dense(matrix) => matrix.column(col).dot(&vector),
            Self::Sparse(matrix) => {
                let (symbolic, values) = matrix.parts();
                let col_ptr = symbolic.col_ptr();
                let row_idx = symbolic.row_idx();
                let mut acc = 0.0;
                for idx in col_ptr[col]..col_ptr[col + 1] {
                    acc += values[idx] * vector[row_idx[idx]];
                }
                acc
            }
        }
    }

    /// `output += scale * X[:, j]`
    pub fn column_axpy(&self, col: usize, scale: f64, mut output: ArrayViewMut1<'_, f64>) {
        match self {
            Self::Dense(matrix) => output.scaled_add(scale, &matrix.column(col)),
            Self::Sparse(matrix) => {
                let (symbolic, values) = matrix.parts();
                let col_ptr = symbolic.col_ptr();
                let row_idx = symbolic.row_idx();
                for idx in col_ptr[col]..col_ptr[col + 1] {
                    output[row_idx[idx]] += scale * values[idx];
                }
            }
        }
    }

    /// Column `j` of the Gram matrix, `Xᵀ X[:, j]`, without forming `XᵀX`.
    pub fn gram_column(&self, col: usize) -> Array1<f64> {
        match self {
            Self::Dense(matrix) => matrix.t().dot(&matrix.column(col)),
            Self::Sparse(matrix) => {
                let mut column = Array1::<f64>::zeros(matrix.nrows());
                self.column_axpy(col, 1.0, column.view_mut());
                self.transpose_vector_multiply(&column)
            }
        }
    }

    pub fn matrix_vector_multiply(&self, vector: &Array1<f64>) -> Array1<f64> {
        match self {
            Self::Dense(matrix) => matrix.dot(vector),
            Self::Sparse(matrix) => {
                let mut output = Array1::<f64>::zeros(matrix.nrows());
                for col in 0..matrix.ncols() {
                    let x = vector[col];
                    if x != 0.0 {
                        self.column_axpy(col, x, output.view_mut());
                    }
                }
                output
            }
        }
    }

    pub fn transpose_vector_multiply(&self, vector: &Array1<f64>) -> Array1<f64> {
        match self {
            Self::Dense(matrix) => matrix.t().dot(vector),
            Self::Sparse(matrix) => Array1::from_shape_fn(matrix.ncols(), |col| {
                self.column_dot(col, vector.view())
            }),
        }
    }

    /// Keeps the listed rows, in the listed order, with the same storage kind.
    pub fn select_rows(&self, rows: &[usize]) -> Result<Self, MatrixError> {
        let nrows = self.nrows();
        if let Some(&index) = rows.iter().find(|&&row| row >= nrows) {
            return Err(MatrixError::RowOutOfBounds { index, nrows });
        }
        match self {
            Self::Dense(matrix) => Ok(Self::Dense(matrix.select(Axis(0), rows))),
            Self::Sparse(matrix) => {
                let mut position = vec![None; nrows];
                for (new_row, &row) in rows.iter().enumerate() {
                    position[row] = Some(new_row);
                }
                let (symbolic, values) = matrix.parts();
                let col_ptr = symbolic.col_ptr();
                let row_idx = symbolic.row_idx();
                let mut entries = Vec::new();
                for col in 0..matrix.ncols() {
                    for idx in col_ptr[col]..col_ptr[col + 1] {
                        if let Some(new_row) = position[row_idx[idx]] {
                            entries.push((new_row, col, values[idx]));
                        }
                    }
                }
                Self::sparse_from_triplets(rows.len(), matrix.ncols(), &entries)
            }
        }
    }
}

/// Largest regularization strength with a non-empty Lasso solution:
/// `max_j |X[:, j]ᵀ y| / n_samples`.
pub fn alpha_max(x: &DesignMatrix, y: &Array1<f64>) -> f64 {
    let n_samples = x.nrows() as f64;
    x.transpose_vector_multiply(y)
        .iter()
        .fold(0.0_f64, |acc, v| acc.max(v.abs()))
        / n_samples
}
