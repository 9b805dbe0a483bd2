use core::fmt;
use core::ops::Range;

use faer_core::sparse::{SparseColMatRef, SymbolicSparseColMatRef};
use faer_core::{Mat, MatRef};

use crate::solver::QrError;

/// Read access to a matrix one column at a time.
///
/// The factorization and the Q operator only ever walk columns, so both dense
/// and compressed sparse storage can feed them.
pub trait ColumnMatrix {
    /// Number of rows.
    fn nrows(&self) -> usize;
    /// Number of columns.
    fn ncols(&self) -> usize;
    /// Calls `f(row, value)` for every stored entry of column `col`.
    ///
    /// Dense implementations skip exact zeros.
    fn for_each_in_col(&self, col: usize, f: impl FnMut(usize, f64));
}

/// Owned compressed sparse column matrix of `f64` values.
///
/// Indices are zero-based; row indices inside a column are strictly
/// increasing.
#[derive(Debug, Clone, PartialEq)]
pub struct CscMatrix {
    nrows: usize,
    ncols: usize,
    col_ptrs: Vec<usize>,
    row_indices: Vec<usize>,
    values: Vec<f64>,
}

/// Validation errors for a CscMatrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// col_ptrs length is not ncols + 1.
    ColPtrLen { expected: usize, actual: usize },
    /// col_ptrs[0] is not 0.
    ColPtrStart { value: usize },
    /// col_ptrs is not non-decreasing.
    ColPtrNotMonotonic { col: usize, prev: usize, next: usize },
    /// col_ptrs[ncols] does not match row_indices length.
    ColPtrOutOfBounds { last: usize, row_indices_len: usize },
    /// values and row_indices differ in length.
    ValuesLen { expected: usize, actual: usize },
    /// A row index is >= nrows.
    RowIndexOutOfBounds { col: usize, row: usize, nrows: usize },
    /// Row indices in a column are not sorted.
    RowIndexNotSorted { col: usize, prev: usize, next: usize },
    /// A triplet column index is >= ncols.
    ColIndexOutOfBounds { col: usize, ncols: usize },
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ColPtrLen { expected, actual } => {
                write!(f, "col_ptrs length {actual} does not match expected {expected}")
            }
            Self::ColPtrStart { value } => {
                write!(f, "col_ptrs must start at 0 (got {value})")
            }
            Self::ColPtrNotMonotonic { col, prev, next } => {
                write!(f, "col_ptrs not monotonic at col {col}: {prev} > {next}")
            }
            Self::ColPtrOutOfBounds {
                last,
                row_indices_len,
            } => {
                write!(
                    f,
                    "col_ptrs end {last} exceeds row_indices length {row_indices_len}"
                )
            }
            Self::ValuesLen { expected, actual } => {
                write!(f, "values length {actual} does not match expected {expected}")
            }
            Self::RowIndexOutOfBounds { col, row, nrows } => {
                write!(f, "row index {row} in col {col} exceeds nrows {nrows}")
            }
            Self::RowIndexNotSorted { col, prev, next } => {
                write!(f, "row indices not sorted in col {col}: {prev} >= {next}")
            }
            Self::ColIndexOutOfBounds { col, ncols } => {
                write!(f, "col index {col} exceeds ncols {ncols}")
            }
        }
    }
}

impl std::error::Error for PatternError {}

impl CscMatrix {
    /// Creates a validated compressed sparse column matrix.
    ///
    /// Requirements:
    /// - `col_ptrs.len() == ncols + 1`
    /// - `col_ptrs` is non-decreasing and starts at `0`
    /// - `col_ptrs[ncols] == row_indices.len() == values.len()`
    /// - row indices are strictly increasing and `< nrows` within each column
    pub fn new(
        nrows: usize,
        ncols: usize,
        col_ptrs: Vec<usize>,
        row_indices: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self, PatternError> {
        let expected = ncols + 1;
        if col_ptrs.len() != expected {
            return Err(PatternError::ColPtrLen {
                expected,
                actual: col_ptrs.len(),
            });
        }
        if col_ptrs[0] != 0 {
            return Err(PatternError::ColPtrStart { value: col_ptrs[0] });
        }
        for col in 0..ncols {
            let prev = col_ptrs[col];
            let next = col_ptrs[col + 1];
            if prev > next {
                return Err(PatternError::ColPtrNotMonotonic { col, prev, next });
            }
        }
        let last = col_ptrs[ncols];
        if last != row_indices.len() {
            return Err(PatternError::ColPtrOutOfBounds {
                last,
                row_indices_len: row_indices.len(),
            });
        }
        if values.len() != row_indices.len() {
            return Err(PatternError::ValuesLen {
                expected: row_indices.len(),
                actual: values.len(),
            });
        }

        for col in 0..ncols {
            let rows = &row_indices[col_ptrs[col]..col_ptrs[col + 1]];
            let Some((&first, rest)) = rows.split_first() else {
                continue;
            };
            if first >= nrows {
                return Err(PatternError::RowIndexOutOfBounds {
                    col,
                    row: first,
                    nrows,
                });
            }
            let mut prev = first;
            for &row in rest {
                if prev >= row {
                    return Err(PatternError::RowIndexNotSorted { col, prev, next: row });
                }
                if row >= nrows {
                    return Err(PatternError::RowIndexOutOfBounds { col, row, nrows });
                }
                prev = row;
            }
        }

        Ok(Self {
            nrows,
            ncols,
            col_ptrs,
            row_indices,
            values,
        })
    }

    /// Builds a matrix from already validated parts.
    pub(crate) fn from_parts(
        nrows: usize,
        ncols: usize,
        col_ptrs: Vec<usize>,
        row_indices: Vec<usize>,
        values: Vec<f64>,
    ) -> Self {
        debug_assert_eq!(col_ptrs.len(), ncols + 1);
        debug_assert_eq!(row_indices.len(), values.len());
        Self {
            nrows,
            ncols,
            col_ptrs,
            row_indices,
            values,
        }
    }

    /// All-zero matrix of the given shape.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self::from_parts(nrows, ncols, vec![0; ncols + 1], Vec::new(), Vec::new())
    }

    /// Square identity matrix.
    pub fn identity(n: usize) -> Self {
        Self::from_parts(n, n, (0..=n).collect(), (0..n).collect(), vec![1.0; n])
    }

    /// Compresses `(row, col, value)` entries, summing duplicates.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        triplets: &[(usize, usize, f64)],
    ) -> Result<Self, PatternError> {
        let mut list = crate::triplets::TripletList::with_capacity(triplets.len());
        list.extend(triplets.iter().copied());
        list.into_csc(nrows, ncols)
    }

    /// Copies the non-zero entries of a dense matrix.
    pub fn from_dense(mat: MatRef<'_, f64>) -> Self {
        let mut col_ptrs = Vec::with_capacity(mat.ncols() + 1);
        let mut row_indices = Vec::new();
        let mut values = Vec::new();
        col_ptrs.push(0);
        for col in 0..mat.ncols() {
            for row in 0..mat.nrows() {
                let value = mat.read(row, col);
                if value != 0.0 {
                    row_indices.push(row);
                    values.push(value);
                }
            }
            col_ptrs.push(row_indices.len());
        }
        Self::from_parts(mat.nrows(), mat.ncols(), col_ptrs, row_indices, values)
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.row_indices.len()
    }

    /// Column pointer array in CSC format.
    pub fn col_ptrs(&self) -> &[usize] {
        &self.col_ptrs
    }

    /// Row index array in CSC format.
    pub fn row_indices(&self) -> &[usize] {
        &self.row_indices
    }

    /// Value array in CSC format.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Index range in row_indices for the given column.
    pub fn col_range(&self, col: usize) -> Range<usize> {
        self.col_ptrs[col]..self.col_ptrs[col + 1]
    }

    /// Sorted row indices for the given column.
    pub fn row_indices_of_col(&self, col: usize) -> &[usize] {
        &self.row_indices[self.col_range(col)]
    }

    /// Values for the given column, aligned with row_indices_of_col.
    pub fn values_of_col(&self, col: usize) -> &[f64] {
        &self.values[self.col_range(col)]
    }

    /// Coefficient at `(row, col)`, zero when not stored.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        let rows = self.row_indices_of_col(col);
        match rows.binary_search(&row) {
            Ok(pos) => self.values_of_col(col)[pos],
            Err(_) => 0.0,
        }
    }

    /// Dense copy.
    pub fn to_dense(&self) -> Mat<f64> {
        let mut out = Mat::<f64>::zeros(self.nrows, self.ncols);
        for col in 0..self.ncols {
            for (&row, &value) in self.row_indices_of_col(col).iter().zip(self.values_of_col(col)) {
                out.write(row, col, value);
            }
        }
        out
    }

    /// Computes `self * x`; `x` must have one entry per column.
    pub fn mul_vec(&self, x: &[f64]) -> Result<Vec<f64>, QrError> {
        if x.len() != self.ncols {
            return Err(QrError::DimensionMismatch {
                expected: self.ncols,
                actual: x.len(),
            });
        }
        let mut out = vec![0.0; self.nrows];
        for (col, &xj) in x.iter().enumerate() {
            if xj == 0.0 {
                continue;
            }
            for (&row, &value) in self.row_indices_of_col(col).iter().zip(self.values_of_col(col)) {
                out[row] += value * xj;
            }
        }
        Ok(out)
    }

    /// Borrowed faer view sharing this matrix's storage.
    pub fn as_faer(&self) -> SparseColMatRef<'_, usize, f64> {
        // SAFETY: the invariants checked by `new` (and upheld by every internal
        // constructor) are exactly those faer requires of a sorted CSC pattern.
        let symbolic = unsafe {
            SymbolicSparseColMatRef::new_unchecked(
                self.nrows,
                self.ncols,
                &self.col_ptrs,
                None,
                &self.row_indices,
            )
        };
        SparseColMatRef::new(symbolic, self.values.as_slice())
    }
}

impl ColumnMatrix for CscMatrix {
    fn nrows(&self) -> usize {
        self.nrows
    }

    fn ncols(&self) -> usize {
        self.ncols
    }

    fn for_each_in_col(&self, col: usize, mut f: impl FnMut(usize, f64)) {
        for (&row, &value) in self.row_indices_of_col(col).iter().zip(self.values_of_col(col)) {
            f(row, value);
        }
    }
}

impl ColumnMatrix for MatRef<'_, f64> {
    fn nrows(&self) -> usize {
        MatRef::nrows(self)
    }

    fn ncols(&self) -> usize {
        MatRef::ncols(self)
    }

    fn for_each_in_col(&self, col: usize, mut f: impl FnMut(usize, f64)) {
        for row in 0..MatRef::nrows(self) {
            let value = self.read(row, col);
            if value != 0.0 {
                f(row, value);
            }
        }
    }
}

impl ColumnMatrix for Mat<f64> {
    fn nrows(&self) -> usize {
        Mat::nrows(self)
    }

    fn ncols(&self) -> usize {
        Mat::ncols(self)
    }

    fn for_each_in_col(&self, col: usize, f: impl FnMut(usize, f64)) {
        self.as_ref().for_each_in_col(col, f);
    }
}

impl<M: ColumnMatrix + ?Sized> ColumnMatrix for &M {
    fn nrows(&self) -> usize {
        (**self).nrows()
    }

    fn ncols(&self) -> usize {
        (**self).ncols()
    }

    fn for_each_in_col(&self, col: usize, f: impl FnMut(usize, f64)) {
        (**self).for_each_in_col(col, f);
    }
}
