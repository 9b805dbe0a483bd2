//! Products with the orthogonal factor `Q = Q_0 * Q_1 * ... * Q_last`,
//! `Q_i = I - W_i * Y_i^T`, without forming Q.

use std::sync::{Mutex, PoisonError};

use faer_core::{Mat, MatRef, Parallelism};

use crate::matrix::{ColumnMatrix, CscMatrix};
use crate::solver::QrError;
use crate::triplets::TripletList;

/// Borrowed W and Y factors, grouped in blocks of `block_cols` columns.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WyFactors<'a> {
    pub(crate) w: &'a CscMatrix,
    pub(crate) y: &'a CscMatrix,
    pub(crate) block_cols: usize,
}

/// How the kernels treat small weights and how columns are scheduled.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProductSettings {
    pub(crate) parallelism: Parallelism,
    pub(crate) approximate_zero_check: bool,
    pub(crate) eps: f64,
}

/// Lazy `Q` or `Q^T`; evaluated by the `apply*` methods.
#[derive(Debug, Clone, Copy)]
pub struct QOperator<'a> {
    factors: Option<WyFactors<'a>>,
    settings: ProductSettings,
    transpose: bool,
}

/// Sum of `mat[:, col] .* vec`, walking the stored entries of the column.
#[inline]
fn fast_dot(mat: &CscMatrix, col: usize, vec: &[f64]) -> f64 {
    let mut sum = 0.0;
    for (&row, &value) in mat.row_indices_of_col(col).iter().zip(mat.values_of_col(col)) {
        sum += value * vec[row];
    }
    sum
}

/// `vec -= weight * mat[:, col]`, skipped when the weight is zero.
#[inline]
fn fast_weighted_subtract(
    vec: &mut [f64],
    mat: &CscMatrix,
    col: usize,
    weight: f64,
    settings: &ProductSettings,
) {
    let negligible = if settings.approximate_zero_check {
        weight.abs() < settings.eps
    } else {
        weight == 0.0
    };
    if negligible {
        return;
    }
    for (&row, &value) in mat.row_indices_of_col(col).iter().zip(mat.values_of_col(col)) {
        vec[row] -= value * weight;
    }
}

fn worker_count(parallelism: Parallelism) -> usize {
    match parallelism {
        Parallelism::None => 1,
        Parallelism::Rayon(0) => rayon::current_num_threads(),
        Parallelism::Rayon(n) => n,
    }
}

impl<'a> QOperator<'a> {
    pub(crate) fn new(factors: Option<WyFactors<'a>>, settings: ProductSettings) -> Self {
        Self {
            factors,
            settings,
            transpose: false,
        }
    }

    /// The transposed operator.
    pub fn transpose(self) -> Self {
        Self {
            transpose: !self.transpose,
            ..self
        }
    }

    /// Whether this operator represents `Q^T`.
    pub fn is_transposed(&self) -> bool {
        self.transpose
    }

    /// Order of Q (rows of the factorized matrix).
    pub fn nrows(&self) -> usize {
        self.factors.map_or(0, |f| f.w.nrows())
    }

    /// Computes `op(Q) * x` into a new sparse matrix.
    pub fn apply<M: ColumnMatrix + Sync + ?Sized>(&self, x: &M) -> Result<CscMatrix, QrError> {
        let factors = self.factors.ok_or(QrError::NotFactorized)?;
        let m = factors.w.nrows();
        if x.nrows() != m {
            return Err(QrError::DimensionMismatch {
                expected: m,
                actual: x.nrows(),
            });
        }

        let ncols = x.ncols();
        let workers = worker_count(self.settings.parallelism).clamp(1, ncols.max(1));
        let triplets = if workers == 1 {
            let mut out = TripletList::new();
            self.apply_columns(&factors, x, 0..ncols, &mut out);
            out
        } else {
            let merged = Mutex::new(TripletList::new());
            rayon::scope(|s| {
                for t in 0..workers {
                    let begin = t * ncols / workers;
                    let end = (t + 1) * ncols / workers;
                    let merged = &merged;
                    let factors = &factors;
                    s.spawn(move |_| {
                        let mut local = TripletList::new();
                        self.apply_columns(factors, x, begin..end, &mut local);
                        merged
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .append(&mut local);
                    });
                }
            });
            merged.into_inner().unwrap_or_else(PoisonError::into_inner)
        };

        Ok(triplets.into_csc(m, ncols)?)
    }

    /// Computes `op(Q) * x` for a dense right-hand side.
    pub fn apply_dense(&self, x: MatRef<'_, f64>) -> Result<Mat<f64>, QrError> {
        Ok(self.apply(&x)?.to_dense())
    }

    /// Computes `op(Q) * x` for a single vector.
    pub fn apply_vec(&self, x: &[f64]) -> Result<Vec<f64>, QrError> {
        let factors = self.factors.ok_or(QrError::NotFactorized)?;
        let m = factors.w.nrows();
        if x.len() != m {
            return Err(QrError::DimensionMismatch {
                expected: m,
                actual: x.len(),
            });
        }
        let mut work = x.to_vec();
        let mut coeffs = vec![0.0; factors.block_cols];
        self.apply_in_place(&factors, &mut work, &mut coeffs);
        Ok(work)
    }

    /// `op(Q)` as an explicit sparse matrix, by applying it to the identity.
    pub fn to_sparse(&self) -> Result<CscMatrix, QrError> {
        self.apply(&CscMatrix::identity(self.nrows()))
    }

    /// `op(Q)` as an explicit dense matrix.
    pub fn to_dense(&self) -> Result<Mat<f64>, QrError> {
        Ok(self.to_sparse()?.to_dense())
    }

    fn apply_columns<M: ColumnMatrix + ?Sized>(
        &self,
        factors: &WyFactors<'_>,
        x: &M,
        cols: core::ops::Range<usize>,
        out: &mut TripletList,
    ) {
        let mut work = vec![0.0; x.nrows()];
        let mut coeffs = vec![0.0; factors.block_cols];
        for j in cols {
            work.fill(0.0);
            x.for_each_in_col(j, |row, value| work[row] = value);
            self.apply_in_place(factors, &mut work, &mut coeffs);
            for (row, &value) in work.iter().enumerate() {
                out.push_if_nonzero(row, j, value);
            }
        }
    }

    /// Applies the block reflectors to `work`, one group of `block_cols`
    /// columns at a time.
    ///
    /// `Q^T` walks the groups forward with `t = W^T x`, `x -= Y t`;
    /// `Q` walks them backward with the roles of W and Y swapped.
    fn apply_in_place(&self, factors: &WyFactors<'_>, work: &mut [f64], coeffs: &mut [f64]) {
        let width = factors.block_cols;
        let groups = factors.w.ncols() / width;
        let (dot_with, subtract_with) = if self.transpose {
            (factors.w, factors.y)
        } else {
            (factors.y, factors.w)
        };

        let mut run_group = |group: usize, work: &mut [f64]| {
            let base = group * width;
            for (ii, c) in coeffs.iter_mut().enumerate() {
                *c = fast_dot(dot_with, base + ii, work);
            }
            for (ii, &c) in coeffs.iter().enumerate() {
                fast_weighted_subtract(work, subtract_with, base + ii, c, &self.settings);
            }
        };

        if self.transpose {
            for group in 0..groups {
                run_group(group, &mut *work);
            }
        } else {
            for group in (0..groups).rev() {
                run_group(group, &mut *work);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(approximate_zero_check: bool) -> ProductSettings {
        ProductSettings {
            parallelism: Parallelism::None,
            approximate_zero_check,
            eps: 1e-3,
        }
    }

    #[test]
    fn fast_kernels_walk_stored_entries() {
        let m = CscMatrix::from_triplets(4, 1, &[(1, 0, 2.0), (3, 0, -1.0)]).unwrap();
        let v = [10.0, 1.0, 10.0, 4.0];
        assert_eq!(fast_dot(&m, 0, &v), -2.0);

        let mut target = v;
        fast_weighted_subtract(&mut target, &m, 0, 0.5, &settings(false));
        assert_eq!(target, [10.0, 0.0, 10.0, 4.5]);
    }

    #[test]
    fn approximate_check_skips_tiny_weights() {
        let m = CscMatrix::identity(2);
        let mut exact = [1.0, 1.0];
        fast_weighted_subtract(&mut exact, &m, 0, 1e-4, &settings(false));
        assert_eq!(exact, [1.0 - 1e-4, 1.0]);

        let mut approx = [1.0, 1.0];
        fast_weighted_subtract(&mut approx, &m, 0, 1e-4, &settings(true));
        assert_eq!(approx, [1.0, 1.0]);
    }

    #[test]
    fn single_reflector_is_involution() {
        // Q = I - 2 u u^T with u = e_0: W = 2 e_0, Y = e_0.
        let w = CscMatrix::from_triplets(3, 1, &[(0, 0, 2.0)]).unwrap();
        let y = CscMatrix::from_triplets(3, 1, &[(0, 0, 1.0)]).unwrap();
        let factors = WyFactors {
            w: &w,
            y: &y,
            block_cols: 1,
        };
        let q = QOperator::new(Some(factors), settings(false));
        assert!(!q.is_transposed());
        assert!(q.transpose().is_transposed());
        assert!(!q.transpose().transpose().is_transposed());
        assert_eq!(q.apply_vec(&[1.0, 2.0, 3.0]).unwrap(), vec![-1.0, 2.0, 3.0]);
        assert_eq!(
            q.transpose().apply_vec(&[1.0, 2.0, 3.0]).unwrap(),
            vec![-1.0, 2.0, 3.0]
        );
        let dense = q.to_dense().unwrap();
        assert_eq!(dense.read(0, 0), -1.0);
        assert_eq!(dense.read(2, 2), 1.0);
    }

    #[test]
    fn unfactorized_operator_reports_error() {
        let q = QOperator::new(None, settings(false));
        assert!(matches!(q.apply_vec(&[1.0]), Err(QrError::NotFactorized)));
    }
}
