use core::fmt;

use dyn_stack::{PodStack, SizeOverflow, StackReq};
use faer_core::{Mat, Parallelism};
use faer_qr::no_pivoting::compute::{qr_in_place, qr_in_place_req};

/// Householder QR of one dense block.
///
/// The upper triangle of `qr` holds R; below the diagonal, column `k` holds
/// the essential part of reflector `k` (its implicit leading entry is 1).
/// Reflector `k` is `H_k = I - coeffs[k] * v_k * v_k^T`.
#[derive(Debug, Clone)]
pub(crate) struct BlockHouseholder {
    qr: Mat<f64>,
    coeffs: Vec<f64>,
}

/// A dense block produced NaN or infinite values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NonFiniteBlock;

impl fmt::Display for NonFiniteBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dense block QR produced non-finite values")
    }
}

/// Scratch space needed by [`BlockHouseholder::factor`] for an
/// `nrows x ncols` block.
pub(crate) fn factor_req(nrows: usize, ncols: usize) -> Result<StackReq, SizeOverflow> {
    qr_in_place_req::<f64>(nrows, ncols, 1, Parallelism::None, Default::default())
}

impl BlockHouseholder {
    /// Factors `block` in place. Requires `nrows >= ncols` and a stack of at
    /// least [`factor_req`].
    pub(crate) fn factor(mut block: Mat<f64>, stack: PodStack<'_>) -> Result<Self, NonFiniteBlock> {
        debug_assert!(block.nrows() >= block.ncols());
        let size = block.ncols();

        // Blocksize 1 keeps one scalar tau per reflector in row 0.
        let mut taus = Mat::<f64>::zeros(1, size);
        qr_in_place(
            block.as_mut(),
            taus.as_mut(),
            Parallelism::None,
            stack,
            Default::default(),
        );

        // H_k = I - v v^T / tau_k; a zero tail gives tau = inf, the identity.
        let coeffs = (0..size).map(|k| taus.read(0, k).recip()).collect();

        let factor = Self { qr: block, coeffs };
        if !factor.is_finite() {
            return Err(NonFiniteBlock);
        }
        Ok(factor)
    }

    fn is_finite(&self) -> bool {
        if !self.coeffs.iter().all(|c| c.is_finite()) {
            return false;
        }
        (0..self.qr.ncols()).all(|j| (0..self.qr.nrows()).all(|i| self.qr.read(i, j).is_finite()))
    }

    pub(crate) fn nrows(&self) -> usize {
        self.qr.nrows()
    }

    pub(crate) fn ncols(&self) -> usize {
        self.qr.ncols()
    }

    pub(crate) fn coeff(&self, k: usize) -> f64 {
        self.coeffs[k]
    }

    /// Entry of reflector `k` at local row `i` (zero above `k`, one at `k`).
    #[inline]
    pub(crate) fn reflector(&self, k: usize, i: usize) -> f64 {
        match i.cmp(&k) {
            core::cmp::Ordering::Less => 0.0,
            core::cmp::Ordering::Equal => 1.0,
            core::cmp::Ordering::Greater => self.qr.read(i, k),
        }
    }

    /// Entry of the triangular factor.
    #[inline]
    pub(crate) fn r(&self, i: usize, j: usize) -> f64 {
        if i <= j {
            self.qr.read(i, j)
        } else {
            0.0
        }
    }

    /// Leading `ncols x ncols` triangle of R.
    pub(crate) fn r_triangle(&self) -> Mat<f64> {
        let n = self.ncols();
        Mat::from_fn(n, n, |i, j| self.r(i, j))
    }
}

#[cfg(test)]
impl BlockHouseholder {
    /// [`factor`](Self::factor) with a freshly allocated stack.
    pub(crate) fn factor_owned(block: Mat<f64>) -> Result<Self, NonFiniteBlock> {
        let req = factor_req(block.nrows(), block.ncols()).unwrap();
        let mut buffer = dyn_stack::GlobalPodBuffer::new(req);
        Self::factor(block, PodStack::new(&mut buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> Mat<f64> {
        Mat::from_fn(5, 3, |i, j| ((i * 3 + j * 7) % 5) as f64 - 1.5 + (i == j) as u8 as f64)
    }

    /// Applies H_{n-1} ... H_0 to a copy of `a`.
    fn apply_reflectors_transposed(f: &BlockHouseholder, a: &Mat<f64>) -> Mat<f64> {
        let mut out = a.clone();
        for k in 0..f.ncols() {
            for j in 0..out.ncols() {
                let mut dot = 0.0;
                for i in 0..out.nrows() {
                    dot += f.reflector(k, i) * out.read(i, j);
                }
                for i in 0..out.nrows() {
                    out.write(i, j, out.read(i, j) - f.coeff(k) * dot * f.reflector(k, i));
                }
            }
        }
        out
    }

    #[test]
    fn reflectors_triangularize_block() {
        let a = sample_block();
        let f = BlockHouseholder::factor_owned(a.clone()).unwrap();
        let reduced = apply_reflectors_transposed(&f, &a);
        for j in 0..3 {
            for i in 0..5 {
                let expected = f.r(i, j);
                assert!(
                    (reduced.read(i, j) - expected).abs() < 1e-12,
                    "({i},{j}): {} vs {expected}",
                    reduced.read(i, j)
                );
            }
        }
    }

    #[test]
    fn reflectors_are_orthogonal() {
        // H_k orthogonal <=> coeff * v^T v = 2.
        let f = BlockHouseholder::factor_owned(sample_block()).unwrap();
        for k in 0..f.ncols() {
            let norm2: f64 = (0..f.nrows()).map(|i| f.reflector(k, i).powi(2)).sum();
            assert!((f.coeff(k) * norm2 - 2.0).abs() < 1e-12, "reflector {k}");
        }
    }

    #[test]
    fn zero_column_gives_identity_reflector() {
        let mut a = Mat::<f64>::zeros(3, 2);
        a.write(0, 1, 2.0);
        a.write(2, 1, 1.0);
        let f = BlockHouseholder::factor_owned(a).unwrap();
        assert_eq!(f.coeff(0), 0.0);
        assert!((f.r(1, 1).abs() - 1.0).abs() < 1e-14);
    }

    #[test]
    fn rejects_non_finite_input() {
        let mut a = Mat::<f64>::zeros(2, 1);
        a.write(1, 0, f64::NAN);
        assert_eq!(BlockHouseholder::factor_owned(a).unwrap_err(), NonFiniteBlock);
    }
}
