use faer_core::Mat;

use crate::householder::BlockHouseholder;

/// Compact WY form `Q = I - W * Y^T` of the reflectors of one dense block.
#[derive(Debug, Clone)]
pub(crate) struct BlockWy {
    w: Mat<f64>,
    y: Mat<f64>,
}

impl BlockWy {
    /// Accumulates the reflectors of `factor` one at a time.
    ///
    /// Column `k` of Y is reflector `k`; column `k` of W is
    /// `coeff_k * (v_k - W * (Y^T * v_k))` over the columns built so far.
    pub(crate) fn from_householder(factor: &BlockHouseholder) -> Self {
        let rows = factor.nrows();
        let cols = factor.ncols();
        let mut w = Mat::<f64>::zeros(rows, cols);
        let mut y = Mat::<f64>::zeros(rows, cols);
        let mut v = vec![0.0; rows];
        let mut yt_v = vec![0.0; cols];

        for k in 0..cols {
            for (i, vi) in v.iter_mut().enumerate() {
                *vi = factor.reflector(k, i);
            }

            // Y^T v over the previous columns; v is zero above row k.
            for (j, t) in yt_v.iter_mut().enumerate().take(k) {
                let mut dot = 0.0;
                for (i, &vi) in v.iter().enumerate().skip(k) {
                    dot += y.read(i, j) * vi;
                }
                *t = dot;
            }

            let coeff = factor.coeff(k);
            for (i, &vi) in v.iter().enumerate() {
                let mut z = vi;
                for (j, &t) in yt_v.iter().enumerate().take(k) {
                    z -= w.read(i, j) * t;
                }
                y.write(i, k, vi);
                w.write(i, k, coeff * z);
            }
        }

        Self { w, y }
    }

    pub(crate) fn nrows(&self) -> usize {
        self.w.nrows()
    }

    pub(crate) fn ncols(&self) -> usize {
        self.w.ncols()
    }

    #[inline]
    pub(crate) fn w(&self, i: usize, j: usize) -> f64 {
        self.w.read(i, j)
    }

    #[inline]
    pub(crate) fn y(&self, i: usize, j: usize) -> f64 {
        self.y.read(i, j)
    }
}
