//! Banded block sweep producing the R, W and Y factors.
//!
//! Blocks are processed strictly in order: the overlap columns of block `i + 1`
//! start from the partially triangularized rows left behind by block `i`.

use dyn_stack::{PodStack, ReborrowMut, SizeOverflow, StackReq};
use faer_core::Mat;

use crate::geometry::{BlockPlan, BlockWindow};
use crate::householder::{factor_req, BlockHouseholder};
use crate::matrix::{ColumnMatrix, CscMatrix};
use crate::report::{BlockReport, Reporter};
use crate::solver::{NumericalFailure, QrError};
use crate::triplets::TripletList;
use crate::wy::BlockWy;

/// Compressed factors of a banded QR factorization.
#[derive(Debug, Clone)]
pub(crate) struct Factors {
    pub(crate) r: CscMatrix,
    pub(crate) w: CscMatrix,
    pub(crate) y: CscMatrix,
}

impl Factors {
    /// Factors with no stored entries.
    pub(crate) fn empty(nrows: usize, ncols: usize, wy_cols: usize) -> Self {
        Self {
            r: CscMatrix::zeros(nrows, ncols),
            w: CscMatrix::zeros(nrows, wy_cols),
            y: CscMatrix::zeros(nrows, wy_cols),
        }
    }
}

/// Triangular rows a block hands to its successor.
struct Carry {
    window: BlockWindow,
    r: Mat<f64>,
}

impl Carry {
    /// Last global row touched by the carrying block, exclusive.
    fn row_end(&self) -> usize {
        self.window.row_end()
    }

    /// Local column of global column `col` in the carrying block.
    fn local_col(&self, col: usize) -> Option<usize> {
        let offset = col.checked_sub(self.window.col_start)?;
        (offset < self.window.width).then_some(offset)
    }
}

/// Scratch space for the largest dense block of `plan`.
pub(crate) fn factorize_req(plan: &BlockPlan) -> Result<StackReq, SizeOverflow> {
    plan.windows.iter().try_fold(StackReq::empty(), |req, w| {
        req.try_or(factor_req(w.active_rows, w.width)?)
    })
}

/// Runs the block sweep described by `plan` over `a`. `stack` must hold at
/// least [`factorize_req`].
pub(crate) fn factorize_banded<M: ColumnMatrix + ?Sized>(
    a: &M,
    plan: &BlockPlan,
    mut stack: PodStack<'_>,
    mut reporter: Option<&mut dyn Reporter>,
) -> Result<Factors, QrError> {
    let estimate: usize = plan
        .windows
        .iter()
        .map(|w| w.active_rows * w.width)
        .sum();
    let mut r_vals = TripletList::with_capacity(plan.ncols * plan.block_cols);
    let mut w_vals = TripletList::with_capacity(estimate);
    let mut y_vals = TripletList::with_capacity(estimate);

    let mut carry: Option<Carry> = None;
    for window in &plan.windows {
        log::debug!(
            "block {}: cols {}..{}, rows {}..{} ({} active, {} implicit zeros)",
            window.index,
            window.col_start,
            window.col_start + window.width,
            window.row_start(),
            window.row_end(),
            window.active_rows,
            window.implicit_zeros,
        );

        let block = extract_block(a, window, carry.as_ref());
        let factor = BlockHouseholder::factor(block, stack.rb_mut())
            .map_err(|_| NumericalFailure::NonFiniteBlock { block: window.index })?;
        let wy = BlockWy::from_householder(&factor);

        let (r_before, w_before, y_before) = (r_vals.len(), w_vals.len(), y_vals.len());
        let wy_base = window.index * plan.block_cols;
        for bc in 0..wy.ncols() {
            for r in 0..wy.nrows() {
                let row = window.global_row(r);
                y_vals.push_if_nonzero(row, wy_base + bc, wy.y(r, bc));
                w_vals.push_if_nonzero(row, wy_base + bc, wy.w(r, bc));
            }
        }

        // Rows past `solved_rows` are carried into the next block instead.
        for br in 0..window.solved_rows {
            let row = window.global_row(br);
            for bc in br..window.width {
                r_vals.push_if_nonzero(row, window.col_start + bc, factor.r(br, bc));
            }
        }

        log::trace!(
            "block {}: emitted {} R, {} W, {} Y entries",
            window.index,
            r_vals.len() - r_before,
            w_vals.len() - w_before,
            y_vals.len() - y_before,
        );
        if let Some(reporter) = reporter.as_deref_mut() {
            reporter.on_block(&BlockReport {
                block: window.index,
                col_start: window.col_start,
                width: window.width,
                active_rows: window.active_rows,
                implicit_zeros: window.implicit_zeros,
                solved_rows: window.solved_rows,
                r_entries: r_vals.len() - r_before,
                w_entries: w_vals.len() - w_before,
                y_entries: y_vals.len() - y_before,
            });
        }

        carry = Some(Carry {
            window: *window,
            r: factor.r_triangle(),
        });
    }

    let wy_cols = plan.wy_cols();
    Ok(Factors {
        r: r_vals.into_csc(plan.nrows, plan.ncols)?,
        w: w_vals.into_csc(plan.nrows, wy_cols)?,
        y: y_vals.into_csc(plan.nrows, wy_cols)?,
    })
}

/// Gathers the dense sub-problem of `window`.
///
/// Columns shared with the previous block take that block's triangularized
/// values on every row it already swept and the entries of `a` below it.
/// Other columns are read from `a` directly.
fn extract_block<M: ColumnMatrix + ?Sized>(
    a: &M,
    window: &BlockWindow,
    carry: Option<&Carry>,
) -> Mat<f64> {
    let mut block = Mat::<f64>::zeros(window.active_rows, window.width);
    for bc in 0..window.width {
        let col = window.col_start + bc;
        match carry.and_then(|c| c.local_col(col).map(|pc| (c, pc))) {
            Some((carry, pc)) => {
                for pr in 0..=pc {
                    let value = carry.r.read(pr, pc);
                    if let Some(r) = window.local_row(carry.window.global_row(pr)) {
                        block.write(r, bc, value);
                    }
                }
                let swept = carry.row_end();
                a.for_each_in_col(col, |row, value| {
                    if row < swept {
                        return;
                    }
                    if let Some(r) = window.local_row(row) {
                        block.write(r, bc, value);
                    }
                });
            }
            None => {
                a.for_each_in_col(col, |row, value| {
                    if let Some(r) = window.local_row(row) {
                        block.write(r, bc, value);
                    }
                });
            }
        }
    }
    block
}
