//! Banded, blocked sparse QR with a compact block WY representation of Q.
//!
//! The matrix is swept by small dense blocks sliding down its band. Each block
//! is reduced with Householder reflectors, which are kept as `Q_i = I - W_i Y_i^T`
//! so that `Q = Q_0 * Q_1 * ... * Q_last` can be applied without forming it.
//!
//! How it works (high level):
//! - `analyze_pattern` lays out the blocks for the matrix shape.
//! - `factorize` runs the blocks in order; the overlap columns of each block
//!   start from the rows the previous block left partially triangularized.
//! - `matrix_q` applies Q or Q^T column by column, optionally in parallel.
//! - `solve` computes `Q^T b` and back-substitutes with R.
//!
//! Only matrices whose band follows the block geometry are factorized
//! exactly: a column first touched by block `i` must be zero above row
//! `i * block_rows` and below the row window of the last block containing it.
//! Intermediate blocks keep at most `max_active_rows` rows; the rows skipped
//! in between are expected to be zero already. The last block keeps every
//! remaining row.
//!
//! Example:
//! ```rust,no_run
//! use banded_qr_rs::{BandedBlockedQr, BlockGeometry, CscMatrix};
//!
//! // Two columns per band of four rows.
//! let mut triplets = Vec::new();
//! for col in 0..6 {
//!     for row in 4 * (col / 2)..4 * (col / 2) + 4 {
//!         triplets.push((row, col, 1.0 + (row + 2 * col) as f64));
//!     }
//! }
//! let a = CscMatrix::from_triplets(12, 6, &triplets).unwrap();
//!
//! let mut qr = BandedBlockedQr::with_geometry(BlockGeometry::new(4, 2, 0)).unwrap();
//! qr.analyze_pattern(&a).unwrap();
//! qr.factorize(&a).unwrap();
//!
//! let b = a.mul_vec(&[1.0; 6]).unwrap();
//! let x = qr.solve(&b).unwrap();
//! assert_eq!(x.len(), 6);
//! ```

mod factorize;
mod geometry;
mod householder;
mod matrix;
mod qproduct;
mod report;
mod solver;
mod triplets;
mod wy;

pub use geometry::{BlockGeometry, BlockPlan, BlockWindow, ConfigError, ShapeError};
pub use matrix::{ColumnMatrix, CscMatrix, PatternError};
pub use qproduct::QOperator;
pub use report::{BlockReport, Reporter, StdoutReporter};
pub use solver::{
    BandedBlockedQr, BandedQrOptions, ComputationInfo, NumericalFailure, QrError,
};
pub use triplets::TripletList;
