use core::fmt;

use std::time::{Duration, Instant};

use dyn_stack::{GlobalPodBuffer, PodStack};
use faer_core::{Mat, MatRef, Parallelism};

use crate::factorize::{factorize_banded, factorize_req, Factors};
use crate::geometry::{BlockGeometry, BlockPlan, ConfigError, ShapeError};
use crate::matrix::{ColumnMatrix, CscMatrix, PatternError};
use crate::qproduct::{ProductSettings, QOperator, WyFactors};
use crate::report::{emit_line, Reporter, StdoutReporter};

/// Outcome of the last analyze or factorize call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputationInfo {
    Success,
    /// A dense block or the triangular solve hit non-finite or singular values.
    NumericalIssue,
    /// The matrix or configuration does not fit the block geometry.
    InvalidInput,
}

/// Numerical breakdowns detected while factorizing or solving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericalFailure {
    /// The dense QR of a block produced NaN or infinite values.
    NonFiniteBlock { block: usize },
    /// R has a zero or non-finite diagonal entry.
    SingularDiagonal { col: usize },
}

impl fmt::Display for NumericalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonFiniteBlock { block } => {
                write!(f, "dense QR of block {block} produced non-finite values")
            }
            Self::SingularDiagonal { col } => {
                write!(f, "R is singular at diagonal entry {col}")
            }
        }
    }
}

/// Errors from configuring, factorizing or solving.
#[derive(Debug, Clone, PartialEq)]
pub enum QrError {
    /// The block geometry or solver options are invalid.
    Config(ConfigError),
    /// A sparse matrix has an inconsistent structure.
    Pattern(PatternError),
    /// The matrix shape cannot be swept with the configured blocks.
    InvalidShape(ShapeError),
    /// `factorize` was called before `analyze_pattern`.
    NotAnalyzed,
    /// The factors were used before a successful `factorize`.
    NotFactorized,
    /// `factorize` received a matrix with a different shape than analyzed.
    ShapeChanged {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    /// A right-hand side has the wrong number of rows.
    DimensionMismatch { expected: usize, actual: usize },
    WorkspaceOverflow,
    WorkspaceAlloc,
    NumericalIssue(NumericalFailure),
}

impl QrError {
    /// Status reported by [`BandedBlockedQr::info`] after this error.
    pub fn info(&self) -> ComputationInfo {
        match self {
            Self::NumericalIssue(_) => ComputationInfo::NumericalIssue,
            _ => ComputationInfo::InvalidInput,
        }
    }
}

impl fmt::Display for QrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "invalid configuration: {err}"),
            Self::Pattern(err) => write!(f, "invalid sparse matrix: {err}"),
            Self::InvalidShape(err) => write!(f, "invalid matrix shape: {err}"),
            Self::NotAnalyzed => write!(f, "analyze_pattern must be called before factorize"),
            Self::NotFactorized => write!(f, "matrix has not been factorized"),
            Self::ShapeChanged { expected, actual } => write!(
                f,
                "matrix is {}x{} but the pattern was analyzed for {}x{}",
                actual.0, actual.1, expected.0, expected.1
            ),
            Self::DimensionMismatch { expected, actual } => {
                write!(f, "operand has {actual} rows, expected {expected}")
            }
            Self::WorkspaceOverflow => write!(f, "workspace size overflow"),
            Self::WorkspaceAlloc => write!(f, "workspace allocation failed"),
            Self::NumericalIssue(err) => write!(f, "numerical issue: {err}"),
        }
    }
}

impl std::error::Error for QrError {}

impl From<ConfigError> for QrError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<PatternError> for QrError {
    fn from(err: PatternError) -> Self {
        Self::Pattern(err)
    }
}

impl From<ShapeError> for QrError {
    fn from(err: ShapeError) -> Self {
        Self::InvalidShape(err)
    }
}

impl From<NumericalFailure> for QrError {
    fn from(err: NumericalFailure) -> Self {
        Self::NumericalIssue(err)
    }
}

/// Options controlling the banded QR factorization and Q products.
#[derive(Debug, Clone)]
pub struct BandedQrOptions {
    pub geometry: BlockGeometry,
    /// Column parallelism of Q products. Factorization is always sequential.
    pub parallelism: Parallelism,
    /// Skip reflector updates whose weight is below `roundoff_epsilon`
    /// instead of exactly zero.
    pub approximate_zero_check: bool,
    pub roundoff_epsilon: f64,
    /// Print a per-block table and timing after each factorization.
    pub verbose: bool,
}

impl Default for BandedQrOptions {
    fn default() -> Self {
        Self {
            geometry: BlockGeometry::default(),
            parallelism: Parallelism::None,
            approximate_zero_check: false,
            roundoff_epsilon: 1e-16,
            verbose: false,
        }
    }
}

impl BandedQrOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.geometry.validate()?;
        validate_epsilon(self.roundoff_epsilon)
    }
}

fn validate_epsilon(eps: f64) -> Result<(), ConfigError> {
    if !eps.is_finite() || eps < 0.0 {
        return Err(ConfigError::InvalidEpsilon { eps });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Empty,
    Analyzed,
    Factorized,
}

/// Banded blocked QR `A = Q * R` with Q kept as block WY factors.
///
/// Call [`analyze_pattern`](Self::analyze_pattern) once per sparsity pattern,
/// then [`factorize`](Self::factorize) for every matrix sharing it. Columns are
/// never pivoted.
pub struct BandedBlockedQr {
    options: BandedQrOptions,
    plan: Option<BlockPlan>,
    factors: Factors,
    /// Dense block QR scratch, sized for the analyzed plan.
    workspace: Option<GlobalPodBuffer>,
    perm: Vec<usize>,
    stage: Stage,
    rank: usize,
    info: ComputationInfo,
    last_error: String,
}

enum ReporterSlot<'a> {
    External(&'a mut dyn Reporter),
    Local(StdoutReporter),
    None,
}

impl<'a> ReporterSlot<'a> {
    fn new(reporter: Option<&'a mut dyn Reporter>, verbose: bool) -> Self {
        match reporter {
            Some(r) => Self::External(r),
            None if verbose => Self::Local(StdoutReporter::new()),
            None => Self::None,
        }
    }

    fn as_mut(&mut self) -> Option<&mut dyn Reporter> {
        match self {
            Self::External(r) => Some(*r),
            Self::Local(r) => Some(r),
            Self::None => None,
        }
    }
}

impl BandedBlockedQr {
    /// Creates a solver; fails if the geometry or epsilon is invalid.
    pub fn new(options: BandedQrOptions) -> Result<Self, QrError> {
        options.validate()?;
        Ok(Self {
            options,
            plan: None,
            factors: Factors::empty(0, 0, 0),
            workspace: None,
            perm: Vec::new(),
            stage: Stage::Empty,
            rank: 0,
            info: ComputationInfo::Success,
            last_error: String::new(),
        })
    }

    /// Shorthand for default options with the given block geometry.
    pub fn with_geometry(geometry: BlockGeometry) -> Result<Self, QrError> {
        Self::new(BandedQrOptions {
            geometry,
            ..BandedQrOptions::default()
        })
    }

    pub fn options(&self) -> &BandedQrOptions {
        &self.options
    }

    /// Lays out the blocks for `a` and sizes R, W and Y. Reads only the shape.
    pub fn analyze_pattern<M: ColumnMatrix + ?Sized>(&mut self, a: &M) -> Result<(), QrError> {
        let (m, n) = (a.nrows(), a.ncols());
        let analyzed = BlockPlan::new(&self.options.geometry, m, n)
            .map_err(QrError::from)
            .and_then(|plan| {
                let req = factorize_req(&plan).map_err(|_| QrError::WorkspaceOverflow)?;
                let workspace =
                    GlobalPodBuffer::try_new(req).map_err(|_| QrError::WorkspaceAlloc)?;
                Ok((plan, workspace))
            });
        let (plan, workspace) = match analyzed {
            Ok(analyzed) => analyzed,
            Err(err) => {
                self.plan = None;
                self.workspace = None;
                self.factors = Factors::empty(0, 0, 0);
                self.perm.clear();
                self.stage = Stage::Empty;
                self.rank = 0;
                return self.fail(err);
            }
        };
        log::debug!(
            "analyzed {m}x{n} pattern: {} blocks, column increment {}, last block {} cols",
            plan.num_blocks(),
            plan.col_increment,
            plan.last_block_cols
        );

        self.factors = Factors::empty(m, n, plan.wy_cols());
        self.workspace = Some(workspace);
        self.perm = (0..n).collect();
        self.plan = Some(plan);
        self.stage = Stage::Analyzed;
        self.rank = 0;
        self.info = ComputationInfo::Success;
        self.last_error.clear();
        Ok(())
    }

    /// Numeric factorization of a matrix with the analyzed shape.
    pub fn factorize<M: ColumnMatrix + ?Sized>(&mut self, a: &M) -> Result<(), QrError> {
        self.factorize_with_reporter(a, None)
    }

    /// Like [`factorize`](Self::factorize), reporting each block to `reporter`.
    /// With no reporter and `verbose` set, a table is printed at the end.
    pub fn factorize_with_reporter<M: ColumnMatrix + ?Sized>(
        &mut self,
        a: &M,
        reporter: Option<&mut dyn Reporter>,
    ) -> Result<(), QrError> {
        let (Some(plan), Some(workspace)) = (self.plan.as_ref(), self.workspace.as_mut()) else {
            return self.fail(QrError::NotAnalyzed);
        };
        let expected = (plan.nrows, plan.ncols);
        let actual = (a.nrows(), a.ncols());
        if actual != expected {
            return self.fail(QrError::ShapeChanged { expected, actual });
        }

        let start_time = self.options.verbose.then(Instant::now);
        let mut reporter = ReporterSlot::new(reporter, self.options.verbose);
        let result = factorize_banded(a, plan, PodStack::new(workspace), reporter.as_mut());
        if let Some(reporter) = reporter.as_mut() {
            reporter.on_finish();
        }

        let num_blocks = plan.num_blocks();
        let wy_cols = plan.wy_cols();
        match result {
            Ok(factors) => {
                self.factors = factors;
                self.stage = Stage::Factorized;
                self.rank = actual.1;
                self.info = ComputationInfo::Success;
                self.last_error.clear();
                log::debug!(
                    "factorized {}x{} in {num_blocks} blocks: nnz R={}, W={}, Y={}",
                    actual.0,
                    actual.1,
                    self.factors.r.nnz(),
                    self.factors.w.nnz(),
                    self.factors.y.nnz()
                );
                if let Some(start) = start_time {
                    let elapsed = format_duration(start.elapsed());
                    emit_line(&format!("blocks: {num_blocks}, time: {elapsed}"));
                }
                Ok(())
            }
            Err(err) => {
                // Factors of an earlier matrix no longer describe `a`.
                self.factors = Factors::empty(expected.0, expected.1, wy_cols);
                self.stage = Stage::Analyzed;
                self.rank = 0;
                self.fail(err)
            }
        }
    }

    /// `analyze_pattern` followed by `factorize`.
    pub fn compute<M: ColumnMatrix + ?Sized>(&mut self, a: &M) -> Result<(), QrError> {
        self.analyze_pattern(a)?;
        self.factorize(a)
    }

    fn fail<T>(&mut self, err: QrError) -> Result<T, QrError> {
        log::debug!("banded QR failed: {err}");
        self.info = err.info();
        self.last_error = err.to_string();
        Err(err)
    }

    pub fn rows(&self) -> usize {
        self.plan.as_ref().map_or(0, |p| p.nrows)
    }

    pub fn cols(&self) -> usize {
        self.plan.as_ref().map_or(0, |p| p.ncols)
    }

    pub fn num_blocks(&self) -> usize {
        self.plan.as_ref().map_or(0, BlockPlan::num_blocks)
    }

    /// Block layout of the analyzed pattern.
    pub fn plan(&self) -> Option<&BlockPlan> {
        self.plan.as_ref()
    }

    /// Upper-trapezoidal factor R (`rows x cols`); all zeros until factorized.
    pub fn matrix_r(&self) -> &CscMatrix {
        &self.factors.r
    }

    pub(crate) fn wy(&self) -> Option<WyFactors<'_>> {
        (self.stage == Stage::Factorized).then(|| WyFactors {
            w: &self.factors.w,
            y: &self.factors.y,
            block_cols: self.options.geometry.block_cols,
        })
    }

    /// The orthogonal factor as a lazy operator.
    pub fn matrix_q(&self) -> QOperator<'_> {
        QOperator::new(
            self.wy(),
            ProductSettings {
                parallelism: self.options.parallelism,
                approximate_zero_check: self.options.approximate_zero_check,
                eps: self.options.roundoff_epsilon,
            },
        )
    }

    /// Number of columns after a successful factorization; no rank detection.
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn info(&self) -> ComputationInfo {
        self.info
    }

    /// Identity permutation of the analyzed columns.
    pub fn cols_permutation(&self) -> &[usize] {
        &self.perm
    }

    /// Message of the last failure, empty after a success.
    pub fn last_error_message(&self) -> &str {
        &self.last_error
    }

    pub fn set_roundoff_epsilon(&mut self, eps: f64) -> Result<(), QrError> {
        validate_epsilon(eps)?;
        self.options.roundoff_epsilon = eps;
        Ok(())
    }

    /// Least-squares solution of `A x = b`.
    pub fn solve(&self, b: &[f64]) -> Result<Vec<f64>, QrError> {
        let mut y = self.matrix_q().transpose().apply_vec(b)?;
        self.back_substitute(&mut y)?;
        y.truncate(self.cols());
        Ok(y)
    }

    /// Least-squares solution for every column of `b`.
    pub fn solve_dense(&self, b: MatRef<'_, f64>) -> Result<Mat<f64>, QrError> {
        let qtb = self.matrix_q().transpose().apply_dense(b)?;
        let n = self.cols();
        let mut out = Mat::<f64>::zeros(n, b.ncols());
        let mut y = vec![0.0; qtb.nrows()];
        for j in 0..b.ncols() {
            for (i, yi) in y.iter_mut().enumerate() {
                *yi = qtb.read(i, j);
            }
            self.back_substitute(&mut y)?;
            for (i, &yi) in y.iter().enumerate().take(n) {
                out.write(i, j, yi);
            }
        }
        Ok(out)
    }

    /// Solves `R[..rank, ..rank] x = y[..rank]` in place, column by column,
    /// and zeroes the unknowns past the rank.
    fn back_substitute(&self, y: &mut [f64]) -> Result<(), QrError> {
        let r = &self.factors.r;
        let rank = self.rank;
        for j in (0..rank).rev() {
            let rows = r.row_indices_of_col(j);
            let values = r.values_of_col(j);
            let diag = match rows.iter().rposition(|&row| row == j) {
                Some(pos) => values[pos],
                None => 0.0,
            };
            if diag == 0.0 || !diag.is_finite() {
                return Err(NumericalFailure::SingularDiagonal { col: j }.into());
            }
            let xj = y[j] / diag;
            y[j] = xj;
            if xj == 0.0 {
                continue;
            }
            for (&row, &value) in rows.iter().zip(values) {
                if row < j {
                    y[row] -= value * xj;
                }
            }
        }
        for yi in y.iter_mut().take(self.cols()).skip(rank) {
            *yi = 0.0;
        }
        Ok(())
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs >= 1.0 {
        format!("{:.3} s", secs)
    } else if secs >= 1e-3 {
        format!("{:.3} ms", secs * 1e3)
    } else if secs >= 1e-6 {
        format!("{:.3} us", secs * 1e6)
    } else {
        format!("{:.0} ns", secs * 1e9)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upper_bidiagonal(n: usize) -> CscMatrix {
        let mut triplets = Vec::new();
        for j in 0..n {
            triplets.push((j, j, 2.0 + j as f64));
            if j > 0 {
                triplets.push((j - 1, j, -1.0));
            }
        }
        CscMatrix::from_triplets(n, n, &triplets).unwrap()
    }

    #[test]
    fn solves_square_triangular_system() {
        let a = CscMatrix::from_triplets(4, 2, &[(0, 0, 2.0), (1, 1, 4.0)]).unwrap();
        let mut qr = BandedBlockedQr::new(BandedQrOptions::default()).unwrap();
        qr.compute(&a).unwrap();
        assert_eq!(qr.info(), ComputationInfo::Success);
        assert_eq!(qr.rank(), 2);
        let x = qr.solve(&[2.0, 8.0, 0.0, 0.0]).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-14);
        assert!((x[1] - 2.0).abs() < 1e-14);
    }

    #[test]
    fn single_block_matches_dense_solution() {
        let a = upper_bidiagonal(4);
        let geometry = BlockGeometry::new(4, 4, 0);
        let mut qr = BandedBlockedQr::with_geometry(geometry).unwrap();
        qr.compute(&a).unwrap();
        assert_eq!(qr.num_blocks(), 1);
        let x_true = [1.0, -2.0, 0.5, 3.0];
        let b = a.mul_vec(&x_true).unwrap();
        let x = qr.solve(&b).unwrap();
        for (xi, ti) in x.iter().zip(x_true) {
            assert!((xi - ti).abs() < 1e-12);
        }
    }

    #[test]
    fn factorize_requires_analysis() {
        let a = upper_bidiagonal(4);
        let mut qr = BandedBlockedQr::new(BandedQrOptions::default()).unwrap();
        assert_eq!(qr.factorize(&a), Err(QrError::NotAnalyzed));
        assert_eq!(qr.info(), ComputationInfo::InvalidInput);
        assert!(!qr.last_error_message().is_empty());
        assert!(matches!(qr.solve(&[0.0; 4]), Err(QrError::NotFactorized)));
    }

    #[test]
    fn rejects_invalid_options() {
        let options = BandedQrOptions {
            roundoff_epsilon: -1.0,
            ..BandedQrOptions::default()
        };
        assert!(matches!(
            BandedBlockedQr::new(options),
            Err(QrError::Config(ConfigError::InvalidEpsilon { .. }))
        ));
        let mut qr = BandedBlockedQr::new(BandedQrOptions::default()).unwrap();
        assert!(qr.set_roundoff_epsilon(f64::NAN).is_err());
        assert!(qr.set_roundoff_epsilon(1e-12).is_ok());
        assert_eq!(qr.options().roundoff_epsilon, 1e-12);
    }

    #[test]
    fn zero_column_is_singular() {
        let a = CscMatrix::from_triplets(4, 2, &[(0, 0, 1.0)]).unwrap();
        let mut qr = BandedBlockedQr::new(BandedQrOptions::default()).unwrap();
        qr.compute(&a).unwrap();
        assert_eq!(
            qr.solve(&[1.0, 0.0, 0.0, 0.0]),
            Err(QrError::NumericalIssue(NumericalFailure::SingularDiagonal { col: 1 }))
        );
    }

    #[test]
    fn non_finite_input_is_numerical_issue() {
        let a = CscMatrix::from_triplets(4, 2, &[(0, 0, f64::NAN), (1, 1, 1.0)]).unwrap();
        let mut qr = BandedBlockedQr::new(BandedQrOptions::default()).unwrap();
        qr.analyze_pattern(&a).unwrap();
        assert!(matches!(qr.factorize(&a), Err(QrError::NumericalIssue(_))));
        assert_eq!(qr.info(), ComputationInfo::NumericalIssue);
        assert_eq!(qr.rank(), 0);
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.500 s");
        assert_eq!(format_duration(Duration::from_micros(2500)), "2.500 ms");
        assert_eq!(format_duration(Duration::from_nanos(12)), "12 ns");
    }
}
