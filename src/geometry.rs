use core::fmt;

/// Dense block shape used to sweep a banded matrix.
///
/// Consecutive blocks advance by `block_cols - block_overlap` columns. The row
/// window of each block grows until it reaches `max_active_rows`; rows past
/// that cap are treated as implicit zeros. The first and last blocks are
/// never capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGeometry {
    /// Height of the first dense block.
    pub block_rows: usize,
    /// Width of every dense block but possibly the last.
    pub block_cols: usize,
    /// Columns shared by consecutive blocks.
    pub block_overlap: usize,
    /// Cap on the rows kept in a dense block, `2 * block_rows` when `None`.
    pub max_active_rows: Option<usize>,
}

impl Default for BlockGeometry {
    fn default() -> Self {
        Self {
            block_rows: 4,
            block_cols: 2,
            block_overlap: 0,
            max_active_rows: None,
        }
    }
}

/// Invalid block geometry or solver options.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// block_rows or block_cols is zero.
    ZeroBlockSize { block_rows: usize, block_cols: usize },
    /// block_overlap leaves no column increment.
    OverlapTooLarge { block_overlap: usize, block_cols: usize },
    /// Dense blocks must be at least as tall as they are wide.
    BlockTooWide { block_rows: usize, block_cols: usize },
    /// The row cap cannot hold a full block plus the rows it triangularizes.
    ActiveRowCapTooSmall { max_active_rows: usize, minimum: usize },
    /// The round-off epsilon is negative or not finite.
    InvalidEpsilon { eps: f64 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroBlockSize {
                block_rows,
                block_cols,
            } => write!(
                f,
                "block sizes must be positive (block_rows={block_rows}, block_cols={block_cols})"
            ),
            Self::OverlapTooLarge {
                block_overlap,
                block_cols,
            } => write!(
                f,
                "block_overlap {block_overlap} must be smaller than block_cols {block_cols}"
            ),
            Self::BlockTooWide {
                block_rows,
                block_cols,
            } => write!(
                f,
                "block_cols {block_cols} exceeds block_rows {block_rows}"
            ),
            Self::ActiveRowCapTooSmall {
                max_active_rows,
                minimum,
            } => write!(
                f,
                "max_active_rows {max_active_rows} is below the minimum {minimum}"
            ),
            Self::InvalidEpsilon { eps } => {
                write!(f, "round-off epsilon must be finite and non-negative (got {eps})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Matrix shape that the configured geometry cannot sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    /// The matrix has no columns.
    Empty { nrows: usize, ncols: usize },
    /// Fewer rows than columns.
    Underdetermined { nrows: usize, ncols: usize },
    /// The row windows of the leading blocks run past the last row.
    WindowOverrun { nrows: usize, required: usize },
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty { nrows, ncols } => {
                write!(f, "matrix is empty: nrows={nrows}, ncols={ncols}")
            }
            Self::Underdetermined { nrows, ncols } => {
                write!(f, "matrix has fewer rows than columns: nrows={nrows}, ncols={ncols}")
            }
            Self::WindowOverrun { nrows, required } => {
                write!(
                    f,
                    "block geometry needs at least {required} rows (matrix has {nrows})"
                )
            }
        }
    }
}

impl std::error::Error for ShapeError {}

impl BlockGeometry {
    pub fn new(block_rows: usize, block_cols: usize, block_overlap: usize) -> Self {
        Self {
            block_rows,
            block_cols,
            block_overlap,
            max_active_rows: None,
        }
    }

    /// Overrides the active-row cap.
    pub fn with_max_active_rows(mut self, max_active_rows: usize) -> Self {
        self.max_active_rows = Some(max_active_rows);
        self
    }

    /// Columns between the starts of consecutive blocks.
    pub fn col_increment(&self) -> usize {
        self.block_cols - self.block_overlap
    }

    /// Rows added to the window per block.
    pub fn row_increment(&self) -> usize {
        self.block_rows - self.col_increment()
    }

    /// Effective active-row cap.
    pub fn active_row_cap(&self) -> usize {
        self.max_active_rows.unwrap_or(2 * self.block_rows)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_rows == 0 || self.block_cols == 0 {
            return Err(ConfigError::ZeroBlockSize {
                block_rows: self.block_rows,
                block_cols: self.block_cols,
            });
        }
        if self.block_overlap >= self.block_cols {
            return Err(ConfigError::OverlapTooLarge {
                block_overlap: self.block_overlap,
                block_cols: self.block_cols,
            });
        }
        if self.block_cols > self.block_rows {
            return Err(ConfigError::BlockTooWide {
                block_rows: self.block_rows,
                block_cols: self.block_cols,
            });
        }
        let minimum = self.block_rows + self.block_cols;
        let cap = self.active_row_cap();
        if cap < minimum {
            return Err(ConfigError::ActiveRowCapTooSmall {
                max_active_rows: cap,
                minimum,
            });
        }
        Ok(())
    }
}

/// Row window and column range of one dense block.
///
/// Local row `r` maps to global row `row_start + r` when `r < top_rows`, and to
/// `row_start + implicit_zeros + r` otherwise. The `implicit_zeros` rows in
/// between are dropped from the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockWindow {
    pub index: usize,
    /// First column (and first row) of the block.
    pub col_start: usize,
    /// Number of columns.
    pub width: usize,
    /// Rows in the dense block.
    pub active_rows: usize,
    /// Rows mapped without the implicit-zero offset.
    pub top_rows: usize,
    /// Rows skipped between the top and trailing parts.
    pub implicit_zeros: usize,
    /// Leading rows of the block's R that are final.
    pub solved_rows: usize,
}

impl BlockWindow {
    pub fn row_start(&self) -> usize {
        self.col_start
    }

    /// One past the last global row covered by the window.
    pub fn row_end(&self) -> usize {
        self.col_start + self.implicit_zeros + self.active_rows
    }

    /// Global row of local row `r`.
    #[inline]
    pub fn global_row(&self, r: usize) -> usize {
        if r < self.top_rows {
            self.col_start + r
        } else {
            self.col_start + self.implicit_zeros + r
        }
    }

    /// Local row of global row `row`, if the block keeps it.
    #[inline]
    pub fn local_row(&self, row: usize) -> Option<usize> {
        let offset = row.checked_sub(self.col_start)?;
        if offset < self.top_rows {
            Some(offset)
        } else {
            let r = offset.checked_sub(self.implicit_zeros)?;
            (r >= self.top_rows && r < self.active_rows).then_some(r)
        }
    }
}

/// Block schedule for a matrix shape, computed once per sparsity pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPlan {
    pub nrows: usize,
    pub ncols: usize,
    pub block_cols: usize,
    pub block_overlap: usize,
    pub col_increment: usize,
    pub last_block_cols: usize,
    pub windows: Vec<BlockWindow>,
}

impl BlockPlan {
    /// Lays out the blocks for an `nrows x ncols` matrix.
    ///
    /// The window of block `i + 1` is the window of block `i` shifted down by
    /// the column increment and extended by the row increment; the
    /// second-to-last step is resized so that the final window ends on the
    /// last matrix row. Blocks near the right edge are narrowed to the
    /// remaining columns.
    pub fn new(geometry: &BlockGeometry, nrows: usize, ncols: usize) -> Result<Self, ShapeError> {
        if ncols == 0 || nrows == 0 {
            return Err(ShapeError::Empty { nrows, ncols });
        }
        if nrows < ncols {
            return Err(ShapeError::Underdetermined { nrows, ncols });
        }

        let col_increment = geometry.col_increment();
        let row_increment = geometry.row_increment();
        let base_rows = geometry.block_rows;
        let cap = geometry.active_row_cap();
        let num_blocks = ncols.div_ceil(col_increment);
        let last_block_cols = ncols - (num_blocks - 1) * col_increment;

        if num_blocks > 1 {
            // Block i (i < num_blocks - 1) ends on row (i + 1) * block_rows.
            let required = (num_blocks - 1) * base_rows;
            if nrows < required {
                return Err(ShapeError::WindowOverrun { nrows, required });
            }
        }

        let mut windows = Vec::with_capacity(num_blocks);
        let mut window_rows = if num_blocks == 1 { nrows } else { base_rows };
        for index in 0..num_blocks {
            let col_start = index * col_increment;
            let last = index + 1 == num_blocks;

            // The first block has nothing to drop; the last one keeps every
            // remaining row.
            let (active_rows, implicit_zeros) = if index > 0 && !last && window_rows > cap {
                (cap, window_rows - cap)
            } else {
                (window_rows, 0)
            };
            let top_rows = if implicit_zeros > 0 {
                active_rows - base_rows
            } else {
                active_rows
            };

            windows.push(BlockWindow {
                index,
                col_start,
                width: if last {
                    last_block_cols
                } else {
                    geometry.block_cols.min(ncols - col_start)
                },
                active_rows,
                top_rows,
                implicit_zeros,
                solved_rows: if last { last_block_cols } else { col_increment },
            });

            if !last {
                window_rows = if index + 2 == num_blocks {
                    nrows - col_start - col_increment
                } else {
                    window_rows + row_increment
                };
            }
        }

        Ok(Self {
            nrows,
            ncols,
            block_cols: geometry.block_cols,
            block_overlap: geometry.block_overlap,
            col_increment,
            last_block_cols,
            windows,
        })
    }

    pub fn num_blocks(&self) -> usize {
        self.windows.len()
    }

    /// Columns of the W and Y factors.
    pub fn wy_cols(&self) -> usize {
        self.num_blocks() * self.block_cols
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_geometry() {
        assert!(matches!(
            BlockGeometry::new(4, 2, 2).validate(),
            Err(ConfigError::OverlapTooLarge { .. })
        ));
        assert!(matches!(
            BlockGeometry::new(0, 2, 0).validate(),
            Err(ConfigError::ZeroBlockSize { .. })
        ));
        assert!(matches!(
            BlockGeometry::new(2, 3, 0).validate(),
            Err(ConfigError::BlockTooWide { .. })
        ));
        assert!(matches!(
            BlockGeometry::new(4, 2, 0).with_max_active_rows(5).validate(),
            Err(ConfigError::ActiveRowCapTooSmall { minimum: 6, .. })
        ));
        assert!(BlockGeometry::default().validate().is_ok());
    }

    #[test]
    fn plans_regular_sweep() {
        let plan = BlockPlan::new(&BlockGeometry::new(4, 2, 0), 12, 6).unwrap();
        assert_eq!(plan.num_blocks(), 3);
        assert_eq!(plan.wy_cols(), 6);
        let rows: Vec<_> = plan
            .windows
            .iter()
            .map(|w| (w.row_start(), w.row_end(), w.implicit_zeros))
            .collect();
        assert_eq!(rows, vec![(0, 4, 0), (2, 8, 0), (4, 12, 0)]);
    }

    #[test]
    fn plans_overlapping_sweep() {
        let plan = BlockPlan::new(&BlockGeometry::new(4, 3, 1), 12, 6).unwrap();
        assert_eq!(plan.num_blocks(), 3);
        assert_eq!(plan.last_block_cols, 2);
        let last = plan.windows[2];
        assert_eq!((last.col_start, last.width, last.solved_rows), (4, 2, 2));
        assert_eq!(last.row_end(), 12);
    }

    #[test]
    fn caps_active_rows() {
        let plan = BlockPlan::new(&BlockGeometry::new(4, 2, 0), 20, 10).unwrap();
        assert_eq!(plan.num_blocks(), 5);
        let w = plan.windows[3];
        assert_eq!(w.active_rows, 8);
        assert_eq!(w.implicit_zeros, 2);
        assert_eq!(w.top_rows, 4);
        assert_eq!((w.row_start(), w.row_end()), (6, 16));
        assert_eq!(w.global_row(3), 9);
        assert_eq!(w.global_row(4), 12);
        assert_eq!(w.local_row(10), None);
        assert_eq!(w.local_row(12), Some(4));
        assert_eq!(plan.windows[4].row_end(), 20);
    }

    #[test]
    fn last_window_is_never_capped() {
        let plan = BlockPlan::new(&BlockGeometry::new(4, 2, 0), 100, 6).unwrap();
        let last = plan.windows[2];
        assert_eq!(last.implicit_zeros, 0);
        assert_eq!(last.active_rows, 96);
        assert_eq!((last.row_start(), last.row_end()), (4, 100));
        assert_eq!(last.local_row(50), Some(46));

        let capped = BlockPlan::new(&BlockGeometry::new(4, 2, 0), 20, 10).unwrap();
        assert_eq!(capped.windows[4].implicit_zeros, 0);
        assert_eq!(capped.windows[4].active_rows, 12);
    }

    #[test]
    fn narrows_blocks_at_right_edge() {
        // Overlap larger than the column increment: blocks 3 and 4 would run
        // past the last column.
        let plan = BlockPlan::new(&BlockGeometry::new(4, 3, 2), 24, 6).unwrap();
        assert_eq!(plan.num_blocks(), 6);
        let widths: Vec<_> = plan.windows.iter().map(|w| w.width).collect();
        assert_eq!(widths, vec![3, 3, 3, 3, 2, 1]);
        for w in &plan.windows {
            assert!(w.col_start + w.width <= 6);
            assert!(w.solved_rows <= w.width);
        }
        assert_eq!(plan.windows[4].solved_rows, 1);
    }

    #[test]
    fn final_window_absorbs_extra_rows() {
        let plan = BlockPlan::new(&BlockGeometry::new(4, 2, 0).with_max_active_rows(32), 15, 6).unwrap();
        let last = plan.windows[2];
        assert_eq!((last.row_start(), last.row_end()), (4, 15));
        assert_eq!(last.implicit_zeros, 0);
    }

    #[test]
    fn rejects_short_matrices() {
        let geometry = BlockGeometry::new(4, 2, 0);
        assert!(matches!(
            BlockPlan::new(&geometry, 3, 4),
            Err(ShapeError::Underdetermined { .. })
        ));
        assert!(matches!(
            BlockPlan::new(&geometry, 7, 6),
            Err(ShapeError::WindowOverrun { required: 8, .. })
        ));
        let single = BlockPlan::new(&geometry, 3, 2).unwrap();
        assert_eq!(single.windows[0].active_rows, 3);
    }
}
