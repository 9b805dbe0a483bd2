use crate::matrix::{CscMatrix, PatternError};

/// Append-only list of `(row, col, value)` entries, compressed on demand.
#[derive(Debug, Clone, Default)]
pub struct TripletList {
    entries: Vec<(usize, usize, f64)>,
}

impl TripletList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, row: usize, col: usize, value: f64) {
        self.entries.push((row, col, value));
    }

    /// Pushes the entry unless `value` is exactly zero.
    pub fn push_if_nonzero(&mut self, row: usize, col: usize, value: f64) {
        if value != 0.0 {
            self.entries.push((row, col, value));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Moves every entry of `other` into `self`.
    pub fn append(&mut self, other: &mut TripletList) {
        self.entries.append(&mut other.entries);
    }

    /// Compresses into CSC form: rows sorted inside each column, duplicate
    /// coordinates summed.
    pub fn into_csc(self, nrows: usize, ncols: usize) -> Result<CscMatrix, PatternError> {
        let mut counts = vec![0usize; ncols + 1];
        for &(row, col, _) in &self.entries {
            if col >= ncols {
                return Err(PatternError::ColIndexOutOfBounds { col, ncols });
            }
            if row >= nrows {
                return Err(PatternError::RowIndexOutOfBounds { col, row, nrows });
            }
            counts[col + 1] += 1;
        }
        for col in 0..ncols {
            counts[col + 1] += counts[col];
        }

        // Bucket by column, then sort and merge each column.
        let mut next = counts.clone();
        let mut bucket = vec![(0usize, 0.0f64); self.entries.len()];
        for (row, col, value) in self.entries {
            bucket[next[col]] = (row, value);
            next[col] += 1;
        }

        let mut col_ptrs = Vec::with_capacity(ncols + 1);
        let mut row_indices = Vec::with_capacity(bucket.len());
        let mut values = Vec::with_capacity(bucket.len());
        col_ptrs.push(0);
        for col in 0..ncols {
            let column = &mut bucket[counts[col]..counts[col + 1]];
            column.sort_unstable_by_key(|&(row, _)| row);
            let start = row_indices.len();
            for &(row, value) in column.iter() {
                if row_indices.len() > start && row_indices.last() == Some(&row) {
                    if let Some(last) = values.last_mut() {
                        *last += value;
                    }
                } else {
                    row_indices.push(row);
                    values.push(value);
                }
            }
            col_ptrs.push(row_indices.len());
        }

        Ok(CscMatrix::from_parts(nrows, ncols, col_ptrs, row_indices, values))
    }
}

impl Extend<(usize, usize, f64)> for TripletList {
    fn extend<T: IntoIterator<Item = (usize, usize, f64)>>(&mut self, iter: T) {
        self.entries.extend(iter);
    }
}
