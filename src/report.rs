use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets};

/// What one dense block contributed to the factorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReport {
    pub block: usize,
    pub col_start: usize,
    pub width: usize,
    pub active_rows: usize,
    pub implicit_zeros: usize,
    pub solved_rows: usize,
    pub r_entries: usize,
    pub w_entries: usize,
    pub y_entries: usize,
}

pub(crate) fn emit_line(line: &str) {
    if log::log_enabled!(log::Level::Info) {
        log::info!("{line}");
    } else {
        println!("{line}");
    }
}

/// Receives per-block diagnostics while a factorization runs.
pub trait Reporter {
    fn on_block(&mut self, report: &BlockReport);
    fn on_finish(&mut self) {}
}

/// Collects block reports and prints them as a table when the sweep ends.
pub struct StdoutReporter {
    rows: Vec<BlockReport>,
}

impl StdoutReporter {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }
}

impl Default for StdoutReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for StdoutReporter {
    fn on_block(&mut self, report: &BlockReport) {
        self.rows.push(report.clone());
    }

    fn on_finish(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        if !log::log_enabled!(log::Level::Info) {
            println!();
        }
        let mut table = Table::new();
        table.load_preset(presets::UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("block").set_alignment(CellAlignment::Right),
            Cell::new("cols").set_alignment(CellAlignment::Right),
            Cell::new("rows").set_alignment(CellAlignment::Right),
            Cell::new("zeros").set_alignment(CellAlignment::Right),
            Cell::new("solved").set_alignment(CellAlignment::Right),
            Cell::new("nnz R").set_alignment(CellAlignment::Right),
            Cell::new("nnz W").set_alignment(CellAlignment::Right),
            Cell::new("nnz Y").set_alignment(CellAlignment::Right),
        ]);
        for row in &self.rows {
            let cols = format!("{}..{}", row.col_start, row.col_start + row.width);
            table.add_row(vec![
                Cell::new(row.block).set_alignment(CellAlignment::Right),
                Cell::new(cols).set_alignment(CellAlignment::Right),
                Cell::new(row.active_rows).set_alignment(CellAlignment::Right),
                Cell::new(row.implicit_zeros).set_alignment(CellAlignment::Right),
                Cell::new(row.solved_rows).set_alignment(CellAlignment::Right),
                Cell::new(row.r_entries).set_alignment(CellAlignment::Right),
                Cell::new(row.w_entries).set_alignment(CellAlignment::Right),
                Cell::new(row.y_entries).set_alignment(CellAlignment::Right),
            ]);
        }

        for line in table.to_string().lines() {
            emit_line(line);
        }
        self.rows.clear();
    }
}
