//! FILENAME: core/crosstab-engine/src/grid.rs
//! The frozen output of a fill pass.
//!
//! Grid coordinates put the column header band first (one grid row per
//! column group) and the row header band first horizontally (one grid
//! column per row group):
//!
//! ```text
//!  +---------+----------------------+
//!  | corner  | column headers       |
//!  +---------+----------------------+
//!  | row     | data body            |
//!  | headers |                      |
//!  +---------+----------------------+
//! ```

use smallvec::SmallVec;

use crate::bucket::Bucket;
use crate::cell::{CellType, GridCell};
use crate::error::{CrosstabError, Result, Stage};

/// One realized row or column of the data body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisEntry {
    /// One bucket per group level. Levels at or below `total_level` hold
    /// total buckets.
    pub path: SmallVec<[Bucket; 4]>,

    /// The group whose total this entry is, if any.
    pub total_level: Option<usize>,
}

impl AxisEntry {
    pub fn leaf(path: SmallVec<[Bucket; 4]>) -> Self {
        AxisEntry { path, total_level: None }
    }

    pub fn is_total(&self) -> bool {
        self.total_level.is_some()
    }
}

/// Header bands, data body and corner of one crosstab.
#[derive(Debug, Clone)]
pub struct Grid {
    pub name: String,
    pub row_group_count: usize,
    pub column_group_count: usize,
    pub rows: Vec<AxisEntry>,
    pub columns: Vec<AxisEntry>,
    pub cells: Vec<GridCell>,
    row_count: usize,
    column_count: usize,
    /// Cell index per (data row, data column), row-major.
    data_index: Vec<Option<usize>>,
}

impl Grid {
    pub fn new(
        name: impl Into<String>,
        row_group_count: usize,
        column_group_count: usize,
        rows: Vec<AxisEntry>,
        columns: Vec<AxisEntry>,
        cells: Vec<GridCell>,
    ) -> Self {
        let row_count = column_group_count + rows.len();
        let column_count = row_group_count + columns.len();
        let mut grid = Grid {
            name: name.into(),
            row_group_count,
            column_group_count,
            rows,
            columns,
            cells,
            row_count,
            column_count,
            data_index: Vec::new(),
        };
        grid.index_body();
        grid
    }

    /// The grid of a crosstab that received no records: a single
    /// placeholder cell, or nothing at all.
    pub fn no_data(name: impl Into<String>, placeholder: Option<GridCell>) -> Self {
        let (row_count, column_count) = if placeholder.is_some() { (1, 1) } else { (0, 0) };
        Grid {
            name: name.into(),
            row_group_count: 0,
            column_group_count: 0,
            rows: Vec::new(),
            columns: Vec::new(),
            cells: placeholder.into_iter().collect(),
            row_count,
            column_count,
            data_index: Vec::new(),
        }
    }

    fn index_body(&mut self) {
        let width = self.columns.len();
        self.data_index = vec![None; self.rows.len() * width];
        for (i, cell) in self.cells.iter().enumerate() {
            if !matches!(cell.cell_type, CellType::Data | CellType::NoDataCell) {
                continue;
            }
            let (Some(r), Some(c)) = (
                cell.row.checked_sub(self.column_group_count),
                cell.column.checked_sub(self.row_group_count),
            ) else {
                continue;
            };
            if r < self.rows.len() && c < width {
                self.data_index[r * width + c] = Some(i);
            }
        }
    }

    /// Total grid rows, header band included.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Total grid columns, header band included.
    pub fn column_count(&self) -> usize {
        self.column_count
    }

    /// Grid rows occupied by column headers.
    pub fn header_rows(&self) -> usize {
        self.column_group_count
    }

    /// Grid columns occupied by row headers.
    pub fn header_columns(&self) -> usize {
        self.row_group_count
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Whether the grid holds only the placeholder of an empty input.
    pub fn is_no_data(&self) -> bool {
        self.rows.is_empty() && self.cells.len() == 1 && self.cells[0].cell_type == CellType::NoDataCell
    }

    pub fn corner(&self) -> Option<&GridCell> {
        self.cells.iter().find(|c| c.cell_type == CellType::CrosstabHeader)
    }

    pub fn row_headers(&self) -> impl Iterator<Item = &GridCell> {
        self.cells.iter().filter(|c| c.cell_type == CellType::RowHeader)
    }

    pub fn column_headers(&self) -> impl Iterator<Item = &GridCell> {
        self.cells.iter().filter(|c| c.cell_type == CellType::ColumnHeader)
    }

    /// The body cell at a data row and data column (indices into `rows`
    /// and `columns`).
    pub fn data_cell(&self, row: usize, column: usize) -> Option<&GridCell> {
        if row >= self.rows.len() || column >= self.columns.len() {
            return None;
        }
        self.data_index[row * self.columns.len() + column].map(|i| &self.cells[i])
    }

    /// The cell covering a grid position.
    pub fn cell_at(&self, row: usize, column: usize) -> Option<&GridCell> {
        self.cells
            .iter()
            .find(|c| c.row <= row && row < c.row_end() && c.column <= column && column < c.column_end())
    }

    pub fn is_laid_out(&self) -> bool {
        self.cells.iter().all(|c| c.layout.is_some())
    }

    /// Checks that every span stays within the tracks realized for it:
    /// header spans within their band and within the entries their bucket
    /// realized, body cells within the body.
    pub fn validate(&self, stage: Stage) -> Result<()> {
        let (c, r) = (self.column_group_count, self.row_group_count);
        for cell in &self.cells {
            let (row_limit, column_limit) = match cell.cell_type {
                CellType::CrosstabHeader => (self.header_rows(), self.header_columns()),
                CellType::ColumnHeader => (self.header_rows(), self.column_count),
                CellType::RowHeader => (self.row_count, self.header_columns()),
                CellType::Data | CellType::NoDataCell => (self.row_count, self.column_count),
            };
            check_span(cell, stage, cell.row, cell.row_span, row_limit)?;
            check_span(cell, stage, cell.column, cell.column_span, column_limit)?;

            match cell.cell_type {
                CellType::RowHeader => {
                    let realized = cell
                        .row
                        .checked_sub(c)
                        .map_or(0, |start| realized_span(&self.rows, start, cell.column));
                    check_span(cell, stage, 0, cell.row_span, realized)?;
                }
                CellType::ColumnHeader => {
                    let realized = cell
                        .column
                        .checked_sub(r)
                        .map_or(0, |start| realized_span(&self.columns, start, cell.row));
                    check_span(cell, stage, 0, cell.column_span, realized)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Whether every grid position is covered by exactly one cell.
    pub fn is_tiled(&self) -> bool {
        let mut covered = vec![0u8; self.row_count * self.column_count];
        for cell in &self.cells {
            for r in cell.row..cell.row_end().min(self.row_count) {
                for c in cell.column..cell.column_end().min(self.column_count) {
                    covered[r * self.column_count + c] += 1;
                }
            }
        }
        covered.iter().all(|&n| n == 1)
    }
}

/// Number of consecutive entries from `start` that share the bucket
/// path of `entries[start]` down to `level`. A total bucket at `level`
/// realizes only its own entry.
fn realized_span(entries: &[AxisEntry], start: usize, level: usize) -> usize {
    let Some(key) = entries.get(start).and_then(|e| e.path.get(..=level)) else {
        return 0;
    };
    if key[level].is_total {
        return 1;
    }
    entries[start..]
        .iter()
        .take_while(|e| e.path.get(..=level) == Some(key))
        .count()
}

fn check_span(cell: &GridCell, stage: Stage, start: usize, span: usize, limit: usize) -> Result<()> {
    let available = limit.saturating_sub(start);
    if span == 0 || span > available {
        return Err(CrosstabError::InvalidSpan {
            stage,
            cell_type: cell.cell_type,
            row: cell.row,
            column: cell.column,
            span,
            available,
        });
    }
    Ok(())
}
