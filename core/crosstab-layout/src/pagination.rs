//! FILENAME: core/crosstab-layout/src/pagination.rs
//! Pagination Adapter - slices a sized grid into pages.
//!
//! The grid is first cut into column bands that fit the page width, then
//! each band is cut into row runs that fit the page height. Pages come
//! out band by band, top to bottom within a band. Breaks prefer track
//! boundaries no spanning cell straddles; if none fits, the last fitting
//! boundary is used, and a single track larger than the page goes on a
//! page of its own.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crosstab_engine::{CrosstabDefinition, CrosstabError, GridCell, Result};

use crate::resolver::ResolvedGrid;

/// Page-level options; by default taken from the crosstab definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageOptions {
    /// Re-emit the column header band at the top of every continuation page.
    pub repeat_column_headers: bool,
    /// Re-emit the row header band at the left of every later column band.
    pub repeat_row_headers: bool,
    /// Gap above the first page of every column band after the first.
    pub column_break_offset: u32,
}

impl Default for PageOptions {
    fn default() -> Self {
        PageOptions {
            repeat_column_headers: true,
            repeat_row_headers: true,
            column_break_offset: 10,
        }
    }
}

impl PageOptions {
    pub fn from_definition(definition: &CrosstabDefinition) -> Self {
        PageOptions {
            repeat_column_headers: definition.repeat_column_headers,
            repeat_row_headers: definition.repeat_row_headers,
            column_break_offset: definition.column_break_offset,
        }
    }
}

/// A cell (or the visible part of one) positioned on a page.
#[derive(Debug, Clone, Copy)]
pub struct PlacedCell<'a> {
    pub cell: &'a GridCell,
    /// Page-local position and size of the visible part.
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Emitted again as part of a repeated header band.
    pub repeated: bool,
    pub continued_above: bool,
    pub continued_below: bool,
    pub continued_left: bool,
    pub continued_right: bool,
}

/// One page worth of the grid.
#[derive(Debug, Clone)]
pub struct PageSlice<'a> {
    pub index: usize,
    pub column_band: usize,
    /// Grid rows this page advances through. Over one column band the
    /// ranges of consecutive pages cover every grid row exactly once.
    pub rows: Range<usize>,
    /// Grid columns of this page's band, excluding repeated row headers.
    pub columns: Range<usize>,
    /// Column header rows repeated above `rows`.
    pub repeated_rows: Range<usize>,
    /// Row header columns repeated left of `columns`.
    pub repeated_columns: Range<usize>,
    /// Gap above the page content.
    pub offset_y: u32,
    pub width: u32,
    pub height: u32,
    pub cells: Vec<PlacedCell<'a>>,
}

// ============================================================================
// BREAK SEARCH
// ============================================================================

/// Break candidates along one axis.
#[derive(Debug)]
struct AxisBreaks<'a> {
    offsets: &'a [u32],
    /// `breakable[b]`: no cell spans across boundary `b`.
    breakable: Vec<bool>,
    /// Leading header tracks that always stay together.
    band: usize,
}

impl<'a> AxisBreaks<'a> {
    fn new(offsets: &'a [u32], band: usize, spans: impl Iterator<Item = (usize, usize)>) -> Self {
        let tracks = offsets.len().saturating_sub(1);
        let mut breakable = vec![true; tracks + 1];
        for (start, end) in spans {
            for b in (start + 1)..end.min(tracks + 1) {
                breakable[b] = false;
            }
        }
        AxisBreaks {
            offsets,
            breakable,
            band,
        }
    }

    fn tracks(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    fn extent(&self, range: &Range<usize>) -> u32 {
        self.offsets[range.end] - self.offsets[range.start]
    }

    /// End (exclusive) of the run starting at `start` that fits `available`.
    fn next_break(&self, start: usize, available: u32) -> usize {
        let tracks = self.tracks();
        let first = (start + 1).max(self.band + 1).min(tracks);
        let mut clean = None;
        let mut any = None;
        for b in first..=tracks {
            if self.offsets[b] - self.offsets[start] > available {
                break;
            }
            any = Some(b);
            if self.breakable[b] {
                clean = Some(b);
            }
        }
        match (clean, any) {
            (Some(b), _) => b,
            (None, Some(b)) => {
                log::warn!("no clean break after track {}, breaking inside a span at {}", start, b);
                b
            }
            (None, None) => first,
        }
    }
}

#[derive(Debug, Clone)]
struct ColumnBand {
    columns: Range<usize>,
    repeated: Range<usize>,
}

#[derive(Debug, Clone)]
struct Segment {
    range: Range<usize>,
    base: u32,
    repeated: bool,
}

/// Visible part of `start..end` within the segments: page-local start,
/// size, continued before, continued after, repeated.
fn clip(start: usize, end: usize, segments: &[Segment], offsets: &[u32]) -> Option<(u32, u32, bool, bool, bool)> {
    segments.iter().find_map(|seg| {
        let s = start.max(seg.range.start);
        let e = end.min(seg.range.end);
        (s < e).then(|| {
            (
                seg.base + offsets[s] - offsets[seg.range.start],
                offsets[e] - offsets[s],
                start < seg.range.start,
                end > seg.range.end,
                seg.repeated,
            )
        })
    })
}

// ============================================================================
// PAGINATOR
// ============================================================================

/// Lazy, finite sequence of pages over a sized grid. Not restartable:
/// call `paginate` again to start over.
#[derive(Debug)]
pub struct Paginator<'a> {
    grid: &'a ResolvedGrid,
    options: PageOptions,
    page_height: u32,
    rows: AxisBreaks<'a>,
    bands: Vec<ColumnBand>,
    band: usize,
    next_row: usize,
    index: usize,
}

/// Plans column bands for `grid` and returns the page iterator.
///
/// Breaks land on boundaries no spanning cell crosses. When no such
/// boundary fits, the run ends at the last boundary that fits, splitting
/// the span across pages (logged with `warn!`); only when not even one
/// track fits does that track go on a page of its own.
pub fn paginate<'a>(
    grid: &'a ResolvedGrid,
    page_height: u32,
    page_width: u32,
    options: &PageOptions,
) -> Result<Paginator<'a>> {
    if page_height == 0 || page_width == 0 {
        return Err(CrosstabError::InvalidPageArea {
            width: page_width,
            height: page_height,
        });
    }

    let cells = grid.cells();
    let rows = AxisBreaks::new(
        &grid.row_offsets,
        grid.grid.header_rows(),
        cells.iter().map(|c| (c.row, c.row_end())),
    );
    let columns = AxisBreaks::new(
        &grid.column_offsets,
        grid.grid.header_columns(),
        cells.iter().map(|c| (c.column, c.column_end())),
    );

    let header_columns = grid.grid.header_columns();
    let mut bands = Vec::new();
    let mut start = 0;
    while start < columns.tracks() {
        let mut repeated = if start > 0 && options.repeat_row_headers { 0..header_columns } else { 0..0 };
        let mut repeated_width = columns.extent(&repeated);
        if repeated_width >= page_width {
            log::warn!("row headers wider than the page, not repeating them");
            repeated = 0..0;
            repeated_width = 0;
        }
        let end = columns.next_break(start, page_width - repeated_width);
        bands.push(ColumnBand {
            columns: start..end,
            repeated,
        });
        start = end;
    }

    log::debug!(
        "paginate '{}': {} column bands on {}x{} pages",
        grid.grid.name,
        bands.len(),
        page_width,
        page_height
    );

    Ok(Paginator {
        grid,
        options: *options,
        page_height,
        rows,
        bands,
        band: 0,
        next_row: 0,
        index: 0,
    })
}

impl<'a> Paginator<'a> {
    /// Number of column bands the grid was cut into.
    pub fn column_bands(&self) -> usize {
        self.bands.len()
    }

    fn place(&self, row_segments: &[Segment], column_segments: &[Segment]) -> Vec<PlacedCell<'a>> {
        let grid = self.grid;
        grid.cells()
            .iter()
            .filter_map(|cell| {
                let (y, height, above, below, repeated_row) =
                    clip(cell.row, cell.row_end(), row_segments, &grid.row_offsets)?;
                let (x, width, left, right, repeated_column) =
                    clip(cell.column, cell.column_end(), column_segments, &grid.column_offsets)?;
                Some(PlacedCell {
                    cell,
                    x,
                    y,
                    width,
                    height,
                    repeated: repeated_row || repeated_column,
                    continued_above: above,
                    continued_below: below,
                    continued_left: left,
                    continued_right: right,
                })
            })
            .collect()
    }
}

impl<'a> Iterator for Paginator<'a> {
    type Item = PageSlice<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let total_rows = self.rows.tracks();
        if total_rows == 0 {
            return None;
        }
        let band = self.bands.get(self.band)?.clone();

        let offset_y = match self.options.column_break_offset {
            gap if self.band > 0 && self.next_row == 0 && gap < self.page_height => gap,
            _ => 0,
        };
        let mut available = self.page_height - offset_y;

        let header_rows = self.grid.grid.header_rows();
        let mut repeated_rows = if self.next_row > 0 && self.options.repeat_column_headers {
            0..header_rows
        } else {
            0..0
        };
        let mut repeated_height = self.rows.extent(&repeated_rows);
        if repeated_height >= available {
            log::warn!("column headers taller than the page, not repeating them");
            repeated_rows = 0..0;
            repeated_height = 0;
        }
        available -= repeated_height;

        let end = self.rows.next_break(self.next_row, available);
        let rows = self.next_row..end;

        let row_segments: SmallVec<[Segment; 2]> = [
            Segment {
                range: repeated_rows.clone(),
                base: offset_y,
                repeated: true,
            },
            Segment {
                range: rows.clone(),
                base: offset_y + repeated_height,
                repeated: false,
            },
        ]
        .into_iter()
        .collect();
        let repeated_width = self.grid.columns_width(band.repeated.start, band.repeated.end);
        let column_segments: SmallVec<[Segment; 2]> = [
            Segment {
                range: band.repeated.clone(),
                base: 0,
                repeated: true,
            },
            Segment {
                range: band.columns.clone(),
                base: repeated_width,
                repeated: false,
            },
        ]
        .into_iter()
        .collect();

        let cells = self.place(&row_segments, &column_segments);
        let slice = PageSlice {
            index: self.index,
            column_band: self.band,
            height: offset_y + repeated_height + self.rows.extent(&rows),
            width: repeated_width + self.grid.columns_width(band.columns.start, band.columns.end),
            rows,
            columns: band.columns,
            repeated_rows,
            repeated_columns: band.repeated,
            offset_y,
            cells,
        };

        self.index += 1;
        if end >= total_rows {
            self.band += 1;
            self.next_row = 0;
        } else {
            self.next_row = end;
        }
        Some(slice)
    }
}
