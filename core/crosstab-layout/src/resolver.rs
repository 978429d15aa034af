//! FILENAME: core/crosstab-layout/src/resolver.rs
//! Cell Layout Resolver - two-pass sizing of a frozen grid.
//!
//! Pass 1 measures every cell and sizes each row (column) to the tallest
//! (widest) cell that occupies only that row (column).
//!
//! Pass 2 reconciles spanning cells, narrowest spans first: when a cell
//! needs more than the tracks it spans add up to, the excess goes to
//! the stretch tracks among them (split evenly) or else to all of them in
//! proportion to their current size. Tracks only ever grow, so a cell
//! satisfied once stays satisfied and the pass settles within
//! header depth + 1 rounds.
//!
//! Finally every cell gets the summed size of its tracks and a content
//! box placed according to its position attributes.

use crosstab_engine::{
    CellLayout, ContentBox, CrosstabError, Extent, Grid, GridCell, HorizontalPosition, Result, Stage,
    VerticalPosition,
};

use crate::measure::ContentMeasurer;

/// A grid with every cell sized and positioned.
#[derive(Debug, Clone)]
pub struct ResolvedGrid {
    pub grid: Grid,
    pub column_widths: Vec<u32>,
    pub row_heights: Vec<u32>,
    /// `column_offsets[i]` is the x of column `i`; the last entry is the width.
    pub column_offsets: Vec<u32>,
    /// `row_offsets[i]` is the y of row `i`; the last entry is the height.
    pub row_offsets: Vec<u32>,
    pub width: u32,
    pub height: u32,
}

impl ResolvedGrid {
    pub fn cells(&self) -> &[GridCell] {
        &self.grid.cells
    }

    /// Height of the grid rows `start..end`.
    pub fn rows_height(&self, start: usize, end: usize) -> u32 {
        self.row_offsets[end] - self.row_offsets[start]
    }

    /// Width of the grid columns `start..end`.
    pub fn columns_width(&self, start: usize, end: usize) -> u32 {
        self.column_offsets[end] - self.column_offsets[start]
    }
}

/// Sizes every cell of `grid`. Any measurement failure aborts the whole
/// layout; no partial geometry is returned.
pub fn resolve<M>(mut grid: Grid, measurer: &M) -> Result<ResolvedGrid>
where
    M: ContentMeasurer + ?Sized,
{
    grid.validate(Stage::Layout)?;

    let natural = measure_cells(&grid.cells, measurer)?;

    // Pass 1
    let mut row_heights = vec![0u32; grid.row_count()];
    let mut column_widths = vec![0u32; grid.column_count()];
    for (cell, extent) in grid.cells.iter().zip(&natural) {
        if cell.row_span == 1 {
            row_heights[cell.row] = row_heights[cell.row].max(extent.height);
        }
        if cell.column_span == 1 {
            column_widths[cell.column] = column_widths[cell.column].max(extent.width);
        }
    }

    // Pass 2
    let stretch_rows = stretch_tracks(&grid.cells, grid.row_count(), |c| {
        (c.row_span == 1 && c.style.position_y == VerticalPosition::Stretch).then_some(c.row)
    });
    let stretch_columns = stretch_tracks(&grid.cells, grid.column_count(), |c| {
        (c.column_span == 1 && c.style.position_x == HorizontalPosition::Stretch).then_some(c.column)
    });

    let mut spanning: Vec<usize> = (0..grid.cells.len())
        .filter(|&i| !grid.cells[i].is_leaf())
        .collect();
    spanning.sort_by_key(|&i| {
        let c = &grid.cells[i];
        (c.row_span.max(c.column_span), c.row, c.column)
    });

    let max_rounds = grid.header_rows().max(grid.header_columns()) + 1;
    let mut rounds = 0;
    loop {
        let mut changed = false;
        for &i in &spanning {
            let cell = &grid.cells[i];
            if cell.row_span > 1 {
                changed |= distribute(
                    &mut row_heights[cell.row..cell.row_end()],
                    &stretch_rows[cell.row..cell.row_end()],
                    natural[i].height,
                );
            }
            if cell.column_span > 1 {
                changed |= distribute(
                    &mut column_widths[cell.column..cell.column_end()],
                    &stretch_columns[cell.column..cell.column_end()],
                    natural[i].width,
                );
            }
        }
        rounds += 1;
        if !changed || rounds >= max_rounds {
            break;
        }
    }

    let row_offsets = prefix_sums(&row_heights);
    let column_offsets = prefix_sums(&column_widths);

    for (cell, extent) in grid.cells.iter_mut().zip(&natural) {
        let x = column_offsets[cell.column];
        let y = row_offsets[cell.row];
        let width = column_offsets[cell.column_end()] - x;
        let height = row_offsets[cell.row_end()] - y;
        cell.layout = Some(CellLayout {
            x,
            y,
            width,
            height,
            natural: *extent,
            content: place_content(cell, *extent, width, height),
        });
    }

    let width = column_offsets.last().copied().unwrap_or(0);
    let height = row_offsets.last().copied().unwrap_or(0);
    log::debug!(
        "layout '{}': {}x{} tracks, {}x{} units, {} span rounds",
        grid.name,
        row_heights.len(),
        column_widths.len(),
        width,
        height,
        rounds
    );

    Ok(ResolvedGrid {
        grid,
        column_widths,
        row_heights,
        column_offsets,
        row_offsets,
        width,
        height,
    })
}

// ============================================================================
// PASS 1: MEASUREMENT
// ============================================================================

fn measurement_error(cell: &GridCell, reason: String) -> CrosstabError {
    CrosstabError::LayoutMeasurement {
        cell_type: cell.cell_type,
        row: cell.row,
        column: cell.column,
        reason,
    }
}

#[cfg(feature = "parallel")]
fn measure_cells<M>(cells: &[GridCell], measurer: &M) -> Result<Vec<Extent>>
where
    M: ContentMeasurer + ?Sized,
{
    use rayon::prelude::*;

    cells
        .par_iter()
        .map(|cell| measurer.measure(cell).map_err(|e| measurement_error(cell, e.reason)))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn measure_cells<M>(cells: &[GridCell], measurer: &M) -> Result<Vec<Extent>>
where
    M: ContentMeasurer + ?Sized,
{
    cells
        .iter()
        .map(|cell| measurer.measure(cell).map_err(|e| measurement_error(cell, e.reason)))
        .collect()
}

// ============================================================================
// PASS 2: SPAN RECONCILIATION
// ============================================================================

fn stretch_tracks<F>(cells: &[GridCell], count: usize, track: F) -> Vec<bool>
where
    F: Fn(&GridCell) -> Option<usize>,
{
    let mut out = vec![false; count];
    for index in cells.iter().filter_map(track) {
        out[index] = true;
    }
    out
}

/// Grows `tracks` until they add up to `need`. Returns whether anything
/// changed.
fn distribute(tracks: &mut [u32], stretch: &[bool], need: u32) -> bool {
    let current: u64 = tracks.iter().map(|&t| t as u64).sum();
    let need = need as u64;
    if need <= current {
        return false;
    }
    let excess = need - current;

    let eligible: Vec<usize> = (0..tracks.len()).filter(|&i| stretch[i]).collect();
    if !eligible.is_empty() {
        share_evenly(tracks, &eligible, excess);
        return true;
    }

    if current == 0 {
        let all: Vec<usize> = (0..tracks.len()).collect();
        share_evenly(tracks, &all, excess);
        return true;
    }

    // Proportional shares, remainder by largest fraction then lowest index.
    let mut given = 0u64;
    let mut fractions: Vec<(u64, usize)> = Vec::with_capacity(tracks.len());
    for (i, track) in tracks.iter_mut().enumerate() {
        let product = excess * (*track as u64);
        let share = product / current;
        fractions.push((product % current, i));
        *track = track.saturating_add(share as u32);
        given += share;
    }
    fractions.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    for &(_, i) in fractions.iter().take((excess - given) as usize) {
        tracks[i] = tracks[i].saturating_add(1);
    }
    true
}

fn share_evenly(tracks: &mut [u32], indices: &[usize], excess: u64) {
    let n = indices.len() as u64;
    let base = excess / n;
    let extra = (excess % n) as usize;
    for (k, &i) in indices.iter().enumerate() {
        let add = base + u64::from(k < extra);
        tracks[i] = tracks[i].saturating_add(add as u32);
    }
}

fn prefix_sums(sizes: &[u32]) -> Vec<u32> {
    let mut offsets = Vec::with_capacity(sizes.len() + 1);
    let mut total = 0u32;
    offsets.push(0);
    for &size in sizes {
        total = total.saturating_add(size);
        offsets.push(total);
    }
    offsets
}

// ============================================================================
// CONTENT PLACEMENT
// ============================================================================

fn place_content(cell: &GridCell, natural: Extent, width: u32, height: u32) -> ContentBox {
    let (x, content_width) = match cell.style.position_x {
        HorizontalPosition::Stretch => (0, width),
        position => {
            let w = natural.width.min(width);
            let slack = width - w;
            let x = match position {
                HorizontalPosition::Center => slack / 2,
                HorizontalPosition::Right => slack,
                _ => 0,
            };
            (x, w)
        }
    };
    let (y, content_height) = match cell.style.position_y {
        VerticalPosition::Stretch => (0, height),
        position => {
            let h = natural.height.min(height);
            let slack = height - h;
            let y = match position {
                VerticalPosition::Middle => slack / 2,
                VerticalPosition::Bottom => slack,
                _ => 0,
            };
            (y, h)
        }
    };
    ContentBox {
        x,
        y,
        width: content_width,
        height: content_height,
    }
}
