//! FILENAME: core/crosstab-layout/tests/test_layout.rs
//! Integration tests for two-pass cell sizing.

mod common;

use common::{generated_grid, uniform, varied, SalesFixture};
use crosstab_engine::{
    CellTemplate, CellType, CrosstabError, DataCellTemplate, Extent, Grid, GridCell,
    HorizontalPosition, Stage, TextSource, VerticalPosition,
};
use crosstab_layout::{resolve, MeasureError, ResolvedGrid, StaticMeasurer};
use proptest::prelude::*;

fn assert_spans_match_tracks(resolved: &ResolvedGrid) {
    for cell in resolved.cells() {
        let layout = cell.layout.expect("every cell is sized");
        let widths: u32 = resolved.column_widths[cell.column..cell.column_end()].iter().sum();
        let heights: u32 = resolved.row_heights[cell.row..cell.row_end()].iter().sum();
        assert_eq!(layout.width, widths, "{:?} at ({}, {})", cell.cell_type, cell.row, cell.column);
        assert_eq!(layout.height, heights, "{:?} at ({}, {})", cell.cell_type, cell.row, cell.column);
        assert_eq!(layout.x, resolved.column_offsets[cell.column]);
        assert_eq!(layout.y, resolved.row_offsets[cell.row]);
    }
}

fn assert_never_below_natural(resolved: &ResolvedGrid) {
    for cell in resolved.cells() {
        let layout = cell.layout.expect("every cell is sized");
        assert!(layout.width >= layout.natural.width);
        assert!(layout.height >= layout.natural.height);
    }
}

#[test]
fn test_fixture_is_fully_laid_out() {
    let resolved = SalesFixture::new().resolved();
    assert!(resolved.grid.is_laid_out());
    assert_eq!(resolved.width, resolved.column_widths.iter().sum::<u32>());
    assert_eq!(resolved.height, resolved.row_heights.iter().sum::<u32>());
    assert_eq!(resolved.row_offsets.len(), resolved.grid.row_count() + 1);
    assert_spans_match_tracks(&resolved);
    assert_never_below_natural(&resolved);
}

#[test]
fn test_tall_row_header_grows_its_rows_proportionally() {
    let grid = SalesFixture::without_totals().grid();
    // East spans Boston, New York and Newark (grid rows 1..4).
    let east = grid.row_headers().find(|c| c.content.plain_text() == "East").unwrap();
    assert_eq!((east.row, east.row_span), (1, 3));

    let measurer = |cell: &GridCell| -> Result<Extent, MeasureError> {
        if cell.cell_type == CellType::RowHeader && cell.content.plain_text() == "East" {
            return Ok(Extent::new(30, 90));
        }
        let height = if cell.row == 1 { 20 } else { 10 };
        Ok(Extent::new(10, height))
    };
    let resolved = resolve(grid, &measurer).unwrap();

    // Natural rows 20, 10, 10 grow by 50 in proportion.
    assert_eq!(&resolved.row_heights[1..4], &[45, 23, 22]);
    assert_eq!(resolved.row_heights[4], 10);

    let east = resolved.cells().iter().find(|c| c.content.plain_text() == "East").unwrap();
    assert_eq!(east.height(), Some(90));
    assert_never_below_natural(&resolved);
}

#[test]
fn test_stretch_rows_absorb_span_slack() {
    let mut fixture = SalesFixture::new();
    fixture.definition.data_cells.push(DataCellTemplate {
        row_total_group: Some("City".to_string()),
        column_total_group: None,
        contents: CellTemplate::text(TextSource::Measure(0))
            .with_positions(HorizontalPosition::Left, VerticalPosition::Stretch),
    });
    let grid = fixture.grid();
    // East spans its three cities and the East city total (grid rows 1..5).
    let east = grid.row_headers().find(|c| c.content.plain_text() == "East").unwrap();
    assert_eq!((east.row, east.row_span), (1, 4));

    let measurer = |cell: &GridCell| -> Result<Extent, MeasureError> {
        if cell.cell_type == CellType::RowHeader && cell.content.plain_text() == "East" {
            return Ok(Extent::new(30, 100));
        }
        Ok(Extent::new(10, 10))
    };
    let resolved = resolve(grid, &measurer).unwrap();

    assert_eq!(&resolved.row_heights[1..5], &[10, 10, 10, 70]);
    let stretched = resolved
        .cells()
        .iter()
        .find(|c| c.cell_type == CellType::Data && c.row == 4)
        .unwrap();
    let layout = stretched.layout.unwrap();
    assert_eq!(layout.content.height, 70);
    assert_eq!(layout.content.y, 0);
}

#[test]
fn test_content_is_positioned_inside_its_cell() {
    let mut fixture = SalesFixture::new();
    fixture.definition.data_cells.push(DataCellTemplate {
        row_total_group: None,
        column_total_group: None,
        contents: CellTemplate::text(TextSource::Measure(0))
            .with_positions(HorizontalPosition::Right, VerticalPosition::Bottom),
    });
    let resolved = resolve(fixture.grid(), &StaticMeasurer::default()).unwrap();

    for cell in resolved.cells().iter().filter(|c| c.cell_type == CellType::Data && !c.is_total) {
        let layout = cell.layout.unwrap();
        assert_eq!(layout.content.x + layout.content.width, layout.width);
        assert_eq!(layout.content.y + layout.content.height, layout.height);
    }
}

#[test]
fn test_measurement_failure_aborts_layout() {
    let measurer = |cell: &GridCell| -> Result<Extent, MeasureError> {
        if cell.cell_type == CellType::ColumnHeader && cell.content.plain_text() == "Q3" {
            return Err(MeasureError::new("font missing"));
        }
        Ok(Extent::new(10, 10))
    };
    let err = resolve(SalesFixture::new().grid(), &measurer).unwrap_err();
    match &err {
        CrosstabError::LayoutMeasurement { cell_type, row, reason, .. } => {
            assert_eq!(*cell_type, CellType::ColumnHeader);
            assert_eq!(*row, 0);
            assert_eq!(reason, "font missing");
        }
        other => panic!("expected measurement error, got {:?}", other),
    }
    assert_eq!(err.stage(), Stage::Layout);
}

#[test]
fn test_span_beyond_grid_is_rejected() {
    let mut grid = SalesFixture::new().grid();
    let index = grid.cells.iter().position(|c| c.cell_type == CellType::RowHeader).unwrap();
    grid.cells[index].row_span = grid.row_count() + 5;
    let err = resolve(grid, &uniform(10, 10)).unwrap_err();
    assert!(matches!(err, CrosstabError::InvalidSpan { stage: Stage::Layout, .. }));
}

#[test]
fn test_span_into_next_group_is_rejected() {
    let mut grid = SalesFixture::without_totals().grid();
    // East realizes three rows; a fourth would overlap Denver.
    let index = grid.cells.iter().position(|c| c.content.plain_text() == "East").unwrap();
    grid.cells[index].row_span = 4;
    assert!(!grid.is_tiled());
    match resolve(grid, &uniform(10, 10)).unwrap_err() {
        CrosstabError::InvalidSpan { stage, span, available, .. } => {
            assert_eq!(stage, Stage::Layout);
            assert_eq!((span, available), (4, 3));
        }
        other => panic!("expected span error, got {:?}", other),
    }
}

#[test]
fn test_empty_and_no_data_grids() {
    let empty = resolve(Grid::no_data("empty", None), &uniform(10, 10)).unwrap();
    assert_eq!((empty.width, empty.height), (0, 0));

    let placeholder = GridCell::new(CellType::NoDataCell, 0, 0);
    let single = resolve(Grid::no_data("empty", Some(placeholder)), &uniform(80, 15)).unwrap();
    assert_eq!((single.width, single.height), (80, 15));
    assert!(single.grid.is_laid_out());
}

#[test]
fn test_layout_is_repeatable() {
    let first = resolve(SalesFixture::new().grid(), &varied).unwrap();
    let second = resolve(SalesFixture::new().grid(), &varied).unwrap();
    assert_eq!(first.row_heights, second.row_heights);
    assert_eq!(first.column_widths, second.column_widths);
    let layouts = |r: &ResolvedGrid| r.cells().iter().map(|c| c.layout).collect::<Vec<_>>();
    assert_eq!(layouts(&first), layouts(&second));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_spans_equal_their_tracks(
        regions in 1usize..5,
        cities in 1usize..4,
        quarters in 1usize..5,
        seed in any::<u64>(),
    ) {
        let grid = generated_grid(regions, cities, quarters, seed);
        let resolved = resolve(grid, &varied).unwrap();
        assert_spans_match_tracks(&resolved);
        assert_never_below_natural(&resolved);
    }
}
