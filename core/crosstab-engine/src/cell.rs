//! FILENAME: core/crosstab-engine/src/cell.rs
//! Crosstab cells - the unit shared by headers, data body and the
//! "no data" placeholder.
//!
//! A cell's type, spans, style and content are fixed by the fill pass.
//! Its geometry stays `None` until the layout resolver fills it in.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::value::Scalar;

// ============================================================================
// CELL TYPES AND STYLE
// ============================================================================

/// The role a cell plays in the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellType {
    /// The fixed corner above the row headers and left of the column headers.
    CrosstabHeader,
    RowHeader,
    ColumnHeader,
    Data,
    /// Placeholder for a missing combination, or for an empty crosstab.
    NoDataCell,
}

impl CellType {
    /// Name exported on rendered frames so backends can tell cells apart.
    pub fn as_str(&self) -> &'static str {
        match self {
            CellType::CrosstabHeader => "CrosstabHeader",
            CellType::RowHeader => "RowHeader",
            CellType::ColumnHeader => "ColumnHeader",
            CellType::Data => "Data",
            CellType::NoDataCell => "NoDataCell",
        }
    }

    pub fn is_header(&self) -> bool {
        matches!(
            self,
            CellType::CrosstabHeader | CellType::RowHeader | CellType::ColumnHeader
        )
    }
}

/// Where content sits horizontally when the cell is wider than its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum HorizontalPosition {
    #[default]
    Left,
    Center,
    Right,
    /// Content is widened to fill the cell.
    Stretch,
}

/// Where content sits vertically when the cell is taller than its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum VerticalPosition {
    #[default]
    Top,
    Middle,
    Bottom,
    /// Content is heightened to fill the cell.
    Stretch,
}

/// Transparency mode. Only opaque cells paint their background color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Mode {
    Opaque,
    #[default]
    Transparent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255 };

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color { r, g, b }
    }

    /// Parses `#RRGGBB` (the leading `#` is optional).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Color {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
        })
    }
}

/// Visual attributes copied from the cell template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CellStyle {
    pub backcolor: Option<Color>,
    pub mode: Mode,
    pub position_x: HorizontalPosition,
    pub position_y: VerticalPosition,
}

impl CellStyle {
    /// The background to paint, if any.
    pub fn painted_background(&self) -> Option<Color> {
        match self.mode {
            Mode::Opaque => self.backcolor,
            Mode::Transparent => None,
        }
    }
}

// ============================================================================
// CONTENT
// ============================================================================

/// Static shapes a cell may draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeKind {
    Line,
    Rectangle,
    Ellipse,
}

/// One renderable element inside a cell. Subreports, nested crosstabs and
/// charts have no representation here: templates carrying them are
/// rejected before a grid is ever built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContentElement {
    Text(String),
    Image { source: String, width: u32, height: u32 },
    Shape { kind: ShapeKind, width: u32, height: u32 },
}

/// The payload handed to the measurement callback and the renderer as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CellContent {
    pub elements: Vec<ContentElement>,
}

impl CellContent {
    pub fn new(elements: Vec<ContentElement>) -> Self {
        CellContent { elements }
    }

    pub fn text(text: impl Into<String>) -> Self {
        CellContent {
            elements: vec![ContentElement::Text(text.into())],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Concatenated text of all text elements, one per line.
    pub fn plain_text(&self) -> String {
        self.elements
            .iter()
            .filter_map(|e| match e {
                ContentElement::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ============================================================================
// GEOMETRY
// ============================================================================

/// A width/height pair in layout units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub fn new(width: u32, height: u32) -> Self {
        Extent { width, height }
    }
}

/// Placement of the content inside its cell, relative to the cell origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContentBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Resolved geometry of a cell. Positions are absolute within the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellLayout {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Size the content asked for before span and stretch reconciliation.
    pub natural: Extent,
    pub content: ContentBox,
}

// ============================================================================
// GRID CELL
// ============================================================================

/// A single cell in the crosstab grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridCell {
    pub cell_type: CellType,

    /// Top-left grid row (column header band rows come first).
    pub row: usize,

    /// Top-left grid column (row header band columns come first).
    pub column: usize,

    pub row_span: usize,
    pub column_span: usize,

    /// Header of a total bucket, or data cell on a total row/column.
    pub is_total: bool,

    /// Header cells: the bucket value. Data cells: one result per measure.
    pub values: SmallVec<[Scalar; 2]>,

    pub content: CellContent,
    pub style: CellStyle,

    /// Filled by the layout resolver.
    pub layout: Option<CellLayout>,
}

impl GridCell {
    pub fn new(cell_type: CellType, row: usize, column: usize) -> Self {
        GridCell {
            cell_type,
            row,
            column,
            row_span: 1,
            column_span: 1,
            is_total: false,
            values: SmallVec::new(),
            content: CellContent::default(),
            style: CellStyle::default(),
            layout: None,
        }
    }

    pub fn with_spans(mut self, row_span: usize, column_span: usize) -> Self {
        self.row_span = row_span;
        self.column_span = column_span;
        self
    }

    pub fn with_content(mut self, content: CellContent, style: CellStyle) -> Self {
        self.content = content;
        self.style = style;
        self
    }

    pub fn as_total(mut self) -> Self {
        self.is_total = true;
        self
    }

    /// Last grid row covered by this cell (exclusive).
    pub fn row_end(&self) -> usize {
        self.row + self.row_span
    }

    /// Last grid column covered by this cell (exclusive).
    pub fn column_end(&self) -> usize {
        self.column + self.column_span
    }

    /// A leaf cell spans exactly one row and one column.
    pub fn is_leaf(&self) -> bool {
        self.row_span == 1 && self.column_span == 1
    }

    pub fn width(&self) -> Option<u32> {
        self.layout.map(|l| l.width)
    }

    pub fn height(&self) -> Option<u32> {
        self.layout.map(|l| l.height)
    }

    pub fn painted_background(&self) -> Option<Color> {
        self.style.painted_background()
    }
}
