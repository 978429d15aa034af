//! FILENAME: core/crosstab-layout/src/measure.rs
//! Content measurement - the callback the rendering backend supplies.

use thiserror::Error;

use crosstab_engine::{ContentElement, Extent, GridCell};

/// Why a cell's content could not be measured.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct MeasureError {
    pub reason: String,
}

impl MeasureError {
    pub fn new(reason: impl Into<String>) -> Self {
        MeasureError { reason: reason.into() }
    }
}

/// Reports the natural size of a cell's content. Must be deterministic
/// for identical content, and callable from several threads at once.
pub trait ContentMeasurer: Sync {
    fn measure(&self, cell: &GridCell) -> Result<Extent, MeasureError>;
}

impl<F> ContentMeasurer for F
where
    F: Fn(&GridCell) -> Result<Extent, MeasureError> + Sync,
{
    fn measure(&self, cell: &GridCell) -> Result<Extent, MeasureError> {
        self(cell)
    }
}

/// Fixed-metric measurer: monospaced text, images and shapes at their
/// declared size, elements stacked vertically, uniform padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticMeasurer {
    pub char_width: u32,
    pub line_height: u32,
    /// Added on every side.
    pub padding: u32,
}

impl Default for StaticMeasurer {
    fn default() -> Self {
        StaticMeasurer {
            char_width: 7,
            line_height: 14,
            padding: 2,
        }
    }
}

impl StaticMeasurer {
    pub fn new(char_width: u32, line_height: u32, padding: u32) -> Self {
        StaticMeasurer {
            char_width,
            line_height,
            padding,
        }
    }

    fn element_extent(&self, element: &ContentElement) -> Result<Extent, MeasureError> {
        match element {
            ContentElement::Text(text) => {
                let lines = text.lines().count().max(1) as u32;
                let widest = text.lines().map(|l| l.chars().count()).max().unwrap_or(0) as u32;
                Ok(Extent::new(widest * self.char_width, lines * self.line_height))
            }
            ContentElement::Image { source, width, height } => {
                if *width == 0 || *height == 0 {
                    return Err(MeasureError::new(format!("image '{}' has no intrinsic size", source)));
                }
                Ok(Extent::new(*width, *height))
            }
            ContentElement::Shape { width, height, .. } => Ok(Extent::new(*width, *height)),
        }
    }
}

impl ContentMeasurer for StaticMeasurer {
    fn measure(&self, cell: &GridCell) -> Result<Extent, MeasureError> {
        let mut extent = Extent::default();
        for element in &cell.content.elements {
            let e = self.element_extent(element)?;
            extent.width = extent.width.max(e.width);
            extent.height += e.height;
        }
        Ok(Extent::new(
            extent.width + 2 * self.padding,
            extent.height + 2 * self.padding,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crosstab_engine::{CellContent, CellStyle, CellType, ShapeKind};

    fn cell(elements: Vec<ContentElement>) -> GridCell {
        GridCell::new(CellType::Data, 0, 0).with_content(CellContent::new(elements), CellStyle::default())
    }

    #[test]
    fn test_text_lines_and_padding() {
        let m = StaticMeasurer::new(10, 20, 1);
        let extent = m.measure(&cell(vec![ContentElement::Text("ab\nabcd".to_string())])).unwrap();
        assert_eq!(extent, Extent::new(42, 42));
    }

    #[test]
    fn test_elements_stack_vertically() {
        let m = StaticMeasurer::new(10, 20, 0);
        let extent = m
            .measure(&cell(vec![
                ContentElement::Text("abc".to_string()),
                ContentElement::Shape { kind: ShapeKind::Line, width: 50, height: 2 },
            ]))
            .unwrap();
        assert_eq!(extent, Extent::new(50, 22));
    }

    #[test]
    fn test_empty_content_is_padding_only() {
        let m = StaticMeasurer::default();
        assert_eq!(m.measure(&cell(Vec::new())).unwrap(), Extent::new(4, 4));
    }

    #[test]
    fn test_image_without_size_fails() {
        let m = StaticMeasurer::default();
        let err = m
            .measure(&cell(vec![ContentElement::Image {
                source: "logo.png".to_string(),
                width: 0,
                height: 0,
            }]))
            .unwrap_err();
        assert!(err.reason.contains("logo.png"));
    }

    #[test]
    fn test_closure_measurer() {
        let fixed = |_: &GridCell| -> Result<Extent, MeasureError> { Ok(Extent::new(3, 4)) };
        assert_eq!(fixed.measure(&cell(Vec::new())).unwrap(), Extent::new(3, 4));
    }
}
