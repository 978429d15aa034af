//! FILENAME: core/crosstab-engine/src/definition.rs
//! Crosstab Definition - The serializable configuration.
//!
//! This module contains all the types needed to DESCRIBE a crosstab.
//! These structures are designed to be:
//! - Serializable (loaded from a JSON definition, saved alongside a report)
//! - Built once and never mutated during a fill
//! - Validated before a builder accepts them

use serde::{Deserialize, Serialize};

use crate::cell::{CellContent, CellStyle, Color, ContentElement, HorizontalPosition, Mode, ShapeKind, VerticalPosition};
use crate::error::{CrosstabError, Result};
use crate::value::Scalar;

/// Index of a group within its (row or column) hierarchy, outermost first.
pub type GroupIndex = usize;

/// Distinct-count set size used when a measure does not set one.
pub const DEFAULT_DISTINCT_LIMIT: usize = 65_536;

// ============================================================================
// AGGREGATION
// ============================================================================

/// Supported aggregation functions for measures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Aggregation {
    #[default]
    Sum,
    Count,
    Average,
    Min,
    Max,
    DistinctCount,
    /// The first non-null value seen.
    First,
    /// Sample variance.
    Variance,
    /// Sample standard deviation.
    StdDev,
    /// An incrementer registered on the builder under this name.
    Custom { name: String },
}

impl Aggregation {
    /// The value reported for a combination no record contributed to.
    pub fn empty_value(&self) -> Scalar {
        match self {
            Aggregation::Sum | Aggregation::Count | Aggregation::DistinctCount => Scalar::Integer(0),
            _ => Scalar::Null,
        }
    }
}

/// Whether a measure is reported raw or relative to a total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PercentageOf {
    #[default]
    None,
    /// Value divided by the measure's grand total.
    GrandTotal,
}

/// A named aggregation over one source field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasureDefinition {
    pub name: String,

    /// Record field the measure reads.
    pub field: String,

    #[serde(default)]
    pub aggregation: Aggregation,

    /// Whether Count includes null values.
    #[serde(default)]
    pub count_nulls: bool,

    #[serde(default)]
    pub percentage_of: PercentageOf,

    /// Upper bound on the distinct-count auxiliary set.
    #[serde(default = "default_distinct_limit")]
    pub distinct_limit: usize,
}

fn default_distinct_limit() -> usize {
    DEFAULT_DISTINCT_LIMIT
}

impl MeasureDefinition {
    pub fn new(name: impl Into<String>, field: impl Into<String>, aggregation: Aggregation) -> Self {
        MeasureDefinition {
            name: name.into(),
            field: field.into(),
            aggregation,
            count_nulls: false,
            percentage_of: PercentageOf::None,
            distinct_limit: DEFAULT_DISTINCT_LIMIT,
        }
    }
}

// ============================================================================
// GROUPS
// ============================================================================

/// How bucket values of a group are ordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BucketOrder {
    /// Natural ascending order; input must arrive sorted.
    #[default]
    Ascending,
    /// Natural descending order; input must arrive sorted.
    Descending,
    /// A comparator registered on the builder; input must arrive sorted.
    Custom { comparator: String },
    /// Stream order. Every change of value starts a new run.
    Unordered,
}

impl BucketOrder {
    pub fn is_ordered(&self) -> bool {
        !matches!(self, BucketOrder::Unordered)
    }
}

/// One row or column dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDefinition {
    pub name: String,

    /// Record field whose value is the bucket.
    pub field: String,

    #[serde(default)]
    pub order: BucketOrder,

    /// Whether a total bucket is emitted after the group's last member.
    #[serde(default)]
    pub totals: bool,

    /// Header cell contents; defaults to the bucket value.
    #[serde(default)]
    pub header: Option<CellTemplate>,

    /// Total header contents; defaults to the text "Total".
    #[serde(default)]
    pub total_header: Option<CellTemplate>,
}

impl GroupDefinition {
    pub fn new(name: impl Into<String>, field: impl Into<String>) -> Self {
        GroupDefinition {
            name: name.into(),
            field: field.into(),
            order: BucketOrder::Ascending,
            totals: false,
            header: None,
            total_header: None,
        }
    }

    pub fn with_totals(mut self, totals: bool) -> Self {
        self.totals = totals;
        self
    }

    pub fn with_order(mut self, order: BucketOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_header(mut self, header: CellTemplate) -> Self {
        self.header = Some(header);
        self
    }

    pub fn with_total_header(mut self, total_header: CellTemplate) -> Self {
        self.total_header = Some(total_header);
        self
    }
}

// ============================================================================
// CELL TEMPLATES
// ============================================================================

/// Where a text element takes its text from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextSource {
    Literal(String),
    /// The bucket value of the header's group.
    BucketValue,
    /// The name of the header's group.
    GroupName,
    /// The result of the measure at this index.
    Measure(usize),
}

/// When an element's value is evaluated. Cells only support `Now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EvaluationTime {
    #[default]
    Now,
    Delayed,
}

/// Design-time element. Every kind a report designer can drop into a cell
/// is representable so that the disallowed ones can be rejected by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElementTemplate {
    Text {
        source: TextSource,
        #[serde(default)]
        evaluation: EvaluationTime,
    },
    Image {
        source: String,
        width: u32,
        height: u32,
        #[serde(default)]
        evaluation: EvaluationTime,
    },
    Shape {
        kind: ShapeKind,
        width: u32,
        height: u32,
    },
    Subreport { name: String },
    Crosstab { name: String },
    Chart { name: String },
}

/// Contents and style of a cell before values are known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CellTemplate {
    #[serde(default)]
    pub elements: Vec<ElementTemplate>,
    #[serde(default)]
    pub backcolor: Option<Color>,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub position_x: HorizontalPosition,
    #[serde(default)]
    pub position_y: VerticalPosition,
}

/// Values a template can bind its text elements to.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateContext<'a> {
    pub bucket: Option<&'a Scalar>,
    pub group_name: Option<&'a str>,
    pub measures: &'a [Scalar],
}

impl CellTemplate {
    pub fn new(elements: Vec<ElementTemplate>) -> Self {
        CellTemplate {
            elements,
            ..CellTemplate::default()
        }
    }

    /// A template holding a single text element.
    pub fn text(source: TextSource) -> Self {
        CellTemplate::new(vec![ElementTemplate::Text {
            source,
            evaluation: EvaluationTime::Now,
        }])
    }

    pub fn with_background(mut self, color: Color, mode: Mode) -> Self {
        self.backcolor = Some(color);
        self.mode = mode;
        self
    }

    pub fn with_positions(mut self, x: HorizontalPosition, y: VerticalPosition) -> Self {
        self.position_x = x;
        self.position_y = y;
        self
    }

    pub fn style(&self) -> CellStyle {
        CellStyle {
            backcolor: self.backcolor,
            mode: self.mode,
            position_x: self.position_x,
            position_y: self.position_y,
        }
    }

    /// Rejects element kinds a crosstab cell cannot hold.
    pub fn validate(&self, cell: &str) -> Result<()> {
        for element in &self.elements {
            let rejected = match element {
                ElementTemplate::Subreport { name } => Some(format!("subreport '{}'", name)),
                ElementTemplate::Crosstab { name } => Some(format!("nested crosstab '{}'", name)),
                ElementTemplate::Chart { name } => Some(format!("chart '{}'", name)),
                ElementTemplate::Text { evaluation: EvaluationTime::Delayed, .. } => {
                    Some("text with delayed evaluation".to_string())
                }
                ElementTemplate::Image { evaluation: EvaluationTime::Delayed, source, .. } => {
                    Some(format!("image '{}' with delayed evaluation", source))
                }
                _ => None,
            };
            if let Some(kind) = rejected {
                return Err(CrosstabError::UnsupportedCellContent {
                    cell: cell.to_string(),
                    kind,
                });
            }
        }
        Ok(())
    }

    /// Binds text sources and produces the runtime payload.
    /// Call only on validated templates.
    pub fn instantiate(&self, ctx: &TemplateContext<'_>) -> CellContent {
        let elements = self
            .elements
            .iter()
            .filter_map(|element| match element {
                ElementTemplate::Text { source, .. } => {
                    let text = match source {
                        TextSource::Literal(s) => s.clone(),
                        TextSource::BucketValue => {
                            ctx.bucket.map(|b| b.to_string()).unwrap_or_default()
                        }
                        TextSource::GroupName => ctx.group_name.unwrap_or_default().to_string(),
                        TextSource::Measure(i) => {
                            ctx.measures.get(*i).map(|m| m.to_string()).unwrap_or_default()
                        }
                    };
                    Some(ContentElement::Text(text))
                }
                ElementTemplate::Image { source, width, height, .. } => Some(ContentElement::Image {
                    source: source.clone(),
                    width: *width,
                    height: *height,
                }),
                ElementTemplate::Shape { kind, width, height } => Some(ContentElement::Shape {
                    kind: *kind,
                    width: *width,
                    height: *height,
                }),
                // Rejected by validate()
                ElementTemplate::Subreport { .. }
                | ElementTemplate::Crosstab { .. }
                | ElementTemplate::Chart { .. } => None,
            })
            .collect();
        CellContent::new(elements)
    }
}

/// Data cell contents for one row/column total combination.
/// `None` on an axis means the cell is not on a total of that axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataCellTemplate {
    #[serde(default)]
    pub row_total_group: Option<String>,
    #[serde(default)]
    pub column_total_group: Option<String>,
    pub contents: CellTemplate,
}

// ============================================================================
// LAYOUT OPTIONS
// ============================================================================

/// What to emit for a row/column combination no record contributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NoDataPolicy {
    /// A regular data cell carrying each measure's empty value.
    #[default]
    Zero,
    /// A `NoDataCell` built from the definition's no-data template.
    Placeholder,
}

// ============================================================================
// MAIN DEFINITION STRUCT
// ============================================================================

/// The complete, serializable definition of a crosstab.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CrosstabDefinition {
    #[serde(default)]
    pub name: String,

    /// Row dimensions, outermost first.
    #[serde(default)]
    pub row_groups: Vec<GroupDefinition>,

    /// Column dimensions, outermost first.
    #[serde(default)]
    pub column_groups: Vec<GroupDefinition>,

    #[serde(default)]
    pub measures: Vec<MeasureDefinition>,

    /// Contents of the corner cell.
    #[serde(default)]
    pub header_cell: Option<CellTemplate>,

    #[serde(default)]
    pub data_cells: Vec<DataCellTemplate>,

    /// Used for an empty input, and for missing combinations under
    /// `NoDataPolicy::Placeholder`.
    #[serde(default)]
    pub no_data_cell: Option<CellTemplate>,

    #[serde(default)]
    pub no_data_policy: NoDataPolicy,

    /// Re-emit the column header band at the top of every page.
    #[serde(default = "default_true")]
    pub repeat_column_headers: bool,

    /// Re-emit the row header band at the left of every page.
    #[serde(default = "default_true")]
    pub repeat_row_headers: bool,

    /// Vertical gap between the parts of a crosstab broken by columns.
    #[serde(default = "default_column_break_offset")]
    pub column_break_offset: u32,
}

fn default_true() -> bool {
    true
}

fn default_column_break_offset() -> u32 {
    10
}

impl CrosstabDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        CrosstabDefinition {
            name: name.into(),
            repeat_column_headers: true,
            repeat_row_headers: true,
            column_break_offset: default_column_break_offset(),
            ..CrosstabDefinition::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let definition: CrosstabDefinition = serde_json::from_str(json)?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks structural consistency and rejects unsupported cell contents.
    pub fn validate(&self) -> Result<()> {
        let mut names: Vec<&str> = Vec::new();
        for group in self.row_groups.iter().chain(self.column_groups.iter()) {
            if group.name.is_empty() || group.field.is_empty() {
                return Err(CrosstabError::InvalidDefinition(
                    "groups need a name and a field".to_string(),
                ));
            }
            if names.contains(&group.name.as_str()) {
                return Err(CrosstabError::InvalidDefinition(format!(
                    "duplicate group name '{}'",
                    group.name
                )));
            }
            names.push(&group.name);

            if let Some(header) = &group.header {
                header.validate(&format!("header of group '{}'", group.name))?;
            }
            if let Some(total_header) = &group.total_header {
                total_header.validate(&format!("total header of group '{}'", group.name))?;
            }
        }

        for measure in &self.measures {
            if measure.name.is_empty() {
                return Err(CrosstabError::InvalidDefinition("measures need a name".to_string()));
            }
            if measure.aggregation == Aggregation::DistinctCount && measure.distinct_limit == 0 {
                return Err(CrosstabError::InvalidDefinition(format!(
                    "measure '{}' has a zero distinct limit",
                    measure.name
                )));
            }
        }

        if let Some(header_cell) = &self.header_cell {
            header_cell.validate("crosstab header")?;
        }
        if let Some(no_data) = &self.no_data_cell {
            no_data.validate("no data cell")?;
        }

        for template in &self.data_cells {
            let label = format!(
                "data cell ({}, {})",
                template.row_total_group.as_deref().unwrap_or("-"),
                template.column_total_group.as_deref().unwrap_or("-"),
            );
            if let Some(row_total) = &template.row_total_group {
                if !self.row_groups.iter().any(|g| &g.name == row_total) {
                    return Err(CrosstabError::InvalidDefinition(format!(
                        "{} references unknown row group",
                        label
                    )));
                }
            }
            if let Some(column_total) = &template.column_total_group {
                if !self.column_groups.iter().any(|g| &g.name == column_total) {
                    return Err(CrosstabError::InvalidDefinition(format!(
                        "{} references unknown column group",
                        label
                    )));
                }
            }
            template.contents.validate(&label)?;
            for element in &template.contents.elements {
                if let ElementTemplate::Text { source: TextSource::Measure(i), .. } = element {
                    if *i >= self.measures.len() {
                        return Err(CrosstabError::InvalidDefinition(format!(
                            "{} references measure #{} of {}",
                            label,
                            i,
                            self.measures.len()
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Picks the data cell template for a total combination, falling back
    /// to the plain data cell template.
    pub fn data_cell_template(
        &self,
        row_total_group: Option<&str>,
        column_total_group: Option<&str>,
    ) -> Option<&CellTemplate> {
        let exact = self.data_cells.iter().find(|t| {
            t.row_total_group.as_deref() == row_total_group
                && t.column_total_group.as_deref() == column_total_group
        });
        exact
            .or_else(|| {
                self.data_cells
                    .iter()
                    .find(|t| t.row_total_group.is_none() && t.column_total_group.is_none())
            })
            .map(|t| &t.contents)
    }

    /// Data cell contents used when no template is configured:
    /// one text line per measure.
    pub fn default_data_template(&self) -> CellTemplate {
        CellTemplate::new(
            (0..self.measures.len())
                .map(|i| ElementTemplate::Text {
                    source: TextSource::Measure(i),
                    evaluation: EvaluationTime::Now,
                })
                .collect(),
        )
    }
}
