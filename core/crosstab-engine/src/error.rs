//! FILENAME: core/crosstab-engine/src/error.rs

use thiserror::Error;

use crate::cell::CellType;
use crate::value::Scalar;

/// The pipeline stage an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Definition,
    Fill,
    Layout,
    Pagination,
}

#[derive(Error, Debug)]
pub enum CrosstabError {
    #[error("record {record}: group '{group}' value '{value}' sorts before current bucket '{current}'")]
    UnorderedData {
        group: String,
        record: usize,
        current: Scalar,
        value: Scalar,
    },

    #[error("cannot measure {cell_type:?} cell at ({row}, {column}): {reason}")]
    LayoutMeasurement {
        cell_type: CellType,
        row: usize,
        column: usize,
        reason: String,
    },

    #[error("{cell_type:?} cell at ({row}, {column}) spans {span} tracks but only {available} are realized")]
    InvalidSpan {
        stage: Stage,
        cell_type: CellType,
        row: usize,
        column: usize,
        span: usize,
        available: usize,
    },

    #[error("{cell}: {kind} is not allowed inside a crosstab cell")]
    UnsupportedCellContent { cell: String, kind: String },

    #[error("invalid crosstab definition: {0}")]
    InvalidDefinition(String),

    #[error("measure '{measure}' exceeded its distinct value limit of {limit}")]
    DistinctLimitExceeded { measure: String, limit: usize },

    #[error("invalid page area {width}x{height}")]
    InvalidPageArea { width: u32, height: u32 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CrosstabError {
    pub fn stage(&self) -> Stage {
        match self {
            CrosstabError::UnorderedData { .. } | CrosstabError::DistinctLimitExceeded { .. } => {
                Stage::Fill
            }
            CrosstabError::LayoutMeasurement { .. } => Stage::Layout,
            CrosstabError::InvalidSpan { stage, .. } => *stage,
            CrosstabError::InvalidPageArea { .. } => Stage::Pagination,
            CrosstabError::UnsupportedCellContent { .. }
            | CrosstabError::InvalidDefinition(_)
            | CrosstabError::Json(_) => Stage::Definition,
        }
    }
}

pub type Result<T> = std::result::Result<T, CrosstabError>;
