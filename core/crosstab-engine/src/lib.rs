//! FILENAME: core/crosstab-engine/src/lib.rs
//! Crosstab fill subsystem.
//!
//! This crate turns an ordered stream of records into a pivot grid of
//! header cells, data cells and total cells. It does not size anything:
//! geometry is resolved by `crosstab-layout` once the grid is frozen.
//!
//! Layers:
//! - `value`: Scalar values, exact decimals and the natural ordering
//! - `definition`: Serializable configuration (what the crosstab IS)
//! - `bucket`: Per-level run detection (the bucket model)
//! - `accumulator`: Incremental measure aggregation
//! - `hierarchy`: Break detection across the combined group levels
//! - `cell` / `grid`: The frozen output consumed by layout and rendering
//! - `builder`: The fill pass that ties everything together

pub mod value;
pub mod error;
pub mod definition;
pub mod bucket;
pub mod accumulator;
pub mod hierarchy;
pub mod cell;
pub mod grid;
pub mod builder;

pub use value::{Decimal, OrderedFloat, Scalar};
pub use error::{CrosstabError, Result, Stage};
pub use definition::*;
pub use bucket::{Bucket, BucketCursor, BucketTransition, Comparator, OrderPolicy};
pub use accumulator::{Incrementer, MeasureAccumulator, MeasureSpec};
pub use hierarchy::{BreakSet, GroupHierarchy};
pub use cell::*;
pub use grid::{AxisEntry, Grid};
pub use builder::{CrosstabBuilder, Record};
