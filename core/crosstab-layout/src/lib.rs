//! FILENAME: core/crosstab-layout/src/lib.rs
//! Geometry for filled crosstab grids.
//!
//! `resolve` sizes a frozen `Grid` in two passes (natural size, then span
//! reconciliation) using a measurement callback from the rendering
//! backend. `paginate` slices the sized grid into page-sized pieces.

pub mod measure;
pub mod resolver;
pub mod pagination;

pub use measure::{ContentMeasurer, MeasureError, StaticMeasurer};
pub use resolver::{resolve, ResolvedGrid};
pub use pagination::{paginate, PageOptions, PageSlice, Paginator, PlacedCell};
