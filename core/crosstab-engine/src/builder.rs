//! FILENAME: core/crosstab-engine/src/builder.rs
//! Crosstab Builder - the single-threaded fill pass.
//!
//! Records stream in sorted by row groups then column groups. The row
//! axis is emitted in stream order as row runs complete; each completed
//! row carries its flushed results keyed by column path. The column axis
//! is assembled at `finish()` from every column path seen, ordered per
//! group and with totals placed after the last member of their group.
//!
//! Accumulators exist per row depth (the leaf rows, plus one depth per
//! row group with totals) and per column depth (the leaf columns, plus
//! one depth per column group with totals), so every record is folded
//! into every total it contributes to as it arrives.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::accumulator::{Incrementer, MeasureAccumulator, MeasureSpec};
use crate::bucket::{Bucket, Comparator, OrderPolicy};
use crate::cell::{CellContent, CellStyle, CellType, GridCell};
use crate::definition::{
    Aggregation, CellTemplate, CrosstabDefinition, GroupDefinition, MeasureDefinition,
    NoDataPolicy, PercentageOf, TemplateContext, TextSource,
};
use crate::error::{Result, Stage};
use crate::grid::{AxisEntry, Grid};
use crate::hierarchy::GroupHierarchy;
use crate::value::Scalar;

type ColumnPath = SmallVec<[Bucket; 4]>;
type Results = SmallVec<[Scalar; 2]>;
type AccumulatorMap = FxHashMap<ColumnPath, Vec<MeasureAccumulator>>;

static NULL: Scalar = Scalar::Null;

// ============================================================================
// RECORD
// ============================================================================

/// One input record: field name to already-evaluated value.
#[derive(Debug, Clone, Default)]
pub struct Record {
    fields: FxHashMap<String, Scalar>,
}

impl Record {
    pub fn new() -> Self {
        Record::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Scalar>,
    {
        Record {
            fields: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Scalar>) {
        self.fields.insert(field.into(), value.into());
    }

    /// The value of a field. Missing fields read as null.
    pub fn get(&self, field: &str) -> &Scalar {
        self.fields.get(field).unwrap_or(&NULL)
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Drives one fill pass. Consumed by `finish`, so a builder cannot be
/// finished twice; a new fill needs a new builder.
pub struct CrosstabBuilder {
    definition: CrosstabDefinition,
    comparators: FxHashMap<String, Comparator>,
    incrementers: FxHashMap<String, Arc<dyn Incrementer>>,
    state: Option<FillState>,
}

impl CrosstabBuilder {
    /// Validates the definition. Named comparators and incrementers are
    /// resolved when the first record arrives.
    pub fn new(definition: CrosstabDefinition) -> Result<Self> {
        definition.validate()?;
        Ok(CrosstabBuilder {
            definition,
            comparators: FxHashMap::default(),
            incrementers: FxHashMap::default(),
            state: None,
        })
    }

    /// Registers the comparator used by groups ordered `Custom { comparator: name }`.
    pub fn with_comparator(mut self, name: impl Into<String>, comparator: Comparator) -> Self {
        self.comparators.insert(name.into(), comparator);
        self
    }

    /// Registers the incrementer used by measures aggregated `Custom { name }`.
    pub fn with_incrementer(mut self, name: impl Into<String>, incrementer: Arc<dyn Incrementer>) -> Self {
        self.incrementers.insert(name.into(), incrementer);
        self
    }

    pub fn definition(&self) -> &CrosstabDefinition {
        &self.definition
    }

    /// Records fed so far.
    pub fn records(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.records)
    }

    /// Folds one record into the crosstab. An error aborts the fill; the
    /// builder should be dropped.
    pub fn feed(&mut self, record: &Record) -> Result<()> {
        if self.state.is_none() {
            self.state = Some(self.prepare()?);
        }
        if let Some(state) = self.state.as_mut() {
            state.feed(&self.definition, record)?;
        }
        Ok(())
    }

    /// Closes every open run as if one more break occurred above the
    /// outermost level, and returns the unsized grid.
    pub fn finish(mut self) -> Result<Grid> {
        let state = match self.state.take() {
            Some(state) => state,
            None => self.prepare()?,
        };
        state.finish(&self.definition)
    }

    /// Feeds every record then finishes.
    pub fn fill<'a, I>(mut self, records: I) -> Result<Grid>
    where
        I: IntoIterator<Item = &'a Record>,
    {
        for record in records {
            self.feed(record)?;
        }
        self.finish()
    }

    fn prepare(&self) -> Result<FillState> {
        let def = &self.definition;
        let policies = def
            .row_groups
            .iter()
            .chain(def.column_groups.iter())
            .map(|group| OrderPolicy::resolve(&group.order, |name| self.comparators.get(name).cloned()))
            .collect::<Result<Vec<_>>>()?;

        let specs = def
            .measures
            .iter()
            .map(|measure| {
                let incrementer = match &measure.aggregation {
                    Aggregation::Custom { name } => self.incrementers.get(name).cloned(),
                    _ => None,
                };
                MeasureSpec::new(measure, incrementer).map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(FillState::new(def, policies, specs))
    }
}

// ============================================================================
// COLUMN AXIS
// ============================================================================

/// A realized column value and the values nested under it.
#[derive(Debug)]
struct AxisNode {
    value: Scalar,
    children: Vec<AxisNode>,
}

/// A header run on either axis, in data row/column indices.
#[derive(Debug, Clone)]
struct HeaderSpan {
    level: usize,
    start: usize,
    span: usize,
    value: Scalar,
    is_total: bool,
}

/// Collects column paths during the fill and lays them out at the end.
#[derive(Debug)]
struct ColumnAxis {
    policies: Vec<OrderPolicy>,
    totals: Vec<bool>,
    roots: Vec<AxisNode>,
    /// Record values to the path of the bucket they were merged into.
    canonical: FxHashMap<SmallVec<[Scalar; 4]>, ColumnPath>,
}

impl ColumnAxis {
    fn new(policies: Vec<OrderPolicy>, totals: Vec<bool>) -> Self {
        ColumnAxis {
            policies,
            totals,
            roots: Vec::new(),
            canonical: FxHashMap::default(),
        }
    }

    fn levels(&self) -> usize {
        self.policies.len()
    }

    /// Maps a record's column values to a realized column path, merging
    /// values that fall in the same bucket across rows.
    fn canonicalize(&mut self, values: &[Scalar]) -> ColumnPath {
        if let Some(path) = self.canonical.get(values) {
            return path.clone();
        }

        let policies = &self.policies;
        let mut nodes = &mut self.roots;
        let mut path = ColumnPath::new();
        for (level, value) in values.iter().enumerate() {
            let policy = &policies[level];
            let index = match nodes.iter().position(|n| policy.same_bucket(&n.value, value)) {
                Some(index) => index,
                None => {
                    nodes.push(AxisNode {
                        value: value.clone(),
                        children: Vec::new(),
                    });
                    nodes.len() - 1
                }
            };
            path.push(Bucket::new(nodes[index].value.clone()));
            nodes = &mut nodes[index].children;
        }

        self.canonical.insert(values.iter().cloned().collect(), path.clone());
        path
    }

    /// Sorts each level per its policy and flattens the tree into columns
    /// and header runs.
    fn flatten(mut self) -> (Vec<AxisEntry>, Vec<HeaderSpan>) {
        if self.levels() == 0 {
            return (vec![AxisEntry::leaf(ColumnPath::new())], Vec::new());
        }

        sort_nodes(&mut self.roots, 0, &self.policies);

        let mut entries = Vec::new();
        let mut headers = Vec::new();
        let mut prefix = ColumnPath::new();
        self.flatten_nodes(&self.roots, 0, &mut prefix, &mut entries, &mut headers);
        (entries, headers)
    }

    fn flatten_nodes(
        &self,
        nodes: &[AxisNode],
        level: usize,
        prefix: &mut ColumnPath,
        entries: &mut Vec<AxisEntry>,
        headers: &mut Vec<HeaderSpan>,
    ) {
        let levels = self.levels();
        for node in nodes {
            let start = entries.len();
            prefix.push(Bucket::new(node.value.clone()));
            if level + 1 == levels {
                entries.push(AxisEntry::leaf(prefix.clone()));
            } else {
                self.flatten_nodes(&node.children, level + 1, prefix, entries, headers);
            }
            prefix.pop();
            headers.push(HeaderSpan {
                level,
                start,
                span: entries.len() - start,
                value: node.value.clone(),
                is_total: false,
            });
        }

        // The group's total follows its last member under this parent.
        if self.totals[level] && !nodes.is_empty() {
            let mut path = prefix.clone();
            path.extend((level..levels).map(|_| Bucket::total()));
            headers.push(HeaderSpan {
                level,
                start: entries.len(),
                span: 1,
                value: Scalar::Null,
                is_total: true,
            });
            entries.push(AxisEntry {
                path,
                total_level: Some(level),
            });
        }
    }
}

fn sort_nodes(nodes: &mut [AxisNode], level: usize, policies: &[OrderPolicy]) {
    let policy = &policies[level];
    // Stable, so unordered levels keep first-seen order.
    nodes.sort_by(|a, b| policy.compare(&a.value, &b.value));
    for node in nodes.iter_mut() {
        if level + 1 < policies.len() {
            sort_nodes(&mut node.children, level + 1, policies);
        }
    }
}

// ============================================================================
// FILL STATE
// ============================================================================

/// A completed (or in-progress) row of the data body.
#[derive(Debug)]
struct RowOut {
    entry: AxisEntry,
    results: FxHashMap<ColumnPath, Results>,
}

#[derive(Debug)]
struct OpenHeader {
    start: usize,
    value: Scalar,
}

struct FillState {
    hierarchy: GroupHierarchy,
    specs: Vec<Arc<MeasureSpec>>,
    row_levels: usize,
    column_levels: usize,

    /// Column prefix lengths that get accumulators: the leaf depth plus
    /// one per column group with totals.
    column_depths: SmallVec<[usize; 4]>,

    /// Per column level: whether a break there finishes the leaf row's
    /// deeper columns for good (all levels up to it are sorted).
    early_flush: Vec<bool>,

    /// Accumulators per row depth. Index `row_levels` holds the leaf row;
    /// index `g` holds the total of row group `g` when it has totals.
    open: Vec<Option<AccumulatorMap>>,

    /// Whole-crosstab accumulators for percentage measures.
    grand: Option<Vec<MeasureAccumulator>>,

    columns: ColumnAxis,
    rows: Vec<RowOut>,
    open_headers: Vec<OpenHeader>,
    row_headers: Vec<HeaderSpan>,
    row_values: SmallVec<[Scalar; 4]>,
    leaf_row: usize,
    records: usize,
    keys: Vec<Scalar>,
}

impl FillState {
    fn new(def: &CrosstabDefinition, policies: Vec<OrderPolicy>, specs: Vec<Arc<MeasureSpec>>) -> Self {
        let row_levels = def.row_groups.len();
        let column_levels = def.column_groups.len();

        let column_policies = policies[row_levels..].to_vec();
        let early_flush = (0..column_levels)
            .map(|m| column_policies[..=m].iter().all(|p| p.is_ordered()))
            .collect();

        let mut column_depths: SmallVec<[usize; 4]> = SmallVec::new();
        column_depths.push(column_levels);
        column_depths.extend((0..column_levels).filter(|&j| def.column_groups[j].totals));

        let open = (0..=row_levels)
            .map(|i| {
                if i == row_levels || def.row_groups[i].totals {
                    Some(AccumulatorMap::default())
                } else {
                    None
                }
            })
            .collect();

        let grand = def
            .measures
            .iter()
            .any(|m| m.percentage_of == PercentageOf::GrandTotal)
            .then(|| new_accumulators(&specs));

        let column_totals = def.column_groups.iter().map(|g| g.totals).collect();

        FillState {
            hierarchy: GroupHierarchy::new(&def.row_groups, &def.column_groups, policies),
            specs,
            row_levels,
            column_levels,
            column_depths,
            early_flush,
            open,
            grand,
            columns: ColumnAxis::new(column_policies, column_totals),
            rows: Vec::new(),
            open_headers: Vec::new(),
            row_headers: Vec::new(),
            row_values: SmallVec::new(),
            leaf_row: 0,
            records: 0,
            keys: Vec::with_capacity(row_levels + column_levels),
        }
    }

    fn feed(&mut self, def: &CrosstabDefinition, record: &Record) -> Result<()> {
        let index = self.records;
        self.keys.clear();
        for group in def.row_groups.iter().chain(def.column_groups.iter()) {
            self.keys.push(record.get(&group.field).clone());
        }

        let breaks = self.hierarchy.observe(&self.keys, index)?;
        self.records += 1;

        if index == 0 {
            self.start_rows(0);
        } else if let Some(level) = breaks.level {
            if level < self.row_levels {
                self.flush_leaf();
                self.close_rows(level, &breaks.totals_due);
                self.start_rows(level);
            } else {
                self.break_columns(level - self.row_levels);
            }
        }

        self.accumulate(&def.measures, record)
    }

    fn accumulate(&mut self, measures: &[MeasureDefinition], record: &Record) -> Result<()> {
        let values: SmallVec<[Scalar; 4]> = (self.row_levels..self.row_levels + self.column_levels)
            .map(|level| self.hierarchy.current(level).cloned().unwrap_or_default())
            .collect();
        let leaf = self.columns.canonicalize(&values);

        let paths: SmallVec<[ColumnPath; 4]> = self
            .column_depths
            .iter()
            .map(|&depth| {
                let mut path = leaf.clone();
                for bucket in path[depth..].iter_mut() {
                    *bucket = Bucket::total();
                }
                path
            })
            .collect();

        let inputs: SmallVec<[&Scalar; 4]> = measures.iter().map(|m| record.get(&m.field)).collect();
        let specs = &self.specs;

        for map in self.open.iter_mut().flatten() {
            for path in &paths {
                if !map.contains_key(path) {
                    map.insert(path.clone(), new_accumulators(specs));
                }
                let Some(accumulators) = map.get_mut(path) else {
                    continue;
                };
                for (acc, value) in accumulators.iter_mut().zip(&inputs) {
                    acc.accumulate(value)?;
                }
            }
        }

        if let Some(grand) = &mut self.grand {
            for (acc, value) in grand.iter_mut().zip(&inputs) {
                acc.accumulate(value)?;
            }
        }
        Ok(())
    }

    /// Opens header runs for row levels `from..` and starts a new leaf row.
    fn start_rows(&mut self, from: usize) {
        self.row_values.truncate(from);
        self.open_headers.truncate(from);
        for level in from..self.row_levels {
            let value = self.hierarchy.current(level).cloned().unwrap_or_default();
            self.open_headers.push(OpenHeader {
                start: self.rows.len(),
                value: value.clone(),
            });
            self.row_values.push(value);
        }

        self.leaf_row = self.rows.len();
        let path = self.row_values.iter().cloned().map(Bucket::new).collect();
        self.rows.push(RowOut {
            entry: AxisEntry::leaf(path),
            results: FxHashMap::default(),
        });
    }

    /// Moves every leaf accumulator's result into the current leaf row.
    fn flush_leaf(&mut self) {
        let row = &mut self.rows[self.leaf_row];
        if let Some(map) = self.open[self.row_levels].as_mut() {
            for (path, accumulators) in map.drain() {
                row.results.insert(path, flush_all(&accumulators));
            }
        }
    }

    /// A column level changed within the current row. When the change
    /// is final the finished columns are flushed right away.
    fn break_columns(&mut self, level: usize) {
        if !self.early_flush[level] {
            return;
        }
        let row = &mut self.rows[self.leaf_row];
        if let Some(map) = self.open[self.row_levels].as_mut() {
            map.retain(|path, accumulators| {
                if real_depth(path) > level {
                    row.results.insert(path.clone(), flush_all(accumulators));
                    false
                } else {
                    true
                }
            });
        }
    }

    /// Closes header runs for row levels `from..`, emitting the due row
    /// totals innermost first.
    fn close_rows(&mut self, from: usize, totals_due: &[usize]) {
        for level in (from..self.row_levels).rev() {
            let header = &self.open_headers[level];
            self.row_headers.push(HeaderSpan {
                level,
                start: header.start,
                span: self.rows.len() - header.start,
                value: header.value.clone(),
                is_total: false,
            });

            if totals_due.contains(&level) {
                self.emit_total_row(level);
            }
        }
        self.open_headers.truncate(from);
    }

    fn emit_total_row(&mut self, level: usize) {
        let mut path: ColumnPath = self.row_values[..level].iter().cloned().map(Bucket::new).collect();
        path.extend((level..self.row_levels).map(|_| Bucket::total()));

        let results = match self.open[level].as_mut() {
            Some(map) => map.drain().map(|(p, accs)| (p, flush_all(&accs))).collect(),
            None => FxHashMap::default(),
        };

        log::trace!("row total for level {} at data row {}", level, self.rows.len());
        self.row_headers.push(HeaderSpan {
            level,
            start: self.rows.len(),
            span: 1,
            value: Scalar::Null,
            is_total: true,
        });
        self.rows.push(RowOut {
            entry: AxisEntry {
                path,
                total_level: Some(level),
            },
            results,
        });
    }

    fn finish(mut self, def: &CrosstabDefinition) -> Result<Grid> {
        if self.records == 0 {
            log::debug!("crosstab '{}': no records, emitting no-data grid", def.name);
            let placeholder = def.no_data_cell.as_ref().map(|template| {
                GridCell::new(CellType::NoDataCell, 0, 0)
                    .with_content(template.instantiate(&TemplateContext::default()), template.style())
            });
            return Ok(Grid::no_data(def.name.clone(), placeholder));
        }

        let breaks = self.hierarchy.finish();
        self.flush_leaf();
        self.close_rows(0, &breaks.totals_due);

        let grand_totals = self.grand.as_ref().map(|g| flush_all(g));
        let records = self.records;
        let (columns, column_headers) = std::mem::replace(
            &mut self.columns,
            ColumnAxis::new(Vec::new(), Vec::new()),
        )
        .flatten();

        let grid = GridAssembler {
            def,
            row_levels: self.row_levels,
            column_levels: self.column_levels,
            grand_totals: grand_totals.as_ref(),
        }
        .assemble(self.rows, self.row_headers, columns, column_headers);

        grid.validate(Stage::Fill)?;
        log::debug!(
            "crosstab '{}': {} records -> {} rows x {} columns, {} cells",
            def.name,
            records,
            grid.row_count(),
            grid.column_count(),
            grid.cells.len()
        );
        Ok(grid)
    }
}

fn new_accumulators(specs: &[Arc<MeasureSpec>]) -> Vec<MeasureAccumulator> {
    specs.iter().map(|s| MeasureAccumulator::new(Arc::clone(s))).collect()
}

fn flush_all(accumulators: &[MeasureAccumulator]) -> Results {
    accumulators.iter().map(|a| a.flush()).collect()
}

/// Number of leading non-total buckets.
fn real_depth(path: &ColumnPath) -> usize {
    path.iter().take_while(|b| !b.is_total).count()
}

// ============================================================================
// GRID ASSEMBLY
// ============================================================================

struct GridAssembler<'a> {
    def: &'a CrosstabDefinition,
    row_levels: usize,
    column_levels: usize,
    grand_totals: Option<&'a Results>,
}

impl GridAssembler<'_> {
    fn assemble(
        &self,
        rows: Vec<RowOut>,
        mut row_headers: Vec<HeaderSpan>,
        columns: Vec<AxisEntry>,
        mut column_headers: Vec<HeaderSpan>,
    ) -> Grid {
        let def = self.def;
        let (r, c) = (self.row_levels, self.column_levels);
        let mut cells = Vec::with_capacity(rows.len() * (columns.len() + r) + column_headers.len() + 1);

        if r > 0 && c > 0 {
            let corner = GridCell::new(CellType::CrosstabHeader, 0, 0).with_spans(c, r);
            cells.push(match &def.header_cell {
                Some(template) => corner.with_content(template.instantiate(&TemplateContext::default()), template.style()),
                None => corner,
            });
        }

        column_headers.sort_by_key(|h| (h.level, h.start));
        for header in &column_headers {
            let group = &def.column_groups[header.level];
            let cell = GridCell::new(CellType::ColumnHeader, header.level, r + header.start);
            cells.push(if header.is_total {
                self.header_cell(cell.with_spans(c - header.level, 1).as_total(), group, None)
            } else {
                self.header_cell(cell.with_spans(1, header.span), group, Some(&header.value))
            });
        }

        let default_data = def.default_data_template();
        row_headers.sort_by_key(|h| (h.start, h.level));
        let mut pending = row_headers.iter().peekable();

        for (ri, row) in rows.iter().enumerate() {
            while let Some(header) = pending.next_if(|h| h.start == ri) {
                let group = &def.row_groups[header.level];
                let cell = GridCell::new(CellType::RowHeader, c + ri, header.level);
                cells.push(if header.is_total {
                    self.header_cell(cell.with_spans(1, r - header.level).as_total(), group, None)
                } else {
                    self.header_cell(cell.with_spans(header.span, 1), group, Some(&header.value))
                });
            }

            let row_total = row.entry.total_level.map(|g| def.row_groups[g].name.as_str());
            for (ci, column) in columns.iter().enumerate() {
                let column_total = column.total_level.map(|g| def.column_groups[g].name.as_str());
                let template = def
                    .data_cell_template(row_total, column_total)
                    .unwrap_or(&default_data);
                let mut cell = self.body_cell(row.results.get(&column.path), template, c + ri, r + ci);
                cell.is_total = row_total.is_some() || column_total.is_some();
                cells.push(cell);
            }
        }

        let row_entries = rows.into_iter().map(|row| row.entry).collect();
        Grid::new(def.name.clone(), r, c, row_entries, columns, cells)
    }

    fn header_cell(&self, cell: GridCell, group: &GroupDefinition, bucket: Option<&Scalar>) -> GridCell {
        let ctx = TemplateContext {
            bucket,
            group_name: Some(&group.name),
            measures: &[],
        };
        let mut cell = match (bucket, &group.header, &group.total_header) {
            (Some(_), Some(template), _) | (None, _, Some(template)) => {
                cell.with_content(template.instantiate(&ctx), template.style())
            }
            (Some(_), None, _) => cell.with_content(
                CellTemplate::text(TextSource::BucketValue).instantiate(&ctx),
                CellStyle::default(),
            ),
            (None, _, None) => cell.with_content(CellContent::text("Total"), CellStyle::default()),
        };
        if let Some(value) = bucket {
            cell.values.push(value.clone());
        }
        cell
    }

    fn body_cell(&self, results: Option<&Results>, template: &CellTemplate, row: usize, column: usize) -> GridCell {
        let def = self.def;
        match results {
            Some(results) => {
                let mut values = results.clone();
                apply_percentages(&mut values, &def.measures, self.grand_totals);
                self.data_cell(values, template, row, column)
            }
            None => match def.no_data_policy {
                NoDataPolicy::Zero => {
                    let values = def.measures.iter().map(|m| m.aggregation.empty_value()).collect();
                    self.data_cell(values, template, row, column)
                }
                NoDataPolicy::Placeholder => {
                    let cell = GridCell::new(CellType::NoDataCell, row, column);
                    match &def.no_data_cell {
                        Some(template) => {
                            cell.with_content(template.instantiate(&TemplateContext::default()), template.style())
                        }
                        None => cell,
                    }
                }
            },
        }
    }

    fn data_cell(&self, values: Results, template: &CellTemplate, row: usize, column: usize) -> GridCell {
        let ctx = TemplateContext {
            bucket: None,
            group_name: None,
            measures: &values,
        };
        let content = template.instantiate(&ctx);
        let mut cell = GridCell::new(CellType::Data, row, column).with_content(content, template.style());
        cell.values = values;
        cell
    }
}

/// Rewrites grand-total percentage measures as fractions of their total.
fn apply_percentages(values: &mut Results, measures: &[MeasureDefinition], grand: Option<&Results>) {
    for (i, measure) in measures.iter().enumerate() {
        if measure.percentage_of != PercentageOf::GrandTotal {
            continue;
        }
        let total = grand.and_then(|g| g.get(i)).and_then(|v| v.as_f64());
        values[i] = match (values[i].as_f64(), total) {
            (Some(v), Some(t)) if t != 0.0 => Scalar::number(v / t),
            (Some(_), Some(_)) => Scalar::number(0.0),
            _ => Scalar::Null,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{BucketOrder, DataCellTemplate};
    use crate::error::CrosstabError;
    use proptest::prelude::*;
    use std::cmp::Ordering;
    use std::collections::HashSet;

    fn sale(region: &str, quarter: &str, sales: i64) -> Record {
        Record::new()
            .with("region", region)
            .with("quarter", quarter)
            .with("sales", sales)
    }

    fn sales_definition() -> CrosstabDefinition {
        let mut def = CrosstabDefinition::new("sales");
        def.row_groups.push(GroupDefinition::new("Region", "region").with_totals(true));
        def.column_groups.push(GroupDefinition::new("Quarter", "quarter").with_totals(true));
        def.measures.push(MeasureDefinition::new("Sales", "sales", Aggregation::Sum));
        def
    }

    fn sales_records() -> Vec<Record> {
        vec![
            sale("East", "Q1", 10),
            sale("East", "Q1", 5),
            sale("East", "Q2", 7),
            sale("West", "Q1", 3),
        ]
    }

    fn value(grid: &Grid, row: usize, column: usize) -> Scalar {
        grid.data_cell(row, column)
            .and_then(|c| c.values.first().cloned())
            .unwrap_or_default()
    }

    fn labels(entries: &[AxisEntry]) -> Vec<String> {
        entries
            .iter()
            .map(|e| {
                if e.is_total() {
                    "Total".to_string()
                } else {
                    e.path.iter().map(|b| b.value.to_string()).collect::<Vec<_>>().join("/")
                }
            })
            .collect()
    }

    #[test]
    fn test_region_quarter_scenario() {
        let grid = CrosstabBuilder::new(sales_definition())
            .unwrap()
            .fill(&sales_records())
            .unwrap();

        assert_eq!(labels(&grid.rows), vec!["East", "West", "Total"]);
        assert_eq!(labels(&grid.columns), vec!["Q1", "Q2", "Total"]);

        assert_eq!(value(&grid, 0, 0), Scalar::Integer(15));
        assert_eq!(value(&grid, 0, 1), Scalar::Integer(7));
        assert_eq!(value(&grid, 0, 2), Scalar::Integer(22));
        assert_eq!(value(&grid, 1, 0), Scalar::Integer(3));
        assert_eq!(value(&grid, 1, 1), Scalar::Integer(0));
        assert_eq!(value(&grid, 2, 0), Scalar::Integer(18));
        assert_eq!(value(&grid, 2, 1), Scalar::Integer(7));
        assert_eq!(value(&grid, 2, 2), Scalar::Integer(25));

        assert!(grid.data_cell(2, 2).unwrap().is_total);
        assert!(!grid.data_cell(0, 0).unwrap().is_total);
        assert_eq!(grid.data_cell(0, 0).unwrap().content.plain_text(), "15");

        assert!(grid.is_tiled());
        let corner = grid.corner().unwrap();
        assert_eq!((corner.row_span, corner.column_span), (1, 1));
    }

    #[test]
    fn test_missing_combination_placeholder() {
        let mut def = sales_definition();
        def.no_data_policy = NoDataPolicy::Placeholder;
        def.no_data_cell = Some(CellTemplate::text(TextSource::Literal("-".to_string())));
        let grid = CrosstabBuilder::new(def).unwrap().fill(&sales_records()).unwrap();

        let missing = grid.data_cell(1, 1).unwrap();
        assert_eq!(missing.cell_type, CellType::NoDataCell);
        assert_eq!(missing.content.plain_text(), "-");
        assert_eq!(grid.data_cell(1, 0).unwrap().cell_type, CellType::Data);
    }

    #[test]
    fn test_header_cells() {
        let grid = CrosstabBuilder::new(sales_definition())
            .unwrap()
            .fill(&sales_records())
            .unwrap();

        let column_headers: Vec<(usize, usize, String, bool)> = grid
            .column_headers()
            .map(|c| (c.row, c.column, c.content.plain_text(), c.is_total))
            .collect();
        assert_eq!(column_headers, vec![
            (0, 1, "Q1".to_string(), false),
            (0, 2, "Q2".to_string(), false),
            (0, 3, "Total".to_string(), true),
        ]);

        let row_headers: Vec<(usize, usize, String)> = grid
            .row_headers()
            .map(|c| (c.row, c.column, c.content.plain_text()))
            .collect();
        assert_eq!(row_headers, vec![
            (1, 0, "East".to_string()),
            (2, 0, "West".to_string()),
            (3, 0, "Total".to_string()),
        ]);
    }

    fn city_definition() -> CrosstabDefinition {
        let mut def = CrosstabDefinition::new("cities");
        def.row_groups.push(GroupDefinition::new("Region", "region").with_totals(true));
        def.row_groups.push(GroupDefinition::new("City", "city").with_totals(true));
        def.column_groups.push(GroupDefinition::new("Year", "year").with_totals(true));
        def.column_groups.push(GroupDefinition::new("Quarter", "quarter").with_totals(true));
        def.measures.push(MeasureDefinition::new("Sales", "sales", Aggregation::Sum));
        def
    }

    fn city_sale(region: &str, city: &str, year: i64, quarter: &str, sales: i64) -> Record {
        Record::new()
            .with("region", region)
            .with("city", city)
            .with("year", year)
            .with("quarter", quarter)
            .with("sales", sales)
    }

    #[test]
    fn test_nested_totals_order_and_spans() {
        let records = vec![
            city_sale("East", "Boston", 2023, "Q1", 1),
            city_sale("East", "Boston", 2024, "Q2", 2),
            city_sale("East", "Newark", 2023, "Q2", 4),
            city_sale("West", "Denver", 2024, "Q1", 8),
        ];
        let grid = CrosstabBuilder::new(city_definition()).unwrap().fill(&records).unwrap();

        assert_eq!(labels(&grid.rows), vec![
            "East/Boston", "East/Newark", "Total", "West/Denver", "Total", "Total",
        ]);
        assert_eq!(grid.rows[2].total_level, Some(1));
        assert_eq!(grid.rows[5].total_level, Some(0));

        assert_eq!(labels(&grid.columns), vec![
            "2023/Q1", "2023/Q2", "Total", "2024/Q1", "2024/Q2", "Total", "Total",
        ]);
        assert_eq!(grid.columns[2].total_level, Some(1));
        assert_eq!(grid.columns[6].total_level, Some(0));

        // East total row x 2023 total column
        assert_eq!(value(&grid, 2, 2), Scalar::Integer(5));
        // Boston x grand total column
        assert_eq!(value(&grid, 0, 6), Scalar::Integer(3));
        // Grand total
        assert_eq!(value(&grid, 5, 6), Scalar::Integer(15));
        // West total x 2024/Q1
        assert_eq!(value(&grid, 4, 3), Scalar::Integer(8));

        // East spans Boston, Newark and the East city total.
        let east = grid.row_headers().find(|c| c.content.plain_text() == "East").unwrap();
        assert_eq!((east.row, east.column, east.row_span, east.column_span), (2, 0, 3, 1));
        // City total header sits in the city column.
        let city_total = grid.cell_at(4, 1).unwrap();
        assert!(city_total.is_total);
        assert_eq!(city_total.column_span, 1);
        // Grand total header covers both row header columns.
        let grand = grid.cell_at(7, 0).unwrap();
        assert_eq!((grand.column_span, grand.row_span), (2, 1));

        // 2023 spans Q1, Q2 and its quarter total.
        let year = grid.column_headers().find(|c| c.content.plain_text() == "2023").unwrap();
        assert_eq!((year.row, year.column, year.column_span), (0, 2, 3));
        // Column grand total header covers both column header rows.
        let grand_column = grid.cell_at(0, 8).unwrap();
        assert_eq!((grand_column.row_span, grand_column.column_span), (2, 1));

        assert!(grid.is_tiled());
    }

    #[test]
    fn test_unsorted_rows_fail_the_fill() {
        let records = vec![sale("West", "Q1", 1), sale("East", "Q1", 1)];
        let err = CrosstabBuilder::new(sales_definition()).unwrap().fill(&records).unwrap_err();
        assert!(matches!(err, CrosstabError::UnorderedData { record: 1, .. }));
        assert_eq!(err.stage(), Stage::Fill);
    }

    #[test]
    fn test_unordered_rows_repeat_runs() {
        let mut def = sales_definition();
        def.row_groups[0].order = BucketOrder::Unordered;
        def.row_groups[0].totals = false;
        let records = vec![sale("West", "Q1", 1), sale("East", "Q1", 2), sale("West", "Q2", 4)];
        let grid = CrosstabBuilder::new(def).unwrap().fill(&records).unwrap();

        assert_eq!(labels(&grid.rows), vec!["West", "East", "West"]);
        assert_eq!(value(&grid, 0, 0), Scalar::Integer(1));
        assert_eq!(value(&grid, 2, 1), Scalar::Integer(4));
    }

    #[test]
    fn test_unordered_columns_keep_first_seen_order() {
        let mut def = sales_definition();
        def.column_groups[0].order = BucketOrder::Unordered;
        let records = vec![
            sale("East", "Q3", 1),
            sale("East", "Q1", 2),
            sale("East", "Q3", 4),
            sale("West", "Q1", 8),
            sale("West", "Q2", 16),
        ];
        let grid = CrosstabBuilder::new(def).unwrap().fill(&records).unwrap();

        assert_eq!(labels(&grid.columns), vec!["Q3", "Q1", "Q2", "Total"]);
        // East/Q3 ran twice and both runs land in one cell.
        assert_eq!(value(&grid, 0, 0), Scalar::Integer(5));
        assert_eq!(value(&grid, 2, 1), Scalar::Integer(10));
    }

    #[test]
    fn test_custom_comparator_merges_equal_buckets() {
        let mut def = sales_definition();
        def.column_groups[0].order = BucketOrder::Custom {
            comparator: "case_insensitive".to_string(),
        };
        let cmp: Comparator = Arc::new(|a: &Scalar, b: &Scalar| -> Ordering {
            a.to_string().to_lowercase().cmp(&b.to_string().to_lowercase())
        });
        let records = vec![sale("East", "q1", 1), sale("East", "Q1", 2), sale("West", "Q1", 4)];
        let grid = CrosstabBuilder::new(def)
            .unwrap()
            .with_comparator("case_insensitive", cmp)
            .fill(&records)
            .unwrap();

        assert_eq!(labels(&grid.columns), vec!["q1", "Total"]);
        assert_eq!(value(&grid, 0, 0), Scalar::Integer(3));
        assert_eq!(value(&grid, 2, 0), Scalar::Integer(7));
    }

    #[test]
    fn test_unregistered_comparator() {
        let mut def = sales_definition();
        def.row_groups[0].order = BucketOrder::Custom {
            comparator: "fiscal".to_string(),
        };
        let mut builder = CrosstabBuilder::new(def).unwrap();
        let err = builder.feed(&sale("East", "Q1", 1)).unwrap_err();
        assert!(matches!(err, CrosstabError::InvalidDefinition(_)));
    }

    #[test]
    fn test_empty_input() {
        let mut def = sales_definition();
        let grid = CrosstabBuilder::new(def.clone()).unwrap().finish().unwrap();
        assert!(grid.is_empty());

        def.no_data_cell = Some(CellTemplate::text(TextSource::Literal("No data".to_string())));
        let grid = CrosstabBuilder::new(def).unwrap().finish().unwrap();
        assert!(grid.is_no_data());
        assert_eq!(grid.cells[0].content.plain_text(), "No data");
    }

    #[test]
    fn test_percentage_of_grand_total() {
        let mut def = sales_definition();
        let mut share = MeasureDefinition::new("Share", "sales", Aggregation::Sum);
        share.percentage_of = PercentageOf::GrandTotal;
        def.measures.push(share);
        let grid = CrosstabBuilder::new(def).unwrap().fill(&sales_records()).unwrap();

        let east_q1 = grid.data_cell(0, 0).unwrap();
        assert_eq!(east_q1.values[0], Scalar::Integer(15));
        assert_eq!(east_q1.values[1], Scalar::number(0.6));
        let grand = grid.data_cell(2, 2).unwrap();
        assert_eq!(grand.values[1], Scalar::number(1.0));
    }

    #[test]
    fn test_total_data_template_selected() {
        let mut def = sales_definition();
        def.data_cells.push(DataCellTemplate {
            row_total_group: Some("Region".to_string()),
            column_total_group: Some("Quarter".to_string()),
            contents: CellTemplate::new(vec![crate::definition::ElementTemplate::Text {
                source: TextSource::Measure(0),
                evaluation: crate::definition::EvaluationTime::Now,
            }])
            .with_positions(crate::cell::HorizontalPosition::Right, crate::cell::VerticalPosition::Middle),
        });
        let grid = CrosstabBuilder::new(def).unwrap().fill(&sales_records()).unwrap();

        let grand = grid.data_cell(2, 2).unwrap();
        assert_eq!(grand.style.position_x, crate::cell::HorizontalPosition::Right);
        assert_eq!(grand.content.plain_text(), "25");
        let plain = grid.data_cell(0, 0).unwrap();
        assert_eq!(plain.style.position_x, crate::cell::HorizontalPosition::Left);
    }

    #[test]
    fn test_no_groups_single_cell() {
        let mut def = CrosstabDefinition::new("total");
        def.measures.push(MeasureDefinition::new("Count", "id", Aggregation::Count));
        let records: Vec<Record> = (0..4).map(|i| Record::new().with("id", i as i64)).collect();
        let grid = CrosstabBuilder::new(def).unwrap().fill(&records).unwrap();

        assert_eq!((grid.row_count(), grid.column_count()), (1, 1));
        assert!(grid.corner().is_none());
        assert_eq!(value(&grid, 0, 0), Scalar::Integer(4));
    }

    #[test]
    fn test_refill_is_identical() {
        let project = |grid: &Grid| -> Vec<(CellType, usize, usize, usize, usize, Vec<Scalar>, String)> {
            grid.cells
                .iter()
                .map(|c| {
                    (c.cell_type, c.row, c.column, c.row_span, c.column_span, c.values.to_vec(), c.content.plain_text())
                })
                .collect()
        };
        let first = CrosstabBuilder::new(city_definition()).unwrap().fill(&sales_like_cities()).unwrap();
        let second = CrosstabBuilder::new(city_definition()).unwrap().fill(&sales_like_cities()).unwrap();
        assert_eq!(project(&first), project(&second));
    }

    fn sales_like_cities() -> Vec<Record> {
        vec![
            city_sale("East", "Boston", 2023, "Q1", 1),
            city_sale("East", "Boston", 2023, "Q2", 2),
            city_sale("North", "Fargo", 2024, "Q1", 3),
        ]
    }

    fn region_city_quarter(key: &(u8, u8, u8)) -> (Vec<Scalar>, Vec<Scalar>) {
        let (region, city, quarter) = *key;
        (
            vec![Scalar::text(format!("R{}", region)), Scalar::text(format!("C{}", city))],
            vec![Scalar::from(2020 + (quarter / 2) as i64), Scalar::text(format!("Q{}", quarter))],
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_realized_cells_match_input_pairs(
            keys in proptest::collection::vec((0u8..3, 0u8..3, 0u8..4), 1..40),
        ) {
            let mut keys = keys;
            keys.sort();
            let records: Vec<Record> = keys
                .iter()
                .map(|key| {
                    let (rows, columns) = region_city_quarter(key);
                    Record::new()
                        .with("region", rows[0].clone())
                        .with("city", rows[1].clone())
                        .with("year", columns[0].clone())
                        .with("quarter", columns[1].clone())
                        .with("sales", 1)
                })
                .collect();
            let mut def = city_definition();
            def.no_data_policy = NoDataPolicy::Placeholder;
            let grid = CrosstabBuilder::new(def).unwrap().fill(&records).unwrap();

            let expected: HashSet<_> = keys.iter().map(region_city_quarter).collect();
            let mut realized = HashSet::new();
            for (ri, row) in grid.rows.iter().enumerate() {
                for (ci, column) in grid.columns.iter().enumerate() {
                    let cell = grid.data_cell(ri, ci).unwrap();
                    if row.is_total() || column.is_total() {
                        continue;
                    }
                    if cell.cell_type == CellType::Data {
                        let path = |e: &AxisEntry| e.path.iter().map(|b| b.value.clone()).collect::<Vec<_>>();
                        realized.insert((path(row), path(column)));
                    }
                }
            }
            prop_assert_eq!(&realized, &expected);

            let regions: HashSet<_> = keys.iter().map(|k| k.0).collect();
            let years: HashSet<_> = keys.iter().map(|k| k.2 / 2).collect();
            let totals = |entries: &[AxisEntry], level: usize| {
                entries.iter().filter(|e| e.total_level == Some(level)).count()
            };
            prop_assert_eq!(totals(&grid.rows, 0), 1);
            prop_assert_eq!(totals(&grid.rows, 1), regions.len());
            prop_assert_eq!(totals(&grid.columns, 0), 1);
            prop_assert_eq!(totals(&grid.columns, 1), years.len());

            let grand = value(&grid, grid.rows.len() - 1, grid.columns.len() - 1);
            prop_assert_eq!(grand, Scalar::Integer(keys.len() as i64));
            prop_assert!(grid.is_tiled());
        }
    }
}
