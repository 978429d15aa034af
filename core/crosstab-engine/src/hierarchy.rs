//! FILENAME: core/crosstab-engine/src/hierarchy.rs
//! Group Hierarchy - break detection across all group levels.
//!
//! Row groups and column groups are combined into one list of levels,
//! row groups first (outer to inner) followed by column groups. A record
//! breaks at the outermost level whose bucket changed; every level inside
//! it starts a new run as well.

use smallvec::SmallVec;

use crate::bucket::{BucketCursor, BucketTransition, OrderPolicy};
use crate::definition::GroupDefinition;
use crate::error::Result;
use crate::value::Scalar;

/// Break decision for one observed record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BreakSet {
    /// Outermost combined level whose bucket changed. `None` when the
    /// record continues every open run, and at end of stream.
    pub level: Option<usize>,

    /// Levels whose totals just completed, innermost first so the
    /// outermost (and finally the grand) total comes last.
    pub totals_due: SmallVec<[usize; 4]>,
}

impl BreakSet {
    pub fn is_break(&self) -> bool {
        self.level.is_some()
    }
}

/// One level of the combined hierarchy.
#[derive(Debug)]
struct Level {
    cursor: BucketCursor,
    totals: bool,
}

#[derive(Debug)]
pub struct GroupHierarchy {
    levels: Vec<Level>,
    row_levels: usize,
    started: bool,
}

impl GroupHierarchy {
    /// Builds the hierarchy from resolved order policies, one per group.
    pub fn new(
        row_groups: &[GroupDefinition],
        column_groups: &[GroupDefinition],
        policies: Vec<OrderPolicy>,
    ) -> Self {
        let levels = row_groups
            .iter()
            .chain(column_groups.iter())
            .zip(policies)
            .map(|(group, policy)| Level {
                cursor: BucketCursor::new(group.name.clone(), policy),
                totals: group.totals,
            })
            .collect();
        GroupHierarchy {
            levels,
            row_levels: row_groups.len(),
            started: false,
        }
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Number of leading levels that belong to row groups.
    pub fn row_levels(&self) -> usize {
        self.row_levels
    }

    pub fn has_totals(&self, level: usize) -> bool {
        self.levels[level].totals
    }

    pub fn policy(&self, level: usize) -> &OrderPolicy {
        self.levels[level].cursor.policy()
    }

    /// The value standing for the open run of a level. Under a custom
    /// comparator this is the first value of the run, so values the
    /// comparator deems equal share one bucket.
    pub fn current(&self, level: usize) -> Option<&Scalar> {
        self.levels[level].cursor.current()
    }

    /// Feeds the group values of the next record, one per combined level.
    pub fn observe(&mut self, keys: &[Scalar], record: usize) -> Result<BreakSet> {
        debug_assert_eq!(keys.len(), self.levels.len());

        let mut level = None;
        for (i, (state, key)) in self.levels.iter_mut().zip(keys).enumerate() {
            let outer_broke = level.is_some();
            match state.cursor.advance(key, outer_broke, record)? {
                BucketTransition::Unchanged => {}
                BucketTransition::NewBucket | BucketTransition::TotalBoundary => {
                    if level.is_none() {
                        level = Some(i);
                    }
                }
            }
        }

        let totals_due = match level {
            Some(l) if self.started => self.enabled_totals(l + 1),
            _ => SmallVec::new(),
        };
        if let Some(l) = level {
            log::trace!("record {}: break at level {}, totals due {:?}", record, l, totals_due);
        }
        self.started = true;

        Ok(BreakSet { level, totals_due })
    }

    /// End of stream: every open run closes and every enabled total,
    /// including the grand total of the outermost level, is due.
    pub fn finish(&mut self) -> BreakSet {
        let totals_due = if self.started {
            self.enabled_totals(0)
        } else {
            SmallVec::new()
        };
        for state in &mut self.levels {
            state.cursor.close();
        }
        BreakSet {
            level: None,
            totals_due,
        }
    }

    /// Enabled totals for levels `from..`, innermost first.
    fn enabled_totals(&self, from: usize) -> SmallVec<[usize; 4]> {
        (from..self.levels.len())
            .rev()
            .filter(|&l| self.levels[l].totals)
            .collect()
    }
}
