//! FILENAME: core/crosstab-engine/src/bucket.rs
//! Bucket Model - run detection for one group level.
//!
//! A cursor watches the values one group level takes as records stream
//! in and reports when a new run (bucket) starts. For sorted groups it
//! also enforces that values never move backwards within a parent
//! bucket, since incremental aggregation depends on it.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::definition::BucketOrder;
use crate::error::{CrosstabError, Result};
use crate::value::Scalar;

/// A user-supplied ordering for `BucketOrder::Custom`.
pub type Comparator = Arc<dyn Fn(&Scalar, &Scalar) -> Ordering + Send + Sync>;

// ============================================================================
// BUCKET
// ============================================================================

/// One realized group value, or the synthetic total of a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bucket {
    pub value: Scalar,
    pub is_total: bool,
}

impl Bucket {
    pub fn new(value: Scalar) -> Self {
        Bucket { value, is_total: false }
    }

    /// The synthetic bucket standing for "all values" of a level.
    pub fn total() -> Self {
        Bucket {
            value: Scalar::Null,
            is_total: true,
        }
    }
}

/// What happened to a level when a record was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketTransition {
    /// Same run as the previous record.
    Unchanged,
    /// A new run started under the same parent bucket.
    NewBucket,
    /// An outer level changed: the run under the old parent is complete,
    /// along with this level's total for that parent.
    TotalBoundary,
}

// ============================================================================
// ORDER POLICY
// ============================================================================

/// A `BucketOrder` with its custom comparator resolved.
#[derive(Clone)]
pub enum OrderPolicy {
    Natural,
    Reverse,
    Custom(Comparator),
    Unordered,
}

impl fmt::Debug for OrderPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderPolicy::Natural => f.write_str("Natural"),
            OrderPolicy::Reverse => f.write_str("Reverse"),
            OrderPolicy::Custom(_) => f.write_str("Custom"),
            OrderPolicy::Unordered => f.write_str("Unordered"),
        }
    }
}

impl OrderPolicy {
    /// Resolves a declared order, looking custom comparators up by name.
    pub fn resolve(
        order: &BucketOrder,
        lookup: impl Fn(&str) -> Option<Comparator>,
    ) -> Result<Self> {
        Ok(match order {
            BucketOrder::Ascending => OrderPolicy::Natural,
            BucketOrder::Descending => OrderPolicy::Reverse,
            BucketOrder::Unordered => OrderPolicy::Unordered,
            BucketOrder::Custom { comparator } => {
                let cmp = lookup(comparator).ok_or_else(|| {
                    CrosstabError::InvalidDefinition(format!(
                        "no comparator registered under '{}'",
                        comparator
                    ))
                })?;
                OrderPolicy::Custom(cmp)
            }
        })
    }

    pub fn is_ordered(&self) -> bool {
        !matches!(self, OrderPolicy::Unordered)
    }

    /// Sort comparison. Unordered groups compare everything equal so a
    /// stable sort keeps first-seen order.
    pub fn compare(&self, a: &Scalar, b: &Scalar) -> Ordering {
        match self {
            OrderPolicy::Natural => a.natural_cmp(b),
            OrderPolicy::Reverse => b.natural_cmp(a),
            OrderPolicy::Custom(cmp) => cmp(a, b),
            OrderPolicy::Unordered => Ordering::Equal,
        }
    }

    /// Whether two values fall in the same bucket.
    pub fn same_bucket(&self, a: &Scalar, b: &Scalar) -> bool {
        match self {
            OrderPolicy::Unordered => a == b,
            _ => self.compare(a, b) == Ordering::Equal,
        }
    }
}

// ============================================================================
// CURSOR
// ============================================================================

/// Tracks the current run of one group level during a single fill.
#[derive(Debug)]
pub struct BucketCursor {
    group: String,
    policy: OrderPolicy,
    current: Option<Scalar>,
    runs: usize,
}

impl BucketCursor {
    pub fn new(group: impl Into<String>, policy: OrderPolicy) -> Self {
        BucketCursor {
            group: group.into(),
            policy,
            current: None,
            runs: 0,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn policy(&self) -> &OrderPolicy {
        &self.policy
    }

    /// The value of the open run.
    pub fn current(&self) -> Option<&Scalar> {
        self.current.as_ref()
    }

    /// Number of runs started so far.
    pub fn runs(&self) -> usize {
        self.runs
    }

    /// Observes the level's value for the next record.
    ///
    /// `outer_broke` tells the cursor that an enclosing level started a new
    /// run for this record; the ordering check then restarts because the
    /// value belongs to a different parent.
    pub fn advance(&mut self, value: &Scalar, outer_broke: bool, record: usize) -> Result<BucketTransition> {
        let Some(current) = &self.current else {
            self.current = Some(value.clone());
            self.runs += 1;
            return Ok(BucketTransition::NewBucket);
        };

        if outer_broke {
            self.current = Some(value.clone());
            self.runs += 1;
            return Ok(BucketTransition::TotalBoundary);
        }

        if self.policy.same_bucket(current, value) {
            return Ok(BucketTransition::Unchanged);
        }

        if self.policy.is_ordered() && self.policy.compare(value, current) == Ordering::Less {
            return Err(CrosstabError::UnorderedData {
                group: self.group.clone(),
                record,
                current: current.clone(),
                value: value.clone(),
            });
        }

        self.current = Some(value.clone());
        self.runs += 1;
        Ok(BucketTransition::NewBucket)
    }

    /// End of stream: the open run (if any) and its total are complete.
    pub fn close(&mut self) -> BucketTransition {
        if self.current.take().is_some() {
            BucketTransition::TotalBoundary
        } else {
            BucketTransition::Unchanged
        }
    }

    /// Consumes the cursor into a lazy sequence of realized buckets over a
    /// single-level value stream. Not restartable: a new fill needs a new
    /// cursor.
    pub fn into_runs<I>(self, values: I) -> BucketRuns<I::IntoIter>
    where
        I: IntoIterator<Item = Scalar>,
    {
        BucketRuns {
            cursor: self,
            values: values.into_iter(),
            record: 0,
            failed: false,
        }
    }
}

/// Iterator over the runs of a single level. Yields each new bucket once,
/// and stops after the first ordering error.
pub struct BucketRuns<I> {
    cursor: BucketCursor,
    values: I,
    record: usize,
    failed: bool,
}

impl<I: Iterator<Item = Scalar>> Iterator for BucketRuns<I> {
    type Item = Result<Bucket>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        for value in self.values.by_ref() {
            let record = self.record;
            self.record += 1;
            match self.cursor.advance(&value, false, record) {
                Ok(BucketTransition::Unchanged) => continue,
                Ok(_) => return Some(Ok(Bucket::new(value))),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
