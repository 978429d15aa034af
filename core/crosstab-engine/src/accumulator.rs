//! FILENAME: core/crosstab-engine/src/accumulator.rs
//! Measure Accumulator - incremental aggregation for one bucket combination.
//!
//! Every accumulator holds O(1) state except distinct-count, whose
//! auxiliary set is bounded by the measure's `distinct_limit`.
//! `flush` is read-only, so a result can be taken and later discarded
//! without affecting anything else.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::definition::{Aggregation, MeasureDefinition};
use crate::error::{CrosstabError, Result};
use crate::value::{Decimal, Scalar};

/// Largest number of extra fractional digits tried when looking for an
/// exact decimal average.
const MAX_AVERAGE_EXTRA_SCALE: u32 = 18;

/// A user-defined aggregation, folded one value at a time.
pub trait Incrementer: Send + Sync {
    /// Value of an accumulator that has seen nothing.
    fn initial(&self) -> Scalar;

    /// Folds one record value into the accumulated value.
    fn increment(&self, accumulated: &Scalar, value: &Scalar) -> Scalar;
}

// ============================================================================
// MEASURE SPEC
// ============================================================================

/// Everything an accumulator needs to know about its measure, shared by
/// all accumulators of that measure.
pub struct MeasureSpec {
    pub name: String,
    pub aggregation: Aggregation,
    pub count_nulls: bool,
    pub distinct_limit: usize,
    pub incrementer: Option<Arc<dyn Incrementer>>,
}

impl fmt::Debug for MeasureSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeasureSpec")
            .field("name", &self.name)
            .field("aggregation", &self.aggregation)
            .field("count_nulls", &self.count_nulls)
            .field("distinct_limit", &self.distinct_limit)
            .finish()
    }
}

impl MeasureSpec {
    pub fn new(definition: &MeasureDefinition, incrementer: Option<Arc<dyn Incrementer>>) -> Result<Self> {
        if let Aggregation::Custom { name } = &definition.aggregation {
            if incrementer.is_none() {
                return Err(CrosstabError::InvalidDefinition(format!(
                    "measure '{}' uses unregistered incrementer '{}'",
                    definition.name, name
                )));
            }
        }
        Ok(MeasureSpec {
            name: definition.name.clone(),
            aggregation: definition.aggregation.clone(),
            count_nulls: definition.count_nulls,
            distinct_limit: definition.distinct_limit,
            incrementer,
        })
    }
}

// ============================================================================
// EXACT SUM
// ============================================================================

/// Sum that never silently loses precision: integers and decimals are
/// added exactly, floats with Neumaier compensation.
#[derive(Debug, Clone, Default)]
struct ExactSum {
    integer: i128,
    decimal: Option<Decimal>,
    float: f64,
    compensation: f64,
    has_float: bool,
    count: u64,
}

impl ExactSum {
    /// Adds a numeric value. Returns false for non-numeric input.
    fn add(&mut self, value: &Scalar) -> bool {
        match value {
            Scalar::Integer(i) => match self.integer.checked_add(*i as i128) {
                Some(sum) => self.integer = sum,
                None => {
                    log::warn!("integer sum overflowed i128, continuing in floating point");
                    self.add_float(*i as f64);
                }
            },
            Scalar::Decimal(d) => {
                let sum = match self.decimal {
                    Some(acc) => acc.checked_add(*d),
                    None => Some(*d),
                };
                match sum {
                    Some(sum) => self.decimal = Some(sum),
                    None => {
                        log::warn!("decimal sum overflowed, continuing in floating point");
                        self.add_float(d.to_f64());
                    }
                }
            }
            Scalar::Number(n) => self.add_float(n.0),
            _ => return false,
        }
        self.count += 1;
        true
    }

    fn add_float(&mut self, x: f64) {
        let t = self.float + x;
        if self.float.abs() >= x.abs() {
            self.compensation += (self.float - t) + x;
        } else {
            self.compensation += (x - t) + self.float;
        }
        self.float = t;
        self.has_float = true;
    }

    /// The exact part (integers plus decimals) as one decimal.
    fn exact(&self) -> Option<Decimal> {
        let integer = Decimal::new(self.integer, 0);
        match self.decimal {
            Some(d) => integer.checked_add(d),
            None => Some(integer),
        }
    }

    fn total(&self) -> Scalar {
        if self.count == 0 {
            return Scalar::Null;
        }
        let exact = self.exact();
        if self.has_float || exact.is_none() {
            let exact_part = exact.map_or(self.integer as f64, |d| d.to_f64());
            return Scalar::number(exact_part + self.float + self.compensation);
        }
        match (exact, self.decimal) {
            (Some(d), None) => d.to_i64().map_or(Scalar::Decimal(d), Scalar::Integer),
            (Some(d), Some(_)) => Scalar::Decimal(d),
            (None, _) => Scalar::Null,
        }
    }

    fn mean(&self) -> Scalar {
        if self.count == 0 {
            return Scalar::Null;
        }
        if !self.has_float {
            if let Some(sum) = self.exact() {
                if let Some(avg) = exact_quotient(sum, self.count) {
                    return match avg.to_i64() {
                        Some(i) if self.decimal.is_none() => Scalar::Integer(i),
                        _ => Scalar::Decimal(avg),
                    };
                }
            }
        }
        match self.total().as_f64() {
            Some(total) => Scalar::number(total / self.count as f64),
            None => Scalar::Null,
        }
    }
}

/// `sum / count` as a decimal, if it terminates within a bounded scale.
fn exact_quotient(sum: Decimal, count: u64) -> Option<Decimal> {
    let count = count as i128;
    for extra in 0..=MAX_AVERAGE_EXTRA_SCALE {
        let scaled = 10i128.checked_pow(extra)?.checked_mul(sum.mantissa())?;
        if scaled % count == 0 {
            return Decimal::checked_new(scaled / count, sum.scale() + extra);
        }
    }
    None
}

// ============================================================================
// ACCUMULATOR
// ============================================================================

#[derive(Debug, Clone)]
enum State {
    Sum(ExactSum),
    Count(u64),
    Average(ExactSum),
    Min(Option<Scalar>),
    Max(Option<Scalar>),
    Distinct(FxHashSet<Scalar>),
    First(Option<Scalar>),
    /// Welford's running mean and squared deviations.
    Moments { count: u64, mean: f64, m2: f64 },
    Custom(Scalar),
}

/// Accumulator for one measure over one bucket combination.
#[derive(Debug, Clone)]
pub struct MeasureAccumulator {
    spec: Arc<MeasureSpec>,
    state: State,
}

impl MeasureAccumulator {
    pub fn new(spec: Arc<MeasureSpec>) -> Self {
        let state = Self::initial_state(&spec);
        MeasureAccumulator { spec, state }
    }

    fn initial_state(spec: &MeasureSpec) -> State {
        match spec.aggregation {
            Aggregation::Sum => State::Sum(ExactSum::default()),
            Aggregation::Count => State::Count(0),
            Aggregation::Average => State::Average(ExactSum::default()),
            Aggregation::Min => State::Min(None),
            Aggregation::Max => State::Max(None),
            Aggregation::DistinctCount => State::Distinct(FxHashSet::default()),
            Aggregation::First => State::First(None),
            Aggregation::Variance | Aggregation::StdDev => State::Moments { count: 0, mean: 0.0, m2: 0.0 },
            Aggregation::Custom { .. } => State::Custom(
                spec.incrementer.as_ref().map_or(Scalar::Null, |inc| inc.initial()),
            ),
        }
    }

    pub fn measure(&self) -> &str {
        &self.spec.name
    }

    /// Folds one record value into the accumulator.
    pub fn accumulate(&mut self, value: &Scalar) -> Result<()> {
        match &mut self.state {
            State::Sum(sum) | State::Average(sum) => {
                sum.add(value);
            }
            State::Count(count) => {
                if !value.is_null() || self.spec.count_nulls {
                    *count += 1;
                }
            }
            State::Min(min) => {
                if !value.is_null() && min.as_ref().map_or(true, |m| value.natural_cmp(m).is_lt()) {
                    *min = Some(value.clone());
                }
            }
            State::Max(max) => {
                if !value.is_null() && max.as_ref().map_or(true, |m| value.natural_cmp(m).is_gt()) {
                    *max = Some(value.clone());
                }
            }
            State::Distinct(seen) => {
                let key = value.normalized();
                if !key.is_null() && !seen.contains(&key) {
                    if seen.len() >= self.spec.distinct_limit {
                        return Err(CrosstabError::DistinctLimitExceeded {
                            measure: self.spec.name.clone(),
                            limit: self.spec.distinct_limit,
                        });
                    }
                    seen.insert(key);
                }
            }
            State::First(first) => {
                if first.is_none() && !value.is_null() {
                    *first = Some(value.clone());
                }
            }
            State::Moments { count, mean, m2 } => {
                if let Some(x) = value.as_f64() {
                    *count += 1;
                    let delta = x - *mean;
                    *mean += delta / (*count as f64);
                    let delta2 = x - *mean;
                    *m2 += delta * delta2;
                }
            }
            State::Custom(acc) => {
                if let Some(inc) = &self.spec.incrementer {
                    *acc = inc.increment(acc, value);
                }
            }
        }
        Ok(())
    }

    /// Result for the combination seen so far. Does not change state.
    pub fn flush(&self) -> Scalar {
        match &self.state {
            State::Sum(sum) => sum.total(),
            State::Average(sum) => sum.mean(),
            State::Count(count) => Scalar::Integer(*count as i64),
            State::Min(v) | State::Max(v) | State::First(v) => v.clone().unwrap_or(Scalar::Null),
            State::Distinct(seen) => Scalar::Integer(seen.len() as i64),
            State::Moments { count, m2, .. } => {
                if *count < 2 {
                    return Scalar::Null;
                }
                let variance = m2 / ((*count - 1) as f64);
                match self.spec.aggregation {
                    Aggregation::StdDev => Scalar::number(variance.sqrt()),
                    _ => Scalar::number(variance),
                }
            }
            State::Custom(acc) => acc.clone(),
        }
    }

    /// Returns to the state of a freshly created accumulator.
    pub fn reset(&mut self) {
        self.state = Self::initial_state(&self.spec);
    }
}
