//! FILENAME: core/crosstab-engine/src/value.rs
//! Scalar values flowing through the crosstab.
//!
//! Records, buckets and measure results all carry `Scalar`s. The
//! expression evaluator that produces them lives outside this crate; we
//! only need equality (run detection, distinct counting), a total
//! ordering (sorted buckets) and exact arithmetic for sums.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// ORDERED FLOAT
// ============================================================================

/// Wrapper around f64 that implements Eq and Hash for use as map keys.
/// NaN values are treated as equal to each other.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderedFloat(pub f64);

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        if self.0.is_nan() && other.0.is_nan() {
            true
        } else {
            self.0 == other.0
        }
    }
}

impl Eq for OrderedFloat {}

impl std::hash::Hash for OrderedFloat {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        if self.0.is_nan() {
            u64::MAX.hash(state);
        } else if self.0 == 0.0 {
            // -0.0 == 0.0, so they must hash alike
            0u64.hash(state);
        } else {
            self.0.to_bits().hash(state);
        }
    }
}

impl OrderedFloat {
    pub fn as_f64(&self) -> f64 {
        self.0
    }
}

// ============================================================================
// DECIMAL
// ============================================================================

/// Exact fixed-point number: `mantissa * 10^-scale`.
///
/// Always stored normalized (no trailing zeros in the mantissa), so two
/// decimals are structurally equal exactly when they are numerically equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Decimal {
    mantissa: i128,
    scale: u32,
}

/// Largest scale we keep. 10^38 still fits in an i128.
const MAX_SCALE: u32 = 38;

impl Decimal {
    /// Builds `mantissa * 10^-scale`. Digits past `MAX_SCALE` fractional
    /// places are truncated; use `checked_new` to refuse them instead.
    pub fn new(mantissa: i128, scale: u32) -> Self {
        let mut d = Decimal { mantissa, scale };
        d.normalize();
        if d.scale > MAX_SCALE {
            let excess = d.scale - MAX_SCALE;
            d.mantissa = 10i128.checked_pow(excess).map_or(0, |p| d.mantissa / p);
            d.scale = MAX_SCALE;
            d.normalize();
        }
        d
    }

    /// Exact construction: None when the value needs more than
    /// `MAX_SCALE` fractional digits.
    pub fn checked_new(mantissa: i128, scale: u32) -> Option<Self> {
        let mut d = Decimal { mantissa, scale };
        d.normalize();
        (d.scale <= MAX_SCALE).then_some(d)
    }

    pub fn from_i64(value: i64) -> Self {
        Decimal { mantissa: value as i128, scale: 0 }
    }

    pub fn mantissa(&self) -> i128 {
        self.mantissa
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    fn normalize(&mut self) {
        if self.mantissa == 0 {
            self.scale = 0;
            return;
        }
        while self.scale > 0 && self.mantissa % 10 == 0 {
            self.mantissa /= 10;
            self.scale -= 1;
        }
    }

    /// Returns the mantissa expressed at a larger scale, or None on overflow.
    fn mantissa_at(&self, scale: u32) -> Option<i128> {
        let diff = scale.checked_sub(self.scale)?;
        10i128.checked_pow(diff)?.checked_mul(self.mantissa)
    }

    /// Exact addition. Returns None when the result does not fit.
    pub fn checked_add(self, other: Decimal) -> Option<Decimal> {
        let scale = self.scale.max(other.scale);
        let a = self.mantissa_at(scale)?;
        let b = other.mantissa_at(scale)?;
        Some(Decimal::new(a.checked_add(b)?, scale))
    }

    pub fn to_f64(&self) -> f64 {
        self.mantissa as f64 / 10f64.powi(self.scale as i32)
    }

    /// Integer value if the decimal has no fractional part and fits an i64.
    pub fn to_i64(&self) -> Option<i64> {
        if self.scale == 0 {
            i64::try_from(self.mantissa).ok()
        } else {
            None
        }
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        let scale = self.scale.max(other.scale);
        match (self.mantissa_at(scale), other.mantissa_at(scale)) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => self.to_f64().total_cmp(&other.to_f64()),
        }
    }
}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.mantissa);
        }
        let sign = if self.mantissa < 0 { "-" } else { "" };
        let digits = self.mantissa.unsigned_abs().to_string();
        let scale = self.scale as usize;
        if digits.len() > scale {
            let (int_part, frac_part) = digits.split_at(digits.len() - scale);
            write!(f, "{}{}.{}", sign, int_part, frac_part)
        } else {
            write!(f, "{}0.{}{}", sign, "0".repeat(scale - digits.len()), digits)
        }
    }
}

impl FromStr for Decimal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let (int_part, frac_part) = match body.split_once('.') {
            Some((i, f)) => (i, f),
            None => (body, ""),
        };
        let valid = |part: &str| part.chars().all(|c| c.is_ascii_digit());
        if (int_part.is_empty() && frac_part.is_empty()) || !valid(int_part) || !valid(frac_part) {
            return Err(format!("invalid decimal literal '{}'", s));
        }
        let scale = frac_part.len() as u32;
        if scale > MAX_SCALE {
            return Err(format!("decimal literal '{}' exceeds {} fractional digits", s, MAX_SCALE));
        }
        let digits = format!("{}{}", int_part, frac_part);
        let mut mantissa: i128 = if digits.is_empty() {
            0
        } else {
            digits
                .parse()
                .map_err(|_| format!("decimal literal '{}' out of range", s))?
        };
        if negative {
            mantissa = -mantissa;
        }
        Ok(Decimal::new(mantissa, scale))
    }
}

impl From<Decimal> for String {
    fn from(value: Decimal) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for Decimal {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ============================================================================
// SCALAR
// ============================================================================

/// A single already-evaluated value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Scalar {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(Decimal),
    Number(OrderedFloat),
    Text(String),
}

impl Scalar {
    pub fn text(s: impl Into<String>) -> Self {
        Scalar::Text(s.into())
    }

    pub fn number(n: f64) -> Self {
        Scalar::Number(OrderedFloat(n))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Scalar::Integer(_) | Scalar::Decimal(_) | Scalar::Number(_))
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Integer(i) => Some(*i as f64),
            Scalar::Decimal(d) => Some(d.to_f64()),
            Scalar::Number(n) => Some(n.0),
            _ => None,
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Scalar::Null => 0,
            Scalar::Integer(_) | Scalar::Decimal(_) | Scalar::Number(_) => 1,
            Scalar::Text(_) => 2,
            Scalar::Boolean(_) => 3,
        }
    }

    /// Natural ordering: empty < numbers < text < booleans.
    /// Numbers of different representations compare by value.
    pub fn natural_cmp(&self, other: &Scalar) -> Ordering {
        match (self, other) {
            (Scalar::Integer(a), Scalar::Integer(b)) => a.cmp(b),
            (Scalar::Decimal(a), Scalar::Decimal(b)) => a.cmp(b),
            (Scalar::Integer(a), Scalar::Decimal(b)) => Decimal::from_i64(*a).cmp(b),
            (Scalar::Decimal(a), Scalar::Integer(b)) => a.cmp(&Decimal::from_i64(*b)),
            (Scalar::Number(a), Scalar::Number(b)) => a.0.total_cmp(&b.0),
            (Scalar::Text(a), Scalar::Text(b)) => a.cmp(b),
            (Scalar::Boolean(a), Scalar::Boolean(b)) => a.cmp(b),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                // Mixed float / exact comparison goes through f64.
                let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                x.total_cmp(&y)
            }
            (a, b) => a.kind_rank().cmp(&b.kind_rank()),
        }
    }

    /// Canonical representation for hashing numbers of different kinds:
    /// integral values become `Integer`, other finite floats the equal
    /// `Decimal` when one fits. Non-numeric values are returned as is.
    pub fn normalized(&self) -> Scalar {
        match self {
            Scalar::Decimal(d) => d.to_i64().map_or(Scalar::Decimal(*d), Scalar::Integer),
            Scalar::Number(n) if n.0.is_finite() => match n.0.to_string().parse::<Decimal>() {
                Ok(d) => Scalar::Decimal(d).normalized(),
                Err(_) => self.clone(),
            },
            other => other.clone(),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => Ok(()),
            Scalar::Boolean(b) => write!(f, "{}", b),
            Scalar::Integer(i) => write!(f, "{}", i),
            Scalar::Decimal(d) => write!(f, "{}", d),
            Scalar::Number(n) => write!(f, "{}", n.0),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Integer(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Integer(value as i64)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Number(OrderedFloat(value))
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Boolean(value)
    }
}

impl From<Decimal> for Scalar {
    fn from(value: Decimal) -> Self {
        Scalar::Decimal(value)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(value: Option<T>) -> Self {
        value.map_or(Scalar::Null, Into::into)
    }
}
