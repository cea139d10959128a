//! Field addressing and value-space descriptions.
//!
//! Parameters travel as flattened byte payloads; a [`FieldId`] designates a
//! fixed-width slice of one payload and a [`FieldDomain`] describes which
//! values that slice accepts. Domains drive both enforcement during
//! configure calls and reflection through supported-values queries.

use std::cmp::Ordering;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::param::ParamIndex;

/// Absolute tolerance for float step-grid membership.
const GRID_EPS: f64 = 1e-6;

/// Byte-range designator of one field inside a flattened parameter payload.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldId {
    pub offset: u32,
    pub width: u32,
}

impl FieldId {
    /// Designates the entire flattened structure rather than one field.
    pub const WHOLE: FieldId = FieldId {
        offset: 0,
        width: 0,
    };

    pub const fn new(offset: u32, width: u32) -> Self {
        Self { offset, width }
    }

    pub const fn is_whole(self) -> bool {
        self.width == 0
    }
}

impl Display for FieldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_whole() {
            write!(f, "[*]")
        } else {
            write!(f, "[{}+{}]", self.offset, self.width)
        }
    }
}

/// A field of a specific parameter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub index: ParamIndex,
    pub field: FieldId,
}

impl FieldRef {
    pub const fn new(index: ParamIndex, field: FieldId) -> Self {
        Self { index, field }
    }

    /// Refers to the whole structure of `index`.
    pub const fn whole(index: ParamIndex) -> Self {
        Self {
            index,
            field: FieldId::WHOLE,
        }
    }
}

impl Display for FieldRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.index, self.field)
    }
}

/// Fixed-width little-endian scalar kinds a field can take.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum ScalarKind {
    #[strum(serialize = "i32")]
    I32,
    #[strum(serialize = "u32")]
    U32,
    #[strum(serialize = "i64")]
    I64,
    #[strum(serialize = "u64")]
    U64,
    #[strum(serialize = "f32")]
    F32,
}

impl ScalarKind {
    /// Encoded width in bytes.
    pub const fn width(self) -> u32 {
        match self {
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 => 8,
        }
    }

    pub const fn zero(self) -> Scalar {
        match self {
            Self::I32 => Scalar::I32(0),
            Self::U32 => Scalar::U32(0),
            Self::I64 => Scalar::I64(0),
            Self::U64 => Scalar::U64(0),
            Self::F32 => Scalar::F32(0.0),
        }
    }
}

/// A typed field value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
}

impl Scalar {
    pub const fn kind(&self) -> ScalarKind {
        match self {
            Self::I32(_) => ScalarKind::I32,
            Self::U32(_) => ScalarKind::U32,
            Self::I64(_) => ScalarKind::I64,
            Self::U64(_) => ScalarKind::U64,
            Self::F32(_) => ScalarKind::F32,
        }
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Self::F32(v) if v.is_nan())
    }

    /// Reads a `kind` scalar out of `payload` at `field`.
    ///
    /// Returns `None` when the field escapes the payload or its width does
    /// not match the kind.
    pub fn read(payload: &[u8], field: FieldId, kind: ScalarKind) -> Option<Self> {
        if field.width != kind.width() {
            return None;
        }
        let start = field.offset as usize;
        let end = start.checked_add(field.width as usize)?;
        let bytes = payload.get(start..end)?;
        Some(match kind {
            ScalarKind::I32 => Self::I32(i32::from_le_bytes(bytes.try_into().ok()?)),
            ScalarKind::U32 => Self::U32(u32::from_le_bytes(bytes.try_into().ok()?)),
            ScalarKind::I64 => Self::I64(i64::from_le_bytes(bytes.try_into().ok()?)),
            ScalarKind::U64 => Self::U64(u64::from_le_bytes(bytes.try_into().ok()?)),
            ScalarKind::F32 => Self::F32(f32::from_le_bytes(bytes.try_into().ok()?)),
        })
    }

    /// Writes the scalar into `payload` at `field`.
    ///
    /// Returns false when the field escapes the payload or its width does
    /// not match the kind.
    pub fn write(&self, payload: &mut [u8], field: FieldId) -> bool {
        if field.width != self.kind().width() {
            return false;
        }
        let start = field.offset as usize;
        let Some(end) = start.checked_add(field.width as usize) else {
            return false;
        };
        let Some(bytes) = payload.get_mut(start..end) else {
            return false;
        };
        match self {
            Self::I32(v) => bytes.copy_from_slice(&v.to_le_bytes()),
            Self::U32(v) => bytes.copy_from_slice(&v.to_le_bytes()),
            Self::I64(v) => bytes.copy_from_slice(&v.to_le_bytes()),
            Self::U64(v) => bytes.copy_from_slice(&v.to_le_bytes()),
            Self::F32(v) => bytes.copy_from_slice(&v.to_le_bytes()),
        }
        true
    }

    /// Same-kind ordering. `None` across kinds or against NaN.
    pub fn partial_cmp_same(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::I32(a), Self::I32(b)) => Some(a.cmp(b)),
            (Self::U32(a), Self::U32(b)) => Some(a.cmp(b)),
            (Self::I64(a), Self::I64(b)) => Some(a.cmp(b)),
            (Self::U64(a), Self::U64(b)) => Some(a.cmp(b)),
            (Self::F32(a), Self::F32(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    fn is_negative(&self) -> bool {
        match self {
            Self::I32(v) => *v < 0,
            Self::I64(v) => *v < 0,
            Self::F32(v) => *v < 0.0,
            Self::U32(_) | Self::U64(_) => false,
        }
    }

    /// Absolute distance to a same-kind scalar, as an order-preserving key.
    ///
    /// Float distances are compared by their bit pattern; non-negative
    /// floats order the same way their values do.
    fn distance(&self, other: &Self) -> Option<u128> {
        match (self, other) {
            (Self::I32(a), Self::I32(b)) => Some((*a as i128 - *b as i128).unsigned_abs()),
            (Self::U32(a), Self::U32(b)) => Some((*a as i128 - *b as i128).unsigned_abs()),
            (Self::I64(a), Self::I64(b)) => Some((*a as i128 - *b as i128).unsigned_abs()),
            (Self::U64(a), Self::U64(b)) => Some((*a as i128 - *b as i128).unsigned_abs()),
            (Self::F32(a), Self::F32(b)) => {
                let d = (*a as f64 - *b as f64).abs();
                if d.is_nan() {
                    None
                } else {
                    Some(d.to_bits() as u128)
                }
            }
            _ => None,
        }
    }
}

impl Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::I32(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
        }
    }
}

/// Reasons a domain description is rejected at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainError {
    /// Range bounds or value-set entries mix scalar kinds.
    MixedKinds,
    /// A value set carried no entries.
    EmptyValues,
    /// Range with min above max, or a NaN bound.
    InvertedRange,
    /// Step of a different kind than the bounds, negative, or NaN.
    BadStep,
}

impl Display for DomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Self::MixedKinds => "mixed scalar kinds",
            Self::EmptyValues => "empty value set",
            Self::InvertedRange => "inverted or NaN range bounds",
            Self::BadStep => "bad step",
        };
        write!(f, "{reason}")
    }
}

impl std::error::Error for DomainError {}

/// The set of values a field accepts.
///
/// Domains drive both sides of the protocol: configure calls enforce them
/// and supported-values calls report them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldDomain {
    /// Every value of the field's kind except NaN.
    Any,
    /// Closed interval with an optional step grid anchored at `min`.
    ///
    /// A step of zero means continuous. `max` is always a member, even when
    /// the grid misses it.
    Range {
        min: Scalar,
        max: Scalar,
        step: Scalar,
    },
    /// Explicit value set.
    Values(Vec<Scalar>),
    /// No value is acceptable right now.
    Unsupported,
}

impl FieldDomain {
    /// Continuous closed interval.
    pub fn range(min: Scalar, max: Scalar) -> Result<Self, DomainError> {
        Self::range_with_step(min, max, min.kind().zero())
    }

    /// Closed interval restricted to `min + k * step`.
    pub fn range_with_step(min: Scalar, max: Scalar, step: Scalar) -> Result<Self, DomainError> {
        if min.kind() != max.kind() {
            return Err(DomainError::MixedKinds);
        }
        if step.kind() != min.kind() || step.is_negative() || step.is_nan() {
            return Err(DomainError::BadStep);
        }
        if min.is_nan() || max.is_nan() {
            return Err(DomainError::InvertedRange);
        }
        if min.partial_cmp_same(&max) == Some(Ordering::Greater) {
            return Err(DomainError::InvertedRange);
        }
        Ok(Self::Range { min, max, step })
    }

    /// Explicit value set. Entries must share one kind.
    pub fn values(entries: Vec<Scalar>) -> Result<Self, DomainError> {
        let Some(first) = entries.first() else {
            return Err(DomainError::EmptyValues);
        };
        let kind = first.kind();
        if entries.iter().any(|v| v.kind() != kind) {
            return Err(DomainError::MixedKinds);
        }
        Ok(Self::Values(entries))
    }

    /// The scalar kind this domain constrains, when it names one.
    pub fn kind(&self) -> Option<ScalarKind> {
        match self {
            Self::Any | Self::Unsupported => None,
            Self::Range { min, .. } => Some(min.kind()),
            Self::Values(entries) => entries.first().map(Scalar::kind),
        }
    }

    /// Whether `value` is acceptable as-is.
    pub fn admits(&self, value: &Scalar) -> bool {
        match self {
            Self::Any => !value.is_nan(),
            Self::Unsupported => false,
            Self::Values(entries) => entries.iter().any(|v| v == value),
            Self::Range { min, max, step } => {
                let Some(lo) = value.partial_cmp_same(min) else {
                    return false;
                };
                let Some(hi) = value.partial_cmp_same(max) else {
                    return false;
                };
                if lo == Ordering::Less || hi == Ordering::Greater {
                    return false;
                }
                on_step_grid(value, min, max, step)
            }
        }
    }

    /// The member of the domain closest to `value`, when one exists.
    ///
    /// Ties between two equally distant members resolve toward the lower
    /// one. NaN has no nearest member in any domain.
    pub fn nearest(&self, value: &Scalar) -> Option<Scalar> {
        if value.is_nan() {
            return None;
        }
        match self {
            Self::Any => Some(*value),
            Self::Unsupported => None,
            Self::Values(entries) => nearest_of(entries, value),
            Self::Range { min, max, step } => nearest_in_range(value, min, max, step),
        }
    }
}

fn on_step_grid(value: &Scalar, min: &Scalar, max: &Scalar, step: &Scalar) -> bool {
    match (value, min, max, step) {
        (Scalar::I32(v), Scalar::I32(lo), Scalar::I32(hi), Scalar::I32(s)) => {
            integer_on_grid(*v as i128, *lo as i128, *hi as i128, *s as i128)
        }
        (Scalar::U32(v), Scalar::U32(lo), Scalar::U32(hi), Scalar::U32(s)) => {
            integer_on_grid(*v as i128, *lo as i128, *hi as i128, *s as i128)
        }
        (Scalar::I64(v), Scalar::I64(lo), Scalar::I64(hi), Scalar::I64(s)) => {
            integer_on_grid(*v as i128, *lo as i128, *hi as i128, *s as i128)
        }
        (Scalar::U64(v), Scalar::U64(lo), Scalar::U64(hi), Scalar::U64(s)) => {
            integer_on_grid(*v as i128, *lo as i128, *hi as i128, *s as i128)
        }
        (Scalar::F32(v), Scalar::F32(lo), Scalar::F32(hi), Scalar::F32(s)) => {
            if *s == 0.0 {
                return true;
            }
            // Upper bound is always valid
            if v == hi {
                return true;
            }
            let remainder = ((*v as f64) - (*lo as f64)).rem_euclid(*s as f64);
            remainder < GRID_EPS || (*s as f64 - remainder) < GRID_EPS
        }
        _ => false,
    }
}

fn integer_on_grid(value: i128, min: i128, max: i128, step: i128) -> bool {
    if step == 0 {
        return true;
    }
    // Upper bound is always valid
    if value == max {
        return true;
    }
    (value - min) % step == 0
}

fn nearest_in_range(value: &Scalar, min: &Scalar, max: &Scalar, step: &Scalar) -> Option<Scalar> {
    match (value, min, max, step) {
        (Scalar::I32(v), Scalar::I32(lo), Scalar::I32(hi), Scalar::I32(s)) => Some(Scalar::I32(
            integer_nearest(*v as i128, *lo as i128, *hi as i128, *s as i128) as i32,
        )),
        (Scalar::U32(v), Scalar::U32(lo), Scalar::U32(hi), Scalar::U32(s)) => Some(Scalar::U32(
            integer_nearest(*v as i128, *lo as i128, *hi as i128, *s as i128) as u32,
        )),
        (Scalar::I64(v), Scalar::I64(lo), Scalar::I64(hi), Scalar::I64(s)) => Some(Scalar::I64(
            integer_nearest(*v as i128, *lo as i128, *hi as i128, *s as i128) as i64,
        )),
        (Scalar::U64(v), Scalar::U64(lo), Scalar::U64(hi), Scalar::U64(s)) => Some(Scalar::U64(
            integer_nearest(*v as i128, *lo as i128, *hi as i128, *s as i128) as u64,
        )),
        (Scalar::F32(v), Scalar::F32(lo), Scalar::F32(hi), Scalar::F32(s)) => {
            Some(Scalar::F32(float_nearest(*v, *lo, *hi, *s)))
        }
        _ => None,
    }
}

fn integer_nearest(value: i128, min: i128, max: i128, step: i128) -> i128 {
    let clamped = value.clamp(min, max);
    if step == 0 || clamped == max {
        return clamped;
    }
    let below = min + ((clamped - min) / step) * step;
    let above = (below + step).min(max);
    if clamped - below <= above - clamped {
        below
    } else {
        above
    }
}

fn float_nearest(value: f32, min: f32, max: f32, step: f32) -> f32 {
    let clamped = value.clamp(min, max);
    if step == 0.0 || clamped == max {
        return clamped;
    }
    let steps = ((clamped as f64 - min as f64) / step as f64).floor();
    let below = (min as f64 + steps * step as f64) as f32;
    let above = ((min as f64 + (steps + 1.0) * step as f64) as f32).min(max);
    if clamped as f64 - below as f64 <= above as f64 - clamped as f64 {
        below
    } else {
        above
    }
}

fn nearest_of(entries: &[Scalar], value: &Scalar) -> Option<Scalar> {
    let mut best: Option<(Scalar, u128)> = None;
    for candidate in entries {
        let Some(dist) = value.distance(candidate) else {
            continue;
        };
        let better = match &best {
            None => true,
            Some((incumbent, best_dist)) => {
                dist < *best_dist
                    || (dist == *best_dist
                        && candidate.partial_cmp_same(incumbent) == Some(Ordering::Less))
            }
        };
        if better {
            best = Some((*candidate, dist));
        }
    }
    best.map(|(v, _)| v)
}
