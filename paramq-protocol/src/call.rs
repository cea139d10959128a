//! Request and reply shapes for the four protocol calls.

use serde::{Deserialize, Serialize};

use crate::field::{FieldDomain, FieldRef};
use crate::param::{ParamDescriptor, ParamIndex, ParamValue};
use crate::status::Status;

/// Whether a call is allowed to wait on the object.
#[derive(
    Debug,
    Default,
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
pub enum BlockMode {
    /// Skip or fail items that would wait; never sleep.
    #[default]
    #[strum(serialize = "DONT_BLOCK")]
    DontBlock,
    /// Waiting is allowed, within the object's time bound.
    #[strum(serialize = "MAY_BLOCK")]
    MayBlock,
}

impl BlockMode {
    pub const fn may_block(self) -> bool {
        matches!(self, Self::MayBlock)
    }
}

/// Why one field update was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum FailureReason {
    /// The value is outside what the field accepts and could not be
    /// adjusted to an acceptable one.
    #[strum(serialize = "BAD_VALUE")]
    BadValue,
    /// The carried payload does not match the parameter's layout.
    #[strum(serialize = "BAD_SIZE")]
    BadSize,
    /// The parameter cannot be written through this interface.
    #[strum(serialize = "READ_ONLY")]
    ReadOnly,
    /// Applying the update needed to wait and the call forbade waiting.
    #[strum(serialize = "BLOCKING")]
    Blocking,
    /// The object failed internally while applying the update.
    #[strum(serialize = "INTERNAL")]
    Internal,
}

/// One field update that was not applied as requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingFailure {
    pub field: FieldRef,
    pub reason: FailureReason,
    /// Values the field would have accepted at the time of the failure,
    /// when the object can still describe them.
    pub supported: Option<FieldDomain>,
}

impl SettingFailure {
    pub fn new(field: FieldRef, reason: FailureReason) -> Self {
        Self {
            field,
            reason,
            supported: None,
        }
    }

    /// Value rejection carrying the currently acceptable values.
    pub fn rejected(field: FieldRef, supported: FieldDomain) -> Self {
        Self {
            field,
            reason: FailureReason::BadValue,
            supported: Some(supported),
        }
    }

    pub fn read_only(field: FieldRef) -> Self {
        Self::new(field, FailureReason::ReadOnly)
    }

    pub fn blocked(field: FieldRef) -> Self {
        Self::new(field, FailureReason::Blocking)
    }

    pub fn bad_size(field: FieldRef) -> Self {
        Self::new(field, FailureReason::BadSize)
    }
}

/// Reply to a query call.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryReply {
    pub status: Status,
    /// One entry per requested index that could be served, in request
    /// order; `status` names the condition behind any omission.
    pub params: Vec<ParamValue>,
}

impl QueryReply {
    pub fn param(&self, index: impl Into<ParamIndex>) -> Option<&ParamValue> {
        let index = index.into();
        self.params.iter().find(|p| p.index == index)
    }
}

/// Reply to a configure call.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigureReply {
    pub status: Status,
    /// Value of every parameter the call actually changed, in the order
    /// the updates arrived (first occurrence for duplicates). Refused or
    /// dropped updates leave no entry here, only in `failures`.
    pub params: Vec<ParamValue>,
    pub failures: Vec<SettingFailure>,
}

impl ConfigureReply {
    pub fn param(&self, index: impl Into<ParamIndex>) -> Option<&ParamValue> {
        let index = index.into();
        self.params.iter().find(|p| p.index == index)
    }

    pub fn failures_for(&self, index: impl Into<ParamIndex>) -> impl Iterator<Item = &SettingFailure> {
        let index = index.into();
        self.failures.iter().filter(move |f| f.field.index == index)
    }

    /// No condition was reported and no update failed. Updates adjusted to
    /// a nearby acceptable value still count as applied.
    pub fn fully_applied(&self) -> bool {
        self.status.is_ok() && self.failures.is_empty()
    }
}

/// Reply to a descriptor scan.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportedParamsReply {
    pub status: Status,
    /// Descriptors ordered by ascending index.
    pub descriptors: Vec<ParamDescriptor>,
}

/// Reply to a supported-values call.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportedValuesReply {
    pub status: Status,
    /// One entry per requested field, in request order, as far as the
    /// reply budget reaches; an overrun trims the tail under `NoMemory`.
    pub fields: Vec<FieldValues>,
}

/// Outcome of one supported-values item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValues {
    pub field: FieldRef,
    pub outcome: ValuesOutcome,
}

impl FieldValues {
    pub fn new(field: FieldRef, outcome: ValuesOutcome) -> Self {
        Self { field, outcome }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValuesOutcome {
    /// The domain the field accepts right now.
    Resolved(FieldDomain),
    /// The parameter is not supported by this object.
    NoSuchParam,
    /// The parameter exists but the designator misses its layout.
    NoSuchField,
    /// Resolving needed to wait and the call forbade waiting.
    Blocked,
}

impl ValuesOutcome {
    pub fn domain(&self) -> Option<&FieldDomain> {
        match self {
            Self::Resolved(domain) => Some(domain),
            _ => None,
        }
    }
}
