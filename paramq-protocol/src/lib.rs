//! Wire-level types for the configurable parameter protocol.
//!
//! Everything a configurable object and its callers exchange lives here:
//! parameter indices and flattened values, field designators and value
//! domains, per-call reply shapes, and the shared status taxonomy. The
//! crate carries no runtime machinery so frontends and remote transports
//! can depend on it alone.

pub mod call;
pub mod field;
pub mod param;
pub mod status;

pub use call::{
    BlockMode, ConfigureReply, FailureReason, FieldValues, QueryReply, SettingFailure,
    SupportedParamsReply, SupportedValuesReply, ValuesOutcome,
};
pub use field::{DomainError, FieldDomain, FieldId, FieldRef, Scalar, ScalarKind};
pub use param::{ObjectIdentity, ParamDescriptor, ParamIndex, ParamValue};
pub use status::Status;
