//! Convenience re-exports for common paramq types.
//!
//! Import everything with `use paramq::prelude::*;` to get the types and
//! traits needed for most use cases without hunting through submodules.
//!
//! # Example
//!
//! ```rust,ignore
//! use paramq::prelude::*;
//!
//! let registry = ParamRegistryBuilder::new("enc").build()?;
//! registry.set_run_state(RunState::Running);
//! ```

/// The builder trait; bring it into scope to call `.build()`.
pub use crate::Builder;

/// The four protocol operations every configurable object answers.
pub use crate::protocol::Configurable;

/// Registry construction types.
pub use crate::registry::{
    FieldSpec, ParamRegistry, ParamRegistryBuilder, ParamSpec, RegistryView, UpdatePolicy,
};

/// Live backings for parameters owned by worker threads.
pub use crate::backing::{ChannelBacking, ParamBacking, ReadAttempt, SlotBacking, WriteAttempt};

/// Object lifecycle state and the shared cell carrying it.
pub use crate::state::{RunState, StateCell};

/// Wire-level value, field, and reply types.
pub use paramq_protocol::{
    BlockMode, ConfigureReply, FailureReason, FieldDomain, FieldId, FieldRef, FieldValues,
    ObjectIdentity, ParamDescriptor, ParamIndex, ParamValue, QueryReply, Scalar, ScalarKind,
    SettingFailure, Status, SupportedParamsReply, SupportedValuesReply, ValuesOutcome,
};

/// The `Result` alias used throughout paramq.
pub use crate::Result;
