//! # paramq: runtime parameter control for pipeline objects
//!
//! `paramq` gives every object of a media or processing pipeline a uniform
//! control surface: typed parameters behind stable numeric indices, queried
//! and configured at runtime without stopping the pipeline.
//!
//! - **Parameter storage** with flattened payloads, field layouts, and
//!   value domains
//! - **Best-effort calls** that serve what they can and report the most
//!   severe condition met, instead of failing whole batches
//! - **Reflection** over supported parameters and the values each field
//!   accepts right now
//! - **Live backings** that route reads and writes through the worker
//!   thread owning a value
//!
//! ## Getting started
//!
//! ```rust,ignore
//! use paramq::prelude::*;
//!
//! let registry = ParamRegistryBuilder::new("enc")
//!     .with_param(
//!         ParamSpec::new(0x100u32, "width", 320u32.to_le_bytes().to_vec())
//!             .with_field(FieldSpec::new(0, ScalarKind::U32)),
//!     )
//!     .build()?;
//! registry.set_run_state(RunState::Running);
//!
//! let reply = registry.configure(
//!     &[ParamValue::new(0x100u32, 640u32.to_le_bytes().to_vec())],
//!     BlockMode::DontBlock,
//! );
//! assert!(reply.fully_applied());
//! ```
//!
//! ## Blocking
//!
//! Every read/write call takes a [`BlockMode`](paramq_protocol::BlockMode):
//!
//! | Mode | Behaviour |
//! |------|-----------|
//! | `DontBlock` | Items that would wait are skipped or failed with `BLOCKING` |
//! | `MayBlock` | The call may wait, up to the registry's block bound |
//!
//! A stopped or released object never waits, whatever the caller asked for.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ParamRegistry                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  table: RwLock<BTreeMap<ParamIndex, Entry>>                  │
//! │  ├── committed payloads (flattened little-endian bytes)      │
//! │  ├── field layouts with fixed or dynamic domains             │
//! │  └── optional live backings (slots, channels)                │
//! │  protocol:                                                   │
//! │  ├── query                                                   │
//! │  ├── configure                                               │
//! │  ├── supported_params                                        │
//! │  └── supported_values                                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Imports
//!
//! The easiest way to import all common types is via the prelude:
//!
//! ```rust,ignore
//! use paramq::prelude::*;
//! ```
//!
//! Or import types individually from their modules.

pub mod backing;
pub mod identity;
pub mod prelude;
pub mod protocol;
pub mod registry;
pub mod state;

pub use protocol::Configurable;
pub use registry::{FieldSpec, ParamRegistry, ParamRegistryBuilder, ParamSpec, UpdatePolicy};
pub use state::{RunState, StateCell};

pub use paramq_protocol::{BlockMode, ParamIndex, ParamValue, Status};

/// The `Result` alias used throughout paramq.
pub type Result<T, E = registry::RegistryError> = std::result::Result<T, E>;

/// Builds a configured object, consuming the builder.
///
/// All paramq builders implement this trait. Bring it into scope to call
/// `.build()`:
///
/// ```rust,ignore
/// use paramq::Builder;
/// let registry = ParamRegistryBuilder::new("enc").build()?;
/// ```
///
/// Alternatively, use `use paramq::prelude::*;` which includes `Builder`.
pub trait Builder {
    /// The type produced by this builder.
    type Output;
    /// Consume the builder and construct the configured object.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, for example a
    /// duplicate index or a field escaping its parameter's layout.
    fn build(self) -> Result<Self::Output>;
}
