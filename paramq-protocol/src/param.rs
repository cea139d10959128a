//! Parameter identity, flattened values, and descriptors.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Stable numeric index of one parameter structure.
///
/// The index is the unit of addressing for the whole protocol: queries,
/// configures, and reflection all name parameters by index, never by name.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ParamIndex(pub u32);

impl ParamIndex {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl From<u32> for ParamIndex {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl Display for ParamIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A parameter as it travels through calls: an index plus the flattened
/// little-endian bytes of the whole structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamValue {
    pub index: ParamIndex,
    pub payload: Vec<u8>,
}

impl ParamValue {
    pub fn new(index: impl Into<ParamIndex>, payload: Vec<u8>) -> Self {
        Self {
            index: index.into(),
            payload,
        }
    }

    /// Size of the flattened structure in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Static description of one supported parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDescriptor {
    pub index: ParamIndex,
    pub name: String,
    /// Indices whose current values influence which values this parameter
    /// accepts. An updater touching this parameter should refresh these
    /// first, in the order listed.
    pub depends_on: Vec<ParamIndex>,
}

impl ParamDescriptor {
    pub fn new(index: impl Into<ParamIndex>, name: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            name: name.into(),
            depends_on: Vec::new(),
        }
    }
}

/// Identity of one configurable object.
///
/// `id` is unique within a pipeline instance for the object's lifetime and
/// is never reused; `name` is a stable label that survives restarts.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectIdentity {
    pub id: u32,
    pub name: String,
}

impl ObjectIdentity {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl Display for ObjectIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}
