//! Object id allocation.

use std::sync::atomic::{AtomicU32, Ordering};

use paramq_protocol::ObjectIdentity;

/// Monotonic id counter. Ids are never reused.
#[derive(Debug)]
pub struct IdCounter(AtomicU32);

impl IdCounter {
    pub const fn new() -> Self {
        Self(AtomicU32::new(1))
    }

    pub fn next_id(&self) -> u32 {
        self.0.fetch_add(1, Ordering::AcqRel)
    }

    pub fn identity(&self, name: impl Into<String>) -> ObjectIdentity {
        ObjectIdentity::new(self.next_id(), name)
    }
}

impl Default for IdCounter {
    fn default() -> Self {
        Self::new()
    }
}

static PIPELINE_IDS: IdCounter = IdCounter::new();

/// Mints the identity of the next object in this pipeline instance.
pub fn next_identity(name: impl Into<String>) -> ObjectIdentity {
    PIPELINE_IDS.identity(name)
}
