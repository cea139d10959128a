//! Object run state and its effect on blocking.

use std::sync::atomic::{AtomicU8, Ordering};

use paramq_protocol::BlockMode;

/// Lifecycle state of a configurable object.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum RunState {
    /// Not processing. Waits on the object would never end on their own.
    #[default]
    #[strum(serialize = "stopped")]
    Stopped,
    /// Processing. Waits are expected to finish promptly.
    #[strum(serialize = "running")]
    Running,
    /// Torn down. Calls report corruption instead of touching anything.
    #[strum(serialize = "released")]
    Released,
}

impl RunState {
    /// Blocking mode actually honored in this state.
    ///
    /// A stopped object downgrades every call to non-blocking: nothing is
    /// processing, so a wait could only end by luck.
    pub fn effective_mode(self, requested: BlockMode) -> BlockMode {
        match self {
            Self::Running => requested,
            Self::Stopped | Self::Released => BlockMode::DontBlock,
        }
    }
}

const STOPPED: u8 = 0;
const RUNNING: u8 = 1;
const RELEASED: u8 = 2;

/// Lock-free cell holding the current run state.
#[derive(Debug, Default)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn load(&self) -> RunState {
        match self.0.load(Ordering::Acquire) {
            RUNNING => RunState::Running,
            RELEASED => RunState::Released,
            _ => RunState::Stopped,
        }
    }

    /// Stores `state`. A released cell stays released.
    pub fn store(&self, state: RunState) {
        let raw = match state {
            RunState::Stopped => STOPPED,
            RunState::Running => RUNNING,
            RunState::Released => RELEASED,
        };
        let mut current = self.0.load(Ordering::Acquire);
        while current != RELEASED {
            match self
                .0
                .compare_exchange_weak(current, raw, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(seen) => current = seen,
            }
        }
    }
}
