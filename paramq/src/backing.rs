//! Value backings: where parameter payloads actually live.
//!
//! Most parameters are plain stored bytes, but some mirror state owned by a
//! worker such as a codec thread or a remote endpoint. Those register a
//! backing; the protocol engine reads and writes through it and inherits
//! its readiness.

use std::time::Instant;

use parking_lot::{Condvar, Mutex};

/// Outcome of one backing read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadAttempt {
    /// Fresh payload.
    Ready(Vec<u8>),
    /// Nothing available without waiting.
    WouldBlock,
    /// Waited up to the deadline and nothing arrived.
    TimedOut,
    /// The backing is broken and will not recover.
    Fault,
}

/// Outcome of one backing write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAttempt {
    Done,
    WouldBlock,
    TimedOut,
    Fault,
}

/// Live storage behind a parameter.
///
/// `try_*` calls never sleep. `*_deadline` calls may sleep until `deadline`
/// at the latest.
pub trait ParamBacking: Send + Sync {
    fn try_read(&self) -> ReadAttempt;
    fn read_deadline(&self, deadline: Instant) -> ReadAttempt;
    fn try_write(&self, payload: &[u8]) -> WriteAttempt;
    fn write_deadline(&self, payload: &[u8], deadline: Instant) -> WriteAttempt;
}

#[derive(Debug, Default)]
struct SlotState {
    value: Option<Vec<u8>>,
    closed: bool,
}

/// Single-value slot a worker publishes into.
///
/// Reads see the latest published payload. While the slot is invalidated
/// the value is mid-change and reads wait for the next publish. Writes
/// replace the value directly and never wait.
#[derive(Default)]
pub struct SlotBacking {
    slot: Mutex<SlotState>,
    changed: Condvar,
}

impl SlotBacking {
    /// Empty slot; reads wait until the first publish.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(initial: Vec<u8>) -> Self {
        Self {
            slot: Mutex::new(SlotState {
                value: Some(initial),
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }

    /// Publishes a fresh payload and wakes waiting readers.
    pub fn publish(&self, payload: Vec<u8>) {
        let mut slot = self.slot.lock();
        slot.value = Some(payload);
        self.changed.notify_all();
    }

    /// Marks the value as mid-change; reads wait until the next publish.
    pub fn invalidate(&self) {
        self.slot.lock().value = None;
    }

    /// Breaks the slot for good. Readers and writers see [`Fault`] from
    /// here on.
    ///
    /// [`Fault`]: ReadAttempt::Fault
    pub fn close(&self) {
        let mut slot = self.slot.lock();
        slot.closed = true;
        self.changed.notify_all();
    }
}

impl ParamBacking for SlotBacking {
    fn try_read(&self) -> ReadAttempt {
        let slot = self.slot.lock();
        if slot.closed {
            return ReadAttempt::Fault;
        }
        match &slot.value {
            Some(payload) => ReadAttempt::Ready(payload.clone()),
            None => ReadAttempt::WouldBlock,
        }
    }

    fn read_deadline(&self, deadline: Instant) -> ReadAttempt {
        let mut slot = self.slot.lock();
        loop {
            if slot.closed {
                return ReadAttempt::Fault;
            }
            if let Some(payload) = &slot.value {
                return ReadAttempt::Ready(payload.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return ReadAttempt::TimedOut;
            }
            let result = self.changed.wait_for(&mut slot, deadline - now);
            if result.timed_out() && slot.value.is_none() && !slot.closed {
                return ReadAttempt::TimedOut;
            }
        }
    }

    fn try_write(&self, payload: &[u8]) -> WriteAttempt {
        let mut slot = self.slot.lock();
        if slot.closed {
            return WriteAttempt::Fault;
        }
        slot.value = Some(payload.to_vec());
        self.changed.notify_all();
        WriteAttempt::Done
    }

    fn write_deadline(&self, payload: &[u8], _deadline: Instant) -> WriteAttempt {
        self.try_write(payload)
    }
}

/// Backing that mirrors a worker through a pair of channels.
///
/// The worker streams value snapshots into `updates`; the engine keeps the
/// most recent one. Writes go out on `commands` and wait when the worker
/// falls behind on a bounded channel.
pub struct ChannelBacking {
    updates: flume::Receiver<Vec<u8>>,
    commands: flume::Sender<Vec<u8>>,
    latest: Mutex<Option<Vec<u8>>>,
}

impl ChannelBacking {
    pub fn new(updates: flume::Receiver<Vec<u8>>, commands: flume::Sender<Vec<u8>>) -> Self {
        Self {
            updates,
            commands,
            latest: Mutex::new(None),
        }
    }

    /// Pulls every pending snapshot, keeping the newest.
    fn drain(&self, latest: &mut Option<Vec<u8>>) {
        while let Ok(payload) = self.updates.try_recv() {
            *latest = Some(payload);
        }
    }
}

impl ParamBacking for ChannelBacking {
    fn try_read(&self) -> ReadAttempt {
        let mut latest = self.latest.lock();
        self.drain(&mut latest);
        match &*latest {
            Some(payload) => ReadAttempt::Ready(payload.clone()),
            None if self.updates.is_disconnected() => ReadAttempt::Fault,
            None => ReadAttempt::WouldBlock,
        }
    }

    fn read_deadline(&self, deadline: Instant) -> ReadAttempt {
        let mut latest = self.latest.lock();
        self.drain(&mut latest);
        if latest.is_none() {
            match self.updates.recv_deadline(deadline) {
                Ok(payload) => *latest = Some(payload),
                Err(flume::RecvTimeoutError::Timeout) => return ReadAttempt::TimedOut,
                Err(flume::RecvTimeoutError::Disconnected) => return ReadAttempt::Fault,
            }
            self.drain(&mut latest);
        }
        match &*latest {
            Some(payload) => ReadAttempt::Ready(payload.clone()),
            None => ReadAttempt::WouldBlock,
        }
    }

    fn try_write(&self, payload: &[u8]) -> WriteAttempt {
        match self.commands.try_send(payload.to_vec()) {
            Ok(()) => WriteAttempt::Done,
            Err(flume::TrySendError::Full(_)) => WriteAttempt::WouldBlock,
            Err(flume::TrySendError::Disconnected(_)) => WriteAttempt::Fault,
        }
    }

    fn write_deadline(&self, payload: &[u8], deadline: Instant) -> WriteAttempt {
        match self.commands.send_deadline(payload.to_vec(), deadline) {
            Ok(()) => WriteAttempt::Done,
            Err(flume::SendTimeoutError::Timeout(_)) => WriteAttempt::TimedOut,
            Err(flume::SendTimeoutError::Disconnected(_)) => WriteAttempt::Fault,
        }
    }
}
