//! Blocking, timeout, and lifecycle behaviour around live backings.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use paramq::prelude::*;

const EXPOSURE: u32 = 0x300;
const GAIN: u32 = 0x301;

fn init_logs() {
    let _ = tracing_subscriber::fmt::try_init();
}

fn u32_bytes(value: u32) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

fn u32_of(value: &ParamValue) -> u32 {
    u32::from_le_bytes(value.payload.as_slice().try_into().expect("u32 payload"))
}

/// Camera-style registry with one slot-backed parameter.
fn slot_registry(slot: Arc<SlotBacking>, bound: Duration) -> ParamRegistry {
    ParamRegistryBuilder::new("cam")
        .with_param(
            ParamSpec::new(EXPOSURE, "exposure", u32_bytes(100))
                .with_field(FieldSpec::new(0, ScalarKind::U32))
                .with_backing(slot),
        )
        .with_block_bound(bound)
        .build()
        .expect("registry")
}

// ── Slot backings ─────────────────────────────────────────────────────────────

/// A value that is not there yet is skipped, never waited for.
#[test]
fn test_empty_slot_skips_without_blocking() {
    init_logs();
    let cam = slot_registry(Arc::new(SlotBacking::new()), Duration::from_millis(500));
    cam.set_run_state(RunState::Running);

    let started = Instant::now();
    let reply = cam.query(&[ParamIndex::new(EXPOSURE)], BlockMode::DontBlock);
    assert!(started.elapsed() < Duration::from_millis(100));

    assert_eq!(reply.status, Status::Blocking);
    assert!(reply.params.is_empty());
}

/// A may-block query picks up the value once the worker publishes it.
#[test]
fn test_may_block_waits_for_publish() {
    init_logs();
    let slot = Arc::new(SlotBacking::new());
    let cam = slot_registry(slot.clone(), Duration::from_millis(2_000));
    cam.set_run_state(RunState::Running);

    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        slot.publish(u32_bytes(7));
    });

    let reply = cam.query(&[ParamIndex::new(EXPOSURE)], BlockMode::MayBlock);
    handle.join().expect("publisher");

    assert_eq!(reply.status, Status::Ok);
    assert_eq!(u32_of(&reply.params[0]), 7);
}

/// A may-block query gives up at the block bound.
#[test]
fn test_may_block_times_out_at_bound() {
    init_logs();
    let bound = Duration::from_millis(50);
    let cam = slot_registry(Arc::new(SlotBacking::new()), bound);
    cam.set_run_state(RunState::Running);

    let started = Instant::now();
    let reply = cam.query(&[ParamIndex::new(EXPOSURE)], BlockMode::MayBlock);
    let elapsed = started.elapsed();

    assert_eq!(reply.status, Status::TimedOut);
    assert!(reply.params.is_empty());
    assert!(elapsed >= bound);
    assert!(elapsed < Duration::from_secs(2));
}

/// The block bound covers the whole call, not each item.
#[test]
fn test_bound_spans_all_items_of_one_call() {
    init_logs();
    let bound = Duration::from_millis(200);
    let cam = ParamRegistryBuilder::new("cam")
        .with_param(
            ParamSpec::new(EXPOSURE, "exposure", u32_bytes(100))
                .with_field(FieldSpec::new(0, ScalarKind::U32))
                .with_backing(Arc::new(SlotBacking::new())),
        )
        .with_param(
            ParamSpec::new(GAIN, "gain", u32_bytes(1))
                .with_field(FieldSpec::new(0, ScalarKind::U32))
                .with_backing(Arc::new(SlotBacking::new())),
        )
        .with_block_bound(bound)
        .build()
        .expect("registry");
    cam.set_run_state(RunState::Running);

    let started = Instant::now();
    let reply = cam.query(
        &[ParamIndex::new(EXPOSURE), ParamIndex::new(GAIN)],
        BlockMode::MayBlock,
    );
    let elapsed = started.elapsed();

    assert_eq!(reply.status, Status::TimedOut);
    // The second item must not start a wait of its own
    assert!(elapsed < bound * 2, "waited {elapsed:?} against a {bound:?} bound");
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

/// A stopped object answers non-blocking whatever the caller asked for.
#[test]
fn test_stopped_object_never_waits() {
    init_logs();
    let cam = slot_registry(Arc::new(SlotBacking::new()), Duration::from_millis(2_000));
    assert_eq!(cam.run_state(), RunState::Stopped);

    let started = Instant::now();
    let reply = cam.query(&[ParamIndex::new(EXPOSURE)], BlockMode::MayBlock);
    assert!(started.elapsed() < Duration::from_millis(100));

    assert_eq!(reply.status, Status::Blocking);
}

/// A released object is gone; every call reports corruption.
#[test]
fn test_released_object_reports_corrupted() {
    init_logs();
    let cam = slot_registry(Arc::new(SlotBacking::with_value(u32_bytes(5))), Duration::ZERO);
    cam.set_run_state(RunState::Released);
    // Release is terminal
    cam.set_run_state(RunState::Running);
    assert_eq!(cam.run_state(), RunState::Released);

    let reply = cam.query(&[ParamIndex::new(EXPOSURE)], BlockMode::DontBlock);
    assert_eq!(reply.status, Status::Corrupted);
    assert!(reply.params.is_empty());

    let reply = cam.configure(&[ParamValue::new(EXPOSURE, u32_bytes(9))], BlockMode::DontBlock);
    assert_eq!(reply.status, Status::Corrupted);
    assert!(reply.params.is_empty());

    let reply = cam.supported_params(ParamIndex::new(0), u32::MAX);
    assert_eq!(reply.status, Status::Corrupted);
    assert!(reply.descriptors.is_empty());

    let reply = cam.supported_values(
        &[FieldRef::new(ParamIndex::new(EXPOSURE), FieldId::new(0, 4))],
        BlockMode::DontBlock,
    );
    assert_eq!(reply.status, Status::Corrupted);
    assert!(reply.fields.is_empty());
}

/// A closed slot surfaces as corruption, not as a missing value.
#[test]
fn test_closed_slot_reports_corrupted() {
    init_logs();
    let slot = Arc::new(SlotBacking::with_value(u32_bytes(5)));
    let cam = slot_registry(slot.clone(), Duration::from_millis(100));
    cam.set_run_state(RunState::Running);
    slot.close();

    let reply = cam.query(&[ParamIndex::new(EXPOSURE)], BlockMode::DontBlock);
    assert_eq!(reply.status, Status::Corrupted);
    assert!(reply.params.is_empty());

    let reply = cam.configure(&[ParamValue::new(EXPOSURE, u32_bytes(9))], BlockMode::DontBlock);
    assert_eq!(reply.status, Status::Corrupted);
    assert_eq!(reply.failures[0].reason, FailureReason::Internal);
}

// ── Channel backings ──────────────────────────────────────────────────────────

/// A worker that falls behind turns writes into blocking failures.
#[test]
fn test_channel_write_blocks_when_worker_behind() {
    init_logs();
    let (update_tx, update_rx) = flume::unbounded();
    let (command_tx, command_rx) = flume::bounded(1);
    let backing = Arc::new(ChannelBacking::new(update_rx, command_tx));

    let mix = ParamRegistryBuilder::new("mix")
        .with_param(
            ParamSpec::new(GAIN, "gain", u32_bytes(1))
                .with_field(FieldSpec::new(0, ScalarKind::U32))
                .with_backing(backing.clone()),
        )
        .with_block_bound(Duration::from_millis(100))
        .build()
        .expect("registry");
    mix.set_run_state(RunState::Running);
    update_tx.send(u32_bytes(1)).expect("snapshot");

    // Fill the command queue so the next write has no room
    assert_eq!(backing.try_write(&u32_bytes(2)), WriteAttempt::Done);

    let reply = mix.configure(&[ParamValue::new(GAIN, u32_bytes(5))], BlockMode::DontBlock);
    assert_eq!(reply.status, Status::Blocking);
    assert_eq!(reply.failures[0].reason, FailureReason::Blocking);
    // The blocked update was not committed
    let reply = mix.query(&[ParamIndex::new(GAIN)], BlockMode::DontBlock);
    assert_eq!(u32_of(&reply.params[0]), 1);

    // With the queue drained the same write goes through
    assert_eq!(command_rx.recv().expect("command"), u32_bytes(2));
    let reply = mix.configure(&[ParamValue::new(GAIN, u32_bytes(5))], BlockMode::DontBlock);
    assert_eq!(reply.status, Status::Ok);
    assert_eq!(command_rx.recv().expect("command"), u32_bytes(5));
}

/// A may-block write rides out a briefly busy worker.
#[test]
fn test_channel_write_waits_for_drain() {
    init_logs();
    let (update_tx, update_rx) = flume::unbounded();
    let (command_tx, command_rx) = flume::bounded(1);
    let backing = Arc::new(ChannelBacking::new(update_rx, command_tx));

    let mix = ParamRegistryBuilder::new("mix")
        .with_param(
            ParamSpec::new(GAIN, "gain", u32_bytes(1))
                .with_field(FieldSpec::new(0, ScalarKind::U32))
                .with_backing(backing.clone()),
        )
        .with_block_bound(Duration::from_millis(2_000))
        .build()
        .expect("registry");
    mix.set_run_state(RunState::Running);
    update_tx.send(u32_bytes(1)).expect("snapshot");
    assert_eq!(backing.try_write(&u32_bytes(2)), WriteAttempt::Done);

    let drainer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        let first = command_rx.recv().expect("drain");
        (first, command_rx)
    });

    let reply = mix.configure(&[ParamValue::new(GAIN, u32_bytes(5))], BlockMode::MayBlock);
    assert_eq!(reply.status, Status::Ok);

    let (first, command_rx) = drainer.join().expect("drainer");
    assert_eq!(first, u32_bytes(2));
    assert_eq!(command_rx.recv().expect("command"), u32_bytes(5));
}

/// Queries through a channel see the newest snapshot the worker sent.
#[test]
fn test_channel_read_keeps_newest_snapshot() {
    init_logs();
    let (update_tx, update_rx) = flume::unbounded();
    let (command_tx, _command_rx) = flume::bounded(8);
    let backing = Arc::new(ChannelBacking::new(update_rx, command_tx));

    let mix = ParamRegistryBuilder::new("mix")
        .with_param(
            ParamSpec::new(GAIN, "gain", u32_bytes(0))
                .with_field(FieldSpec::new(0, ScalarKind::U32))
                .with_backing(backing),
        )
        .build()
        .expect("registry");
    mix.set_run_state(RunState::Running);

    for v in [3, 4, 5] {
        update_tx.send(u32_bytes(v)).expect("snapshot");
    }
    let reply = mix.query(&[ParamIndex::new(GAIN)], BlockMode::DontBlock);
    assert_eq!(reply.status, Status::Ok);
    assert_eq!(u32_of(&reply.params[0]), 5);
}

/// A worker that went away entirely reads as corruption.
#[test]
fn test_channel_disconnect_reports_corrupted() {
    init_logs();
    let (update_tx, update_rx) = flume::unbounded::<Vec<u8>>();
    let (command_tx, command_rx) = flume::bounded(1);
    let backing = Arc::new(ChannelBacking::new(update_rx, command_tx));

    let mix = ParamRegistryBuilder::new("mix")
        .with_param(
            ParamSpec::new(GAIN, "gain", u32_bytes(1))
                .with_field(FieldSpec::new(0, ScalarKind::U32))
                .with_backing(backing),
        )
        .build()
        .expect("registry");
    mix.set_run_state(RunState::Running);

    drop(update_tx);
    drop(command_rx);

    let reply = mix.query(&[ParamIndex::new(GAIN)], BlockMode::DontBlock);
    assert_eq!(reply.status, Status::Corrupted);

    let reply = mix.configure(&[ParamValue::new(GAIN, u32_bytes(9))], BlockMode::DontBlock);
    assert_eq!(reply.status, Status::Corrupted);
    assert_eq!(reply.failures[0].reason, FailureReason::Internal);
}
