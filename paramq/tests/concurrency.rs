//! Calls racing on one registry must each see a consistent table.

use std::sync::Arc;
use std::thread;

use paramq::prelude::*;

const LEFT: u32 = 0x400;
const RIGHT: u32 = 0x401;

fn u32_bytes(value: u32) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

fn u32_of(value: &ParamValue) -> u32 {
    u32::from_le_bytes(value.payload.as_slice().try_into().expect("u32 payload"))
}

fn u32_param(index: u32, name: &str, value: u32) -> ParamSpec {
    ParamSpec::new(index, name, u32_bytes(value)).with_field(FieldSpec::new(0, ScalarKind::U32))
}

/// Writers keep `left + right == 1000` within each call; readers must
/// never observe a split where the sum is off.
#[test]
fn test_linked_updates_never_tear() {
    let registry = Arc::new(
        ParamRegistryBuilder::new("balance")
            .with_param(u32_param(LEFT, "left", 0))
            .with_param(u32_param(RIGHT, "right", 1000))
            .build()
            .expect("registry"),
    );
    registry.set_run_state(RunState::Running);

    let mut writers = Vec::new();
    for offset in 0..2u32 {
        let registry = registry.clone();
        writers.push(thread::spawn(move || {
            for i in 0..200u32 {
                let k = (offset * 200 + i) % 1000;
                let reply = registry.configure(
                    &[
                        ParamValue::new(LEFT, u32_bytes(k)),
                        ParamValue::new(RIGHT, u32_bytes(1000 - k)),
                    ],
                    BlockMode::DontBlock,
                );
                assert_eq!(reply.status, Status::Ok);
            }
        }));
    }

    let mut readers = Vec::new();
    for _ in 0..2 {
        let registry = registry.clone();
        readers.push(thread::spawn(move || {
            for _ in 0..400 {
                let reply = registry.query(
                    &[ParamIndex::new(LEFT), ParamIndex::new(RIGHT)],
                    BlockMode::DontBlock,
                );
                assert_eq!(reply.status, Status::Ok);
                let left = u32_of(&reply.params[0]);
                let right = u32_of(&reply.params[1]);
                assert_eq!(left + right, 1000, "torn read: left={left} right={right}");
            }
        }));
    }

    for handle in writers.into_iter().chain(readers) {
        handle.join().expect("worker");
    }

    let reply = registry.query(
        &[ParamIndex::new(LEFT), ParamIndex::new(RIGHT)],
        BlockMode::DontBlock,
    );
    assert_eq!(u32_of(&reply.params[0]) + u32_of(&reply.params[1]), 1000);
}

/// Calls on disjoint parameters proceed side by side without interfering.
#[test]
fn test_disjoint_calls_do_not_interfere() {
    let registry = Arc::new(
        ParamRegistryBuilder::new("filt")
            .with_param(u32_param(LEFT, "knob", 10))
            .with_param(u32_param(RIGHT, "meter", 77))
            .build()
            .expect("registry"),
    );
    registry.set_run_state(RunState::Running);

    let writer = registry.clone();
    let handle = thread::spawn(move || {
        for i in 0..200u32 {
            let reply = writer.configure(
                &[ParamValue::new(LEFT, u32_bytes(i))],
                BlockMode::DontBlock,
            );
            assert_eq!(reply.status, Status::Ok);
        }
    });

    for _ in 0..400 {
        let reply = registry.query(&[ParamIndex::new(RIGHT)], BlockMode::DontBlock);
        assert_eq!(reply.status, Status::Ok);
        assert_eq!(u32_of(&reply.params[0]), 77);
    }
    handle.join().expect("writer");
}

/// Registration during traffic only ever grows what scans can see.
#[test]
fn test_registration_races_with_scans() {
    let registry = Arc::new(ParamRegistryBuilder::new("mux").build().expect("registry"));
    registry.set_run_state(RunState::Running);

    let writer = registry.clone();
    let handle = thread::spawn(move || {
        for i in 0..64u32 {
            writer
                .register(u32_param(0x500 + i, &format!("pad{i}"), i))
                .expect("register");
        }
    });

    let mut seen = 0;
    while !handle.is_finished() {
        let reply = registry.supported_params(ParamIndex::new(0), u32::MAX);
        assert_eq!(reply.status, Status::Ok);
        assert!(reply.descriptors.len() >= seen, "a scan went backwards");
        seen = reply.descriptors.len();
    }
    handle.join().expect("registrar");

    let reply = registry.supported_params(ParamIndex::new(0), u32::MAX);
    assert_eq!(reply.descriptors.len(), 64);
    for pair in reply.descriptors.windows(2) {
        assert!(pair[0].index < pair[1].index);
    }
}

/// Dynamic domains always resolve against a committed dependency value.
#[test]
fn test_dynamic_domains_read_committed_values() {
    let width = u32_param(LEFT, "width", 320);
    let bitrate = ParamSpec::new(RIGHT, "bitrate", u32_bytes(64_000))
        .with_dependency(LEFT)
        .with_field(FieldSpec::new(0, ScalarKind::U32).with_dynamic_domain(|view| {
            let Some(Scalar::U32(width)) = view.scalar(ParamIndex::new(LEFT), 0, ScalarKind::U32)
            else {
                return FieldDomain::Unsupported;
            };
            FieldDomain::range(Scalar::U32(1_000), Scalar::U32(width * 1_000))
                .unwrap_or(FieldDomain::Unsupported)
        }));

    let registry = Arc::new(
        ParamRegistryBuilder::new("enc")
            .with_param(width)
            .with_param(bitrate)
            .build()
            .expect("registry"),
    );
    registry.set_run_state(RunState::Running);

    let writer = registry.clone();
    let handle = thread::spawn(move || {
        for i in 0..200u32 {
            let value = if i % 2 == 0 { 320 } else { 640 };
            let reply = writer.configure(
                &[ParamValue::new(LEFT, u32_bytes(value))],
                BlockMode::DontBlock,
            );
            assert_eq!(reply.status, Status::Ok);
        }
    });

    let field = FieldRef::new(ParamIndex::new(RIGHT), FieldId::new(0, 4));
    for _ in 0..200 {
        let reply = registry.supported_values(&[field], BlockMode::DontBlock);
        assert_eq!(reply.status, Status::Ok);
        let Some(FieldDomain::Range { max, .. }) = reply.fields[0].outcome.domain() else {
            panic!("expected a range, got {:?}", reply.fields[0].outcome);
        };
        assert!(
            *max == Scalar::U32(320_000) || *max == Scalar::U32(640_000),
            "saw a half-written width: {max:?}"
        );
    }
    handle.join().expect("writer");
}
