// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use scsi_initiator_rs::{
    models::{
        device::DeviceIdent,
        sense_data::sense_key,
        status::{HostFault, ScsiStatus},
        transfer::DataTransfer,
    },
    sim::{HoldOp, SimOptions, SimBus, target::SimDisk},
    transport::{
        ExecRequest, Handshake, ScsiTransport,
        hold::Region,
        host::{ExecFlags, IoFlags, SPIN_UP_COMPLETION_TICKS, WeirdStuff},
        modern::ManagerPolicy,
    },
};

use crate::unit_tests::common::{
    DISK, bus_with_disk, inquiry_cdb, modern_transport, tur_cdb,
};

fn inquiry_request<'a>(
    buf: &'a mut [u8],
    sense: Option<&'a mut [u8]>,
) -> ExecRequest<'a> {
    ExecRequest {
        device: DISK,
        cdb: inquiry_cdb(96),
        transfer: DataTransfer::Read { buf, quantum: 1 },
        handshake: Handshake::Polled,
        sense,
        timeout_ticks: SPIN_UP_COMPLETION_TICKS,
    }
}

#[test]
fn short_inquiry_read_is_forgiven() {
    let bus = bus_with_disk(SimOptions::default());
    let transport = modern_transport(&bus, ManagerPolicy::default());

    let mut buf = [0u8; 96];
    let mut sense = [0u8; 64];
    let outcome = transport.execute(inquiry_request(&mut buf, Some(&mut sense)));

    // The device answered with 36 bytes against a 96-byte request: the run
    // fault is suppressed and the real length is reported.
    assert_eq!(outcome.status, ScsiStatus::Good);
    assert_eq!(outcome.actual_count, 36);

    // Standard Inquiry data, byte for byte.
    let expected = hex_literal::hex!(
        "00 00 02 00 1f 00 00 00"             // header, additional length 31
        "53 49 4d 55 4c 41 43 52"             // "SIMULACR"
        "56 49 52 54 55 41 4c 20 44 49 53 4b" // "VIRTUAL DISK"
        "20 20 20 20"
        "31 2e 30 20" // "1.0 "
    );
    assert_eq!(&buf[..36], &expected[..]);
    assert!(buf[36..].iter().all(|&b| b == 0));
}

#[test]
fn small_sense_buffer_disables_autosense() {
    let bus = bus_with_disk(SimOptions::default());
    let transport = modern_transport(&bus, ManagerPolicy::default());

    let mut buf = [0u8; 96];
    let mut sense = [0u8; 4]; // below the autosense minimum
    let outcome = transport.execute(inquiry_request(&mut buf, Some(&mut sense[..])));
    assert_eq!(outcome.status, ScsiStatus::Good);

    let (flags, _) = bus.counters().last_exec_flags.expect("exec ran");
    assert!(flags.contains(ExecFlags::DISABLE_AUTOSENSE));
}

#[test]
fn atn_is_disabled_when_the_bus_lacks_the_safety_quirk() {
    let bus = bus_with_disk(SimOptions {
        weird_stuff: WeirdStuff::empty(),
        ..SimOptions::default()
    });
    let transport = modern_transport(&bus, ManagerPolicy {
        enable_select_with_atn: true,
        ..ManagerPolicy::default()
    });

    let mut buf = [0u8; 96];
    let mut sense = [0u8; 64];
    transport.execute(inquiry_request(&mut buf, Some(&mut sense)));

    let (_, io_flags) = bus.counters().last_exec_flags.expect("exec ran");
    assert!(io_flags.contains(IoFlags::DISABLE_SELECT_WITH_ATN));
}

#[test]
fn atn_survives_when_the_bus_reports_it_safe() {
    let bus = bus_with_disk(SimOptions::default());
    let transport = modern_transport(&bus, ManagerPolicy {
        enable_select_with_atn: true,
        ..ManagerPolicy::default()
    });

    let mut buf = [0u8; 96];
    let mut sense = [0u8; 64];
    transport.execute(inquiry_request(&mut buf, Some(&mut sense)));

    let (_, io_flags) = bus.counters().last_exec_flags.expect("exec ran");
    assert!(!io_flags.contains(IoFlags::DISABLE_SELECT_WITH_ATN));
}

#[test]
fn both_disconnect_flags_pass_through_unvalidated() {
    let bus = bus_with_disk(SimOptions::default());
    let transport = modern_transport(&bus, ManagerPolicy {
        do_disconnect: true,
        dont_disconnect: true,
        ..ManagerPolicy::default()
    });

    let mut buf = [0u8; 96];
    let mut sense = [0u8; 64];
    transport.execute(inquiry_request(&mut buf, Some(&mut sense)));

    let (flags, _) = bus.counters().last_exec_flags.expect("exec ran");
    assert!(flags.contains(ExecFlags::DO_DISCONNECT));
    assert!(flags.contains(ExecFlags::DONT_DISCONNECT));
}

#[test]
fn failed_sense_hold_unwinds_every_prior_lock_in_reverse() {
    let bus = bus_with_disk(SimOptions {
        paging_active: true,
        fail_hold: Some(Region::SenseBuffer),
        ..SimOptions::default()
    });
    let transport = modern_transport(&bus, ManagerPolicy::default());

    let mut buf = [0u8; 96];
    let mut sense = [0u8; 64];
    let outcome = transport.execute(inquiry_request(&mut buf, Some(&mut sense)));

    assert_eq!(
        outcome.status,
        ScsiStatus::Host(HostFault::MemoryHoldFailed)
    );
    // The command never reached the bus.
    assert_eq!(bus.counters().exec_ios, 0);
    // Everything held before the failure is released exactly once, last
    // acquired first.
    assert_eq!(bus.hold_events(), vec![
        (HoldOp::Hold, Region::DriverCode),
        (HoldOp::Hold, Region::Stack),
        (HoldOp::Hold, Region::ParamBlock),
        (HoldOp::Hold, Region::DataBuffer),
        (HoldOp::Unhold, Region::DataBuffer),
        (HoldOp::Unhold, Region::ParamBlock),
        (HoldOp::Unhold, Region::Stack),
        (HoldOp::Unhold, Region::DriverCode),
    ]);
}

#[test]
fn check_condition_with_autosense_carries_parsed_sense() {
    let bus = SimBus::new(SimOptions::default());
    let mut disk = SimDisk::new("SIMULACR", "VIRTUAL DISK", 64);
    disk.fail_next = Some((sense_key::NOT_READY, 0x04, 0x01));
    bus.add_device(DISK, Box::new(disk));
    let transport = modern_transport(&bus, ManagerPolicy::default());

    let mut sense = [0u8; 64];
    let outcome = transport.execute(ExecRequest {
        device: DISK,
        cdb: tur_cdb(),
        transfer: DataTransfer::None,
        handshake: Handshake::Polled,
        sense: Some(&mut sense),
        timeout_ticks: SPIN_UP_COMPLETION_TICKS,
    });

    assert_eq!(outcome.status, ScsiStatus::CheckCondition);
    assert_eq!(outcome.status_byte, 0x02);
    let parsed = outcome.sense.expect("autosense captured");
    assert!(parsed.is_valid());
    assert_eq!(parsed.sense_key, sense_key::NOT_READY);
    assert_eq!((parsed.asc, parsed.ascq), (0x04, 0x01));
}

#[test]
fn absent_trap_reports_unimplemented_without_touching_the_bus() {
    let bus = bus_with_disk(SimOptions {
        async_installed: false,
        ..SimOptions::default()
    });
    let transport = modern_transport(&bus, ManagerPolicy::default());

    let mut buf = [0u8; 96];
    let outcome = transport.execute(inquiry_request(&mut buf, None));
    assert_eq!(outcome.status, ScsiStatus::Unimplemented);
    assert_eq!(bus.counters().exec_ios, 0);
}

#[test]
fn missing_device_yields_select_timeout() {
    let bus = bus_with_disk(SimOptions::default());
    let transport = modern_transport(&bus, ManagerPolicy::default());

    let mut buf = [0u8; 96];
    let mut sense = [0u8; 64];
    let outcome = transport.execute(ExecRequest {
        device: DeviceIdent::new(0, 6, 0),
        cdb: inquiry_cdb(96),
        transfer: DataTransfer::Read {
            buf: &mut buf,
            quantum: 1,
        },
        handshake: Handshake::Polled,
        sense: Some(&mut sense),
        timeout_ticks: SPIN_UP_COMPLETION_TICKS,
    });
    assert_eq!(outcome.status, ScsiStatus::Host(HostFault::SelectTimeout));
    assert!(outcome.status.is_missing_device());
}
