// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use scsi_initiator_rs::{
    cfg::enums::YesNo,
    control_block::common::{Cdb, MAX_CDB_LEN},
    dispatch::{CommandRequest, Dispatcher},
    models::{
        device::DeviceIdent, sense_data::sense_key, status::ScsiStatus,
        transfer::DataTransfer,
    },
    sim::{SimBus, SimOptions, target::SimDisk},
    transport::host::SPIN_UP_COMPLETION_TICKS,
};

use crate::unit_tests::common::{DISK, bus_with_disk, test_config, tur_cdb};

fn tur_request(device: DeviceIdent, use_async: bool) -> CommandRequest<'static> {
    CommandRequest {
        device,
        cdb: tur_cdb(),
        transfer: DataTransfer::None,
        timeout_ticks: SPIN_UP_COMPLETION_TICKS,
        report_errors: false,
        use_async,
    }
}

#[test]
fn modern_manager_goes_first_when_enabled() {
    let bus = bus_with_disk(SimOptions::default());
    let dispatcher = Dispatcher::new(&bus.env(), &test_config());

    let outcome = dispatcher.run(tur_request(DISK, true));
    assert_eq!(outcome.status, ScsiStatus::Good);

    let counters = bus.counters();
    assert_eq!(counters.exec_ios, 1);
    assert_eq!(counters.selects, 0);
}

#[test]
fn absent_trap_falls_back_to_the_legacy_manager() {
    // Scenario: the modern manager was never installed. The dispatcher must
    // route through the legacy driver without the caller noticing.
    let bus = bus_with_disk(SimOptions {
        async_installed: false,
        ..SimOptions::default()
    });
    let dispatcher = Dispatcher::new(&bus.env(), &test_config());

    let outcome = dispatcher.run(tur_request(DISK, true));
    assert_eq!(outcome.status, ScsiStatus::Good);

    let counters = bus.counters();
    assert_eq!(counters.exec_ios, 0);
    assert_eq!(counters.selects, 1);
}

#[test]
fn legacy_check_condition_gets_an_explicit_request_sense() {
    let bus = SimBus::new(SimOptions {
        async_installed: false,
        ..SimOptions::default()
    });
    let mut disk = SimDisk::new("SIMULACR", "VIRTUAL DISK", 64);
    disk.fail_next = Some((sense_key::NOT_READY, 0x04, 0x01));
    bus.add_device(DISK, Box::new(disk));
    let dispatcher = Dispatcher::new(&bus.env(), &test_config());

    let outcome = dispatcher.run(tur_request(DISK, true));
    assert_eq!(outcome.status, ScsiStatus::CheckCondition);

    // The legacy manager has no autosense: the sense must have come from a
    // second, dispatcher-issued Request Sense command.
    assert_eq!(bus.counters().selects, 2);
    let sense = outcome.sense.expect("follow-up sense captured");
    assert!(sense.is_valid());
    assert_eq!(sense.sense_key, sense_key::NOT_READY);
    assert_eq!((sense.asc, sense.ascq), (0x04, 0x01));
}

#[test]
fn caller_preference_forces_the_legacy_manager() {
    let bus = bus_with_disk(SimOptions::default());
    let dispatcher = Dispatcher::new(&bus.env(), &test_config());

    let outcome = dispatcher.run(tur_request(DISK, false));
    assert_eq!(outcome.status, ScsiStatus::Good);
    assert_eq!(bus.counters().exec_ios, 0);
    assert_eq!(bus.counters().selects, 1);
}

#[test]
fn config_switch_forces_the_legacy_manager() {
    let bus = bus_with_disk(SimOptions::default());
    let mut config = test_config();
    config.manager.use_async_manager = YesNo::No;
    let dispatcher = Dispatcher::new(&bus.env(), &config);

    let outcome = dispatcher.run(tur_request(DISK, true));
    assert_eq!(outcome.status, ScsiStatus::Good);
    assert_eq!(bus.counters().exec_ios, 0);
    assert_eq!(bus.counters().selects, 1);
}

#[test]
fn unresolvable_command_length_never_reaches_a_driver() {
    let bus = bus_with_disk(SimOptions::default());
    let dispatcher = Dispatcher::new(&bus.env(), &test_config());

    let mut bytes = [0u8; MAX_CDB_LEN];
    bytes[0] = 0xC0; // vendor-specific group
    let outcome = dispatcher.run(CommandRequest {
        device: DISK,
        cdb: Cdb::new(bytes),
        transfer: DataTransfer::None,
        timeout_ticks: SPIN_UP_COMPLETION_TICKS,
        report_errors: false,
        use_async: true,
    });
    assert_eq!(outcome.status, ScsiStatus::UnknownCommandLength(0xC0));
    assert_eq!(bus.counters().exec_ios, 0);
    assert_eq!(bus.counters().selects, 0);
}

#[test]
fn lun_is_encoded_into_the_identify_bits() {
    let bus = SimBus::new(SimOptions::default());
    bus.add_device(
        DeviceIdent::new(0, 2, 3),
        Box::new(SimDisk::new("SIMULACR", "VIRTUAL DISK", 64)),
    );
    let dispatcher = Dispatcher::new(&bus.env(), &test_config());

    let outcome = dispatcher.run(tur_request(DeviceIdent::new(0, 2, 3), true));
    assert_eq!(outcome.status, ScsiStatus::Good);
    let cdb = bus.counters().last_cdb;
    assert_eq!(cdb[1] >> 5, 3);
}

#[test]
fn missing_device_family_comes_back_quietly() {
    let bus = bus_with_disk(SimOptions::default());
    let dispatcher = Dispatcher::new(&bus.env(), &test_config());

    let outcome = dispatcher.run(tur_request(DeviceIdent::new(0, 6, 0), true));
    assert!(outcome.status.is_missing_device());
    assert!(outcome.sense.is_none());
}
