// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use scsi_initiator_rs::{
    cfg::enums::YesNo,
    models::device::DeviceIdent,
    scan::DeviceScanner,
    sim::{SimBus, SimOptions, target::{MissingLun, SimDisk}},
};

use crate::unit_tests::common::test_config;

fn disk() -> Box<SimDisk> {
    Box::new(SimDisk::new("SIMULACR", "VIRTUAL DISK", 64))
}

#[test]
fn scan_stops_at_the_first_absent_lun_per_target() {
    let bus = SimBus::new(SimOptions::default());
    bus.add_device(DeviceIdent::new(0, 2, 0), disk());
    bus.add_device(DeviceIdent::new(0, 2, 1), disk());
    // Target 3 has nothing at LUN 0.
    let scanner = DeviceScanner::new(bus.env(), &test_config());

    let found = scanner.list_devices();
    let idents: Vec<DeviceIdent> = found.iter().map(|d| d.device).collect();
    assert_eq!(idents, vec![
        DeviceIdent::new(0, 2, 0),
        DeviceIdent::new(0, 2, 1),
    ]);

    // Target 2 stopped right after its first absent LUN, and target 3 was
    // never probed past LUN 0.
    let addressed = bus.counters().addressed;
    assert!(addressed.contains(&DeviceIdent::new(0, 2, 2)));
    assert!(!addressed.contains(&DeviceIdent::new(0, 2, 3)));
    assert!(!addressed.iter().any(|d| d.target_id == 3 && d.lun > 0));
}

#[test]
fn the_initiator_id_is_never_probed() {
    let bus = SimBus::new(SimOptions::default());
    bus.add_device(DeviceIdent::new(0, 7, 0), disk());
    let scanner = DeviceScanner::new(bus.env(), &test_config());

    let found = scanner.list_devices();
    assert!(found.is_empty());
    assert!(!bus.counters().addressed.iter().any(|d| d.target_id == 7));
}

#[test]
fn unregistered_third_party_target_is_found_through_the_fallback_pass() {
    let bus = SimBus::new(SimOptions {
        legacy_only_targets: vec![5],
        ..SimOptions::default()
    });
    bus.add_device(DeviceIdent::new(0, 2, 0), disk());
    bus.add_device(DeviceIdent::new(0, 5, 0), disk());
    let scanner = DeviceScanner::new(bus.env(), &test_config());

    let found = scanner.list_devices();
    let third_party = found
        .iter()
        .find(|d| d.device == DeviceIdent::new(0, 5, 0))
        .expect("patched target discovered");
    // It was invisible to the modern manager and had to be reached through
    // the legacy entry points.
    assert!(!third_party.via_async);
    assert!(
        found
            .iter()
            .find(|d| d.device == DeviceIdent::new(0, 2, 0))
            .expect("registered target discovered")
            .via_async
    );
}

#[test]
fn presence_check_is_idempotent() {
    let bus = SimBus::new(SimOptions::default());
    bus.add_device(DeviceIdent::new(0, 2, 0), disk());
    let scanner = DeviceScanner::new(bus.env(), &test_config());

    let present = DeviceIdent::new(0, 2, 0);
    let absent = DeviceIdent::new(0, 3, 0);
    for _ in 0..3 {
        assert!(scanner.check_device_present(present, true));
        assert!(!scanner.check_device_present(absent, true));
    }
}

#[test]
fn missing_lun_qualifier_counts_as_absent_on_the_legacy_path() {
    let bus = SimBus::new(SimOptions {
        async_installed: false,
        ..SimOptions::default()
    });
    bus.add_device(DeviceIdent::new(0, 4, 0), disk());
    bus.add_device(DeviceIdent::new(0, 4, 1), Box::new(MissingLun::default()));
    let scanner = DeviceScanner::new(bus.env(), &test_config());

    let found = scanner.list_devices();
    let idents: Vec<DeviceIdent> = found.iter().map(|d| d.device).collect();
    // LUN 1 answered Inquiry with the missing qualifier: absent, and no
    // higher LUN on that target was probed.
    assert_eq!(idents, vec![DeviceIdent::new(0, 4, 0)]);
    assert!(!bus.counters().addressed.iter().any(|d| d.lun > 1));
}

#[test]
fn scan_without_the_modern_manager_walks_one_bus_via_legacy() {
    let bus = SimBus::new(SimOptions {
        async_installed: false,
        ..SimOptions::default()
    });
    bus.add_device(DeviceIdent::new(0, 2, 0), disk());
    let scanner = DeviceScanner::new(bus.env(), &test_config());

    let found = scanner.list_devices();
    assert_eq!(found.len(), 1);
    assert!(!found[0].via_async);
    assert_eq!(bus.counters().exec_ios, 0);
}

#[test]
fn config_can_force_the_legacy_path_even_with_the_manager_installed() {
    let bus = SimBus::new(SimOptions::default());
    bus.add_device(DeviceIdent::new(0, 2, 0), disk());
    let mut config = test_config();
    config.manager.use_async_manager = YesNo::No;
    let scanner = DeviceScanner::new(bus.env(), &config);

    let found = scanner.list_devices();
    assert_eq!(found.len(), 1);
    assert!(!found[0].via_async);
    assert_eq!(bus.counters().exec_ios, 0);
}

#[test]
fn drive_info_reports_the_inquiry_identity() {
    let bus = SimBus::new(SimOptions::default());
    bus.add_device(DeviceIdent::new(0, 2, 0), disk());
    let scanner = DeviceScanner::new(bus.env(), &test_config());

    let inquiry = scanner
        .drive_info(DeviceIdent::new(0, 2, 0), true)
        .expect("inquiry succeeds");
    assert_eq!(inquiry.vendor, "SIMULACR");
    assert_eq!(inquiry.product, "VIRTUAL DISK");
    assert_eq!(inquiry.device_type_str(), "Direct-access block (disk)");
}
