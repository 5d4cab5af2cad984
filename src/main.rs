// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use scsi_initiator_rs::{
    cfg::{cli::resolve_config_path, config::Config, logger::init_logger},
    models::device::DeviceIdent,
    scan::DeviceScanner,
    sim::{
        SimBus, SimOptions,
        target::{MissingLun, SimDisk},
    },
};
use tracing::info;

fn main() -> Result<()> {
    let _init_logger = init_logger("tests/config_logger.yaml")?;

    let config = resolve_config_path("tests/config.yaml")
        .and_then(Config::load_from_file)
        .context("failed to resolve or load config")?;

    // A simulated machine: one bus, paging on, a couple of disks, a target
    // with a sparse second LUN, and a third-party target the modern manager
    // never registered.
    let bus = SimBus::new(SimOptions {
        paging_active: true,
        legacy_only_targets: vec![5],
        ..SimOptions::default()
    });
    let mut block_zero = [0u8; 512];
    block_zero[..4].copy_from_slice(b"BOOT");
    bus.add_device(
        DeviceIdent::new(0, 2, 0),
        Box::new(
            SimDisk::new("SIMULACR", "VIRTUAL DISK", 64).with_block_zero(&block_zero),
        ),
    );
    bus.add_device(
        DeviceIdent::new(0, 4, 0),
        Box::new(SimDisk::new("SIMULACR", "SECOND DISK", 32)),
    );
    bus.add_device(DeviceIdent::new(0, 4, 1), Box::new(MissingLun::default()));
    bus.add_device(
        DeviceIdent::new(0, 5, 0),
        Box::new(SimDisk::new("THIRDPTY", "PATCHED DRIVE", 16)),
    );

    let scanner = DeviceScanner::new(bus.env(), &config);
    let devices = scanner.list_devices();
    for found in &devices {
        info!(
            device = %found.device,
            via_async = found.via_async,
            vendor = found.inquiry.as_ref().map(|i| i.vendor.as_str()),
            "found device"
        );
    }

    if let Some(first) = devices.first()
        && let Some(block) = scanner.read_block_zero(first.device)
    {
        info!(
            device = %first.device,
            head = %hex::encode(&block[..8]),
            "block zero"
        );
    }

    Ok(())
}
