// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Topology discovery: walk every bus, target and LUN the host will admit
//! to, probe each address with an Inquiry, and collect what answers.
//!
//! Discovery is made awkward by the split-manager world: a third-party bus
//! interface may serve the legacy entry points without ever registering with
//! the modern manager, so after the regular bus walk a fallback pass
//! re-probes the hard-wired legacy target IDs the modern manager does not
//! recognize.

use tracing::{debug, error, info, warn};

use crate::{
    cfg::config::Config,
    control_block::{
        common::{Cdb, MAX_CDB_LEN},
        inquiry::{INQUIRY_BUFFER_LEN, InquiryData, fill_inquiry, parse_inquiry},
        read::fill_read6,
    },
    dispatch::{CommandRequest, Dispatcher},
    models::{
        device::DeviceIdent,
        sense_data::sense_key,
        status::{HostFault, ScsiStatus},
        transfer::DataTransfer,
    },
    transport::host::{HostEnv, ModernHost},
};

/// Bus number that addresses the subsystem as a whole in a bus inquiry.
pub const WILDCARD_BUS: u8 = 0xFF;

/// The host's bus ID when the modern manager cannot be asked. A machine in a
/// multi-initiator setup may use something else, but only the modern manager
/// knows.
pub const DEFAULT_INITIATOR_ID: u8 = 7;

/// Highest target ID on a legacy-addressed bus.
pub const DEFAULT_MAX_TARGET: u8 = 7;

/// Highest hard-wired target ID covered by the fallback pass.
pub const LAST_HARDWIRED_TARGET: u8 = 6;

/// Logical block length assumed for block-zero reads. The proper algorithm
/// reads the real length from Read Capacity first and keeps it per drive.
pub const BLOCK_LEN: u32 = 512;

/// One device the scan found, with the Inquiry identity when the device
/// produced one.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub device: DeviceIdent,
    pub inquiry: Option<InquiryData>,
    /// Whether the device was reached through the modern manager.
    pub via_async: bool,
}

pub struct DeviceScanner {
    env: HostEnv,
    dispatcher: Dispatcher,
    async_enabled: bool,
    max_logical_unit: u8,
    verbose: bool,
    timeout_ticks: u32,
}

impl DeviceScanner {
    pub fn new(env: HostEnv, config: &Config) -> Self {
        let dispatcher = Dispatcher::new(&env, config);
        Self {
            async_enabled: config.manager.use_async_manager.as_bool()
                && env.modern.is_some(),
            env,
            dispatcher,
            max_logical_unit: config.scan.max_logical_unit,
            verbose: config.scan.verbose_display.as_bool(),
            timeout_ticks: config.runtime.completion_timeout_ticks,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The modern manager, when it is enabled and actually installed.
    fn modern(&self) -> Option<&dyn ModernHost> {
        if !self.async_enabled {
            return None;
        }
        self.env
            .modern
            .as_deref()
            .filter(|host| host.action_trap_installed())
    }

    /// Highest host bus index. Without the modern manager there is exactly
    /// one bus.
    fn highest_host_bus(&self) -> Result<u8, HostFault> {
        match self.modern() {
            None => Ok(0),
            Some(host) => match host.bus_inquiry(WILDCARD_BUS) {
                Ok(data) => Ok(data.hi_bus_id),
                Err(fault) => {
                    error!(%fault, "bus inquiry for the highest bus failed");
                    Err(fault)
                },
            },
        }
    }

    /// Whether `bus` can be reached, and whether through the modern manager.
    /// An unregistered bus 0 is still reachable through the legacy entry
    /// points (a third-party interface patching the legacy traps); an
    /// unregistered higher bus cannot be reached at all.
    fn bus_api(&self, bus: u8) -> Result<bool, HostFault> {
        let Some(host) = self.modern() else {
            return Ok(false);
        };
        match host.bus_inquiry(bus) {
            Ok(_) => Ok(true),
            Err(_) if bus == 0 => Ok(false),
            Err(fault) => Err(fault),
        }
    }

    /// The host's own ID on `bus`. Almost always seven, but only the modern
    /// manager knows for sure.
    fn initiator_id(&self, bus: u8) -> Result<u8, HostFault> {
        match self.modern() {
            None => Ok(DEFAULT_INITIATOR_ID),
            Some(host) => match host.bus_inquiry(bus) {
                Ok(data) => Ok(data.initiator_id),
                Err(fault) => {
                    error!(bus, %fault, "bus inquiry for the initiator id failed");
                    Err(fault)
                },
            },
        }
    }

    fn max_target_id(&self, bus: u8) -> Result<u8, HostFault> {
        if bus == 0 {
            // Bus 0 is always legacy-addressable; seven covers it whatever
            // the initiator ID was changed to.
            return Ok(DEFAULT_MAX_TARGET);
        }
        match self.modern() {
            None => Ok(DEFAULT_MAX_TARGET),
            Some(host) => host.bus_inquiry(bus).map(|data| data.max_target),
        }
    }

    /// Enumerate every reachable device. Failures along the way are logged
    /// and skip the bus or address concerned; the scan itself always comes
    /// back with whatever it found.
    pub fn list_devices(&self) -> Vec<DiscoveredDevice> {
        info!("listing all SCSI devices");
        let mut found = Vec::new();
        let Ok(last_bus) = self.highest_host_bus() else {
            return found;
        };
        for bus in 0..=last_bus {
            let use_async = match self.bus_api(bus) {
                Ok(use_async) => use_async,
                Err(fault) => {
                    debug!(bus, %fault, "bus is not accessible, skipping");
                    continue;
                },
            };
            let initiator = if use_async {
                match self.initiator_id(bus) {
                    Ok(id) => id,
                    Err(_) => continue,
                }
            } else {
                DEFAULT_INITIATOR_ID
            };
            let Ok(max_target) = self.max_target_id(bus) else {
                continue;
            };
            for target_id in 0..=max_target {
                if target_id == initiator {
                    continue;
                }
                self.scan_target(
                    DeviceIdent::new(bus, target_id, 0),
                    use_async,
                    &mut found,
                );
            }
        }
        // Hard-wired fallback: a third-party interface may answer the legacy
        // entry points for IDs the modern manager never registered.
        if let Some(host) = self.modern() {
            for target_id in 0..=LAST_HARDWIRED_TARGET {
                let known = matches!(host.virtual_id_exists(target_id), Ok(true));
                if known {
                    continue;
                }
                self.scan_target(DeviceIdent::new(0, target_id, 0), false, &mut found);
            }
        }
        info!(count = found.len(), "SCSI device scan complete");
        found
    }

    /// Walk the LUNs of one target. Stops at the first absent LUN: the usual
    /// sparse-LUN convention, adopted here as scanner policy rather than a
    /// guarantee about every device.
    fn scan_target(
        &self,
        target: DeviceIdent,
        use_async: bool,
        found: &mut Vec<DiscoveredDevice>,
    ) {
        for lun in 0..=self.max_logical_unit {
            let device = DeviceIdent::new(target.bus, target.target_id, lun);
            if !self.check_device_present(device, use_async) {
                break;
            }
            let inquiry = self.drive_info(device, use_async);
            found.push(DiscoveredDevice {
                device,
                inquiry,
                via_async: use_async,
            });
        }
    }

    /// Whether a device answers at `device`. Looks carefully at the failure
    /// to tell a missing address from a present-but-troubled device, such as
    /// a CD-ROM player with no disk inserted. Only unexpected errors are
    /// logged.
    pub fn check_device_present(&self, device: DeviceIdent, use_async: bool) -> bool {
        if self.verbose {
            info!(device = %device, "checking for device presence");
        }
        let mut inquiry_buf = [0u8; INQUIRY_BUFFER_LEN];
        let mut cdb_bytes = [0u8; MAX_CDB_LEN];
        fill_inquiry(&mut cdb_bytes, INQUIRY_BUFFER_LEN as u8);
        let outcome = self.dispatcher.run(CommandRequest {
            device,
            cdb: Cdb::new(cdb_bytes),
            transfer: DataTransfer::Read {
                buf: &mut inquiry_buf,
                quantum: 1, // force a handshaked transfer
            },
            timeout_ticks: self.timeout_ticks,
            report_errors: false,
            use_async,
        });
        match outcome.status {
            ScsiStatus::Good => match parse_inquiry(&inquiry_buf) {
                Ok(inquiry) if inquiry.is_missing() => {
                    if self.verbose {
                        debug!(device = %device, "no such device");
                    }
                    false
                },
                Ok(_) => {
                    if self.verbose {
                        debug!(device = %device, "device is present");
                    }
                    true
                },
                Err(_) => false,
            },
            ScsiStatus::CheckCondition => match &outcome.sense {
                // A present device that cannot serve the request still
                // produces real sense; a bad logical unit produces
                // illegal-request, or nothing readable at all.
                Some(sense) if sense.is_valid() => match sense.sense_key {
                    sense_key::ILLEGAL_REQUEST => false,
                    _ => {
                        warn!(device = %device, ?sense, "device present but not ready");
                        true
                    },
                },
                _ => false,
            },
            status if status.is_missing_device() => false,
            status => {
                warn!(device = %device, %status, "unexpected error while probing");
                false
            },
        }
    }

    /// Inquiry with reporting enabled; logs and returns the identity of the
    /// device when it produced one.
    pub fn drive_info(&self, device: DeviceIdent, use_async: bool) -> Option<InquiryData> {
        let mut inquiry_buf = [0u8; INQUIRY_BUFFER_LEN];
        let mut cdb_bytes = [0u8; MAX_CDB_LEN];
        fill_inquiry(&mut cdb_bytes, INQUIRY_BUFFER_LEN as u8);
        let outcome = self.dispatcher.run(CommandRequest {
            device,
            cdb: Cdb::new(cdb_bytes),
            transfer: DataTransfer::Read {
                buf: &mut inquiry_buf,
                quantum: 1,
            },
            timeout_ticks: self.timeout_ticks,
            report_errors: true,
            use_async,
        });
        if !outcome.is_good() {
            return None;
        }
        match parse_inquiry(&inquiry_buf) {
            Ok(inquiry) => {
                info!(
                    device = %device,
                    vendor = %inquiry.vendor,
                    product = %inquiry.product,
                    revision = %inquiry.revision,
                    device_type = inquiry.device_type_str(),
                    removable = inquiry.removable,
                    "drive info"
                );
                Some(inquiry)
            },
            Err(err) => {
                warn!(device = %device, %err, "inquiry response unparseable");
                None
            },
        }
    }

    /// Read logical block zero off a device: one 512-byte READ(6) with the
    /// block length as the transfer quantum.
    pub fn read_block_zero(&self, device: DeviceIdent) -> Option<Vec<u8>> {
        info!(device = %device, "read block zero");
        let mut data = vec![0u8; BLOCK_LEN as usize];
        let mut cdb_bytes = [0u8; MAX_CDB_LEN];
        fill_read6(&mut cdb_bytes, 0, 1);
        let outcome = self.dispatcher.run(CommandRequest {
            device,
            cdb: Cdb::new(cdb_bytes),
            transfer: DataTransfer::Read {
                buf: &mut data,
                quantum: BLOCK_LEN,
            },
            timeout_ticks: self.timeout_ticks,
            report_errors: true,
            use_async: true,
        });
        if outcome.is_good() {
            info!(device = %device, "read was successful");
            Some(data)
        } else {
            None
        }
    }
}
