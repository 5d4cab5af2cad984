// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! An in-memory host bus implementing all three host interfaces.
//!
//! Backs the demo binary and the test suite: emulated targets hang off
//! bus/target/LUN addresses, and the option block injects the awkward
//! conditions the drivers have to survive (hold failures, busy streaks,
//! quirky chipsets, a missing modern manager, unregistered third-party
//! targets).

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    control_block::inquiry::DEV_TYPE_MISSING,
    models::{
        device::DeviceIdent,
        outcome::status_byte,
        sense_data::sense_key,
        status::HostFault,
        transfer::{DataTransfer, TransferProgram},
    },
    sim::target::{SimCmdResult, SimTarget, fixed_sense},
    transport::{
        hold::{Region, VirtualMemory},
        host::{
            BusCompletion, BusInquiryData, ExecFlags, ExecIoBlock, IoFlags, LegacyHost,
            ModernHost, STAT_BSY, TransferRun, WeirdStuff,
        },
    },
};

/// Emulated targets.
pub mod target;

/// Knobs of the simulated machine. Set up front, before any commands run.
#[derive(Debug, Clone)]
pub struct SimOptions {
    /// Whether the modern manager's action trap is installed.
    pub async_installed: bool,
    pub paging_active: bool,
    /// Fail the hold call for this region.
    pub fail_hold: Option<Region>,
    pub weird_stuff: WeirdStuff,
    /// Parameter-block size the buses report.
    pub io_pb_size: u16,
    pub bus_count: u8,
    pub initiator_id: u8,
    pub max_target: u8,
    /// Bus-0 targets served by a third-party interface that patches the
    /// legacy entry points without registering with the modern manager.
    pub legacy_only_targets: Vec<u8>,
    /// Report the bus busy for this many status polls.
    pub bus_busy_polls: u32,
    /// Fail this many arbitration attempts before letting one through.
    pub acquire_failures: u32,
    /// Reproduce the controller defect that leaves the true status in the
    /// message byte while the status byte reads Good.
    pub status_in_message_byte: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            async_installed: true,
            paging_active: false,
            fail_hold: None,
            weird_stuff: WeirdStuff::TARGET_DRIVEN_SDTR_SAFE,
            io_pb_size: 232,
            bus_count: 1,
            initiator_id: 7,
            max_target: 7,
            legacy_only_targets: Vec::new(),
            bus_busy_polls: 0,
            acquire_failures: 0,
            status_in_message_byte: false,
        }
    }
}

/// Page-lock traffic, in call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldOp {
    Hold,
    Unhold,
}

/// Call counters and captures the tests assert against.
#[derive(Debug, Default, Clone)]
pub struct SimCounters {
    pub exec_ios: u32,
    pub selects: u32,
    pub acquires: u32,
    /// Every address a command was executed against, in order.
    pub addressed: Vec<DeviceIdent>,
    pub last_exec_flags: Option<(ExecFlags, IoFlags)>,
    pub last_cdb: Vec<u8>,
}

struct Pending {
    target_id: u8,
    cdb: Vec<u8>,
    executed: bool,
    status_byte: u8,
}

struct BusState {
    options: SimOptions,
    devices: HashMap<DeviceIdent, Box<dyn SimTarget>>,
    ticks: u64,
    counters: SimCounters,
    hold_events: Vec<(HoldOp, Region)>,
    pending: Option<Pending>,
    bus_busy_polls_left: u32,
    acquire_failures_left: u32,
}

pub struct SimBus {
    state: Mutex<BusState>,
}

impl SimBus {
    pub fn new(options: SimOptions) -> Arc<Self> {
        let state = BusState {
            bus_busy_polls_left: options.bus_busy_polls,
            acquire_failures_left: options.acquire_failures,
            options,
            devices: HashMap::new(),
            ticks: 0,
            counters: SimCounters::default(),
            hold_events: Vec::new(),
            pending: None,
        };
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    pub fn add_device(&self, device: DeviceIdent, target: Box<dyn SimTarget>) {
        self.state().devices.insert(device, target);
    }

    /// The host interfaces this machine offers.
    pub fn env(self: &Arc<Self>) -> crate::transport::host::HostEnv {
        crate::transport::host::HostEnv {
            modern: Some(self.clone() as Arc<dyn ModernHost>),
            legacy: self.clone() as Arc<dyn LegacyHost>,
            vm: self.clone() as Arc<dyn VirtualMemory>,
        }
    }

    pub fn counters(&self) -> SimCounters {
        self.state().counters.clone()
    }

    pub fn hold_events(&self) -> Vec<(HoldOp, Region)> {
        self.state().hold_events.clone()
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().expect("sim bus mutex poisoned")
    }

    fn bus_inquiry_data(options: &SimOptions) -> BusInquiryData {
        BusInquiryData {
            io_pb_size: options.io_pb_size,
            hi_bus_id: options.bus_count.saturating_sub(1),
            initiator_id: options.initiator_id,
            max_target: options.max_target,
            max_lun: 7,
            weird_stuff: options.weird_stuff,
        }
    }
}

/// Canned behavior of a present target asked for a LUN it does not have:
/// Inquiry reports the missing qualifier, Request Sense reports
/// illegal-request, anything else gets check condition.
fn missing_lun_response(cdb: &[u8]) -> SimCmdResult {
    match cdb[0] {
        0x12 => {
            let mut data = vec![0u8; 36];
            data[0] = DEV_TYPE_MISSING;
            data.truncate((cdb[4] as usize).min(36));
            SimCmdResult::DataIn(data)
        },
        0x03 => {
            let mut data = fixed_sense(sense_key::ILLEGAL_REQUEST, 0x25, 0x00);
            data.truncate((cdb[4] as usize).min(18));
            SimCmdResult::DataIn(data)
        },
        _ => SimCmdResult::Status(status_byte::CHECK_CONDITION),
    }
}

impl ModernHost for SimBus {
    fn action_trap_installed(&self) -> bool {
        self.state().options.async_installed
    }

    fn bus_inquiry(&self, bus: u8) -> Result<BusInquiryData, HostFault> {
        let st = self.state();
        if bus != crate::scan::WILDCARD_BUS && bus >= st.options.bus_count {
            return Err(HostFault::BusInvalid);
        }
        Ok(Self::bus_inquiry_data(&st.options))
    }

    fn exec_io(
        &self,
        pb: &mut ExecIoBlock,
        data: &mut DataTransfer<'_>,
        sense: Option<&mut [u8]>,
    ) -> Result<(), HostFault> {
        let mut guard = self.state();
        let st = &mut *guard;
        st.counters.exec_ios += 1;
        st.counters.last_exec_flags = Some((pb.flags, pb.io_flags));
        st.counters.last_cdb = pb.cdb[..pb.cdb_len as usize].to_vec();
        st.counters.addressed.push(pb.device);

        if pb.queue_link != 0 || pb.pb_len == 0 {
            return Err(HostFault::RequestInvalid);
        }
        if pb.device.bus >= st.options.bus_count {
            return Err(HostFault::BusInvalid);
        }
        if pb.device.bus == 0
            && st.options.legacy_only_targets.contains(&pb.device.target_id)
        {
            // Invisible to the modern manager; only the patched legacy entry
            // points reach it.
            return Err(HostFault::SelectTimeout);
        }
        let cdb = pb.cdb[..pb.cdb_len as usize].to_vec();
        let Some(target) = st.devices.get_mut(&pb.device) else {
            return Err(HostFault::SelectTimeout);
        };

        let result = if pb.flags.contains(ExecFlags::DIRECTION_OUT)
            && !pb.flags.contains(ExecFlags::DIRECTION_NONE)
        {
            match data {
                DataTransfer::Write { buf, .. } => target.cmd(&cdb, Some(*buf)),
                _ => return Err(HostFault::SequenceFailure),
            }
        } else {
            target.cmd(&cdb, None)
        };

        match result {
            SimCmdResult::Status(status_byte::GOOD) => {
                pb.scsi_status = status_byte::GOOD;
                if pb.flags.contains(ExecFlags::DIRECTION_IN)
                    && !pb.flags.contains(ExecFlags::DIRECTION_NONE)
                    && pb.data_len > 0
                {
                    // The device skipped the data phase entirely.
                    pb.residual = pb.data_len;
                    return Err(HostFault::DataRun);
                }
                Ok(())
            },
            SimCmdResult::Status(status) => {
                pb.scsi_status = status;
                if status == status_byte::CHECK_CONDITION
                    && !pb.flags.contains(ExecFlags::DISABLE_AUTOSENSE)
                    && let Some(sense_buf) = sense
                {
                    let bytes = target.sense_bytes();
                    let n = bytes.len().min(sense_buf.len());
                    sense_buf[..n].copy_from_slice(&bytes[..n]);
                    pb.result_flags |=
                        crate::transport::host::ResultFlags::AUTOSENSE_VALID;
                }
                Err(HostFault::NonZeroStatus)
            },
            SimCmdResult::DataIn(bytes) => match data {
                DataTransfer::Read { buf, .. } => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    pb.scsi_status = status_byte::GOOD;
                    pb.residual = pb.data_len.saturating_sub(n as u32);
                    if (n as u32) < pb.data_len {
                        Err(HostFault::DataRun)
                    } else {
                        Ok(())
                    }
                },
                _ => Err(HostFault::SequenceFailure),
            },
        }
    }

    fn virtual_id_exists(&self, target_id: u8) -> Result<bool, HostFault> {
        let st = self.state();
        if !st.options.async_installed {
            return Err(HostFault::DeviceNotThere);
        }
        if st.options.legacy_only_targets.contains(&target_id) {
            return Ok(false);
        }
        Ok(st
            .devices
            .keys()
            .any(|d| d.bus == 0 && d.target_id == target_id))
    }
}

impl LegacyHost for SimBus {
    fn ticks(&self) -> u64 {
        let mut st = self.state();
        st.ticks += 1;
        st.ticks
    }

    fn bus_status(&self) -> u8 {
        let mut st = self.state();
        if st.bus_busy_polls_left > 0 {
            st.bus_busy_polls_left -= 1;
            STAT_BSY
        } else {
            0
        }
    }

    fn acquire(&self) -> Result<(), HostFault> {
        let mut st = self.state();
        st.counters.acquires += 1;
        if st.acquire_failures_left > 0 {
            st.acquire_failures_left -= 1;
            Err(HostFault::SubsystemBusy)
        } else {
            Ok(())
        }
    }

    fn select(&self, target_id: u8) -> Result<(), HostFault> {
        let mut st = self.state();
        st.counters.selects += 1;
        if st.devices.keys().any(|d| d.bus == 0 && d.target_id == target_id) {
            st.pending = Some(Pending {
                target_id,
                cdb: Vec::new(),
                executed: false,
                status_byte: status_byte::GOOD,
            });
            Ok(())
        } else {
            Err(HostFault::Communications)
        }
    }

    fn command(&self, cdb: &[u8]) -> Result<(), HostFault> {
        let mut guard = self.state();
        let st = &mut *guard;
        let Some(pending) = st.pending.as_mut() else {
            return Err(HostFault::SequenceFailure);
        };
        pending.cdb = cdb.to_vec();
        st.counters
            .addressed
            .push(DeviceIdent::new(0, pending.target_id, cdb[1] >> 5));
        st.counters.last_cdb = cdb.to_vec();
        Ok(())
    }

    fn read_polled(&self, prog: &TransferProgram, buf: &mut [u8]) -> TransferRun {
        self.legacy_read(prog, buf)
    }

    fn read_blind(&self, prog: &TransferProgram, buf: &mut [u8]) -> TransferRun {
        self.legacy_read(prog, buf)
    }

    fn write_polled(&self, prog: &TransferProgram, buf: &[u8]) -> TransferRun {
        self.legacy_write(prog, buf)
    }

    fn write_blind(&self, prog: &TransferProgram, buf: &[u8]) -> TransferRun {
        self.legacy_write(prog, buf)
    }

    fn complete(&self, _timeout_ticks: u32) -> BusCompletion {
        let mut guard = self.state();
        let st = &mut *guard;
        let Some(mut pending) = st.pending.take() else {
            return BusCompletion {
                fault: Some(HostFault::SequenceFailure),
                ..BusCompletion::default()
            };
        };
        if !pending.executed {
            // No data phase ran; the command executes during completion.
            let lun = if pending.cdb.len() > 1 {
                pending.cdb[1] >> 5
            } else {
                0
            };
            let device = DeviceIdent::new(0, pending.target_id, lun);
            let result = match st.devices.get_mut(&device) {
                Some(target) => target.cmd(&pending.cdb, None),
                None => missing_lun_response(&pending.cdb),
            };
            pending.status_byte = match result {
                SimCmdResult::Status(status) => status,
                // Data the initiator never read is drained by completion.
                SimCmdResult::DataIn(_) => status_byte::GOOD,
            };
        }
        let (sts, msg) = if st.options.status_in_message_byte
            && pending.status_byte == status_byte::CHECK_CONDITION
        {
            (status_byte::GOOD, status_byte::CHECK_CONDITION)
        } else {
            (pending.status_byte, 0x00)
        };
        BusCompletion {
            status_byte: sts,
            message_byte: msg,
            fault: None,
        }
    }
}

impl SimBus {
    fn legacy_read(&self, prog: &TransferProgram, buf: &mut [u8]) -> TransferRun {
        let mut guard = self.state();
        let st = &mut *guard;
        let Some(pending) = st.pending.as_mut() else {
            return TransferRun {
                count: 0,
                fault: Some(HostFault::SequenceFailure),
            };
        };
        pending.executed = true;
        let lun = pending.cdb[1] >> 5;
        let device = DeviceIdent::new(0, pending.target_id, lun);
        let result = match st.devices.get_mut(&device) {
            Some(target) => target.cmd(&pending.cdb, None),
            None => missing_lun_response(&pending.cdb),
        };
        match result {
            SimCmdResult::DataIn(bytes) => {
                pending.status_byte = status_byte::GOOD;
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                let count = if prog.stride == 0 {
                    0
                } else {
                    (n as u32 / prog.stride) * prog.stride
                };
                TransferRun {
                    count,
                    // The program did not run to completion: the target left
                    // the data phase early.
                    fault: (n < buf.len()).then_some(HostFault::Phase),
                }
            },
            SimCmdResult::Status(status) => {
                // Straight to the status phase; no byte ever moved.
                pending.status_byte = status;
                TransferRun {
                    count: 0,
                    fault: Some(HostFault::Phase),
                }
            },
        }
    }

    fn legacy_write(&self, prog: &TransferProgram, buf: &[u8]) -> TransferRun {
        let mut guard = self.state();
        let st = &mut *guard;
        let Some(pending) = st.pending.as_mut() else {
            return TransferRun {
                count: 0,
                fault: Some(HostFault::SequenceFailure),
            };
        };
        pending.executed = true;
        let lun = pending.cdb[1] >> 5;
        let device = DeviceIdent::new(0, pending.target_id, lun);
        let result = match st.devices.get_mut(&device) {
            Some(target) => target.cmd(&pending.cdb, Some(buf)),
            None => missing_lun_response(&pending.cdb),
        };
        match result {
            SimCmdResult::Status(status) => {
                pending.status_byte = status;
                if status == status_byte::GOOD {
                    TransferRun {
                        count: prog.cycles * prog.stride,
                        fault: None,
                    }
                } else {
                    TransferRun {
                        count: 0,
                        fault: Some(HostFault::Phase),
                    }
                }
            },
            SimCmdResult::DataIn(_) => TransferRun {
                count: 0,
                fault: Some(HostFault::Phase),
            },
        }
    }
}

impl VirtualMemory for SimBus {
    fn paging_active(&self) -> bool {
        self.state().options.paging_active
    }

    fn hold(&self, region: Region, _len: usize) -> Result<(), HostFault> {
        let mut st = self.state();
        if st.options.fail_hold == Some(region) {
            return Err(HostFault::MemoryHoldFailed);
        }
        st.hold_events.push((HoldOp::Hold, region));
        Ok(())
    }

    fn unhold(&self, region: Region, _len: usize) {
        self.state().hold_events.push((HoldOp::Unhold, region));
    }
}
