// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Driver for the legacy single-bus manager.
//!
//! A command here is a hand-run bus conversation: arbitrate for the bus,
//! select the target, send the command bytes, cycle the transfer-instruction
//! program through the data phase, then always run the completion sequence
//! to recover the status and message bytes. LUNs are not addressable at this
//! layer; callers encode them into command byte 1.

use std::sync::Arc;

use tracing::debug;

use crate::{
    models::{
        outcome::{CommandOutcome, status_byte},
        status::{HostFault, ScsiStatus},
        transfer::{DataTransfer, TransferProgram},
    },
    transport::{
        ExecRequest, ScsiTransport,
        hold::{HoldSet, Region, VirtualMemory},
        host::{BusCompletion, LegacyHost, TransferRun, bus_busy},
    },
};

/// Total arbitration/busy-retry budget: about ten seconds at four attempts
/// per second.
pub const MAX_BUS_RETRIES: u32 = 40;

/// How long to wait for the bus to go free before giving up on arbitration.
const BUS_FREE_WATCHDOG_TICKS: u64 = 300;

/// Pause before retrying a command the device answered with Busy.
const BUSY_PAUSE_TICKS: u64 = 15;

/// Bounded settle wait after a failed acquisition round.
const BUS_SETTLE_POLLS: u32 = 100;

pub struct LegacyTransport {
    host: Arc<dyn LegacyHost>,
    vm: Arc<dyn VirtualMemory>,
}

impl LegacyTransport {
    pub fn new(host: Arc<dyn LegacyHost>, vm: Arc<dyn VirtualMemory>) -> Self {
        Self { host, vm }
    }

    /// Wait for a free bus and arbitrate for it: four acquisition rounds of
    /// four attempts each, with a watchdogged free-wait before each round and
    /// a bounded settle wait between rounds.
    fn acquire_bus(&self) -> Result<(), HostFault> {
        let host = self.host.as_ref();
        // If every attempt fails without the host saying why, the manager's
        // internal semaphore is wedged.
        let mut last = HostFault::SubsystemBusy;
        for _round in 0..4 {
            let watchdog = host.ticks() + BUS_FREE_WATCHDOG_TICKS;
            while bus_busy(host.bus_status()) {
                if host.ticks() > watchdog {
                    return Err(HostFault::ArbitrationTimeout);
                }
                std::hint::spin_loop();
            }
            for _attempt in 0..4 {
                match host.acquire() {
                    Ok(()) => return Ok(()),
                    Err(fault) => last = fault,
                }
            }
            // The bus went busy again underneath us; give it a bounded
            // chance to settle before the next round.
            for _ in 0..BUS_SETTLE_POLLS {
                if !bus_busy(host.bus_status()) {
                    break;
                }
            }
        }
        Err(last)
    }

    fn run_data_phase(
        &self,
        transfer: &mut DataTransfer<'_>,
        prog: &TransferProgram,
    ) -> TransferRun {
        let host = self.host.as_ref();
        match transfer {
            DataTransfer::None => TransferRun::default(),
            DataTransfer::Read { buf, .. } => {
                if prog.is_polled() {
                    host.read_polled(prog, buf)
                } else {
                    host.read_blind(prog, buf)
                }
            },
            DataTransfer::Write { buf, .. } => {
                if prog.is_polled() {
                    host.write_polled(prog, buf)
                } else {
                    host.write_blind(prog, buf)
                }
            },
        }
    }
}

impl ScsiTransport for LegacyTransport {
    fn execute(&self, mut req: ExecRequest<'_>) -> CommandOutcome {
        let cdb = req.cdb;
        let cmd_bytes = match cdb.resolved() {
            Ok(bytes) => bytes,
            Err(status) => return CommandOutcome::failed(status),
        };

        let transfer_len = req.transfer.len();
        let prog = (transfer_len > 0)
            .then(|| TransferProgram::build(transfer_len, req.transfer.quantum()));

        let mut holds = HoldSet::new(self.vm.as_ref());
        if self.vm.paging_active() {
            let mut regions = vec![
                (Region::DriverCode, 0),
                (Region::Stack, 512),
                (Region::CommandBlock, cmd_bytes.len()),
            ];
            if transfer_len > 0 {
                regions.push((Region::DataBuffer, transfer_len as usize));
            }
            for (region, len) in regions {
                if let Err(fault) = holds.hold(region, len) {
                    return CommandOutcome::failed(fault.into());
                }
            }
        }

        let mut fault: Option<HostFault> = None;
        let mut status_byte = 0u8;
        let mut message_byte = 0u8;
        let mut count = 0u32;

        for _attempt in 0..MAX_BUS_RETRIES {
            if let Err(f) = self.acquire_bus() {
                fault = Some(f);
                break;
            }
            if let Err(f) = self.host.select(req.device.target_id) {
                fault = Some(f);
                break;
            }
            // From here on the completion sequence must run, whatever the
            // intermediate steps report.
            fault = self.host.command(cmd_bytes).err();
            if fault.is_none()
                && let Some(prog) = &prog
            {
                let run = self.run_data_phase(&mut req.transfer, prog);
                count = run.count;
                fault = run.fault;
            }
            let BusCompletion {
                status_byte: sts,
                message_byte: msg,
                fault: completion_fault,
            } = self.host.complete(req.timeout_ticks);
            status_byte = sts;
            message_byte = msg;
            if let Some(cf) = completion_fault {
                fault = Some(cf);
            } else if status_byte == status_byte::BUSY {
                // The device is busy with itself (self-test?). Pause a
                // quarter second and run the whole cycle again.
                let resume_at = self.host.ticks() + BUSY_PAUSE_TICKS;
                while self.host.ticks() < resume_at {
                    std::hint::spin_loop();
                }
                continue;
            }
            break;
        }
        drop(holds);

        let mut outcome = CommandOutcome {
            actual_count: count,
            ..CommandOutcome::default()
        };
        // A phase fault on a read that moved a bounded, non-empty amount of
        // data means the buffer outsized a variable-length response; the
        // count tells the caller how much really arrived.
        if fault == Some(HostFault::Phase)
            && !req.transfer.is_write()
            && count <= transfer_len
            && count > 0
        {
            fault = None;
        }
        // Some controller revisions leave the true status in the message
        // byte and report Good in the status byte. Correct that before
        // classifying.
        if status_byte == status_byte::GOOD
            && message_byte == status_byte::CHECK_CONDITION
        {
            status_byte = status_byte::CHECK_CONDITION;
        }
        outcome.status_byte = status_byte;
        outcome.status = match fault {
            Some(f) => ScsiStatus::Host(f),
            None => match status_byte {
                status_byte::GOOD => ScsiStatus::Good,
                status_byte::CHECK_CONDITION => ScsiStatus::CheckCondition,
                status_byte::BUSY => ScsiStatus::DeviceBusy,
                other => ScsiStatus::SevereDeviceError(other),
            },
        };
        if !outcome.status.is_good() {
            debug!(device = %req.device, status = %outcome.status, "legacy manager command failed");
        }
        outcome
    }
}
