// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Driver for the modern multi-bus manager.
//!
//! One command per call, synchronously: the parameter block is built zeroed
//! at the size the bus dictates, autosense is requested whenever the caller
//! supplied a usable sense buffer, and every region the transaction can
//! touch is page-locked around the action call when paging is on.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::{
    models::{
        outcome::CommandOutcome,
        sense_data::SenseData,
        status::{HostFault, ScsiStatus},
    },
    transport::{
        ExecRequest, Handshake, ScsiTransport,
        hold::{HoldSet, Region, VirtualMemory},
        host::{
            ExecFlags, ExecIoBlock, IoFlags, MIN_AUTOSENSE_LEN, ModernHost,
            ResultFlags, TransferMode, WeirdStuff,
        },
    },
};

/// Policy knobs the modern manager exposes per request. Test and tuning
/// switches; a production caller sets them once per device and forgets them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ManagerPolicy {
    /// Allow selecting targets with attention. Only honored on buses whose
    /// chipset reports it safe; see [`WeirdStuff::TARGET_DRIVEN_SDTR_SAFE`].
    pub enable_select_with_atn: bool,
    /// Force disconnects. May be set together with `dont_disconnect`; both
    /// bits are passed through and the host manager decides.
    pub do_disconnect: bool,
    /// Forbid disconnects.
    pub dont_disconnect: bool,
}

pub struct ModernTransport {
    host: Arc<dyn ModernHost>,
    vm: Arc<dyn VirtualMemory>,
    policy: ManagerPolicy,
    /// Whether the action trap is installed; probed once, then cached.
    trap_installed: OnceCell<bool>,
}

impl ModernTransport {
    pub fn new(
        host: Arc<dyn ModernHost>,
        vm: Arc<dyn VirtualMemory>,
        policy: ManagerPolicy,
    ) -> Self {
        Self {
            host,
            vm,
            policy,
            trap_installed: OnceCell::new(),
        }
    }
}

impl ScsiTransport for ModernTransport {
    fn execute(&self, mut req: ExecRequest<'_>) -> CommandOutcome {
        let installed = *self
            .trap_installed
            .get_or_init(|| self.host.action_trap_installed());
        if !installed {
            return CommandOutcome::failed(ScsiStatus::Unimplemented);
        }

        let cdb = req.cdb;
        let cmd_bytes = match cdb.resolved() {
            Ok(bytes) => bytes,
            Err(status) => return CommandOutcome::failed(status),
        };

        let bus = match self.host.bus_inquiry(req.device.bus) {
            Ok(data) => data,
            Err(fault) => return CommandOutcome::failed(fault.into()),
        };
        // Selecting with attention provokes target-driven synchronous
        // negotiation; only allow it where the bus says that is safe.
        let enable_atn = self.policy.enable_select_with_atn
            && bus.weird_stuff.contains(WeirdStuff::TARGET_DRIVEN_SDTR_SAFE);

        let mut pb = ExecIoBlock::sized(bus.io_pb_size);
        pb.device = req.device;
        pb.timeout_ticks = req.timeout_ticks;
        pb.cdb_len = cmd_bytes.len() as u8;
        pb.cdb[..cmd_bytes.len()].copy_from_slice(cmd_bytes);
        pb.flags = ExecFlags::SIMQ_NO_FREEZE;

        let transfer_len = req.transfer.len();
        if transfer_len == 0 {
            pb.flags |= ExecFlags::DIRECTION_NONE;
        } else {
            pb.transfer_mode = match req.handshake {
                Handshake::Polled => TransferMode::Polled,
                Handshake::Blind(words) => {
                    pb.handshake = words;
                    TransferMode::Blind
                },
            };
            pb.data_len = transfer_len;
            pb.flags |= if req.transfer.is_write() {
                ExecFlags::DIRECTION_OUT
            } else {
                ExecFlags::DIRECTION_IN
            };
        }

        match req.sense.as_deref_mut() {
            Some(sense_buf) if sense_buf.len() >= MIN_AUTOSENSE_LEN => {
                sense_buf[0] = 0;
                pb.sense_len = sense_buf.len() as u32;
            },
            _ => {
                // Too small to carry even the fixed-format head: never
                // truncate silently, switch autosense off instead.
                pb.flags |= ExecFlags::DISABLE_AUTOSENSE;
            },
        }

        if !enable_atn {
            pb.io_flags |= IoFlags::DISABLE_SELECT_WITH_ATN;
        }
        if self.policy.do_disconnect {
            pb.flags |= ExecFlags::DO_DISCONNECT;
        }
        if self.policy.dont_disconnect {
            pb.flags |= ExecFlags::DONT_DISCONNECT;
        }

        let result = {
            let mut holds = HoldSet::new(self.vm.as_ref());
            if self.vm.paging_active() {
                let mut regions = vec![
                    (Region::DriverCode, 0),
                    (Region::Stack, 512),
                    (Region::ParamBlock, pb.pb_len as usize),
                ];
                if transfer_len > 0 {
                    regions.push((Region::DataBuffer, transfer_len as usize));
                }
                if pb.sense_len > 0 {
                    regions.push((Region::SenseBuffer, pb.sense_len as usize));
                }
                for (region, len) in regions {
                    if let Err(fault) = holds.hold(region, len) {
                        return CommandOutcome::failed(fault.into());
                    }
                }
            }
            self.host
                .exec_io(&mut pb, &mut req.transfer, req.sense.as_deref_mut())
            // Holds unwind here, reverse order, before the outcome is built.
        };

        let mut outcome = CommandOutcome {
            status_byte: pb.scsi_status,
            actual_count: transfer_len.saturating_sub(pb.residual),
            ..CommandOutcome::default()
        };
        let mut status = match result {
            Ok(()) => ScsiStatus::Good,
            Err(fault) => ScsiStatus::Host(fault),
        };
        // A run fault on a read that moved a bounded, non-empty amount of
        // data usually just means the buffer was larger than the response
        // (Inquiry, Request Sense and friends). The caller still sees the
        // real length in `actual_count`.
        if status == ScsiStatus::Host(HostFault::DataRun)
            && !req.transfer.is_write()
            && outcome.actual_count <= transfer_len
            && outcome.actual_count > 0
        {
            status = ScsiStatus::Good;
        }
        if status == ScsiStatus::Host(HostFault::NonZeroStatus)
            && pb.result_flags.contains(ResultFlags::AUTOSENSE_VALID)
        {
            status = ScsiStatus::CheckCondition;
            if let Some(sense_buf) = req.sense.as_deref() {
                outcome.sense = SenseData::parse(sense_buf).ok();
            }
        }
        if !status.is_good() {
            debug!(device = %req.device, %status, "asynchronous manager command failed");
        }
        outcome.status = status;
        outcome
    }
}
