// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The common entry for every command: pick a transport, run the command,
//! and make sure a check condition always ends up with sense data attached.
//!
//! The modern transport is always tried first when it is enabled; only an
//! `Unimplemented` outcome (the action trap is not installed) falls back to
//! the legacy transport, never the reverse. The legacy manager has no
//! autosense, so a check condition on that path is followed by an explicit
//! Request Sense issued from here.

use tracing::{error, warn};

use crate::{
    cfg::config::Config,
    control_block::{
        common::{Cdb, MAX_CDB_LEN},
        request_sense::fill_request_sense,
    },
    models::{
        device::DeviceIdent,
        outcome::CommandOutcome,
        sense_data::{SenseData, asc_ascq_to_str},
        status::ScsiStatus,
        transfer::DataTransfer,
    },
    transport::{
        ExecRequest, Handshake, LegacyTransport, ModernTransport, ScsiTransport,
        Transport, host::HostEnv, modern::ManagerPolicy,
    },
};

/// Size of the sense capture buffer used for autosense and for the explicit
/// Request Sense follow-up.
pub const SENSE_BUFFER_LEN: usize = 64;

/// One command as callers describe it. The LUN is taken from `device` and
/// encoded into the command block here; the sense capture buffer is owned by
/// the dispatcher.
pub struct CommandRequest<'a> {
    pub device: DeviceIdent,
    pub cdb: Cdb,
    pub transfer: DataTransfer<'a>,
    pub timeout_ticks: u32,
    /// Log failures. Probes that expect absence pass `false`.
    pub report_errors: bool,
    /// Caller-side switch for the modern manager. The config-side switch is
    /// applied at construction; both must be on for the modern path.
    pub use_async: bool,
}

pub struct Dispatcher {
    modern: Option<Transport>,
    legacy: Transport,
}

impl Dispatcher {
    pub fn new(env: &HostEnv, config: &Config) -> Self {
        let legacy = Transport::from(LegacyTransport::new(
            env.legacy.clone(),
            env.vm.clone(),
        ));
        let modern = if config.manager.use_async_manager.as_bool() {
            env.modern.as_ref().map(|host| {
                Transport::from(ModernTransport::new(
                    host.clone(),
                    env.vm.clone(),
                    ManagerPolicy {
                        enable_select_with_atn: config
                            .manager
                            .enable_select_with_atn
                            .as_bool(),
                        do_disconnect: config.manager.do_disconnect.as_bool(),
                        dont_disconnect: config.manager.dont_disconnect.as_bool(),
                    },
                ))
            })
        } else {
            None
        };
        Self { modern, legacy }
    }

    /// Execute one command, following a legacy check condition with an
    /// explicit Request Sense so the outcome always carries sense data when
    /// the device had any to give.
    pub fn run(&self, req: CommandRequest<'_>) -> CommandOutcome {
        let CommandRequest {
            device,
            cdb,
            mut transfer,
            timeout_ticks,
            report_errors,
            use_async,
        } = req;

        // Devices that only look at the command block need the LUN in the
        // identify bits of byte 1; the modern manager additionally sends it
        // in the identify message.
        let cdb = cdb.with_lun(device.lun);
        if let Err(status) = cdb.resolved() {
            if report_errors {
                error!(device = %device, %status, "command block rejected");
            }
            return CommandOutcome::failed(status);
        }

        let quantum = transfer.quantum();
        let mut sense_buf = [0u8; SENSE_BUFFER_LEN];

        let mut via_modern = false;
        let mut outcome = match &self.modern {
            Some(modern) if use_async => {
                via_modern = true;
                let out = modern.execute(ExecRequest {
                    device,
                    cdb,
                    transfer: transfer.reborrow(),
                    handshake: Handshake::from_quantum(quantum),
                    sense: Some(&mut sense_buf),
                    timeout_ticks,
                });
                if out.status == ScsiStatus::Unimplemented {
                    // The action trap is not installed after all. Fall back
                    // once; from the caller's point of view nothing changes.
                    via_modern = false;
                    self.legacy.execute(ExecRequest {
                        device,
                        cdb,
                        transfer: transfer.reborrow(),
                        handshake: Handshake::from_quantum(quantum),
                        sense: None,
                        timeout_ticks,
                    })
                } else {
                    out
                }
            },
            _ => self.legacy.execute(ExecRequest {
                device,
                cdb,
                transfer: transfer.reborrow(),
                handshake: Handshake::from_quantum(quantum),
                sense: None,
                timeout_ticks,
            }),
        };

        if via_modern {
            match outcome.status {
                ScsiStatus::Good => {},
                status if status.is_missing_device() => {
                    // Nothing at this address; probes expect this quietly.
                },
                ScsiStatus::CheckCondition => {
                    if report_errors {
                        report_sense(device, &outcome);
                    }
                },
                _ => {
                    if report_errors {
                        report_status(device, &cdb, &outcome);
                    }
                },
            }
        } else if !outcome.is_good() {
            if report_errors {
                report_status(device, &cdb, &outcome);
            }
            if outcome.status == ScsiStatus::CheckCondition {
                // The legacy manager never autosenses.
                self.issue_request_sense(device, &mut outcome);
                if report_errors {
                    report_sense(device, &outcome);
                }
            }
        }
        outcome
    }

    /// Fetch extended sense after a legacy check condition. This should not
    /// fail; when it does, the original outcome keeps no sense and the
    /// follow-up failure is logged.
    fn issue_request_sense(&self, device: DeviceIdent, outcome: &mut CommandOutcome) {
        let mut cdb_bytes = [0u8; MAX_CDB_LEN];
        fill_request_sense(&mut cdb_bytes, SENSE_BUFFER_LEN as u8);
        let cdb = Cdb::new(cdb_bytes).with_lun(device.lun);
        let mut sense_buf = [0u8; SENSE_BUFFER_LEN];
        let sense_outcome = self.legacy.execute(ExecRequest {
            device,
            cdb,
            transfer: DataTransfer::Read {
                buf: &mut sense_buf,
                quantum: 1,
            },
            handshake: Handshake::Polled,
            sense: None,
            timeout_ticks: crate::transport::host::SPIN_UP_COMPLETION_TICKS,
        });
        if sense_outcome.is_good() {
            outcome.sense = SenseData::parse(&sense_buf).ok();
        } else {
            warn!(
                device = %device,
                status = %sense_outcome.status,
                "request sense follow-up failed"
            );
        }
    }
}

fn report_status(device: DeviceIdent, cdb: &Cdb, outcome: &CommandOutcome) {
    error!(
        device = %device,
        status = %outcome.status,
        status_byte = format_args!("{:#04x}", outcome.status_byte),
        command = %hex::encode(cdb.resolved().unwrap_or(&cdb.bytes)),
        "command failed"
    );
}

fn report_sense(device: DeviceIdent, outcome: &CommandOutcome) {
    match &outcome.sense {
        Some(sense) => warn!(
            device = %device,
            sense_key = format_args!("{:#x}", sense.sense_key),
            asc = format_args!("{:#04x}", sense.asc),
            ascq = format_args!("{:#04x}", sense.ascq),
            description = asc_ascq_to_str(sense.asc, sense.ascq),
            "check condition"
        ),
        None => warn!(device = %device, "check condition, no sense captured"),
    }
}
