// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The closed status taxonomy every command execution resolves to, plus the
//! host/bus-level fault codes both managers report.

use thiserror::Error;

/// Faults raised by a host bus interface, passed through largely verbatim.
///
/// Both managers map onto this one set: the legacy interface produces the
/// arbitration/selection/phase family, the modern interface produces the
/// select-timeout/data-run/nonzero-status family.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HostFault {
    /// Could not communicate with the target (legacy selection failure).
    #[error("communications error or selection failure")]
    Communications,
    #[error("arbitration timed out waiting for a free bus")]
    ArbitrationTimeout,
    #[error("bus was not in the expected phase")]
    Phase,
    #[error("uncorrectable bus parity error")]
    Parity,
    #[error("target selection timed out")]
    SelectTimeout,
    #[error("command timed out")]
    CommandTimeout,
    #[error("identify message rejected by target")]
    IdentifyMessageRejected,
    #[error("message reject received")]
    MessageReject,
    #[error("bus reset sent or received")]
    BusReset,
    #[error("autosense request failed")]
    AutosenseFailed,
    #[error("data overrun or underrun")]
    DataRun,
    #[error("unexpected bus free")]
    UnexpectedBusFree,
    #[error("target bus phase sequence failure")]
    SequenceFailure,
    #[error("host subsystem is busy")]
    SubsystemBusy,
    #[error("device not installed or not there")]
    DeviceNotThere,
    #[error("bus id is invalid")]
    BusInvalid,
    #[error("target id is invalid")]
    TargetInvalid,
    #[error("logical unit number is invalid")]
    LunInvalid,
    /// Request completed with a non-zero SCSI status byte.
    #[error("request completed with a non-zero status")]
    NonZeroStatus,
    /// The manager rejected the parameter block (non-zero reserved field,
    /// bad length, unsupported data type).
    #[error("parameter block rejected by the manager")]
    RequestInvalid,
    #[error("could not hold a memory region in physical memory")]
    MemoryHoldFailed,
}

impl HostFault {
    /// The "no such device" family shared by both managers: selection never
    /// completed, or the address itself does not exist.
    pub const fn is_missing_device(self) -> bool {
        matches!(
            self,
            HostFault::Communications
                | HostFault::SelectTimeout
                | HostFault::DeviceNotThere
                | HostFault::BusInvalid
                | HostFault::TargetInvalid
                | HostFault::IdentifyMessageRejected
        )
    }
}

/// Final classification of one command execution.
#[derive(Debug, Error, Default, Clone, Copy, PartialEq, Eq)]
pub enum ScsiStatus {
    #[default]
    #[error("good")]
    Good,
    /// The modern manager is not installed. Used internally to trigger the
    /// legacy fallback; the dispatcher never surfaces it to callers.
    #[error("asynchronous manager is not installed")]
    Unimplemented,
    /// The command length could not be resolved from the opcode group, so the
    /// command block cannot be safely copied or sized.
    #[error("cannot resolve command length for opcode {0:#04x}")]
    UnknownCommandLength(u8),
    /// The device signaled check condition. Sense data, when it could be
    /// captured (autosense or an explicit Request Sense follow-up), is in
    /// [`CommandOutcome::sense`](crate::models::outcome::CommandOutcome).
    #[error("device returned check condition")]
    CheckCondition,
    #[error("device is busy")]
    DeviceBusy,
    /// A serious, uncategorized device status. Carries the raw status byte.
    #[error("severe device status {0:#04x}")]
    SevereDeviceError(u8),
    #[error("host bus fault: {0}")]
    Host(HostFault),
}

impl ScsiStatus {
    pub const fn is_good(self) -> bool {
        matches!(self, ScsiStatus::Good)
    }

    /// True for the status family that means "nothing is at this address".
    pub const fn is_missing_device(self) -> bool {
        match self {
            ScsiStatus::Host(fault) => fault.is_missing_device(),
            _ => false,
        }
    }
}

impl From<HostFault> for ScsiStatus {
    fn from(fault: HostFault) -> Self {
        ScsiStatus::Host(fault)
    }
}
