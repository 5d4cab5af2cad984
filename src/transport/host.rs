// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The host bus entry points both drivers are written against.
//!
//! A real backend wires these traits to the machine's SCSI interface; the
//! in-crate [`sim`](crate::sim) bus implements them in memory. The contract
//! is the one the managers define: correctly sized, correctly zeroed
//! parameter blocks in, status codes from the fault taxonomy out.

use std::sync::Arc;

use bitflags::bitflags;

use crate::{
    models::{
        device::DeviceIdent,
        status::HostFault,
        transfer::{DataTransfer, TransferProgram},
    },
    transport::hold::VirtualMemory,
};

/// Coarse host tick unit used for every timeout and watchdog.
pub const TICKS_PER_SECOND: u64 = 60;

/// Completion timeout for well-behaved direct-access devices.
pub const NORMAL_COMPLETION_TICKS: u32 = 30;

/// Completion timeout generous enough for tape spin-up and Mode Select.
pub const SPIN_UP_COMPLETION_TICKS: u32 = (TICKS_PER_SECOND as u32) * 90;

/// Length of the handshake word array in the modern parameter block.
pub const HANDSHAKE_LEN: usize = 8;

/// Smallest sense buffer autosense will write into.
pub const MIN_AUTOSENSE_LEN: usize = 5;

bitflags! {
    /// Operation flags of the modern manager's I/O parameter block.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct ExecFlags: u32 {
        /// No data phase (both direction bits set).
        const DIRECTION_NONE  = 0xC000_0000;
        const DIRECTION_OUT   = 0x8000_0000;
        const DIRECTION_IN    = 0x4000_0000;
        const DISABLE_AUTOSENSE = 0x2000_0000;
        /// Keep the manager queue running when this request fails.
        const SIMQ_NO_FREEZE  = 0x0004_0000;
        const DO_DISCONNECT   = 0x0002_0000;
        const DONT_DISCONNECT = 0x0001_0000;
    }
}

bitflags! {
    /// Low-level I/O flags of the modern parameter block.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct IoFlags: u16 {
        const DISABLE_SELECT_WITH_ATN = 0x0004;
    }
}

bitflags! {
    /// Per-request result flags the manager writes back.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct ResultFlags: u16 {
        const SIMQ_FROZEN     = 0x0001;
        const AUTOSENSE_VALID = 0x0002;
    }
}

bitflags! {
    /// Hardware-quirk flags a bus reports in its inquiry record.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct WeirdStuff: u16 {
        const ODD_DISCONNECT_UNSAFE_READ  = 0x0001;
        const ODD_DISCONNECT_UNSAFE_WRITE = 0x0002;
        /// Target-initiated synchronous negotiation is safe on this bus.
        /// Without it, selecting with attention can hang the chipset.
        const TARGET_DRIVEN_SDTR_SAFE     = 0x0010;
    }
}

/// Transfer type requested from the modern manager.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    #[default]
    Blind,
    Polled,
}

/// What a bus inquiry reports about one host bus.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BusInquiryData {
    /// Required allocation size for I/O parameter blocks on this bus.
    pub io_pb_size: u16,
    /// Highest bus index in the subsystem.
    pub hi_bus_id: u8,
    /// The host's own ID on this bus.
    pub initiator_id: u8,
    pub max_target: u8,
    pub max_lun: u8,
    pub weird_stuff: WeirdStuff,
}

/// The modern manager's I/O parameter block.
///
/// Always constructed zeroed and sized as the bus inquiry dictated: the
/// manager rejects a block whose reserved queue-link field is non-zero.
#[derive(Debug, Default)]
pub struct ExecIoBlock {
    pub pb_len: u16,
    /// Reserved; must stay zero.
    pub queue_link: u32,
    pub device: DeviceIdent,
    pub timeout_ticks: u32,
    pub cdb: [u8; 12],
    pub cdb_len: u8,
    pub flags: ExecFlags,
    pub io_flags: IoFlags,
    pub transfer_mode: TransferMode,
    pub handshake: [u16; HANDSHAKE_LEN],
    pub data_len: u32,
    pub sense_len: u32,
    // Written back by the manager:
    pub residual: u32,
    pub scsi_status: u8,
    pub result_flags: ResultFlags,
}

impl ExecIoBlock {
    /// Zeroed block of the size the bus inquiry reported.
    pub fn sized(pb_len: u16) -> Self {
        Self {
            pb_len,
            ..Self::default()
        }
    }
}

/// The modern (asynchronous-capable) manager's entry points. Only the
/// synchronous form is used here: no completion callback is ever registered,
/// so [`ModernHost::exec_io`] blocks until the transaction finishes.
pub trait ModernHost: Send + Sync {
    /// Whether the manager's action trap is installed at all.
    fn action_trap_installed(&self) -> bool;

    /// Bus inquiry. Bus `0xFF` queries the subsystem as a whole (used to
    /// learn the highest bus index).
    fn bus_inquiry(&self, bus: u8) -> Result<BusInquiryData, HostFault>;

    /// Execute one I/O parameter block. The data and sense buffers travel
    /// alongside the block; the host fills `residual`, `scsi_status` and
    /// `result_flags` before returning.
    fn exec_io(
        &self,
        pb: &mut ExecIoBlock,
        data: &mut DataTransfer<'_>,
        sense: Option<&mut [u8]>,
    ) -> Result<(), HostFault>;

    /// Whether the manager recognizes a hard-wired legacy target ID as one of
    /// its registered virtual buses.
    fn virtual_id_exists(&self, target_id: u8) -> Result<bool, HostFault>;
}

/// Bus status bit: bus busy.
pub const STAT_BSY: u8 = 1 << 6;
/// Bus status bit: selection in progress.
pub const STAT_SEL: u8 = 1 << 1;

/// The bus counts as busy while either BSY or SEL is raised.
#[inline]
pub const fn bus_busy(status: u8) -> bool {
    status & (STAT_BSY | STAT_SEL) != 0
}

/// Result of running a transfer-instruction program: how many bytes the loop
/// accounted for, and the fault that stopped it early, if any. The count is
/// meaningful even when a fault is present.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferRun {
    pub count: u32,
    pub fault: Option<HostFault>,
}

/// What the bus-completion sequence recovered. The status and message bytes
/// are reported even when completion itself faulted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BusCompletion {
    pub status_byte: u8,
    pub message_byte: u8,
    pub fault: Option<HostFault>,
}

/// The legacy single-bus manager's discrete entry points, one per bus step.
pub trait LegacyHost: Send + Sync {
    /// Free-running tick counter.
    fn ticks(&self) -> u64;

    /// Raw bus status bits (see [`bus_busy`]).
    fn bus_status(&self) -> u8;

    /// Arbitrate for the bus.
    fn acquire(&self) -> Result<(), HostFault>;

    /// Select a target on the bus.
    fn select(&self, target_id: u8) -> Result<(), HostFault>;

    /// Send the command bytes to the selected target.
    fn command(&self, cdb: &[u8]) -> Result<(), HostFault>;

    fn read_polled(&self, prog: &TransferProgram, buf: &mut [u8]) -> TransferRun;
    fn read_blind(&self, prog: &TransferProgram, buf: &mut [u8]) -> TransferRun;
    fn write_polled(&self, prog: &TransferProgram, buf: &[u8]) -> TransferRun;
    fn write_blind(&self, prog: &TransferProgram, buf: &[u8]) -> TransferRun;

    /// Run the bus-phase algorithm to the bitter end, recovering the status
    /// and command-complete message bytes.
    fn complete(&self, timeout_ticks: u32) -> BusCompletion;
}

/// The host interfaces one machine offers: the legacy bus (always present),
/// the modern manager (when installed), and the paging interface.
#[derive(Clone)]
pub struct HostEnv {
    pub modern: Option<Arc<dyn ModernHost>>,
    pub legacy: Arc<dyn LegacyHost>,
    pub vm: Arc<dyn VirtualMemory>,
}
