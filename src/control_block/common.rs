// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Command descriptor block plumbing shared by every command: length
//! resolution from the opcode group code, the LUN identify-bit patch, and the
//! `Cdb` value the dispatcher hands to a transport.

use crate::models::status::ScsiStatus;

/// Longest registered CDB format.
pub const MAX_CDB_LEN: usize = 12;

/// Mask of the identify bits in CDB byte 1 that carry the LUN.
pub const LUN_MASK: u8 = 0xE0;

/// Length class of a registered SCSI-II command.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandLength {
    Six = 6,
    Ten = 10,
    Twelve = 12,
}

impl CommandLength {
    /// Resolve the CDB length from the group code (top 3 bits of the opcode):
    /// group 0 → 6 bytes, groups 1 and 2 → 10 bytes, group 5 → 12 bytes.
    /// Groups 3 and 4 are reserved and 6 and 7 are vendor specific, so their
    /// length cannot be known.
    pub const fn resolve(opcode: u8) -> Option<Self> {
        match opcode >> 5 {
            0 => Some(CommandLength::Six),
            1 | 2 => Some(CommandLength::Ten),
            5 => Some(CommandLength::Twelve),
            _ => None,
        }
    }

    pub const fn as_usize(self) -> usize {
        self as usize
    }
}

/// Store the LUN in the identify bits (5..7) of CDB byte 1. Needed for
/// devices that only look at the command block for LUN values; the modern
/// manager additionally carries the LUN in the identify message.
#[inline]
pub const fn encode_lun(byte1: u8, lun: u8) -> u8 {
    (byte1 & !LUN_MASK) | ((lun & 0x07) << 5)
}

/// One command block. Always 12 bytes of storage; how many are live is fixed
/// by the opcode group via [`CommandLength::resolve`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Cdb {
    pub bytes: [u8; MAX_CDB_LEN],
}

impl Cdb {
    pub const fn new(bytes: [u8; MAX_CDB_LEN]) -> Self {
        Self { bytes }
    }

    pub const fn opcode(&self) -> u8 {
        self.bytes[0]
    }

    pub const fn length(&self) -> Option<CommandLength> {
        CommandLength::resolve(self.opcode())
    }

    /// The live bytes of the command, or the parameter-class failure when the
    /// group code is reserved or vendor specific.
    pub fn resolved(&self) -> Result<&[u8], ScsiStatus> {
        match self.length() {
            Some(len) => Ok(&self.bytes[..len.as_usize()]),
            None => Err(ScsiStatus::UnknownCommandLength(self.opcode())),
        }
    }

    /// Copy of this command with the LUN patched into byte 1.
    pub const fn with_lun(mut self, lun: u8) -> Self {
        self.bytes[1] = encode_lun(self.bytes[1], lun);
        self
    }
}

impl From<[u8; MAX_CDB_LEN]> for Cdb {
    fn from(bytes: [u8; MAX_CDB_LEN]) -> Self {
        Self::new(bytes)
    }
}
