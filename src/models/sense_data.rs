// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt;

use anyhow::{Context, Result, anyhow};

/// Fixed-format sense data runs through ASC/ASCQ at bytes 12..14.
pub const FIXED_MIN_LEN: usize = 14;

/// Upper bits of byte 0 that mark the record as carrying valid sense.
pub const SENSE_INFO_VALID: u8 = 0x70;
pub const SENSE_INFO_MASK: u8 = 0x70;

/// Sense keys (low nibble of byte 2).
pub mod sense_key {
    pub const NO_SENSE: u8 = 0x00;
    pub const RECOVERED_ERROR: u8 = 0x01;
    pub const NOT_READY: u8 = 0x02;
    pub const MEDIUM_ERROR: u8 = 0x03;
    pub const HARDWARE_ERROR: u8 = 0x04;
    pub const ILLEGAL_REQUEST: u8 = 0x05;
    pub const UNIT_ATTENTION: u8 = 0x06;
    pub const DATA_PROTECT: u8 = 0x07;
    pub const ABORTED_COMMAND: u8 = 0x0B;
}

/// Fixed-format sense-data record, as produced by autosense or by an explicit
/// Request Sense follow-up.
#[repr(C)]
#[derive(Default, Clone, PartialEq, Eq)]
pub struct SenseData {
    pub error_code: u8,     // byte0: class code + valid bits
    pub segment_number: u8, // byte1
    pub sense_key: u8,      // low-4 bits of byte2
    pub ili: bool,          // bit5 of byte2
    pub eom: bool,          // bit6 of byte2
    pub filemark: bool,     // bit7 of byte2
    pub information: u32,   // bytes 3-6 (failing LBA for media errors)
    pub additional_len: u8, // byte7
    pub asc: u8,            // Additional Sense Code
    pub ascq: u8,           /* Additional Sense Code Qualifier
                             * -- FRU and sense-key-specific bytes are rarely
                             * used; add when needed */
}

impl SenseData {
    /// Parse fixed-format sense data. The buffer must reach through the
    /// ASC/ASCQ pair (14 bytes).
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < FIXED_MIN_LEN {
            return Err(anyhow!(
                "sense buffer too small: {} < {FIXED_MIN_LEN}",
                buf.len()
            ));
        }

        let error_code = buf[0];
        let segment_number = buf[1];
        let filemark = buf[2] & 0x80 != 0;
        let eom = buf[2] & 0x40 != 0;
        let ili = buf[2] & 0x20 != 0;
        let sense_key = buf[2] & 0x0F;

        let information = u32::from_be_bytes(
            buf[3..7]
                .try_into()
                .context("failed to read Information field (bytes 3‥6)")?,
        );

        let additional_len = buf[7];
        let asc = buf[12];
        let ascq = buf[13];

        Ok(Self {
            error_code,
            segment_number,
            sense_key,
            ili,
            eom,
            filemark,
            information,
            additional_len,
            asc,
            ascq,
        })
    }

    /// A record only means anything when the error-code class bits say so.
    /// Some drives return check condition with an all-zero sense block for a
    /// bad logical unit; this test catches those.
    pub const fn is_valid(&self) -> bool {
        (self.error_code & SENSE_INFO_MASK) == SENSE_INFO_VALID
    }
}

impl fmt::Debug for SenseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenseData")
            .field("error_code", &format_args!("{:#04x}", self.error_code))
            .field("valid", &self.is_valid())
            .field("sense_key", &format_args!("{:#x}", self.sense_key))
            .field("filemark", &self.filemark)
            .field("eom", &self.eom)
            .field("ili", &self.ili)
            .field("information", &self.information)
            .field("additional_len", &self.additional_len)
            .field("asc", &format_args!("{:#04x}", self.asc))
            .field("ascq", &format_args!("{:#04x}", self.ascq))
            .field("description", &asc_ascq_to_str(self.asc, self.ascq))
            .finish()
    }
}

/// Return the description for a given ASC/ASCQ pair.
///
/// * If the pair is not present in the official table, returns `"UNSPECIFIED /
///   vendor specific"`.
#[inline]
pub fn asc_ascq_to_str(asc: u8, ascq: u8) -> &'static str {
    hot_table(asc, ascq).unwrap_or("UNSPECIFIED / vendor specific")
}

fn hot_table(asc: u8, ascq: u8) -> Option<&'static str> {
    Some(match (asc, ascq) {
        (0x00, 0x00) => "No additional sense information",
        (0x02, 0x04) => "Not ready – LUN not ready, format in progress",
        (0x03, 0x11) => "Medium error – unrecovered read error",
        (0x04, 0x01) => "Logical unit is in process of becoming ready",
        (0x05, 0x20) => "Illegal request – invalid command information field",
        (0x24, 0x00) => "Illegal request – invalid field in CDB",
        (0x25, 0x00) => "Illegal request – logical unit not supported",
        (0x3A, 0x00) => "Medium not present",
        (0x40, 0x00) => "Data integrity error",
        _ => return None,
    })
}
