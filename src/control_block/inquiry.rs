// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! INQUIRY (6) — CDB filler plus the response view the probes rely on.
//!
//! CDB layout (SPC):
//!   [0] = 0x12 (INQUIRY)
//!   [1] = EVPD (bit 0); LUN identify bits are patched in later
//!   [2] = Page Code (only when EVPD=1; else 0)
//!   [3] = reserved
//!   [4] = Allocation Length (u8)
//!   [5] = Control

use anyhow::{Result, bail};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::control_block::common::MAX_CDB_LEN;

pub const INQUIRY_OPCODE: u8 = 0x12;

/// Size of the full Inquiry record the probes request. Devices usually answer
/// with 36 bytes; the short read is forgiven by the drivers.
pub const INQUIRY_BUFFER_LEN: usize = 96;

/// Peripheral qualifier (bits 5..7 of byte 0).
pub const QUALIFIER_CONNECTED: u8 = 0x00;
pub const QUALIFIER_NOT_CONNECTED: u8 = 0x20;
pub const QUALIFIER_MISSING: u8 = 0x60;
pub const QUALIFIER_MASK: u8 = 0xE0;

/// Device type (bits 0..4 of byte 0).
pub const DEV_TYPE_UNKNOWN_OR_MISSING: u8 = 0x1F;
pub const DEV_TYPE_MASK: u8 = 0x1F;

/// Byte 0 of an Inquiry response for a logical unit that does not exist.
pub const DEV_TYPE_MISSING: u8 = DEV_TYPE_UNKNOWN_OR_MISSING | QUALIFIER_MISSING;

/// Fill a Standard INQUIRY (EVPD=0) CDB.
#[inline]
pub fn fill_inquiry(cdb: &mut [u8; MAX_CDB_LEN], allocation_len: u8) {
    cdb.fill(0);
    cdb[0] = INQUIRY_OPCODE;
    cdb[4] = allocation_len;
}

/// Fixed-layout head of the Inquiry response (SPC / SCSI-2 shared part).
#[repr(C)]
#[derive(FromBytes, KnownLayout, Immutable)]
pub struct InquiryRaw {
    pub device: u8,       //  0 qualifier + device type
    pub dev_type_mod: u8, //  1 removable bit + type modifier
    pub version: u8,      //  2 ISO/ECMA/ANSI version
    pub format: u8,       //  3 response data format
    pub length: u8,       //  4 additional length
    pub reserved: [u8; 2],
    pub flags: u8,         //  7 capability flags
    pub vendor: [u8; 8],   //  8-15
    pub product: [u8; 16], // 16-31
    pub revision: [u8; 4], // 32-35
}

/// Parsed Inquiry identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InquiryData {
    pub qualifier: u8,
    pub device_type: u8,
    pub removable: bool,
    pub version: u8,
    pub vendor: String,
    pub product: String,
    pub revision: String,
}

impl InquiryData {
    /// True when the response says "no such logical unit".
    pub const fn is_missing(&self) -> bool {
        self.qualifier == QUALIFIER_MISSING
            && self.device_type == DEV_TYPE_UNKNOWN_OR_MISSING
    }

    pub fn device_type_str(&self) -> &'static str {
        match self.device_type {
            0x00 => "Direct-access block (disk)",
            0x01 => "Sequential-access (tape)",
            0x02 => "Printer (obsolete)",
            0x03 => "Processor",
            0x04 => "WORM",
            0x05 => "CD/DVD",
            0x06 => "Scanner (obsolete)",
            0x07 => "Optical memory",
            0x08 => "Medium changer",
            0x09 => "Communications",
            0x0C => "Storage array controller",
            0x0D => "Enclosure services",
            0x1F => "Unknown or missing",
            _ => "Unknown/Reserved",
        }
    }
}

/// Parse a Standard INQUIRY response (minimum 36 bytes).
pub fn parse_inquiry(buf: &[u8]) -> Result<InquiryData> {
    let Ok((raw, _rest)) = InquiryRaw::ref_from_prefix(buf) else {
        bail!("INQUIRY buffer too short: {}", buf.len());
    };

    Ok(InquiryData {
        qualifier: raw.device & QUALIFIER_MASK,
        device_type: raw.device & DEV_TYPE_MASK,
        removable: raw.dev_type_mod & 0x80 != 0,
        version: raw.version,
        vendor: trim_ascii(&raw.vendor),
        product: trim_ascii(&raw.product),
        revision: trim_ascii(&raw.revision),
    })
}

fn trim_ascii(bytes: &[u8]) -> String {
    let s: String = bytes
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { '?' })
        .collect();
    s.trim().to_string()
}
