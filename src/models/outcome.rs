// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::models::{sense_data::SenseData, status::ScsiStatus};

/// Device status bytes (status phase).
pub mod status_byte {
    pub const GOOD: u8 = 0x00;
    pub const CHECK_CONDITION: u8 = 0x02;
    pub const CONDITION_MET: u8 = 0x04;
    pub const BUSY: u8 = 0x08;
    pub const INTERMEDIATE: u8 = 0x10;
    pub const RESERVATION_CONFLICT: u8 = 0x18;
    pub const QUEUE_FULL: u8 = 0x28;
}

/// The unified result of one command execution, produced by either driver.
///
/// `actual_count` is the number of bytes that really moved during the data
/// phase (the modern manager reports it as request minus residual, the legacy
/// manager accumulates it in the transfer-instruction loop). `sense` is
/// present when the device returned check condition and sense data could be
/// captured, either via autosense or a follow-up Request Sense.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CommandOutcome {
    pub status: ScsiStatus,
    pub status_byte: u8,
    pub actual_count: u32,
    pub sense: Option<SenseData>,
}

impl CommandOutcome {
    /// Outcome for a command that never reached the bus.
    pub fn failed(status: ScsiStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub const fn is_good(&self) -> bool {
        self.status.is_good()
    }
}
