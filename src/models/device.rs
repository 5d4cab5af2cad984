// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

/// Address of one logical unit: host bus, target ID on that bus, LUN within
/// the target. Plain value, compared field-wise, copied everywhere.
///
/// The legacy manager only addresses `target_id` on bus 0; for that path the
/// LUN travels inside the command block (see
/// [`encode_lun`](crate::control_block::common::encode_lun)).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdent {
    pub bus: u8,
    pub target_id: u8,
    pub lun: u8,
}

impl DeviceIdent {
    pub const fn new(bus: u8, target_id: u8, lun: u8) -> Self {
        Self {
            bus,
            target_id,
            lun,
        }
    }
}

impl fmt::Display for DeviceIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bus {} target {} lun {}",
            self.bus, self.target_id, self.lun
        )
    }
}
