// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! TEST UNIT READY — 6-byte CDB filler. All bytes zero apart from the LUN
//! identify bits patched in by the dispatcher; no data phase.

use crate::control_block::common::MAX_CDB_LEN;

pub const TEST_UNIT_READY_OPCODE: u8 = 0x00;

#[inline]
pub fn fill_test_unit_ready(cdb: &mut [u8; MAX_CDB_LEN]) {
    cdb.fill(0);
    cdb[0] = TEST_UNIT_READY_OPCODE;
}
