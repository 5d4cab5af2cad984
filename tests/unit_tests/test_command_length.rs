// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use scsi_initiator_rs::{
    control_block::common::{Cdb, CommandLength, MAX_CDB_LEN},
    models::status::ScsiStatus,
};

#[test]
fn resolution_is_total_over_the_group_code() {
    for opcode in 0u8..=255 {
        let resolved = CommandLength::resolve(opcode);
        match opcode >> 5 {
            0 => assert_eq!(resolved, Some(CommandLength::Six), "opcode {opcode:#04x}"),
            1 | 2 => {
                assert_eq!(resolved, Some(CommandLength::Ten), "opcode {opcode:#04x}")
            },
            5 => assert_eq!(
                resolved,
                Some(CommandLength::Twelve),
                "opcode {opcode:#04x}"
            ),
            _ => assert_eq!(resolved, None, "opcode {opcode:#04x}"),
        }
    }
}

#[test]
fn known_opcodes_resolve_to_registered_lengths() {
    assert_eq!(CommandLength::resolve(0x00), Some(CommandLength::Six)); // TUR
    assert_eq!(CommandLength::resolve(0x12), Some(CommandLength::Six)); // INQUIRY
    assert_eq!(CommandLength::resolve(0x28), Some(CommandLength::Ten)); // READ(10)
    assert_eq!(CommandLength::resolve(0xA8), Some(CommandLength::Twelve)); // READ(12)
    assert_eq!(CommandLength::resolve(0x60), None); // reserved group 3
    assert_eq!(CommandLength::resolve(0xC0), None); // vendor specific group 6
}

#[test]
fn length_depends_only_on_byte_zero() {
    let mut a = [0u8; MAX_CDB_LEN];
    let mut b = [0xFFu8; MAX_CDB_LEN];
    a[0] = 0x12;
    b[0] = 0x12;
    assert_eq!(Cdb::new(a).length(), Cdb::new(b).length());
}

#[test]
fn unresolved_length_is_a_parameter_failure() {
    let mut bytes = [0u8; MAX_CDB_LEN];
    bytes[0] = 0x7F; // group 3
    assert_eq!(
        Cdb::new(bytes).resolved().expect_err("group 3 is reserved"),
        ScsiStatus::UnknownCommandLength(0x7F)
    );
}
