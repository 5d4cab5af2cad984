// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Command length resolution, LUN encoding, and the `Cdb` value.
pub mod common;
/// INQUIRY filler and response parsing.
pub mod inquiry;
/// READ(6) filler.
pub mod read;
/// REQUEST SENSE filler.
pub mod request_sense;
/// TEST UNIT READY filler.
pub mod test_unit_ready;
