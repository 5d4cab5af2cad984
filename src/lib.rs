//! This crate is a SCSI initiator that executes single commands through
//! either of two mutually exclusive host bus interfaces: the legacy
//! synchronous single-bus manager or the modern asynchronous-capable
//! multi-bus manager. On top of the two drivers sit a dispatcher with
//! transparent fallback and explicit Request Sense handling, and topology
//! discovery over buses, targets and LUNs.
// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Handles configuration, config-path resolution, and logging.
pub mod cfg;
/// Builds and parses SCSI command descriptor blocks.
pub mod control_block;
/// Picks a transport per command and fetches sense after legacy check
/// conditions.
pub mod dispatch;
/// Defines device addressing, transfers, outcomes, and the status taxonomy.
pub mod models;
/// Discovers the bus/target/LUN topology.
pub mod scan;
/// In-memory host bus with emulated targets.
pub mod sim;
/// The two command transports and the host seams they drive.
pub mod transport;
