// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The two command transports and the host seams they drive.
//!
//! Both transports honor one contract: take an [`ExecRequest`], run exactly
//! one command to completion, come back with a [`CommandOutcome`]. Which one
//! a command goes through is the dispatcher's decision.

use enum_dispatch::enum_dispatch;

use crate::{
    control_block::common::Cdb,
    models::{device::DeviceIdent, outcome::CommandOutcome, transfer::DataTransfer},
    transport::host::HANDSHAKE_LEN,
};

/// Host entry-point traits and the parameter-block model.
pub mod host;
/// Scoped page-lock bookkeeping.
pub mod hold;
/// The legacy single-bus driver.
pub mod legacy;
/// The modern multi-bus driver.
pub mod modern;

pub use legacy::LegacyTransport;
pub use modern::ModernTransport;

/// Handshake configuration for the modern manager's data phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// Per-unit handshaked transfer; no handshake words.
    Polled,
    /// Blind transfer driven by an explicit handshake word sequence.
    /// An all-zero sequence means one blind pass over the whole buffer.
    Blind([u16; HANDSHAKE_LEN]),
}

impl Handshake {
    /// Derive the handshake from a transfer quantum the way commands are
    /// issued here: quantum 1 forces polling, anything else becomes the
    /// leading handshake word.
    pub fn from_quantum(quantum: u32) -> Self {
        if quantum == 1 {
            Handshake::Polled
        } else {
            let mut words = [0u16; HANDSHAKE_LEN];
            words[0] = quantum as u16;
            Handshake::Blind(words)
        }
    }
}

/// Everything one command execution needs: the addressed unit, the command
/// block (LUN already encoded), the data phase, the handshake configuration,
/// an optional sense-capture buffer, and the completion timeout.
pub struct ExecRequest<'a> {
    pub device: DeviceIdent,
    pub cdb: Cdb,
    pub transfer: DataTransfer<'a>,
    pub handshake: Handshake,
    pub sense: Option<&'a mut [u8]>,
    pub timeout_ticks: u32,
}

/// One synchronous command execution. Blocks until the host transaction
/// completes or times out; there is never more than one command in flight.
#[enum_dispatch]
pub trait ScsiTransport {
    fn execute(&self, req: ExecRequest<'_>) -> CommandOutcome;
}

/// The transport actually chosen for a command.
#[enum_dispatch(ScsiTransport)]
pub enum Transport {
    Legacy(LegacyTransport),
    Modern(ModernTransport),
}
