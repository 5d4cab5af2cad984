// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::{cfg::enums::YesNo, transport::host::SPIN_UP_COMPLETION_TICKS};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Which manager commands go through and how it behaves on the bus.
    pub manager: ManagerConfig,
    /// Topology-scan limits and chattiness.
    pub scan: ScanConfig,
    /// Timeouts and other runtime knobs.
    pub runtime: RuntimeConfig,
}

/// Manager selection and bus-behavior switches. These correspond to the
/// test-mode toggles a real application would fix once per device.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ManagerConfig {
    #[serde(rename = "UseAsyncManager")]
    /// Route commands through the modern manager when it is installed.
    /// "No" forces every command through the legacy interface.
    pub use_async_manager: YesNo,

    #[serde(rename = "EnableSelectWithAtn")]
    /// Allow selection with attention on buses whose chipset reports it
    /// safe. Kept off by default: a known chipset defect hangs the machine
    /// when a target starts synchronous negotiation during it.
    pub enable_select_with_atn: YesNo,

    #[serde(rename = "DoDisconnect")]
    /// Force the disconnect flag on every request.
    pub do_disconnect: YesNo,

    #[serde(rename = "DontDisconnect")]
    /// Force the no-disconnect flag on every request. May be combined with
    /// `DoDisconnect`; both bits are handed to the host manager unvalidated.
    pub dont_disconnect: YesNo,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ScanConfig {
    #[serde(rename = "MaxLogicalUnit")]
    /// Highest LUN the scanner probes per target (0..=7). Zero scans LUN 0
    /// only.
    pub max_logical_unit: u8,

    #[serde(rename = "VerboseDisplay")]
    /// Log every presence probe, not just the hits.
    pub verbose_display: YesNo,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RuntimeConfig {
    #[serde(rename = "CompletionTimeoutTicks")]
    /// Per-command completion timeout in host ticks (60 per second). Short
    /// is fine for disks; tape devices and Mode Select need the generous
    /// default.
    pub completion_timeout_ticks: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            manager: ManagerConfig {
                use_async_manager: YesNo::Yes,
                enable_select_with_atn: YesNo::No,
                do_disconnect: YesNo::No,
                dont_disconnect: YesNo::No,
            },
            scan: ScanConfig {
                max_logical_unit: 0,
                verbose_display: YesNo::No,
            },
            runtime: RuntimeConfig {
                completion_timeout_ticks: SPIN_UP_COMPLETION_TICKS,
            },
        }
    }
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(
            self.scan.max_logical_unit <= 7,
            "MaxLogicalUnit must be within 0..=7"
        );
        ensure!(
            self.runtime.completion_timeout_ticks >= 1,
            "CompletionTimeoutTicks must be >= 1"
        );
        // DoDisconnect and DontDisconnect are deliberately not checked for
        // mutual exclusivity: both bits travel to the host manager as given.
        Ok(())
    }
}
