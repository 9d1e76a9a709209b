// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tunables for an update run.
//!
//! Budgets are iteration counts for the bounded polling loops; timings are the
//! fixed delays between steps. Both default to what real hardware wants.

use core::time::Duration;

use drv_fadc_api::{FirmwareVersion, ROM_CAPACITY_BYTES};

/// Iteration budgets for every polling loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Budgets {
    /// "Command engine ready" polls while waiting for the board to come out
    /// of reset.
    pub ready_tries: u32,
    /// "Command engine ready" polls between two commands.
    pub command_ready_tries: u32,
    /// Status polls while a bulk erase runs.
    pub erase_tries: u32,
    /// Status polls after each page commit.
    pub page_tries: u32,
    /// Version register polls while the FPGAs reconfigure.
    pub reboot_tries: u32,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            ready_tries: 60,
            command_ready_tries: 1000,
            erase_tries: 200_000,
            page_tries: 20,
            reboot_tries: 60_000,
        }
    }
}

/// Fixed delays inserted by the update sequence.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Timing {
    /// Pause after pulsing reset, before polling for ready.
    pub reset_settle: Duration,
    /// Pause between write-in-progress polls.
    pub write_poll_interval: Duration,
    /// Pause after requesting an FPGA reboot, before polling the version.
    pub reboot_settle: Duration,
    /// Pause between version polls during reboot.
    pub reboot_poll_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            reset_settle: Duration::from_millis(50),
            write_poll_interval: Duration::from_millis(1),
            reboot_settle: Duration::from_secs(1),
            reboot_poll_interval: Duration::from_millis(1),
        }
    }
}

impl Timing {
    /// No delays at all. For simulated hardware.
    pub const fn immediate() -> Self {
        Self {
            reset_settle: Duration::ZERO,
            write_poll_interval: Duration::ZERO,
            reboot_settle: Duration::ZERO,
            reboot_poll_interval: Duration::ZERO,
        }
    }
}

/// Everything a batch update needs besides the bus and the image.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct UpdateConfig {
    pub budgets: Budgets,
    pub timing: Timing,
    /// Boards already running this firmware are skipped unless forced.
    pub target: FirmwareVersion,
    /// How much of the ROM to read back when saving its contents.
    pub image_size_bytes: usize,
}

impl UpdateConfig {
    pub fn new(target: FirmwareVersion) -> Self {
        Self {
            budgets: Budgets::default(),
            timing: Timing::default(),
            target,
            image_size_bytes: DEFAULT_IMAGE_SIZE_BYTES,
        }
    }
}

/// Size of a full configuration bitstream for the board's FPGAs.
pub const DEFAULT_IMAGE_SIZE_BYTES: usize = 0x0040_0000;

const _: () = assert!(DEFAULT_IMAGE_SIZE_BYTES <= ROM_CAPACITY_BYTES);
