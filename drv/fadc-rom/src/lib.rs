// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration-ROM update engine for flash-ADC boards.
//!
//! This crate reflashes the configuration ROM of one board, or of every board
//! in a crate. It's layered like so, from the bottom:
//!
//! - [`protocol`] frames single ROM commands onto the command, address and
//!   data registers.
//! - [`poll`] holds the two bounded polling loops: "command engine ready" and
//!   "write no longer in progress".
//! - [`transfer`] builds erase, page program, download and compare out of
//!   those, over a [`FirmwareImage`].
//! - [`sequencer`] walks one board through reset, erase, program, verify and
//!   reboot, as a state machine that stops at the first failure.
//! - [`batch`] runs the sequencer's steps across a whole crate, one barrier
//!   per step, without letting one board's failure stop the others.
//!
//! Progress is reported to a [`ProgressWatcher`]; [`ConsoleWatcher`] is the
//! stock one.
//!
//! Every timeout in here is an iteration budget, never a wall-clock deadline.

pub mod batch;
pub mod config;
pub mod error;
pub mod image;
pub mod poll;
pub mod protocol;
pub mod sequencer;
pub mod transfer;
pub mod watcher;

pub use batch::{BatchReport, BatchUpdater, BoardUpdateStatus};
pub use config::{Budgets, Timing, UpdateConfig};
pub use error::{ImageError, RomError, StepFailure, WordMismatch};
pub use image::FirmwareImage;
pub use sequencer::{BoardSequencer, SequencerState};
pub use transfer::{compare, RomTransfer, TransferStats};
pub use watcher::{
    ConsoleWatcher, NullWatcher, ProgressEvent, ProgressWatcher, Show,
};

/// Steps of a board update, in the order they run.
///
/// A step doubles as the failure marker for a board that stopped there.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, enum_map::Enum,
)]
pub enum UpdateStep {
    Init,
    Erase,
    Program,
    Download,
    Verify,
    Reboot,
}

impl UpdateStep {
    pub const ALL: [UpdateStep; 6] = [
        UpdateStep::Init,
        UpdateStep::Erase,
        UpdateStep::Program,
        UpdateStep::Download,
        UpdateStep::Verify,
        UpdateStep::Reboot,
    ];

    pub fn name(self) -> &'static str {
        match self {
            UpdateStep::Init => "init",
            UpdateStep::Erase => "erase",
            UpdateStep::Program => "program",
            UpdateStep::Download => "download",
            UpdateStep::Verify => "verify",
            UpdateStep::Reboot => "reboot",
        }
    }
}

impl core::fmt::Display for UpdateStep {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}
