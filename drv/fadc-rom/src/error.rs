// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use drv_vme_api::Slot;

use crate::UpdateStep;

/// Most mismatches we keep around for reporting after a failed compare.
pub const MAX_MISMATCH_SAMPLES: usize = 16;

/// One word that read back differently from what was written.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WordMismatch {
    pub index: usize,
    pub expected: u32,
    pub actual: u32,
}

impl core::fmt::Display for WordMismatch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "word {:#08x}: file {:#010x}, rom {:#010x}",
            self.index, self.expected, self.actual
        )
    }
}

/// Errors from driving a board's configuration ROM.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum RomError {
    /// An operation needed a loaded image and didn't get one. Reported before
    /// any register I/O.
    #[error("image not loaded")]
    ImageNotLoaded,

    /// The command engine never reported ready.
    #[error("command engine not ready after {tries} polls")]
    ReadyTimeout { tries: u32 },

    /// The ROM kept reporting a write in progress.
    #[error("write still in progress after {tries} polls")]
    WriteTimeout { tries: u32 },

    /// The FPGAs didn't come back after a reboot request.
    #[error("board did not return from reboot after {tries} polls")]
    RebootTimeout { tries: u32 },

    /// A write-enable command didn't set the write-enable latch.
    #[error("write enable not latched (status {status:#04x})")]
    WriteEnableFailed { status: u32 },

    /// A transfer size that isn't a whole number of words, or doesn't fit in
    /// the ROM.
    #[error("bad transfer size: {bytes} bytes")]
    BadTransferSize { bytes: usize },

    #[error("size mismatch: file has {file_words} words, rom {rom_words}")]
    SizeMismatch { file_words: usize, rom_words: usize },

    /// `first` holds at most [`MAX_MISMATCH_SAMPLES`] of the `total`
    /// mismatching words.
    #[error("{total} words differ")]
    VerifyMismatch {
        total: usize,
        first: Vec<WordMismatch>,
    },

    /// A sequencer step was called before the steps it depends on.
    #[error("step run out of sequence")]
    OutOfSequence,
}

/// Errors from loading or saving firmware image files.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("can't access {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image is empty")]
    Empty,

    #[error("image length {0} is not a multiple of 4 bytes")]
    Unaligned(usize),

    #[error("image of {bytes} bytes doesn't fit in the rom (max {max})")]
    TooLarge { bytes: usize, max: usize },

    #[error("image not loaded")]
    NotLoaded,
}

/// Where and why one board's update stopped.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("slot {slot}: {step} failed: {error}")]
pub struct StepFailure {
    pub slot: Slot,
    pub step: UpdateStep,
    #[source]
    pub error: RomError,
}
