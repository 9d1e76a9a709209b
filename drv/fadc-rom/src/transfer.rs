// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Erase, program, download and compare, built on the command protocol.

use drv_fadc_api::{
    RomOpcode, RomStatus1, FLUSH_WORD, PAGE_SIZE_BYTES, ROM_CAPACITY_BYTES,
    WORDS_PER_PAGE, WORD_SIZE_BYTES,
};
use drv_vme_api::{Board, RegisterPort};

use crate::config::{Budgets, Timing};
use crate::error::{RomError, WordMismatch, MAX_MISMATCH_SAMPLES};
use crate::image::{FirmwareImage, MAX_IMAGE_BYTES};
use crate::poll;
use crate::protocol::{RomCommand, RomProtocol};

/// Counters kept by a [`RomTransfer`] across its lifetime.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TransferStats {
    /// Waits for a page commit to finish.
    pub page_waits: u32,
    /// Commands issued with end-of-command set.
    pub end_of_commands: u32,
    pub write_enables: u32,
    pub words_written: usize,
    pub words_read: usize,
}

/// Transfers between the host and one board's configuration ROM.
pub struct RomTransfer<'a, P> {
    proto: RomProtocol<'a, P>,
    budgets: Budgets,
    timing: Timing,
    stats: TransferStats,
}

impl<'a, P: RegisterPort> RomTransfer<'a, P> {
    pub fn new(board: Board<'a, P>, budgets: Budgets, timing: Timing) -> Self {
        Self {
            proto: RomProtocol::new(board),
            budgets,
            timing,
            stats: TransferStats::default(),
        }
    }

    pub fn board(&self) -> Board<'a, P> {
        self.proto.board()
    }

    pub fn protocol(&self) -> &RomProtocol<'a, P> {
        &self.proto
    }

    pub fn stats(&self) -> TransferStats {
        self.stats
    }

    /// Waits for the command engine, then issues `cmd`.
    fn command(&mut self, cmd: RomCommand) -> Result<(), RomError> {
        poll::wait_ready(&self.proto, self.budgets.command_ready_tries)?;
        self.proto.issue(cmd);
        if cmd.end_of_command {
            self.stats.end_of_commands += 1;
        }
        Ok(())
    }

    /// Issues `cmd` and returns what it leaves in the readback register.
    fn query(&mut self, cmd: RomCommand) -> Result<u32, RomError> {
        self.command(cmd)?;
        poll::wait_ready(&self.proto, self.budgets.command_ready_tries)?;
        Ok(self.proto.read_status())
    }

    /// Reads the ROM's manufacturer and device ID bytes.
    pub fn read_id(&mut self) -> Result<u32, RomError> {
        self.query(RomCommand::new(RomOpcode::ReadId))
    }

    pub fn read_status1(&mut self) -> Result<RomStatus1, RomError> {
        poll::read_status1(&self.proto, self.budgets.command_ready_tries)
    }

    /// Sets or clears the ROM's write-enable latch. When setting it, reads
    /// the status back and fails if the latch didn't take.
    pub fn set_write_enable(&mut self, enable: bool) -> Result<(), RomError> {
        if !enable {
            return self.command(RomCommand::new(RomOpcode::WriteDisable));
        }
        self.command(RomCommand::new(RomOpcode::WriteEnable))?;
        self.stats.write_enables += 1;
        let status = self.read_status1()?;
        if !status.contains(RomStatus1::WEL) {
            return Err(RomError::WriteEnableFailed {
                status: status.bits(),
            });
        }
        Ok(())
    }

    /// Starts a bulk erase and returns without waiting for it.
    pub fn begin_erase(&mut self) -> Result<(), RomError> {
        self.set_write_enable(true)?;
        self.command(RomCommand::new(RomOpcode::BulkErase))
    }

    /// Waits out a bulk erase started by [`RomTransfer::begin_erase`].
    /// `on_tick` is called for every poll that found it still running.
    pub fn wait_erase(
        &mut self,
        on_tick: &mut dyn FnMut(),
    ) -> Result<u32, RomError> {
        let polls = poll::wait_write_complete(
            &self.proto,
            self.budgets.erase_tries,
            self.budgets.command_ready_tries,
            self.timing.write_poll_interval,
            on_tick,
        )?;
        log::debug!("slot {}: erase took {polls} polls", self.board().slot());
        Ok(polls)
    }

    /// Erases the whole ROM, optionally waiting for it to finish.
    pub fn erase(
        &mut self,
        wait: bool,
        on_tick: &mut dyn FnMut(),
    ) -> Result<(), RomError> {
        self.begin_erase()?;
        if wait {
            self.wait_erase(on_tick)?;
        }
        Ok(())
    }

    /// Reads the word at `address`. `last_of_page` closes the ROM's read
    /// buffer after this word.
    pub fn read_word(
        &mut self,
        address: u32,
        last_of_page: bool,
    ) -> Result<u32, RomError> {
        let word = self.query(
            RomCommand::new(RomOpcode::AutoRead)
                .address(address)
                .end_of_command(last_of_page),
        )?;
        self.stats.words_read += 1;
        Ok(word)
    }

    /// Writes `word` at `address`.
    ///
    /// The first word of a page sets the write-enable latch first. The last
    /// word of a page commits it, and we wait for the commit to finish.
    pub fn write_word(
        &mut self,
        address: u32,
        word: u32,
        last_of_page: bool,
    ) -> Result<(), RomError> {
        if address as usize % PAGE_SIZE_BYTES == 0 {
            self.set_write_enable(true)?;
        }
        self.command(
            RomCommand::new(RomOpcode::PageProgram)
                .address(address)
                .data(word)
                .end_of_command(last_of_page),
        )?;
        self.stats.words_written += 1;
        if last_of_page {
            self.stats.page_waits += 1;
            poll::wait_write_complete(
                &self.proto,
                self.budgets.page_tries,
                self.budgets.command_ready_tries,
                self.timing.write_poll_interval,
                &mut || (),
            )?;
        }
        Ok(())
    }

    /// Reads `size_bytes` from the start of the ROM into `image`, which is
    /// marked loaded once every word is in.
    pub fn download(
        &mut self,
        image: &mut FirmwareImage,
        size_bytes: usize,
        on_tick: &mut dyn FnMut(),
    ) -> Result<(), RomError> {
        if size_bytes % WORD_SIZE_BYTES != 0 || size_bytes > ROM_CAPACITY_BYTES
        {
            return Err(RomError::BadTransferSize { bytes: size_bytes });
        }
        image.release();
        let count = size_bytes / WORD_SIZE_BYTES;
        let mut words = Vec::with_capacity(count);
        for i in 0..count {
            let last_of_page = (i + 1) % WORDS_PER_PAGE == 0;
            words.push(self.read_word(word_address(i), last_of_page)?);
            on_tick();
        }
        image.fill(words);
        Ok(())
    }

    /// Programs `image` from the start of an erased ROM, then writes one
    /// flush word to close the sequence.
    ///
    /// Fails before any register I/O if the image isn't loaded.
    pub fn program(
        &mut self,
        image: &FirmwareImage,
        on_tick: &mut dyn FnMut(),
    ) -> Result<(), RomError> {
        if !image.is_loaded() {
            return Err(RomError::ImageNotLoaded);
        }
        if image.size_bytes() > MAX_IMAGE_BYTES {
            return Err(RomError::BadTransferSize {
                bytes: image.size_bytes(),
            });
        }
        for (i, &word) in image.words().iter().enumerate() {
            let last_of_page = (i + 1) % WORDS_PER_PAGE == 0;
            self.write_word(word_address(i), word, last_of_page)?;
            on_tick();
        }
        self.write_word(word_address(image.word_count()), FLUSH_WORD, true)
    }
}

/// ROM byte address of word `index`. Callers keep `index` inside the ROM.
fn word_address(index: usize) -> u32 {
    (index * WORD_SIZE_BYTES) as u32
}

/// Compares a file image against one downloaded from a ROM.
///
/// Both must be loaded and the same length. Every word is compared; the
/// first [`MAX_MISMATCH_SAMPLES`] mismatches are logged and returned along
/// with the total count.
pub fn compare(
    file: &FirmwareImage,
    rom: &FirmwareImage,
    on_tick: &mut dyn FnMut(),
) -> Result<(), RomError> {
    if !file.is_loaded() || !rom.is_loaded() {
        return Err(RomError::ImageNotLoaded);
    }
    if file.word_count() != rom.word_count() {
        return Err(RomError::SizeMismatch {
            file_words: file.word_count(),
            rom_words: rom.word_count(),
        });
    }

    let mut total = 0;
    let mut first = Vec::new();
    for (index, (&expected, &actual)) in
        file.words().iter().zip(rom.words()).enumerate()
    {
        if expected != actual {
            total += 1;
            if first.len() < MAX_MISMATCH_SAMPLES {
                let m = WordMismatch {
                    index,
                    expected,
                    actual,
                };
                log::warn!("mismatch at {m}");
                first.push(m);
            }
        }
        on_tick();
    }

    if total == 0 {
        Ok(())
    } else {
        Err(RomError::VerifyMismatch { total, first })
    }
}
