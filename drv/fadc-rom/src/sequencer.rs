// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Update state machine for a single board.
//!
//! A board moves strictly forward through reset, erase, program, download,
//! verify and reboot. The first failure is terminal: the board lands in
//! [`SequencerState::Failed`] and every later step returns that same failure
//! without touching the bus. Steps called out of order are refused, also
//! without touching the bus.
//!
//! Erase and reboot are split into a "begin" and a "finish" half so that
//! [`crate::batch`] can start them on every board before waiting on any.

use drv_fadc_api::{Reset, CTRL_VERSION, RESET};
use drv_vme_api::{Board, RegisterPort, BUS_NOT_READY};

use crate::config::{Budgets, Timing};
use crate::error::{RomError, StepFailure};
use crate::image::FirmwareImage;
use crate::poll;
use crate::transfer::{compare, RomTransfer};
use crate::watcher::{report_failure, ProgressEvent, ProgressWatcher};
use crate::UpdateStep;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SequencerState {
    Init,
    Reset,
    Ready,
    Erasing,
    Erased,
    Programmed,
    Downloaded,
    Verified,
    Rebooting,
    Rebooted,
    Failed(UpdateStep),
}

pub struct BoardSequencer<'a, P> {
    transfer: RomTransfer<'a, P>,
    budgets: Budgets,
    timing: Timing,
    state: SequencerState,
    failure: Option<StepFailure>,
    rom_image: FirmwareImage,
}

impl<'a, P: RegisterPort> BoardSequencer<'a, P> {
    pub fn new(board: Board<'a, P>, budgets: Budgets, timing: Timing) -> Self {
        Self {
            transfer: RomTransfer::new(board, budgets, timing),
            budgets,
            timing,
            state: SequencerState::Init,
            failure: None,
            rom_image: FirmwareImage::new(),
        }
    }

    pub fn board(&self) -> Board<'a, P> {
        self.transfer.board()
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn failure(&self) -> Option<&StepFailure> {
        self.failure.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    pub fn transfer(&self) -> &RomTransfer<'a, P> {
        &self.transfer
    }

    /// What was read back from the ROM by [`BoardSequencer::download`].
    pub fn rom_image(&self) -> &FirmwareImage {
        &self.rom_image
    }

    /// Refuses a step unless the sequencer is in `want`.
    fn enter(
        &self,
        want: SequencerState,
        step: UpdateStep,
    ) -> Result<(), StepFailure> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        if self.state != want {
            return Err(StepFailure {
                slot: self.board().slot(),
                step,
                error: RomError::OutOfSequence,
            });
        }
        Ok(())
    }

    /// Moves to `next` on success, or to `Failed(step)` on error.
    fn finish<T>(
        &mut self,
        step: UpdateStep,
        next: SequencerState,
        r: Result<T, RomError>,
    ) -> Result<T, StepFailure> {
        match r {
            Ok(v) => {
                log::debug!("slot {}: {:?}", self.board().slot(), next);
                self.state = next;
                Ok(v)
            }
            Err(error) => {
                let failure = StepFailure {
                    slot: self.board().slot(),
                    step,
                    error,
                };
                log::error!("{failure}");
                self.state = SequencerState::Failed(step);
                self.failure = Some(failure.clone());
                Err(failure)
            }
        }
    }

    /// Pulses the board's reset, then waits out the settle delay.
    pub fn reset(&mut self) -> Result<(), StepFailure> {
        self.enter(SequencerState::Init, UpdateStep::Init)?;
        self.board().write(RESET, (Reset::SOFT | Reset::HARD).bits());
        sleep(self.timing.reset_settle);
        self.state = SequencerState::Reset;
        Ok(())
    }

    /// Waits for the command engine after reset, and logs the ROM's ID.
    pub fn wait_ready(&mut self) -> Result<(), StepFailure> {
        self.enter(SequencerState::Reset, UpdateStep::Init)?;
        let r = poll::wait_ready(
            self.transfer.protocol(),
            self.budgets.ready_tries,
        )
        .and_then(|_| self.transfer.read_id());
        let id = self.finish(UpdateStep::Init, SequencerState::Ready, r)?;
        log::info!("slot {}: rom id {id:#08x}", self.board().slot());
        Ok(())
    }

    /// Starts a bulk erase.
    pub fn begin_erase(&mut self) -> Result<(), StepFailure> {
        self.enter(SequencerState::Ready, UpdateStep::Erase)?;
        let r = self.transfer.begin_erase();
        self.finish(UpdateStep::Erase, SequencerState::Erasing, r)
    }

    /// Waits for a bulk erase started with [`BoardSequencer::begin_erase`].
    pub fn finish_erase(
        &mut self,
        on_tick: &mut dyn FnMut(),
    ) -> Result<(), StepFailure> {
        self.enter(SequencerState::Erasing, UpdateStep::Erase)?;
        let r = self.transfer.wait_erase(on_tick);
        self.finish(UpdateStep::Erase, SequencerState::Erased, r)
            .map(drop)
    }

    pub fn program(
        &mut self,
        file: &FirmwareImage,
        on_tick: &mut dyn FnMut(),
    ) -> Result<(), StepFailure> {
        self.enter(SequencerState::Erased, UpdateStep::Program)?;
        let r = self.transfer.program(file, on_tick);
        self.finish(UpdateStep::Program, SequencerState::Programmed, r)
    }

    /// Reads `size_bytes` back from the ROM, for [`BoardSequencer::verify`].
    pub fn download(
        &mut self,
        size_bytes: usize,
        on_tick: &mut dyn FnMut(),
    ) -> Result<(), StepFailure> {
        self.enter(SequencerState::Programmed, UpdateStep::Download)?;
        let r = self
            .transfer
            .download(&mut self.rom_image, size_bytes, on_tick);
        self.finish(UpdateStep::Download, SequencerState::Downloaded, r)
    }

    /// Compares `file` against what [`BoardSequencer::download`] read.
    pub fn verify(
        &mut self,
        file: &FirmwareImage,
        on_tick: &mut dyn FnMut(),
    ) -> Result<(), StepFailure> {
        self.enter(SequencerState::Downloaded, UpdateStep::Verify)?;
        let r = compare(file, &self.rom_image, on_tick);
        self.finish(UpdateStep::Verify, SequencerState::Verified, r)
    }

    /// Asks the FPGAs to reconfigure from the freshly written ROM.
    pub fn begin_reboot(&mut self) -> Result<(), StepFailure> {
        self.enter(SequencerState::Verified, UpdateStep::Reboot)?;
        self.transfer.protocol().reboot();
        sleep(self.timing.reboot_settle);
        self.state = SequencerState::Rebooting;
        Ok(())
    }

    /// Polls the version register until the board answers again.
    pub fn finish_reboot(
        &mut self,
        on_tick: &mut dyn FnMut(),
    ) -> Result<(), StepFailure> {
        self.enter(SequencerState::Rebooting, UpdateStep::Reboot)?;
        let r = self.poll_reboot(on_tick);
        self.finish(UpdateStep::Reboot, SequencerState::Rebooted, r)
    }

    fn poll_reboot(&self, on_tick: &mut dyn FnMut()) -> Result<(), RomError> {
        let board = self.board();
        let tries = self.budgets.reboot_tries;
        for i in 0..tries {
            match board.probe(CTRL_VERSION) {
                Some(v) if v != BUS_NOT_READY => {
                    let slot = board.slot();
                    log::debug!("slot {slot}: back after {} polls", i + 1);
                    return Ok(());
                }
                _ => {}
            }
            on_tick();
            sleep(self.timing.reboot_poll_interval);
        }
        Err(RomError::RebootTimeout { tries })
    }

    /// Runs the whole sequence against `file`, reporting to `watcher`.
    pub fn run(
        &mut self,
        file: &FirmwareImage,
        watcher: &mut dyn ProgressWatcher,
    ) -> Result<(), StepFailure> {
        let r = self.run_steps(file, watcher);
        if let Err(failure) = &r {
            report_failure(watcher, failure);
        }
        r
    }

    fn run_steps(
        &mut self,
        file: &FirmwareImage,
        watcher: &mut dyn ProgressWatcher,
    ) -> Result<(), StepFailure> {
        staged(self, watcher, UpdateStep::Init, |seq, _| {
            seq.reset()?;
            seq.wait_ready()
        })?;
        staged(self, watcher, UpdateStep::Erase, |seq, tick| {
            seq.begin_erase()?;
            seq.finish_erase(tick)
        })?;
        staged(self, watcher, UpdateStep::Program, |seq, tick| {
            seq.program(file, tick)
        })?;
        staged(self, watcher, UpdateStep::Download, |seq, tick| {
            seq.download(file.size_bytes(), tick)
        })?;
        staged(self, watcher, UpdateStep::Verify, |seq, tick| {
            seq.verify(file, tick)
        })?;
        staged(self, watcher, UpdateStep::Reboot, |seq, tick| {
            seq.begin_reboot()?;
            seq.finish_reboot(tick)
        })
    }
}

/// Runs `body` as `step` of `seq`, bracketed by start and done events, with a
/// tick callback that forwards to `watcher`.
pub(crate) fn staged<'a, P: RegisterPort>(
    seq: &mut BoardSequencer<'a, P>,
    watcher: &mut dyn ProgressWatcher,
    step: UpdateStep,
    body: impl FnOnce(
        &mut BoardSequencer<'a, P>,
        &mut dyn FnMut(),
    ) -> Result<(), StepFailure>,
) -> Result<(), StepFailure> {
    let slot = seq.board().slot();
    watcher.notify(&ProgressEvent::start(slot, step));
    body(seq, &mut ticker(&mut *watcher, slot, step))?;
    watcher.notify(&ProgressEvent::done(slot, step));
    Ok(())
}

/// Tick callback that forwards to `watcher`.
fn ticker<'w>(
    watcher: &'w mut dyn ProgressWatcher,
    slot: drv_vme_api::Slot,
    step: UpdateStep,
) -> impl FnMut() + 'w {
    let event = ProgressEvent::tick(slot, step);
    move || watcher.notify(&event)
}

fn sleep(d: core::time::Duration) {
    if !d.is_zero() {
        std::thread::sleep(d);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::NullWatcher;
    use drv_vme_api::{Slot, VmeBus};

    /// Port that counts accesses and answers nothing useful.
    #[derive(Default)]
    struct Counting {
        accesses: usize,
    }

    impl RegisterPort for Counting {
        fn read32(&mut self, _addr: u32) -> u32 {
            self.accesses += 1;
            0
        }

        fn write32(&mut self, _addr: u32, _value: u32) {
            self.accesses += 1;
        }

        fn probe(&mut self, _addr: u32) -> bool {
            self.accesses += 1;
            false
        }
    }

    fn budgets() -> Budgets {
        Budgets {
            ready_tries: 3,
            command_ready_tries: 3,
            erase_tries: 3,
            page_tries: 3,
            reboot_tries: 3,
        }
    }

    #[test]
    fn out_of_order_touches_nothing() {
        let bus = VmeBus::new(Counting::default());
        let board = Board::new(&bus, Slot::FIRST, 0);
        let mut seq =
            BoardSequencer::new(board, budgets(), Timing::immediate());
        let file = FirmwareImage::from_words(vec![1, 2, 3]);

        let e = seq.program(&file, &mut || ()).unwrap_err();
        assert_eq!(e.error, RomError::OutOfSequence);
        assert_eq!(e.step, UpdateStep::Program);
        assert!(seq.begin_reboot().is_err());
        assert_eq!(seq.state(), SequencerState::Init);
        assert_eq!(bus.lock().accesses, 0);
    }

    #[test]
    fn failure_is_terminal() {
        let bus = VmeBus::new(Counting::default());
        let board = Board::new(&bus, Slot::FIRST, 0);
        let mut seq =
            BoardSequencer::new(board, budgets(), Timing::immediate());

        seq.reset().unwrap();
        let e = seq.wait_ready().unwrap_err();
        assert_eq!(e.step, UpdateStep::Init);
        assert_eq!(e.error, RomError::ReadyTimeout { tries: 3 });
        assert_eq!(seq.state(), SequencerState::Failed(UpdateStep::Init));

        let before = bus.lock().accesses;
        let file = FirmwareImage::from_words(vec![1]);
        assert_eq!(seq.run(&file, &mut NullWatcher), Err(e.clone()));
        assert_eq!(seq.begin_erase(), Err(e));
        assert_eq!(bus.lock().accesses, before);
    }
}
