// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Crate-wide updates.
//!
//! [`BatchUpdater::run_all`] walks every board in a [`BoardRegistry`] through
//! the update, one step at a time across all boards. Reset and erase are
//! started on every board before any is waited on, as is reboot; an erase
//! takes the better part of two minutes, and waiting on them in turn means the
//! whole crate takes about as long as the slowest board.
//!
//! A board that fails a step drops out of every later step. Nothing a board
//! does can stop the others from being updated.

use std::collections::BTreeMap;

use drv_fadc_api::FirmwareVersion;
use drv_vme_api::{BoardRegistry, RegisterPort, Slot, VmeBus};

use crate::config::UpdateConfig;
use crate::error::{RomError, StepFailure};
use crate::image::FirmwareImage;
use crate::sequencer::{staged, BoardSequencer};
use crate::watcher::{report_failure, ProgressEvent, ProgressWatcher};
use crate::UpdateStep;

/// Outcome of one board in a batch.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BoardUpdateStatus {
    /// Already running the target firmware; never touched.
    pub skip: bool,
    pub passed: bool,
    pub failed_step: Option<UpdateStep>,
}

impl core::fmt::Display for BoardUpdateStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match (self.skip, self.passed, self.failed_step) {
            (true, _, _) => f.write_str("skip"),
            (false, true, _) => f.write_str("passed"),
            (false, false, Some(step)) => write!(f, "FAILED at step {step}"),
            (false, false, None) => f.write_str("FAILED"),
        }
    }
}

/// Per-board outcomes of a batch, by slot.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BatchReport {
    boards: BTreeMap<Slot, BoardUpdateStatus>,
}

impl BatchReport {
    pub fn status(&self, slot: Slot) -> Option<&BoardUpdateStatus> {
        self.boards.get(&slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Slot, &BoardUpdateStatus)> {
        self.boards.iter().map(|(&s, st)| (s, st))
    }

    pub fn len(&self) -> usize {
        self.boards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }

    /// Bit N set for every slot N whose board passed.
    pub fn passed_mask(&self) -> u32 {
        self.iter()
            .filter(|(_, st)| st.passed)
            .fold(0, |m, (s, _)| m | s.mask())
    }

    pub fn skipped(&self) -> usize {
        self.boards.values().filter(|st| st.skip).count()
    }

    pub fn failed(&self) -> usize {
        self.boards
            .values()
            .filter(|st| !st.skip && !st.passed)
            .count()
    }

    /// Every board either passed or was skipped.
    pub fn all_ok(&self) -> bool {
        self.failed() == 0
    }

    fn mark_failed(&mut self, failure: &StepFailure) {
        match self.boards.get_mut(&failure.slot) {
            Some(st) => {
                st.passed = false;
                st.failed_step = Some(failure.step);
            }
            None => log::warn!("no status entry for slot {}", failure.slot),
        }
    }
}

impl core::fmt::Display for BatchReport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (slot, st) in self.iter() {
            writeln!(f, "slot {slot:2}: {st}")?;
        }
        Ok(())
    }
}

/// Updates every board in a crate.
pub struct BatchUpdater<'a, P, W> {
    bus: &'a VmeBus<P>,
    registry: &'a BoardRegistry,
    config: UpdateConfig,
    watcher: W,
}

impl<'a, P: RegisterPort, W: ProgressWatcher> BatchUpdater<'a, P, W> {
    pub fn new(
        bus: &'a VmeBus<P>,
        registry: &'a BoardRegistry,
        config: UpdateConfig,
        watcher: W,
    ) -> Self {
        Self {
            bus,
            registry,
            config,
            watcher,
        }
    }

    pub fn into_watcher(self) -> W {
        self.watcher
    }

    /// Updates every board to `file`.
    ///
    /// Unless `force` is set, boards already running the configured target
    /// firmware are skipped and see no register writes at all. Fails only if
    /// `file` isn't loaded, in which case no board is touched; per-board
    /// failures are in the returned report.
    pub fn run_all(
        &mut self,
        file: &FirmwareImage,
        force: bool,
    ) -> Result<BatchReport, RomError> {
        if !file.is_loaded() {
            return Err(RomError::ImageNotLoaded);
        }

        let mut report = BatchReport::default();
        let mut seqs = Vec::new();
        for board in self.registry.boards(self.bus) {
            let slot = board.slot();
            let mut status = BoardUpdateStatus::default();
            if !force {
                let version = FirmwareVersion::read(&board);
                if version.combined() == self.config.target.combined() {
                    log::warn!("slot {slot}: already at {version}, skipping");
                    self.watcher.notify(&ProgressEvent::line(
                        slot,
                        UpdateStep::Init,
                        format!("slot {slot:2}: firmware {version} is current"),
                    ));
                    status.skip = true;
                    report.boards.insert(slot, status);
                    continue;
                }
            }
            status.passed = true;
            report.boards.insert(slot, status);
            seqs.push(BoardSequencer::new(
                board,
                self.config.budgets,
                self.config.timing,
            ));
        }

        let w = &mut self.watcher;

        log::info!("resetting {} boards", seqs.len());
        for_each_live(&mut seqs, &mut report, w, |seq, _| seq.reset());
        for_each_live(&mut seqs, &mut report, w, |seq, w| {
            staged(seq, w, UpdateStep::Init, |seq, _| seq.wait_ready())
        });

        log::info!("erasing");
        for_each_live(&mut seqs, &mut report, w, |seq, _| seq.begin_erase());
        for_each_live(&mut seqs, &mut report, w, |seq, w| {
            staged(seq, w, UpdateStep::Erase, |seq, tick| {
                seq.finish_erase(tick)
            })
        });

        log::info!("programming");
        for_each_live(&mut seqs, &mut report, w, |seq, w| {
            staged(seq, w, UpdateStep::Program, |seq, tick| {
                seq.program(file, tick)
            })?;
            staged(seq, w, UpdateStep::Download, |seq, tick| {
                seq.download(file.size_bytes(), tick)
            })?;
            staged(seq, w, UpdateStep::Verify, |seq, tick| {
                seq.verify(file, tick)
            })
        });

        log::info!("rebooting");
        for_each_live(&mut seqs, &mut report, w, |seq, _| seq.begin_reboot());
        for_each_live(&mut seqs, &mut report, w, |seq, w| {
            staged(seq, w, UpdateStep::Reboot, |seq, tick| {
                seq.finish_reboot(tick)
            })
        });

        for (slot, st) in report.iter() {
            let step = st.failed_step.unwrap_or(UpdateStep::Reboot);
            w.notify(&ProgressEvent::line(
                slot,
                step,
                format!("slot {slot:2}: {st}"),
            ));
        }
        log::info!(
            "batch done: {} boards, {} skipped, {} failed, mask {:#x}",
            report.len(),
            report.skipped(),
            report.failed(),
            report.passed_mask(),
        );
        Ok(report)
    }
}

/// Runs `body` on every sequencer that hasn't failed yet, recording any new
/// failure in `report`.
fn for_each_live<'a, P: RegisterPort, W: ProgressWatcher>(
    seqs: &mut [BoardSequencer<'a, P>],
    report: &mut BatchReport,
    watcher: &mut W,
    mut body: impl FnMut(
        &mut BoardSequencer<'a, P>,
        &mut dyn ProgressWatcher,
    ) -> Result<(), StepFailure>,
) {
    for seq in seqs.iter_mut().filter(|s| !s.is_failed()) {
        if let Err(failure) = body(seq, &mut *watcher) {
            report_failure(&mut *watcher, &failure);
            report.mark_failed(&failure);
        }
    }
}
