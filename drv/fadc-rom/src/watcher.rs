// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Progress reporting.
//!
//! The update engine never prints anything itself. It hands
//! [`ProgressEvent`]s to whatever [`ProgressWatcher`] the host gave it.

use std::io::Write;

use drv_vme_api::Slot;
use enum_map::EnumMap;

use crate::error::{RomError, StepFailure};
use crate::UpdateStep;

/// What a [`ProgressEvent`] is telling the watcher.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Show {
    /// A board is starting a step; the title names it.
    Id,
    /// One more iteration of a long-running loop.
    Progress,
    /// The step finished.
    Done,
    /// A free-standing line of text, in the title.
    String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProgressEvent {
    pub board: Slot,
    pub step: UpdateStep,
    pub show: Show,
    pub title: Option<String>,
}

impl ProgressEvent {
    pub fn start(board: Slot, step: UpdateStep) -> Self {
        Self {
            board,
            step,
            show: Show::Id,
            title: Some(format!("slot {board:2}: {step}")),
        }
    }

    pub fn tick(board: Slot, step: UpdateStep) -> Self {
        Self {
            board,
            step,
            show: Show::Progress,
            title: None,
        }
    }

    pub fn done(board: Slot, step: UpdateStep) -> Self {
        Self {
            board,
            step,
            show: Show::Done,
            title: None,
        }
    }

    pub fn line(
        board: Slot,
        step: UpdateStep,
        text: impl Into<String>,
    ) -> Self {
        Self {
            board,
            step,
            show: Show::String,
            title: Some(text.into()),
        }
    }
}

/// Receiver for progress events.
pub trait ProgressWatcher {
    fn notify(&mut self, event: &ProgressEvent);
}

impl<W: ProgressWatcher + ?Sized> ProgressWatcher for &mut W {
    fn notify(&mut self, event: &ProgressEvent) {
        (**self).notify(event)
    }
}

/// Discards everything.
#[derive(Copy, Clone, Debug, Default)]
pub struct NullWatcher;

impl ProgressWatcher for NullWatcher {
    fn notify(&mut self, _event: &ProgressEvent) {}
}

/// Renders progress as text: a title per step, a `+` every N ticks, and
/// free-standing lines as-is.
///
/// N depends on the step, since an erase polls a few hundred thousand times
/// and a reboot a few hundred.
pub struct ConsoleWatcher<W> {
    out: W,
    prescale: EnumMap<UpdateStep, u32>,
    ticks: u32,
    /// A title has been printed and its line not yet ended.
    line_open: bool,
}

impl<W: Write> ConsoleWatcher<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            prescale: enum_map::enum_map! {
                UpdateStep::Init => 1,
                UpdateStep::Erase => 5000,
                UpdateStep::Program => 0x4000,
                UpdateStep::Download => 0x4000,
                UpdateStep::Verify => 0x4000,
                UpdateStep::Reboot => 100,
            },
            ticks: 0,
            line_open: false,
        }
    }

    /// Prints one `+` every `every` ticks during `step`; zero turns ticks
    /// off for that step.
    pub fn with_prescale(mut self, step: UpdateStep, every: u32) -> Self {
        self.prescale[step] = every;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ProgressWatcher for ConsoleWatcher<W> {
    fn notify(&mut self, event: &ProgressEvent) {
        // A console that's gone away isn't worth failing an update over.
        let _ = match event.show {
            Show::Id => {
                self.ticks = 0;
                self.line_open = true;
                let title = event.title.as_deref().unwrap_or_default();
                write!(self.out, "{title} ").and_then(|_| self.out.flush())
            }
            Show::Progress => {
                self.ticks = self.ticks.wrapping_add(1);
                let every = self.prescale[event.step];
                if every != 0 && self.ticks % every == 0 {
                    write!(self.out, "+").and_then(|_| self.out.flush())
                } else {
                    Ok(())
                }
            }
            Show::Done => {
                self.line_open = false;
                writeln!(self.out, " done")
            }
            Show::String => {
                let brk = if self.line_open { "\n" } else { "" };
                self.line_open = false;
                let text = event.title.as_deref().unwrap_or_default();
                writeln!(self.out, "{brk}{text}")
            }
        };
    }
}

/// Tells `watcher` why a board stopped, including any verify mismatches.
pub fn report_failure(
    watcher: &mut dyn ProgressWatcher,
    failure: &StepFailure,
) {
    let board = failure.slot;
    let step = failure.step;
    watcher.notify(&ProgressEvent::line(
        board,
        step,
        format!("slot {board:2}: FAILED at step {step}: {}", failure.error),
    ));
    if let RomError::VerifyMismatch { total, first } = &failure.error {
        for m in first {
            watcher.notify(&ProgressEvent::line(board, step, format!("  {m}")));
        }
        if *total > first.len() {
            watcher.notify(&ProgressEvent::line(
                board,
                step,
                format!("  ... and {} more", total - first.len()),
            ));
        }
    }
}
