// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod common;

use common::{board, config, image, slot, NEW, OLD};
use drv_fadc_rom::{
    BoardSequencer, FirmwareImage, NullWatcher, RomError, RomTransfer,
    SequencerState, StepFailure, TransferStats, UpdateStep,
};
use drv_mock_fadc::{Faults, MockBoard, MockCrate, MockStats};
use drv_vme_api::{Board, VmeBus};

/// Programs `words` words into a fresh, erased board.
fn program(words: usize) -> (TransferStats, MockStats) {
    let bus = VmeBus::new(MockCrate::new().with_board(slot(1), board()));
    let b = Board::new(&bus, slot(1), slot(1).geographic_base());
    let cfg = config();
    let mut t = RomTransfer::new(b, cfg.budgets, cfg.timing);
    t.program(&image(words), &mut || ()).unwrap();
    let stats = t.stats();
    let mock = bus.into_inner();
    (stats, mock.board(slot(1)).unwrap().stats())
}

/// What's left after running the whole sequence on one board.
struct Outcome {
    state: SequencerState,
    failure: Option<StepFailure>,
    rom: FirmwareImage,
    stats: TransferStats,
    mock: MockCrate,
}

fn run(mock: MockBoard, file: &FirmwareImage) -> Outcome {
    let bus = VmeBus::new(MockCrate::new().with_board(slot(7), mock));
    let b = Board::new(&bus, slot(7), slot(7).geographic_base());
    let cfg = config();
    let mut seq = BoardSequencer::new(b, cfg.budgets, cfg.timing);
    let r = seq.run(file, &mut NullWatcher);
    assert_eq!(r.as_ref().err(), seq.failure());

    let outcome = Outcome {
        state: seq.state(),
        failure: seq.failure().cloned(),
        rom: seq.rom_image().clone(),
        stats: seq.transfer().stats(),
        mock: MockCrate::new(),
    };
    drop(seq);
    Outcome {
        mock: bus.into_inner(),
        ..outcome
    }
}

#[test]
fn sixteen_words_round_trip() {
    let file = image(16);
    let out = run(board(), &file);

    assert_eq!(out.state, SequencerState::Rebooted);
    assert_eq!(out.failure, None);
    assert_eq!(out.rom.word_count(), file.word_count());
    assert_eq!(out.rom.words(), file.words());
    assert_eq!(out.stats.page_waits, 1);

    let b = out.mock.board(slot(7)).unwrap();
    assert_eq!(b.rom_words(16), file.words());
    assert_eq!(b.rom_words(17)[16], 0xFFFF_FFFF);
    assert_eq!(b.version(), NEW);
    assert_eq!(b.stats().erases, 1);
    assert_eq!(b.stats().reboots, 1);
}

#[test]
fn page_waits_follow_pages() {
    // 64 bytes: the flush word closes the only page.
    let (t, m) = program(16);
    assert_eq!((t.page_waits, t.end_of_commands), (1, 1));
    assert_eq!(m.page_commits, 1);

    // 300 bytes crosses one page boundary.
    let (t, m) = program(75);
    assert_eq!((t.page_waits, t.end_of_commands), (2, 2));
    assert_eq!(m.page_commits, 2);
    assert_eq!(t.write_enables, 2);

    // Exactly one page: the flush word opens and commits a second one.
    let (t, m) = program(64);
    assert_eq!((t.page_waits, t.end_of_commands), (2, 2));
    assert_eq!(m.page_commits, 2);

    let (t, m) = program(300);
    assert_eq!(t.page_waits, 5);
    assert_eq!(t.words_written, 301);
    assert_eq!(m.end_of_commands, 5);
    assert_eq!(m.dropped_words, 0);
}

#[test]
fn unloaded_image_touches_nothing() {
    let bus = VmeBus::new(MockCrate::new().with_board(slot(1), board()));
    let b = Board::new(&bus, slot(1), slot(1).geographic_base());
    let cfg = config();
    let mut t = RomTransfer::new(b, cfg.budgets, cfg.timing);

    let mut file = image(10);
    file.release();
    assert_eq!(t.program(&file, &mut || ()), Err(RomError::ImageNotLoaded));

    let mock = bus.into_inner();
    let stats = mock.board(slot(1)).unwrap().stats();
    assert_eq!((stats.reads, stats.writes), (0, 0));
}

#[test]
fn write_protect_fails_program() {
    let mock = board().with_faults(Faults {
        write_protected: true,
        ..Default::default()
    });
    let out = run(mock, &image(16));

    let failure = out.failure.unwrap();
    assert_eq!(failure.step, UpdateStep::Erase);
    assert_eq!(failure.error, RomError::WriteEnableFailed { status: 0 });
    let b = out.mock.board(slot(7)).unwrap();
    assert_eq!(b.stats().erases, 0);
    assert_eq!(b.version(), OLD);
}

#[test]
fn write_protect_at_page_start_fails_program() {
    let mock = board().with_faults(Faults {
        protect_after_erase: true,
        ..Default::default()
    });
    let out = run(mock, &image(100));

    assert_eq!(out.state, SequencerState::Failed(UpdateStep::Program));
    let failure = out.failure.unwrap();
    assert_eq!(failure.step, UpdateStep::Program);
    assert_eq!(failure.error, RomError::WriteEnableFailed { status: 0 });
    // The erase went through; nothing was written after it.
    assert_eq!(out.stats.words_written, 0);
    let b = out.mock.board(slot(7)).unwrap();
    assert_eq!(b.stats().erases, 1);
    assert_eq!(b.stats().page_commits, 0);
    assert_eq!(b.stats().reboots, 0);
    assert_eq!(b.version(), OLD);
}

#[test]
fn engine_hang_fails_download() {
    let file = image(100);
    let mock = board().with_faults(Faults {
        read_hangs: true,
        ..Default::default()
    });
    let out = run(mock, &file);

    assert_eq!(out.state, SequencerState::Failed(UpdateStep::Download));
    assert_eq!(
        out.failure.unwrap().error,
        RomError::ReadyTimeout {
            tries: config().budgets.command_ready_tries
        }
    );
    assert!(!out.rom.is_loaded());
    let b = out.mock.board(slot(7)).unwrap();
    // Programming had finished before the readback hung.
    assert_eq!(b.rom_words(100), file.words());
    assert_eq!(b.stats().reboots, 0);
}

#[test]
fn corrupt_readback_fails_verify() {
    let file = image(100);
    let mock = board().with_faults(Faults {
        corrupt_word: Some(5),
        ..Default::default()
    });
    let out = run(mock, &file);

    assert_eq!(out.state, SequencerState::Failed(UpdateStep::Verify));
    match &out.failure.unwrap().error {
        RomError::VerifyMismatch { total, first } => {
            assert_eq!(*total, 1);
            assert_eq!(first.len(), 1);
            assert_eq!(first[0].index, 5);
            assert_eq!(first[0].expected, file.words()[5]);
            assert_eq!(first[0].actual, file.words()[5] ^ 0x100);
        }
        other => panic!("unexpected {other:?}"),
    }
    // A board that failed verify isn't rebooted into a bad image.
    assert_eq!(out.mock.board(slot(7)).unwrap().stats().reboots, 0);
}

#[test]
fn dead_engine_times_out() {
    let mock = board().with_faults(Faults {
        never_ready: true,
        ..Default::default()
    });
    let out = run(mock, &image(16));

    let failure = out.failure.unwrap();
    assert_eq!(failure.step, UpdateStep::Init);
    assert_eq!(
        failure.error,
        RomError::ReadyTimeout {
            tries: config().budgets.ready_tries
        }
    );
    // One reset, then exactly the budget's worth of ready polls.
    let stats = out.mock.board(slot(7)).unwrap().stats();
    assert_eq!(stats.writes, 1);
    assert_eq!(stats.reads, config().budgets.ready_tries as usize);
}

#[test]
fn board_that_never_returns() {
    let mock = board().with_faults(Faults {
        no_reboot: true,
        ..Default::default()
    });
    let out = run(mock, &image(16));

    let failure = out.failure.unwrap();
    assert_eq!(failure.step, UpdateStep::Reboot);
    assert_eq!(
        failure.error,
        RomError::RebootTimeout {
            tries: config().budgets.reboot_tries
        }
    );
}

#[test]
fn read_id_and_download() {
    let words: Vec<u32> = (0..130).collect();
    let bus = VmeBus::new(
        MockCrate::new().with_board(slot(2), board().with_rom(&words)),
    );
    let b = Board::new(&bus, slot(2), slot(2).geographic_base());
    let cfg = config();
    let mut t = RomTransfer::new(b, cfg.budgets, cfg.timing);

    assert_eq!(t.read_id(), Ok(0x0020_ba18));

    let mut rom = FirmwareImage::new();
    let mut ticks = 0;
    t.download(&mut rom, 130 * 4, &mut || ticks += 1).unwrap();
    assert!(rom.is_loaded());
    assert_eq!(rom.words(), words);
    assert_eq!(ticks, 130);
    assert_eq!(t.stats().words_read, 130);
    // Read buffer closed after words 63 and 127.
    assert_eq!(t.stats().end_of_commands, 2);

    assert_eq!(
        t.download(&mut rom, 6, &mut || ()),
        Err(RomError::BadTransferSize { bytes: 6 })
    );
}
