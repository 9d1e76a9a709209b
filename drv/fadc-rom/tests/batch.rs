// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod common;

use common::{board, config, crate_of, image, slot, NEW, OLD};
use drv_fadc_api::{is_fadc_board, BOARD_ID};
use drv_fadc_rom::{
    BatchUpdater, ConsoleWatcher, FirmwareImage, NullWatcher, RomError,
    UpdateStep,
};
use drv_mock_fadc::{Faults, MockBoard};
use drv_vme_api::{BoardRegistry, VmeBus};

#[test]
fn discovery_finds_only_our_boards() {
    let bus = VmeBus::new(crate_of(&[3, 5, 21]));
    let registry = BoardRegistry::discover(&bus, BOARD_ID, is_fadc_board);
    assert_eq!(
        registry.slots().collect::<Vec<_>>(),
        [slot(3), slot(5), slot(21)]
    );
    assert_eq!(registry.resolve(0), Ok((slot(3), slot(3).geographic_base())));
}

#[test]
fn second_run_skips_everything() {
    let bus = VmeBus::new(crate_of(&[3, 5, 8]));
    let registry = BoardRegistry::discover(&bus, BOARD_ID, is_fadc_board);
    let file = image(150);
    let mut updater = BatchUpdater::new(&bus, &registry, config(), NullWatcher);

    let first = updater.run_all(&file, false).unwrap();
    assert_eq!(first.passed_mask(), (1 << 3) | (1 << 5) | (1 << 8));
    assert_eq!(first.skipped(), 0);
    assert!(first.all_ok());

    bus.lock().clear_stats();
    let second = updater.run_all(&file, false).unwrap();
    assert_eq!(second.skipped(), 3);
    assert_eq!(second.passed_mask(), 0);
    assert!(second.all_ok());

    let mock = bus.lock();
    for s in mock.slots() {
        assert_eq!(mock.board(s).unwrap().stats().writes, 0, "slot {s}");
    }
}

#[test]
fn stuck_erase_only_fails_its_board() {
    let mut c = crate_of(&[2, 4, 6, 9]);
    c.board_mut(slot(6)).unwrap().faults_mut().erase_stuck = true;
    let bus = VmeBus::new(c);
    let registry = BoardRegistry::discover(&bus, BOARD_ID, is_fadc_board);
    let file = image(200);
    let mut updater = BatchUpdater::new(
        &bus,
        &registry,
        config(),
        ConsoleWatcher::new(Vec::new()),
    );

    let report = updater.run_all(&file, false).unwrap();
    assert_eq!(report.len(), 4);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.passed_mask(), (1 << 2) | (1 << 4) | (1 << 9));
    let stuck = report.status(slot(6)).unwrap();
    assert!(!stuck.passed && !stuck.skip);
    assert_eq!(stuck.failed_step, Some(UpdateStep::Erase));

    let text = String::from_utf8(updater.into_watcher().into_inner()).unwrap();
    assert!(text.contains("slot  6: FAILED at step erase"));
    assert!(text.contains("slot  2: passed"));
    assert!(text.contains("slot  9: passed"));

    let mock = bus.into_inner();
    for n in [2, 4, 9] {
        let b = mock.board(slot(n)).unwrap();
        assert_eq!(b.rom_words(200), file.words(), "slot {n}");
        assert_eq!(b.version(), NEW);
        assert_eq!(b.stats().reboots, 1);
    }
    let b = mock.board(slot(6)).unwrap();
    assert_eq!(b.version(), OLD);
    assert_eq!(b.stats().page_commits, 0);
    assert_eq!(b.stats().reboots, 0);
}

#[test]
fn late_failures_only_fail_their_boards() {
    let faulty = |faults| board().with_faults(faults);
    let c = crate_of(&[2, 6])
        .with_board(
            slot(3),
            faulty(Faults {
                protect_after_erase: true,
                ..Default::default()
            }),
        )
        .with_board(
            slot(4),
            faulty(Faults {
                read_hangs: true,
                ..Default::default()
            }),
        )
        .with_board(
            slot(5),
            faulty(Faults {
                corrupt_word: Some(10),
                ..Default::default()
            }),
        )
        .with_board(
            slot(7),
            faulty(Faults {
                no_reboot: true,
                ..Default::default()
            }),
        );
    let bus = VmeBus::new(c);
    let registry = BoardRegistry::discover(&bus, BOARD_ID, is_fadc_board);
    let file = image(150);
    let mut updater = BatchUpdater::new(&bus, &registry, config(), NullWatcher);

    let report = updater.run_all(&file, false).unwrap();
    assert_eq!(report.len(), 6);
    assert_eq!(report.failed(), 4);
    assert_eq!(report.passed_mask(), (1 << 2) | (1 << 6));
    for (n, step) in [
        (3, UpdateStep::Program),
        (4, UpdateStep::Download),
        (5, UpdateStep::Verify),
        (7, UpdateStep::Reboot),
    ] {
        let st = report.status(slot(n)).unwrap();
        assert!(!st.passed && !st.skip, "slot {n}");
        assert_eq!(st.failed_step, Some(step), "slot {n}");
    }

    let mock = bus.into_inner();
    for n in [2, 6] {
        let b = mock.board(slot(n)).unwrap();
        assert_eq!(b.rom_words(150), file.words(), "slot {n}");
        assert_eq!(b.version(), NEW);
    }
    // Only boards that verified are rebooted.
    for (n, reboots) in [(3, 0), (4, 0), (5, 0), (7, 1)] {
        let b = mock.board(slot(n)).unwrap();
        assert_eq!(b.stats().reboots, reboots, "slot {n}");
    }
}

#[test]
fn dead_board_drops_out_at_init() {
    let bus = VmeBus::new(crate_of(&[1, 2]).with_board(
        slot(3),
        MockBoard::new(OLD).with_faults(Faults {
            never_ready: true,
            ..Default::default()
        }),
    ));
    let registry = BoardRegistry::discover(&bus, BOARD_ID, is_fadc_board);
    let mut updater = BatchUpdater::new(&bus, &registry, config(), NullWatcher);

    let report = updater.run_all(&image(64), false).unwrap();
    assert_eq!(report.passed_mask(), (1 << 1) | (1 << 2));
    assert_eq!(
        report.status(slot(3)).unwrap().failed_step,
        Some(UpdateStep::Init)
    );
    // Reset was the only thing it ever saw.
    assert_eq!(bus.lock().board(slot(3)).unwrap().stats().writes, 1);
}

#[test]
fn force_updates_current_boards() {
    let bus = VmeBus::new(
        crate_of(&[4])
            .with_board(slot(5), MockBoard::new(NEW).with_reboot_version(NEW)),
    );
    let registry = BoardRegistry::discover(&bus, BOARD_ID, is_fadc_board);
    let mut updater = BatchUpdater::new(&bus, &registry, config(), NullWatcher);

    let report = updater.run_all(&image(32), false).unwrap();
    assert!(report.status(slot(5)).unwrap().skip);
    assert_eq!(report.passed_mask(), 1 << 4);

    let report = updater.run_all(&image(32), true).unwrap();
    assert_eq!(report.skipped(), 0);
    assert_eq!(report.passed_mask(), (1 << 4) | (1 << 5));
}

#[test]
fn unloaded_image_touches_no_board() {
    let bus = VmeBus::new(crate_of(&[7, 8]));
    let registry = BoardRegistry::discover(&bus, BOARD_ID, is_fadc_board);
    bus.lock().clear_stats();

    let mut updater = BatchUpdater::new(&bus, &registry, config(), NullWatcher);
    assert_eq!(
        updater.run_all(&FirmwareImage::new(), true),
        Err(RomError::ImageNotLoaded)
    );

    let mock = bus.lock();
    for s in mock.slots() {
        let stats = mock.board(s).unwrap().stats();
        assert_eq!((stats.reads, stats.writes), (0, 0));
    }
}
