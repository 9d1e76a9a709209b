// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![allow(dead_code)]

use drv_fadc_api::FirmwareVersion;
use drv_fadc_rom::{FirmwareImage, Timing, UpdateConfig};
use drv_mock_fadc::{MockBoard, MockCrate};
use drv_vme_api::Slot;

/// What the boards run before an update.
pub const OLD: FirmwareVersion = FirmwareVersion::new(0x0201, 0x0c01);
/// What the image under test installs.
pub const NEW: FirmwareVersion = FirmwareVersion::new(0x0202, 0x0c02);

pub fn slot(n: u32) -> Slot {
    Slot::try_from(n).unwrap()
}

/// No sleeping, and budgets small enough that a stuck board gives up fast.
pub fn config() -> UpdateConfig {
    let mut c = UpdateConfig::new(NEW);
    c.timing = Timing::immediate();
    c.budgets.erase_tries = 1000;
    c.budgets.reboot_tries = 100;
    c
}

/// A board running [`OLD`] that comes back running [`NEW`].
pub fn board() -> MockBoard {
    MockBoard::new(OLD).with_reboot_version(NEW)
}

pub fn crate_of(slots: &[u32]) -> MockCrate {
    slots
        .iter()
        .fold(MockCrate::new(), |c, &n| c.with_board(slot(n), board()))
}

/// An image of `words` words that doesn't repeat within a page.
pub fn image(words: usize) -> FirmwareImage {
    FirmwareImage::from_words(
        (0..words as u32)
            .map(|i| i.wrapping_mul(0x9e37_79b9) ^ 0x5a5a)
            .collect(),
    )
}
