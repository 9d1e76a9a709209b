// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod common;

use common::{board, config, slot};
use drv_fadc_api::WORDS_PER_PAGE;
use drv_fadc_rom::{compare, FirmwareImage, RomTransfer};
use drv_mock_fadc::MockCrate;
use drv_vme_api::{Board, VmeBus};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Whatever goes in comes back out, and every page gets one wait.
    #[test]
    fn program_then_download(
        words in prop::collection::vec(any::<u32>(), 1..400),
    ) {
        let bus = VmeBus::new(MockCrate::new().with_board(slot(11), board()));
        let b = Board::new(&bus, slot(11), slot(11).geographic_base());
        let cfg = config();
        let mut t = RomTransfer::new(b, cfg.budgets, cfg.timing);

        let file = FirmwareImage::from_words(words.clone());
        t.erase(true, &mut || ()).unwrap();
        t.program(&file, &mut || ()).unwrap();

        let mut rom = FirmwareImage::new();
        t.download(&mut rom, file.size_bytes(), &mut || ()).unwrap();

        prop_assert_eq!(rom.word_count(), file.word_count());
        prop_assert_eq!(compare(&file, &rom, &mut || ()), Ok(()));
        prop_assert_eq!(
            t.stats().page_waits as usize,
            words.len() / WORDS_PER_PAGE + 1
        );
    }
}
