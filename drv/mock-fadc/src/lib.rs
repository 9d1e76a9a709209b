// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mock flash-ADC crate.
//!
//! This models enough of the board to exercise the ROM update engine: the
//! command engine's framing (commands run on the rising edge of the execute
//! bit), the ROM's write-enable latch, page buffer, bulk erase and
//! write-in-progress status, the version registers, and an FPGA reboot that
//! takes the board off the bus for a while. Faults can be injected per board.
//!
//! The ROM is kept sparse; unwritten words read back as erased.

use std::collections::BTreeMap;

use drv_fadc_api::{
    FirmwareVersion, RomControl, RomOpcode, RomReady, RomStatus1, BOARD_ID,
    BOARD_TYPE, CONFIG_ROM_CONTROL0, CONFIG_ROM_CONTROL1, CONFIG_ROM_CONTROL2,
    CONFIG_ROM_STATUS0, CONFIG_ROM_STATUS1, CTRL_VERSION, PROC_VERSION,
    RESET, ROM_ADDRESS_MASK, ROM_OPCODE_MASK, WORD_SIZE_BYTES,
};
use drv_vme_api::{RegisterPort, Slot, BUS_NOT_READY};
use num_traits::FromPrimitive;

const ERASED: u32 = 0xFFFF_FFFF;

/// Each slot decodes this much address space.
const SLOT_WINDOW: u32 = 1 << 19;

/// Faults that can be injected into a [`MockBoard`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Faults {
    /// The command engine never reports ready.
    pub never_ready: bool,
    /// A bulk erase never finishes.
    pub erase_stuck: bool,
    /// Write-enable commands don't set the latch.
    pub write_protected: bool,
    /// The part goes write-protected once a bulk erase has run.
    pub protect_after_erase: bool,
    /// The command engine stops answering after its first Auto-Read.
    pub read_hangs: bool,
    /// The board never comes back from a reboot.
    pub no_reboot: bool,
    /// Reads of this word index return a corrupted value.
    pub corrupt_word: Option<usize>,
}

/// Timing knobs, all counted in polls.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Latency {
    /// Ready polls that fail after a reset.
    pub reset: u32,
    /// Status reads that show a write in progress after a bulk erase.
    pub erase: u32,
    /// ... and after a page commit.
    pub page: u32,
    /// Probes that fail after a reboot request.
    pub reboot: u32,
}

impl Default for Latency {
    fn default() -> Self {
        Self {
            reset: 2,
            erase: 8,
            page: 1,
            reboot: 5,
        }
    }
}

/// Counters for everything the host did to a board.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct MockStats {
    pub reads: usize,
    pub writes: usize,
    pub resets: usize,
    pub commands: usize,
    /// Commands that ran with end-of-command set.
    pub end_of_commands: usize,
    pub erases: usize,
    pub page_commits: usize,
    /// Page-program words thrown away because the latch wasn't set.
    pub dropped_words: usize,
    /// Status reads that came back with a write in progress.
    pub busy_reads: usize,
    pub reboots: usize,
}

#[derive(Clone, Debug)]
pub struct MockBoard {
    rom: BTreeMap<u32, u32>,
    rom_id: u32,
    version: FirmwareVersion,
    reboot_version: Option<FirmwareVersion>,
    faults: Faults,
    latency: Latency,

    control: u32,
    address: u32,
    data: u32,
    readback: u32,
    wel: bool,
    busy: u32,
    page: Option<Vec<(u32, u32)>>,
    not_ready: u32,
    hung: bool,
    rebooting: u32,

    stats: MockStats,
}

impl MockBoard {
    pub fn new(version: FirmwareVersion) -> Self {
        Self {
            rom: BTreeMap::new(),
            rom_id: 0x0020_ba18,
            version,
            reboot_version: None,
            faults: Faults::default(),
            latency: Latency::default(),
            control: 0,
            address: 0,
            data: 0,
            readback: 0,
            wel: false,
            busy: 0,
            page: None,
            not_ready: 0,
            hung: false,
            rebooting: 0,
            stats: MockStats::default(),
        }
    }

    /// Firmware the board will report after its next reboot.
    pub fn with_reboot_version(mut self, v: FirmwareVersion) -> Self {
        self.reboot_version = Some(v);
        self
    }

    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    pub fn with_latency(mut self, latency: Latency) -> Self {
        self.latency = latency;
        self
    }

    /// Preloads the start of the ROM with `words`.
    pub fn with_rom(mut self, words: &[u32]) -> Self {
        for (i, &w) in words.iter().enumerate() {
            self.rom.insert(i as u32, w);
        }
        self
    }

    pub fn faults_mut(&mut self) -> &mut Faults {
        &mut self.faults
    }

    pub fn version(&self) -> FirmwareVersion {
        self.version
    }

    pub fn stats(&self) -> MockStats {
        self.stats
    }

    pub fn clear_stats(&mut self) {
        self.stats = MockStats::default();
    }

    /// The first `count` words of the ROM.
    pub fn rom_words(&self, count: usize) -> Vec<u32> {
        (0..count as u32).map(|i| self.rom_word(i)).collect()
    }

    fn rom_word(&self, index: u32) -> u32 {
        self.rom.get(&index).copied().unwrap_or(ERASED)
    }

    fn is_rebooting(&mut self) -> bool {
        if self.rebooting > 0 {
            self.rebooting -= 1;
            true
        } else {
            false
        }
    }

    pub fn read(&mut self, offset: u32) -> u32 {
        self.stats.reads += 1;
        match offset {
            BOARD_ID => (u32::from(BOARD_TYPE) << 16) | 0x0001,
            CTRL_VERSION | PROC_VERSION if self.is_rebooting() => BUS_NOT_READY,
            CTRL_VERSION => u32::from(self.version.control),
            PROC_VERSION => u32::from(self.version.processing),
            CONFIG_ROM_STATUS0 => self.readback,
            CONFIG_ROM_STATUS1 => {
                if self.faults.never_ready || self.hung {
                    0
                } else if self.not_ready > 0 {
                    self.not_ready -= 1;
                    0
                } else {
                    RomReady::READY.bits()
                }
            }
            CONFIG_ROM_CONTROL0 => self.control,
            CONFIG_ROM_CONTROL1 => self.address,
            CONFIG_ROM_CONTROL2 => self.data,
            _ => 0,
        }
    }

    pub fn write(&mut self, offset: u32, value: u32) {
        self.stats.writes += 1;
        match offset {
            RESET => {
                self.stats.resets += 1;
                self.not_ready = self.latency.reset;
                self.wel = false;
                self.page = None;
            }
            CONFIG_ROM_CONTROL0 => self.write_control(value),
            CONFIG_ROM_CONTROL1 => self.address = value & ROM_ADDRESS_MASK,
            CONFIG_ROM_CONTROL2 => self.data = value,
            _ => {}
        }
    }

    pub fn probe(&mut self, _offset: u32) -> bool {
        !self.is_rebooting()
    }

    fn write_control(&mut self, value: u32) {
        let prev = RomControl::from_bits_truncate(self.control);
        let now = RomControl::from_bits_truncate(value);
        self.control = value;

        if now.contains(RomControl::REBOOT_FPGA) {
            self.reboot();
            return;
        }
        if now.contains(RomControl::EXECUTE)
            && !prev.contains(RomControl::EXECUTE)
        {
            let eoc = now.contains(RomControl::END_OF_COMMAND);
            self.execute((value & ROM_OPCODE_MASK) as u8, eoc);
        }
    }

    fn reboot(&mut self) {
        self.stats.reboots += 1;
        self.rebooting = if self.faults.no_reboot {
            u32::MAX
        } else {
            self.latency.reboot
        };
        if let Some(v) = self.reboot_version {
            self.version = v;
        }
        self.wel = false;
        self.page = None;
    }

    fn execute(&mut self, opcode: u8, eoc: bool) {
        self.stats.commands += 1;
        if eoc {
            self.stats.end_of_commands += 1;
        }
        let Some(op) = RomOpcode::from_u8(opcode) else {
            log::warn!("mock: unknown rom opcode {opcode:#04x}");
            return;
        };
        match op {
            RomOpcode::WriteEnable => {
                self.wel = !self.faults.write_protected;
            }
            RomOpcode::WriteDisable => self.wel = false,
            RomOpcode::ReadId => self.readback = self.rom_id,
            RomOpcode::ReadStatus1 => {
                let mut status = RomStatus1::empty();
                if self.busy > 0 {
                    self.busy -= 1;
                    self.stats.busy_reads += 1;
                    status |= RomStatus1::WIP;
                }
                if self.wel {
                    status |= RomStatus1::WEL;
                }
                self.readback = status.bits();
            }
            RomOpcode::BulkErase => {
                if self.wel && self.busy == 0 {
                    self.stats.erases += 1;
                    self.rom.clear();
                    self.wel = false;
                    if self.faults.protect_after_erase {
                        self.faults.write_protected = true;
                    }
                    self.busy = if self.faults.erase_stuck {
                        u32::MAX
                    } else {
                        self.latency.erase
                    };
                }
            }
            RomOpcode::PageProgram => self.page_program(eoc),
            RomOpcode::AutoRead => {
                let index = self.address / WORD_SIZE_BYTES as u32;
                let mut word = self.rom_word(index);
                if self.faults.corrupt_word == Some(index as usize) {
                    word ^= 0x0000_0100;
                }
                self.readback = word;
                self.hung |= self.faults.read_hangs;
            }
        }
    }

    fn page_program(&mut self, eoc: bool) {
        let index = self.address / WORD_SIZE_BYTES as u32;
        let data = self.data;
        if let Some(page) = self.page.as_mut() {
            page.push((index, data));
        } else if self.wel && self.busy == 0 {
            self.page = Some(vec![(index, data)]);
        } else {
            self.stats.dropped_words += 1;
            return;
        }
        if eoc {
            for (index, word) in self.page.take().unwrap_or_default() {
                // Programming can only clear bits.
                let old = self.rom_word(index);
                self.rom.insert(index, old & word);
            }
            self.stats.page_commits += 1;
            self.wel = false;
            self.busy = self.latency.page;
        }
    }
}

/// A crate full of [`MockBoard`]s, at their geographic addresses.
#[derive(Clone, Debug, Default)]
pub struct MockCrate {
    boards: BTreeMap<Slot, MockBoard>,
}

impl MockCrate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_board(mut self, slot: Slot, board: MockBoard) -> Self {
        self.boards.insert(slot, board);
        self
    }

    pub fn board(&self, slot: Slot) -> Option<&MockBoard> {
        self.boards.get(&slot)
    }

    pub fn board_mut(&mut self, slot: Slot) -> Option<&mut MockBoard> {
        self.boards.get_mut(&slot)
    }

    pub fn slots(&self) -> impl Iterator<Item = Slot> + '_ {
        self.boards.keys().copied()
    }

    pub fn clear_stats(&mut self) {
        self.boards.values_mut().for_each(MockBoard::clear_stats);
    }

    fn decode(&mut self, addr: u32) -> Option<(&mut MockBoard, u32)> {
        let slot = Slot::try_from(addr / SLOT_WINDOW).ok()?;
        let offset = addr % SLOT_WINDOW;
        self.boards.get_mut(&slot).map(|b| (b, offset))
    }
}

impl RegisterPort for MockCrate {
    fn read32(&mut self, addr: u32) -> u32 {
        match self.decode(addr) {
            Some((board, offset)) => board.read(offset),
            None => BUS_NOT_READY,
        }
    }

    fn write32(&mut self, addr: u32, value: u32) {
        if let Some((board, offset)) = self.decode(addr) {
            board.write(offset, value);
        }
    }

    fn probe(&mut self, addr: u32) -> bool {
        match self.decode(addr) {
            Some((board, offset)) => board.probe(offset),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec(b: &mut MockBoard, op: RomOpcode, eoc: bool) {
        let mut v = u32::from(u8::from(op));
        if eoc {
            v |= RomControl::END_OF_COMMAND.bits();
        }
        b.write(CONFIG_ROM_CONTROL0, v);
        b.write(CONFIG_ROM_CONTROL0, v | RomControl::EXECUTE.bits());
        b.write(CONFIG_ROM_CONTROL0, v);
    }

    fn program(b: &mut MockBoard, addr: u32, word: u32, eoc: bool) {
        b.write(CONFIG_ROM_CONTROL1, addr);
        b.write(CONFIG_ROM_CONTROL2, word);
        exec(b, RomOpcode::PageProgram, eoc);
    }

    fn board() -> MockBoard {
        MockBoard::new(FirmwareVersion::new(1, 2))
    }

    #[test]
    fn page_needs_write_enable() {
        let mut b = board();
        program(&mut b, 0, 0x1234, true);
        assert_eq!(b.stats().dropped_words, 1);
        assert_eq!(b.rom_words(1), [ERASED]);

        exec(&mut b, RomOpcode::WriteEnable, false);
        program(&mut b, 0, 0x1234, false);
        program(&mut b, 4, 0x5678, true);
        assert_eq!(b.rom_words(3), [0x1234, 0x5678, ERASED]);
        assert_eq!(b.stats().page_commits, 1);
        assert!(!b.wel);
    }

    #[test]
    fn status_reports_busy_then_idle() {
        let mut b = board().with_latency(Latency {
            erase: 2,
            ..Default::default()
        });
        exec(&mut b, RomOpcode::WriteEnable, false);
        exec(&mut b, RomOpcode::BulkErase, false);

        let mut wip = Vec::new();
        for _ in 0..3 {
            exec(&mut b, RomOpcode::ReadStatus1, false);
            wip.push(b.read(CONFIG_ROM_STATUS0) & RomStatus1::WIP.bits());
        }
        assert_eq!(wip, [1, 1, 0]);
        assert_eq!(b.stats().erases, 1);
    }

    #[test]
    fn erase_can_leave_part_protected() {
        let mut b = board().with_faults(Faults {
            protect_after_erase: true,
            ..Default::default()
        });
        exec(&mut b, RomOpcode::WriteEnable, false);
        assert!(b.wel);
        exec(&mut b, RomOpcode::BulkErase, false);
        exec(&mut b, RomOpcode::WriteEnable, false);
        assert!(!b.wel);
        assert!(b.faults.write_protected);
    }

    #[test]
    fn hung_engine_stops_reporting_ready() {
        let mut b = board().with_faults(Faults {
            read_hangs: true,
            ..Default::default()
        });
        assert_ne!(b.read(CONFIG_ROM_STATUS1), 0);
        b.write(CONFIG_ROM_CONTROL1, 0);
        exec(&mut b, RomOpcode::AutoRead, false);
        assert_eq!(b.read(CONFIG_ROM_STATUS1), 0);
    }

    #[test]
    fn reboot_drops_off_bus() {
        let mut b = board()
            .with_reboot_version(FirmwareVersion::new(3, 4))
            .with_latency(Latency {
                reboot: 2,
                ..Default::default()
            });
        b.write(CONFIG_ROM_CONTROL0, RomControl::REBOOT_FPGA.bits());
        assert!(!b.probe(CTRL_VERSION));
        assert_eq!(b.read(CTRL_VERSION), BUS_NOT_READY);
        assert!(b.probe(CTRL_VERSION));
        assert_eq!(b.read(CTRL_VERSION), 3);
    }

    #[test]
    fn crate_decodes_slots() {
        let slot = Slot::try_from(4).unwrap();
        let mut c = MockCrate::new().with_board(slot, board());
        let base = slot.geographic_base();
        assert_eq!(c.read32(base + BOARD_ID) >> 16, u32::from(BOARD_TYPE));
        assert_eq!(c.read32(base + PROC_VERSION), 2);
        assert!(c.probe(base));
        assert!(!c.probe(Slot::FIRST.geographic_base()));
        assert_eq!(c.read32(0x10), BUS_NOT_READY);
    }
}
