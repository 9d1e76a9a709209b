// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! API crate for the flash-ADC board's register map.
//!
//! The board carries a configuration ROM (a serial NOR part behind a small
//! command engine in the control FPGA). The host drives that engine through
//! five registers: a command register, an address register, a data register,
//! and two status registers. See [`RomOpcode`] for the commands we know how to
//! send.

use bitflags::bitflags;
use drv_vme_api::{Board, RegisterPort};
use num_derive::FromPrimitive;

/// Board identification register; bits 31:16 hold [`BOARD_TYPE`].
pub const BOARD_ID: u32 = 0x0000;
/// Control FPGA firmware version, bits 15:0. Reads back all-ones while the
/// FPGAs are reconfiguring.
pub const CTRL_VERSION: u32 = 0x0004;
/// Processing FPGA firmware version, bits 15:0.
pub const PROC_VERSION: u32 = 0x0008;
/// Soft/hard reset register; see [`Reset`].
pub const RESET: u32 = 0x0010;

/// Command register: opcode in bits 7:0, plus [`RomControl`] bits.
pub const CONFIG_ROM_CONTROL0: u32 = 0x0120;
/// Address register: 24-bit ROM address.
pub const CONFIG_ROM_CONTROL1: u32 = 0x0124;
/// Data register: 32-bit write data.
pub const CONFIG_ROM_CONTROL2: u32 = 0x0128;
/// Readback of ID bytes, status bytes, or read data, depending on the last
/// command.
pub const CONFIG_ROM_STATUS0: u32 = 0x012C;
/// Command engine status; see [`RomReady`].
pub const CONFIG_ROM_STATUS1: u32 = 0x0130;

/// Value of the board-type field of [`BOARD_ID`].
pub const BOARD_TYPE: u16 = 0xfadc;

pub const PAGE_SIZE_BYTES: usize = 256;
pub const WORD_SIZE_BYTES: usize = 4;
pub const WORDS_PER_PAGE: usize = PAGE_SIZE_BYTES / WORD_SIZE_BYTES;

/// The ROM is addressed with 24 bits.
pub const ROM_ADDRESS_MASK: u32 = 0x00FF_FFFF;
pub const ROM_CAPACITY_BYTES: usize = ROM_ADDRESS_MASK as usize + 1;

/// Word written after the last word of an image to close the final page.
pub const FLUSH_WORD: u32 = 0xFFFF_FFFF;

const _: () = assert!(PAGE_SIZE_BYTES % WORD_SIZE_BYTES == 0);
const _: () = assert!(ROM_CAPACITY_BYTES % PAGE_SIZE_BYTES == 0);

/// Commands understood by the configuration ROM.
///
/// This is deliberately not the part's whole command set; it's the handful
/// the update engine needs.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum RomOpcode {
    WriteDisable = 0x04,
    ReadStatus1 = 0x05,
    WriteEnable = 0x06,
    PageProgram = 0x12,
    AutoRead = 0x13,
    BulkErase = 0x60,
    ReadId = 0x9F,
}

impl From<RomOpcode> for u8 {
    fn from(op: RomOpcode) -> u8 {
        op as u8
    }
}

bitflags! {
    /// Control bits sharing [`CONFIG_ROM_CONTROL0`] with the opcode.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct RomControl: u32 {
        /// Closes the ROM's internal page buffer after this command.
        const END_OF_COMMAND = 1 << 8;
        /// Rising edge latches the command for execution.
        const EXECUTE = 1 << 9;
        /// Reconfigures both FPGAs from the ROM.
        const REBOOT_FPGA = 1 << 11;
    }
}

/// Opcode field of [`CONFIG_ROM_CONTROL0`].
pub const ROM_OPCODE_MASK: u32 = 0xFF;

bitflags! {
    /// [`CONFIG_ROM_STATUS1`] bits.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct RomReady: u32 {
        /// The command engine can accept another command.
        const READY = 1 << 1;
        const _ = !0;
    }
}

bitflags! {
    /// Status register 1 of the ROM, as returned by
    /// [`RomOpcode::ReadStatus1`] in [`CONFIG_ROM_STATUS0`].
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct RomStatus1: u32 {
        /// Write in progress.
        const WIP = 1 << 0;
        /// Write-enable latch.
        const WEL = 1 << 1;
        const _ = !0;
    }
}

bitflags! {
    /// [`RESET`] bits.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Reset: u32 {
        const SOFT = 1 << 0;
        const HARD = 1 << 1;
    }
}

/// Firmware loaded into the board's two FPGAs.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FirmwareVersion {
    pub control: u16,
    pub processing: u16,
}

impl FirmwareVersion {
    pub const fn new(control: u16, processing: u16) -> Self {
        Self {
            control,
            processing,
        }
    }

    /// Control version in the upper half, processing version in the lower.
    pub const fn combined(self) -> u32 {
        ((self.control as u32) << 16) | self.processing as u32
    }

    pub const fn from_combined(v: u32) -> Self {
        Self::new((v >> 16) as u16, v as u16)
    }

    /// Reads both version registers in one bus transaction.
    pub fn read<P: RegisterPort>(board: &Board<'_, P>) -> Self {
        board.transaction(|regs| {
            let control = regs.read(CTRL_VERSION) as u16;
            let processing = regs.read(PROC_VERSION) as u16;
            Self::new(control, processing)
        })
    }
}

impl core::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#06x}/{:#06x}", self.control, self.processing)
    }
}

/// Checks a [`BOARD_ID`] value for our board type.
pub fn is_fadc_board(id: u32) -> bool {
    (id >> 16) as u16 == BOARD_TYPE
}
