// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Framing of single commands onto the ROM command engine.
//!
//! Nothing in here retries or waits. Callers are expected to have polled for
//! "ready" (see [`crate::poll`]) before every [`RomProtocol::issue`].

use drv_fadc_api::{
    RomControl, RomOpcode, RomReady, CONFIG_ROM_CONTROL0, CONFIG_ROM_CONTROL1,
    CONFIG_ROM_CONTROL2, CONFIG_ROM_STATUS0, CONFIG_ROM_STATUS1,
    ROM_ADDRESS_MASK,
};
use drv_vme_api::{Board, RegisterPort};

/// One command for the ROM, with its optional operands.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RomCommand {
    pub opcode: RomOpcode,
    pub address: Option<u32>,
    pub data: Option<u32>,
    pub end_of_command: bool,
}

impl RomCommand {
    pub const fn new(opcode: RomOpcode) -> Self {
        Self {
            opcode,
            address: None,
            data: None,
            end_of_command: false,
        }
    }

    /// Attaches a ROM address; only the low 24 bits are kept.
    pub const fn address(mut self, address: u32) -> Self {
        self.address = Some(address & ROM_ADDRESS_MASK);
        self
    }

    pub const fn data(mut self, data: u32) -> Self {
        self.data = Some(data);
        self
    }

    pub const fn end_of_command(mut self, eoc: bool) -> Self {
        self.end_of_command = eoc;
        self
    }

    /// Command register value for this command, with `extra` control bits.
    fn control(&self, extra: RomControl) -> u32 {
        let mut bits = extra;
        if self.end_of_command {
            bits |= RomControl::END_OF_COMMAND;
        }
        u32::from(u8::from(self.opcode)) | bits.bits()
    }
}

/// Raw command access to one board's configuration ROM.
pub struct RomProtocol<'a, P> {
    board: Board<'a, P>,
}

impl<P> Clone for RomProtocol<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for RomProtocol<'_, P> {}

impl<'a, P: RegisterPort> RomProtocol<'a, P> {
    pub fn new(board: Board<'a, P>) -> Self {
        Self { board }
    }

    pub fn board(&self) -> Board<'a, P> {
        self.board
    }

    /// Writes `cmd` to the command engine as one bus transaction:
    ///
    /// 1. opcode (plus end-of-command, if set) to the command register
    /// 2. the address, if any
    /// 3. the data, if any
    /// 4. opcode plus execute, which latches the command
    /// 5. opcode without execute, re-arming for the next command
    pub fn issue(&self, cmd: RomCommand) {
        log::trace!(
            "slot {}: {:?} addr {:x?} data {:x?} eoc {}",
            self.board.slot(),
            cmd.opcode,
            cmd.address,
            cmd.data,
            cmd.end_of_command,
        );
        self.board.transaction(|regs| {
            regs.write(CONFIG_ROM_CONTROL0, cmd.control(RomControl::empty()));
            if let Some(address) = cmd.address {
                regs.write(CONFIG_ROM_CONTROL1, address);
            }
            if let Some(data) = cmd.data {
                regs.write(CONFIG_ROM_CONTROL2, data);
            }
            regs.write(CONFIG_ROM_CONTROL0, cmd.control(RomControl::EXECUTE));
            regs.write(CONFIG_ROM_CONTROL0, cmd.control(RomControl::empty()));
        })
    }

    /// Reads the readback register: ID bytes, a status byte, or a data word,
    /// depending on the last command.
    pub fn read_status(&self) -> u32 {
        self.board.read(CONFIG_ROM_STATUS0)
    }

    /// Checks the command engine's ready bit.
    pub fn ready(&self) -> bool {
        RomReady::from_bits_retain(self.board.read(CONFIG_ROM_STATUS1))
            .contains(RomReady::READY)
    }

    /// Asks both FPGAs to reconfigure from the ROM.
    pub fn reboot(&self) {
        self.board.write(CONFIG_ROM_CONTROL0, RomControl::REBOOT_FPGA.bits());
    }
}
