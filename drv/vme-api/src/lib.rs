// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! API crate for talking to boards in a VME crate.
//!
//! Everything that touches the bus goes through a [`RegisterPort`], which is
//! supplied by whoever owns the actual bus bridge (a kernel window device, a
//! simulator, ...). The port is wrapped in a [`VmeBus`], which holds the one
//! exclusive lock for the process: every multi-register transaction is "lock,
//! write sequence, unlock", and nothing else in the system synchronizes.
//!
//! Boards are addressed by [`Slot`]. A [`BoardRegistry`] records which slots
//! actually hold a board and hands out [`Board`] handles, which know their base
//! address and nothing else.

use spin::{Mutex, MutexGuard};

mod slot;

pub use slot::{BoardRegistry, Slot, SLOT_COUNT};

/// Value read back from an address where nothing (yet) drives the bus.
pub const BUS_NOT_READY: u32 = 0xFFFF_FFFF;

/// Errors that can be produced when resolving a board.
///
/// These are all precondition failures: they are reported before any register
/// I/O is attempted on the board in question.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum VmeError {
    #[error("slot {0} is out of range (1..={max})", max = SLOT_COUNT)]
    SlotOutOfRange(u32),
    #[error("no board initialized in slot {0}")]
    NotInitialized(Slot),
    #[error("no boards found in crate")]
    NoBoards,
}

/// Raw 32-bit access to the bus.
///
/// Implementations don't need to do any locking of their own; [`VmeBus`]
/// guarantees exclusive access.
pub trait RegisterPort {
    /// Reads the 32-bit register at `addr`.
    fn read32(&mut self, addr: u32) -> u32;

    /// Writes `value` to the 32-bit register at `addr`.
    fn write32(&mut self, addr: u32, value: u32);

    /// Checks whether anything responds at `addr`, without faulting if nothing
    /// does.
    fn probe(&mut self, addr: u32) -> bool;
}

impl<P: RegisterPort + ?Sized> RegisterPort for &mut P {
    fn read32(&mut self, addr: u32) -> u32 {
        (**self).read32(addr)
    }

    fn write32(&mut self, addr: u32, value: u32) {
        (**self).write32(addr, value)
    }

    fn probe(&mut self, addr: u32) -> bool {
        (**self).probe(addr)
    }
}

/// The bus, and the lock that serializes all access to it.
#[derive(Debug)]
pub struct VmeBus<P> {
    port: Mutex<P>,
}

impl<P: RegisterPort> VmeBus<P> {
    pub fn new(port: P) -> Self {
        Self {
            port: Mutex::new(port),
        }
    }

    /// Takes the bus lock. Hold the guard for exactly one transaction.
    pub fn lock(&self) -> MutexGuard<'_, P> {
        self.port.lock()
    }

    /// Consumes the bus, returning the underlying port.
    pub fn into_inner(self) -> P {
        self.port.into_inner()
    }
}

/// A handle on one board: the bus it sits on, its slot, and its base address.
///
/// Handles are cheap to copy; they don't own anything.
pub struct Board<'a, P> {
    bus: &'a VmeBus<P>,
    slot: Slot,
    base: u32,
}

impl<P> Clone for Board<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for Board<'_, P> {}

impl<'a, P: RegisterPort> Board<'a, P> {
    pub fn new(bus: &'a VmeBus<P>, slot: Slot, base: u32) -> Self {
        Self { bus, slot, base }
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// Reads a single register, taking the bus lock for just that access.
    pub fn read(&self, offset: u32) -> u32 {
        self.transaction(|regs| regs.read(offset))
    }

    /// Writes a single register, taking the bus lock for just that access.
    pub fn write(&self, offset: u32, value: u32) {
        self.transaction(|regs| regs.write(offset, value))
    }

    /// Probes a single register, returning its value if the board answered.
    pub fn probe(&self, offset: u32) -> Option<u32> {
        self.transaction(|regs| regs.probe(offset))
    }

    /// Runs `body` with the bus locked. Every register access made through
    /// `regs` is part of one uninterrupted transaction.
    pub fn transaction<R>(
        &self,
        body: impl FnOnce(&mut BoardRegs<'_, P>) -> R,
    ) -> R {
        let mut port = self.bus.lock();
        let mut regs = BoardRegs {
            port: &mut *port,
            base: self.base,
        };
        body(&mut regs)
    }
}

impl<P> core::fmt::Debug for Board<'_, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Board")
            .field("slot", &self.slot)
            .field("base", &format_args!("{:#08x}", self.base))
            .finish()
    }
}

/// Register view of a board while the bus lock is held.
pub struct BoardRegs<'a, P> {
    port: &'a mut P,
    base: u32,
}

impl<P: RegisterPort> BoardRegs<'_, P> {
    pub fn read(&mut self, offset: u32) -> u32 {
        self.port.read32(self.base + offset)
    }

    pub fn write(&mut self, offset: u32, value: u32) {
        self.port.write32(self.base + offset, value)
    }

    pub fn probe(&mut self, offset: u32) -> Option<u32> {
        let addr = self.base + offset;
        if self.port.probe(addr) {
            Some(self.port.read32(addr))
        } else {
            None
        }
    }
}
