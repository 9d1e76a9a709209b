// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;

use crate::{Board, RegisterPort, VmeBus, VmeError};

/// Number of slots in a VME crate. Slots are numbered from 1.
pub const SLOT_COUNT: u32 = 21;

/// Each slot decodes a 512 KiB window of A24 space under VME64x geographic
/// addressing.
const GEO_ADDR_SHIFT: u32 = 19;

// Every slot's window has to land inside A24 space.
const _: () = assert!((SLOT_COUNT << GEO_ADDR_SHIFT) < (1 << 24));

/// A verified slot number, always in `1..=SLOT_COUNT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Slot(u32);

impl Slot {
    pub const FIRST: Slot = Slot(1);
    pub const LAST: Slot = Slot(SLOT_COUNT);

    /// Get the slot number.
    #[inline]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Bit for this slot in a crate-wide mask; bit N is slot N.
    #[inline]
    pub const fn mask(self) -> u32 {
        1 << self.0
    }

    /// Base address of this slot under geographic addressing.
    #[inline]
    pub const fn geographic_base(self) -> u32 {
        self.0 << GEO_ADDR_SHIFT
    }

    /// Iterates over every slot in the crate, in order.
    pub fn all() -> impl Iterator<Item = Slot> {
        (Self::FIRST.0..=Self::LAST.0).map(Slot)
    }
}

impl TryFrom<u32> for Slot {
    type Error = VmeError;

    fn try_from(value: u32) -> Result<Self, VmeError> {
        if value == 0 || value > SLOT_COUNT {
            return Err(VmeError::SlotOutOfRange(value));
        }
        Ok(Self(value))
    }
}

impl core::fmt::Display for Slot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Which slots hold a board, and where each board's registers start.
#[derive(Clone, Debug, Default)]
pub struct BoardRegistry {
    boards: BTreeMap<Slot, u32>,
}

impl BoardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walks every slot in the crate, probing the register at `id_offset`
    /// under the slot's geographic base address. Slots whose register answers
    /// and satisfies `accept` are recorded.
    pub fn discover<P: RegisterPort>(
        bus: &VmeBus<P>,
        id_offset: u32,
        accept: impl Fn(u32) -> bool,
    ) -> Self {
        let mut registry = Self::new();
        for slot in Slot::all() {
            let board = Board::new(bus, slot, slot.geographic_base());
            match board.probe(id_offset) {
                Some(id) if accept(id) => {
                    log::debug!("slot {slot}: found board, id {id:#010x}");
                    registry.insert(slot, board.base());
                }
                Some(id) => {
                    log::debug!("slot {slot}: ignoring board, id {id:#010x}");
                }
                None => {}
            }
        }
        registry
    }

    /// Records a board at `base` in `slot`, replacing any previous entry.
    pub fn insert(&mut self, slot: Slot, base: u32) {
        self.boards.insert(slot, base);
    }

    pub fn len(&self) -> usize {
        self.boards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }

    /// Slots holding a board, in ascending order.
    pub fn slots(&self) -> impl Iterator<Item = Slot> + '_ {
        self.boards.keys().copied()
    }

    /// Mask with bit N set for every occupied slot N.
    pub fn mask(&self) -> u32 {
        self.slots().fold(0, |m, s| m | s.mask())
    }

    /// Maps a user-supplied slot number to an occupied slot.
    ///
    /// Slot 0 means "the first board we know about". Anything else must be a
    /// valid slot number with a board in it.
    pub fn resolve(&self, slot: u32) -> Result<(Slot, u32), VmeError> {
        if slot == 0 {
            return self
                .boards
                .iter()
                .next()
                .map(|(&s, &base)| (s, base))
                .ok_or(VmeError::NoBoards);
        }
        let slot = Slot::try_from(slot)?;
        self.boards
            .get(&slot)
            .map(|&base| (slot, base))
            .ok_or(VmeError::NotInitialized(slot))
    }

    /// Resolves `slot` (see [`BoardRegistry::resolve`]) to a board handle.
    pub fn board<'a, P: RegisterPort>(
        &self,
        bus: &'a VmeBus<P>,
        slot: u32,
    ) -> Result<Board<'a, P>, VmeError> {
        let (slot, base) = self.resolve(slot)?;
        Ok(Board::new(bus, slot, base))
    }

    /// Handles for every registered board, in slot order.
    pub fn boards<'a, 'r, P: RegisterPort>(
        &'r self,
        bus: &'a VmeBus<P>,
    ) -> impl Iterator<Item = Board<'a, P>> + 'r
    where
        'a: 'r,
    {
        self.boards
            .iter()
            .map(move |(&slot, &base)| Board::new(bus, slot, base))
    }
}
