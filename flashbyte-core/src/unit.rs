// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! flashbyte-core - Programming unit objects
//!
//! The flash peripherals targeted by flashbyte program in 16-bit half-words,
//! each aligned on a 2 byte boundary.  A half-word can only be programmed
//! from the erased state (all ones), as programming can only clear bits.
//!
//! This module contains the types used to split a byte address into the
//! half-word containing it, and the byte lane within that half-word.

use core::fmt;
use static_assertions::{const_assert, const_assert_eq};

/// An absolute byte address on the target's bus.
pub type ByteAddress = u32;

/// The value of a single programming unit.
pub type UnitWord = u16;

/// Size of a programming unit in bytes.
pub const UNIT_BYTES: u32 = 2;

/// Value of a programming unit after an erase.
pub const ERASED_UNIT: UnitWord = 0xFFFF;

/// Value of a single byte after an erase.
pub const ERASED_BYTE: u8 = 0xFF;

const_assert!(UNIT_BYTES.is_power_of_two());
const_assert_eq!(UNIT_BYTES as usize, core::mem::size_of::<UnitWord>());

/// Address of a programming unit.  Always aligned to [`UNIT_BYTES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitAddress(u32);

impl UnitAddress {
    /// Creates a `UnitAddress` from an address that must already be
    /// aligned.
    ///
    /// Returns:
    /// - `Some(UnitAddress)`: if `addr` is aligned to [`UNIT_BYTES`].
    /// - `None`: if `addr` is not aligned.
    pub const fn new(addr: u32) -> Option<Self> {
        if addr % UNIT_BYTES == 0 {
            Some(Self(addr))
        } else {
            None
        }
    }

    /// Returns the address of the unit containing the given byte.
    pub const fn containing(addr: ByteAddress) -> Self {
        Self(addr & !(UNIT_BYTES - 1))
    }

    /// Raw address value
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Returns the byte address of the given lane within this unit.
    pub const fn byte_address(&self, lane: Lane) -> ByteAddress {
        self.0 + lane.index()
    }

    /// Returns the address of the unit `count` units after this one.
    pub const fn offset_units(&self, count: u32) -> Self {
        Self(self.0 + count * UNIT_BYTES)
    }
}

impl From<UnitAddress> for u32 {
    fn from(addr: UnitAddress) -> Self {
        addr.0
    }
}

impl fmt::Display for UnitAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Byte lane within a programming unit.  Units are little endian, so the
/// low lane is at the lower address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Bits 0-7, at the unit's address
    Low,

    /// Bits 8-15, at the unit's address + 1
    High,
}

impl Lane {
    /// Returns the lane the given byte address falls in.
    pub const fn of(addr: ByteAddress) -> Self {
        if addr % UNIT_BYTES == 0 {
            Lane::Low
        } else {
            Lane::High
        }
    }

    /// Byte offset of this lane from the start of the unit.
    pub const fn index(&self) -> u32 {
        match self {
            Lane::Low => 0,
            Lane::High => 1,
        }
    }

    /// Bit shift of this lane within a [`UnitWord`].
    pub const fn shift(&self) -> u32 {
        self.index() * 8
    }

    /// Whether this is the last lane of the unit, which completes it.
    pub const fn is_top(&self) -> bool {
        self.index() == UNIT_BYTES - 1
    }
}

/// Splits a byte address into the unit containing it, and its lane.
pub const fn split_address(addr: ByteAddress) -> (UnitAddress, Lane) {
    (UnitAddress::containing(addr), Lane::of(addr))
}

/// Extracts the byte in the given lane of a unit value.
pub const fn lane_byte(word: UnitWord, lane: Lane) -> u8 {
    (word >> lane.shift()) as u8
}

/// Places a byte into the given lane of an otherwise zero unit value.
pub const fn lane_word(byte: u8, lane: Lane) -> UnitWord {
    (byte as UnitWord) << lane.shift()
}

/// Whether `new` can be programmed over `current` without an erase, i.e.
/// no bit has to go from 0 to 1.
pub const fn clears_only(current: UnitWord, new: UnitWord) -> bool {
    new & !current == 0
}

/// A programming unit: its address and value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgrammingUnit {
    address: UnitAddress,
    value: UnitWord,
}

impl ProgrammingUnit {
    pub const fn new(address: UnitAddress, value: UnitWord) -> Self {
        Self { address, value }
    }

    pub const fn address(&self) -> UnitAddress {
        self.address
    }

    pub const fn value(&self) -> UnitWord {
        self.value
    }

    /// Whether this unit holds the erased pattern.
    pub const fn is_erased(&self) -> bool {
        self.value == ERASED_UNIT
    }

    /// The byte held in the given lane.
    pub const fn byte(&self, lane: Lane) -> u8 {
        lane_byte(self.value, lane)
    }
}

impl fmt::Display for ProgrammingUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: 0x{:04X}", self.address, self.value)
    }
}
