// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! flashbyte-prog - Physical programming primitive

use flashbyte_core::flash::EraseRegion;
use flashbyte_core::unit::{ByteAddress, UnitAddress, UnitWord};

use crate::{EraseError, ProgramError};

/// The physical operations supported by a unit programmable flash.
///
/// Implemented by [`crate::FlashController`] for real hardware and by
/// [`crate::sim::SimFlash`] for an in-memory flash.
///
/// Programming can only clear bits.  Implementations must fail, rather than
/// silently store a different value, when asked to set a bit that is
/// currently clear.
pub trait ProgrammingUnitPrimitive {
    /// Reads the current value of a programming unit.  Non-destructive.
    fn read_unit(&self, unit: UnitAddress) -> UnitWord;

    /// Reads a single byte.  Non-destructive.
    fn read_byte_physical(&self, addr: ByteAddress) -> u8;

    /// Programs a unit.  Irreversible until the containing region is erased.
    ///
    /// Arguments:
    /// - `unit`: The unit to program.
    /// - `value`: The value to program.
    ///
    /// Returns:
    /// - `Ok(())`: The unit now holds `value`.
    /// - `Err(ProgramError)`: The program operation was rejected or failed.
    ///   Device errors carry the device's code, unchanged.
    fn program_unit(&mut self, unit: UnitAddress, value: UnitWord) -> Result<(), ProgramError>;

    /// Erases a region, returning every byte in it to `0xFF`.
    fn erase(&mut self, region: EraseRegion) -> Result<(), EraseError>;
}

impl<P: ProgrammingUnitPrimitive + ?Sized> ProgrammingUnitPrimitive for &mut P {
    fn read_unit(&self, unit: UnitAddress) -> UnitWord {
        (**self).read_unit(unit)
    }

    fn read_byte_physical(&self, addr: ByteAddress) -> u8 {
        (**self).read_byte_physical(addr)
    }

    fn program_unit(&mut self, unit: UnitAddress, value: UnitWord) -> Result<(), ProgramError> {
        (**self).program_unit(unit, value)
    }

    fn erase(&mut self, region: EraseRegion) -> Result<(), EraseError> {
        (**self).erase(region)
    }
}
