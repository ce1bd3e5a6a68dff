// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! flashbyte-prog - Byte write coalescing
//!
//! Contains [`UnitWriteCoalescer`], which presents a byte addressable
//! write/read interface over a [`ProgrammingUnitPrimitive`].
//!
//! Bytes are assembled into a single pending unit.  The unit is programmed
//! when its top (high) lane is written, when a write targets a different
//! unit, or when the caller flushes.  Writing the low lane never programs
//! by itself.
//!
//! While a unit is pending, reads of its low lane are served from the
//! pending value.  Reads of the high lane always come from the flash, so a
//! high byte that was refused programming is not visible.

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};

use flashbyte_core::unit::{
    ByteAddress, ERASED_UNIT, Lane, ProgrammingUnit, UnitAddress, UnitWord, clears_only,
    lane_byte, lane_word, split_address,
};

use crate::ProgramError;
use crate::primitive::ProgrammingUnitPrimitive;

/// The result of a write or flush that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The byte was stored in the pending unit.  Nothing was programmed.
    Buffered,

    /// The pending unit was programmed, and is no longer pending.
    Programmed,

    /// Programming the pending unit was refused by the [`ProgramGuard`].
    /// Nothing was programmed and the unit is still pending.
    Deferred,

    /// There was nothing pending to program.
    Idle,
}

/// Decides whether a pending unit may be programmed over the unit's current
/// contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum ProgramGuard {
    /// Permit programming when the unit is erased, or when the pending
    /// value is `0x0000`.  The latter is the only value the STM32F3 allows
    /// over a programmed half-word.
    #[default]
    ErasedOrZero,

    /// Permit programming when no bit would go from 0 to 1.
    ClearOnly,
}

impl ProgramGuard {
    /// Whether `pending` may be programmed over a unit reading `current`.
    pub fn permits(&self, current: UnitWord, pending: UnitWord) -> bool {
        match self {
            ProgramGuard::ErasedOrZero => current == ERASED_UNIT || pending == 0x0000,
            ProgramGuard::ClearOnly => clears_only(current, pending),
        }
    }
}

/// Assembles single byte writes into programming units.
///
/// Holds at most one pending unit.  The pending value starts at `0x0000`
/// and written bytes are ORed into it, so a lane that was never written is
/// programmed as `0x00`.
///
/// Program failures are returned unchanged.  The coalescer never retries a
/// failed unit, as re-programming it without an erase is unsafe, and the
/// pending unit is discarded on every program attempt, successful or not.
///
/// Example:
///
/// ```
/// use flashbyte_core::Board;
/// use flashbyte_prog::sim::SimFlash;
/// use flashbyte_prog::{UnitWriteCoalescer, WriteOutcome};
///
/// let mut coalescer = UnitWriteCoalescer::new(SimFlash::for_board(Board::NucleoF303re));
/// assert_eq!(coalescer.write_byte(0x0800_8000, 0x12), Ok(WriteOutcome::Buffered));
/// assert_eq!(coalescer.write_byte(0x0800_8001, 0x34), Ok(WriteOutcome::Programmed));
/// assert_eq!(coalescer.read_byte(0x0800_8001), 0x34);
/// ```
#[derive(Debug)]
pub struct UnitWriteCoalescer<P> {
    primitive: P,
    base: Option<UnitAddress>,
    assembled: UnitWord,
    guard: ProgramGuard,
}

impl<P: ProgrammingUnitPrimitive> UnitWriteCoalescer<P> {
    /// Creates a coalescer using the default [`ProgramGuard`].
    pub fn new(primitive: P) -> Self {
        Self::with_guard(primitive, ProgramGuard::default())
    }

    pub fn with_guard(primitive: P, guard: ProgramGuard) -> Self {
        Self {
            primitive,
            base: None,
            assembled: 0,
            guard,
        }
    }

    /// Whether a unit is pending.
    pub fn has_pending_write(&self) -> bool {
        self.base.is_some()
    }

    /// Returns the pending unit, if any.
    pub fn pending(&self) -> Option<ProgrammingUnit> {
        self.base
            .map(|base| ProgrammingUnit::new(base, self.assembled))
    }

    pub fn guard(&self) -> ProgramGuard {
        self.guard
    }

    pub fn set_guard(&mut self, guard: ProgramGuard) {
        self.guard = guard;
    }

    pub fn primitive(&self) -> &P {
        &self.primitive
    }

    pub fn primitive_mut(&mut self) -> &mut P {
        &mut self.primitive
    }

    /// Returns the primitive.  Any pending unit is lost.
    pub fn into_inner(self) -> P {
        if let Some(unit) = self.pending() {
            warn!("Dropping unflushed unit {unit}");
        }
        self.primitive
    }

    /// Programs the pending unit, if there is one.
    ///
    /// Returns:
    /// - `Ok(())`: Nothing was pending, the unit was programmed, or
    ///   programming was deferred by the guard.  Use [`Self::launch_write()`]
    ///   to tell these apart.
    /// - `Err(ProgramError)`: Programming failed.  The unit is no longer
    ///   pending.
    pub fn flush(&mut self) -> Result<(), ProgramError> {
        if !self.has_pending_write() {
            return Ok(());
        }
        self.launch_write().map(|_| ())
    }

    /// Attempts to program the pending unit.
    ///
    /// Reads the unit's current contents, and if the [`ProgramGuard`]
    /// permits, programs the pending value.
    ///
    /// Returns:
    /// - `Ok(WriteOutcome::Programmed)`: The unit was programmed.
    /// - `Ok(WriteOutcome::Deferred)`: The guard refused.  The unit is still
    ///   pending.
    /// - `Ok(WriteOutcome::Idle)`: Nothing was pending.
    /// - `Err(ProgramError)`: The primitive's error.  The unit is no longer
    ///   pending.
    pub fn launch_write(&mut self) -> Result<WriteOutcome, ProgramError> {
        let Some(base) = self.base else {
            return Ok(WriteOutcome::Idle);
        };

        let current = self.primitive.read_unit(base);
        let value = self.assembled;
        if !self.guard.permits(current, value) {
            debug!("Deferring {base}: 0x{value:04X} over 0x{current:04X}");
            return Ok(WriteOutcome::Deferred);
        }

        self.clear();
        trace!("Programming {base}: 0x{value:04X}");
        self.primitive.program_unit(base, value).inspect_err(|e| {
            warn!("Failed to program {base} with 0x{value:04X}: {e}");
        })?;
        Ok(WriteOutcome::Programmed)
    }

    /// Writes a single byte.
    ///
    /// If a different unit is pending it is flushed first.  Should that
    /// flush be deferred, the other unit is dropped and its bytes are lost,
    /// rather than being carried into this unit.  Use [`Self::launch_write()`]
    /// and [`Self::discard()`] to handle a deferred unit before moving on.
    ///
    /// Arguments:
    /// - `addr`: The byte's address.  Any alignment.
    /// - `value`: The byte to write.
    ///
    /// Returns:
    /// - `Ok(WriteOutcome::Buffered)`: A low lane was written.
    /// - `Ok(outcome)`: A high lane was written, and the unit programmed or
    ///   deferred as by [`Self::launch_write()`].
    /// - `Err(ProgramError)`: Flushing the other unit, or programming this
    ///   one, failed.
    pub fn write_byte(&mut self, addr: ByteAddress, value: u8) -> Result<WriteOutcome, ProgramError> {
        let (unit, lane) = split_address(addr);

        match self.base {
            Some(base) if base != unit => {
                if self.launch_write()? == WriteOutcome::Deferred {
                    warn!("Dropping deferred unit {base}: 0x{:04X}", self.assembled);
                    self.clear();
                }
            }
            _ => (),
        }

        self.base = Some(unit);
        self.assembled |= lane_word(value, lane);

        if lane.is_top() {
            self.launch_write()
        } else {
            Ok(WriteOutcome::Buffered)
        }
    }

    /// Reads a single byte.  The low lane of the pending unit is served from
    /// the pending value, everything else from the flash.
    pub fn read_byte(&self, addr: ByteAddress) -> u8 {
        let (unit, lane) = split_address(addr);
        match self.base {
            Some(base) if base == unit && lane == Lane::Low => lane_byte(self.assembled, lane),
            _ => self.primitive.read_byte_physical(addr),
        }
    }

    /// Writes bytes to consecutive addresses, starting at `addr`.  A final
    /// low lane is left pending.
    pub fn write(&mut self, addr: ByteAddress, data: &[u8]) -> Result<(), ProgramError> {
        for (byte_addr, byte) in (addr..).zip(data.iter()) {
            if self.write_byte(byte_addr, *byte)? == WriteOutcome::Deferred {
                debug!("Write to 0x{byte_addr:08X} deferred");
            }
        }
        Ok(())
    }

    /// Reads bytes from consecutive addresses, starting at `addr`, as
    /// [`Self::read_byte()`].
    pub fn read(&self, addr: ByteAddress, buf: &mut [u8]) {
        for (byte_addr, byte) in (addr..).zip(buf.iter_mut()) {
            *byte = self.read_byte(byte_addr);
        }
    }

    /// Discards the pending unit without programming it.
    ///
    /// Returns:
    /// - `Some(ProgrammingUnit)`: The discarded unit.
    /// - `None`: Nothing was pending.
    pub fn discard(&mut self) -> Option<ProgrammingUnit> {
        let pending = self.pending();
        self.clear();
        pending
    }

    fn clear(&mut self) {
        self.base = None;
        self.assembled = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimFlash;
    use flashbyte_core::Board;
    use pretty_assertions::assert_eq;

    const BASE: u32 = 0x0800_8000;

    fn coalescer() -> UnitWriteCoalescer<SimFlash> {
        UnitWriteCoalescer::new(SimFlash::for_board(Board::NucleoF303re))
    }

    #[test]
    fn erased_or_zero_guard() {
        let guard = ProgramGuard::ErasedOrZero;
        assert!(guard.permits(0xFFFF, 0x1234));
        assert!(guard.permits(0x1234, 0x0000));
        assert!(!guard.permits(0xFFFE, 0xFFFC));
        assert!(!guard.permits(0x00FF, 0x0001));
    }

    #[test]
    fn clear_only_guard() {
        let guard = ProgramGuard::ClearOnly;
        assert!(guard.permits(0xFFFF, 0x1234));
        assert!(guard.permits(0xFFFE, 0xFFFC));
        assert!(guard.permits(0x00FF, 0x000F));
        assert!(!guard.permits(0x00FF, 0x0100));
    }

    #[test]
    fn pending_accessor() {
        let mut c = coalescer();
        assert_eq!(c.pending(), None);
        assert_eq!(c.write_byte(BASE + 2, 0xA5), Ok(WriteOutcome::Buffered));
        let pending = c.pending().map(|unit| (unit.address().raw(), unit.value()));
        assert_eq!(pending, Some((BASE + 2, 0x00A5)));
    }

    #[test]
    fn launch_write_with_nothing_pending() {
        let mut c = coalescer();
        assert_eq!(c.launch_write(), Ok(WriteOutcome::Idle));
        assert!(c.primitive().program_log().is_empty());
    }

    #[test]
    fn discard_drops_pending() {
        let mut c = coalescer();
        c.write_byte(BASE, 0x11).unwrap();
        let unit = c.discard().unwrap();
        assert_eq!(unit.value(), 0x0011);
        assert!(!c.has_pending_write());
        assert_eq!(c.flush(), Ok(()));
        assert!(c.primitive().program_log().is_empty());
    }

    #[test]
    fn multi_byte_write_and_read() {
        let mut c = coalescer();
        c.write(BASE + 1, &[0x01, 0x02, 0x03, 0x04]).unwrap();

        // 0x01 was programmed with an unwritten low lane, 0x03/0x02 as a
        // unit and 0x04 remains pending
        let programs: alloc::vec::Vec<_> = c
            .primitive()
            .program_log()
            .iter()
            .map(|unit| (unit.address().raw(), unit.value()))
            .collect();
        assert_eq!(programs, [(BASE, 0x0100), (BASE + 2, 0x0302)]);
        assert_eq!(c.pending().map(|unit| unit.value()), Some(0x0004));

        let mut buf = [0; 5];
        c.read(BASE, &mut buf);
        assert_eq!(buf, [0x00, 0x01, 0x02, 0x03, 0x04]);
    }
}
