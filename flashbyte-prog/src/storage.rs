// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! flashbyte-prog - embedded-storage support
//!
//! [`CoalescingStorage`] exposes a region of half-word programmable flash
//! as a byte writable [`NorFlash`], using a [`UnitWriteCoalescer`].

use core::fmt;
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash, check_erase, check_read,
    check_write,
};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use flashbyte_core::flash::FlashGeometry;
use flashbyte_core::unit::Lane;

use crate::coalescer::{ProgramGuard, UnitWriteCoalescer, WriteOutcome};
use crate::primitive::ProgrammingUnitPrimitive;
use crate::{EraseError, ProgramError};

/// Errors returned by [`CoalescingStorage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Offset or length out of bounds, or not aligned.
    Access(NorFlashErrorKind),

    /// A unit could not be programmed.
    Program(ProgramError),

    /// A region could not be erased.
    Erase(EraseError),

    /// The unit at this address could not be programmed over its current
    /// contents without an erase.  Nothing was written to it.
    NotErased(u32),
}

impl NorFlashError for StorageError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            StorageError::Access(kind) => *kind,
            _ => NorFlashErrorKind::Other,
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Access(kind) => write!(f, "Access Error: {kind:?}"),
            StorageError::Program(e) => write!(f, "{e}"),
            StorageError::Erase(e) => write!(f, "{e}"),
            StorageError::NotErased(addr) => write!(f, "Not Erased: 0x{addr:08X}"),
        }
    }
}

impl From<NorFlashErrorKind> for StorageError {
    fn from(kind: NorFlashErrorKind) -> Self {
        StorageError::Access(kind)
    }
}

impl From<ProgramError> for StorageError {
    fn from(error: ProgramError) -> Self {
        StorageError::Program(error)
    }
}

impl From<EraseError> for StorageError {
    fn from(error: EraseError) -> Self {
        StorageError::Erase(error)
    }
}

/// A byte writable [`NorFlash`] over part of a unit programmable flash.
///
/// Offsets are relative to `base`.  `ERASE_SIZE` is the size of the erase
/// regions covering the storage, which must all be the same size, and
/// `base` must be at the start of one.
///
/// Every [`NorFlash::write()`] is flushed before returning, so no data is
/// left pending between calls.  A unit only partly covered by a write has
/// its other lane programmed with the byte already in the flash, so bytes
/// outside the write are unchanged.
///
/// The coalescer is switched to [`ProgramGuard::ClearOnly`], as filling
/// the other lane of a unit in a later write re-programs that unit.  Whether
/// the flash accepts this is up to the device: the STM32F3 refuses to
/// re-program a half-word unless to zero, and the write fails with its
/// error.
#[derive(Debug)]
pub struct CoalescingStorage<P, const ERASE_SIZE: usize> {
    coalescer: UnitWriteCoalescer<P>,
    geometry: FlashGeometry,
    base: u32,
    capacity: u32,
}

impl<P: ProgrammingUnitPrimitive, const ERASE_SIZE: usize> CoalescingStorage<P, ERASE_SIZE> {
    /// Creates the storage.
    ///
    /// Arguments:
    /// - `coalescer`: Used for all reads and writes.
    /// - `geometry`: The flash's geometry, used to find the regions to erase.
    /// - `base`: The address of offset 0.
    /// - `capacity`: The size of the storage in bytes.
    ///
    /// The coalescer's guard is set to [`ProgramGuard::ClearOnly`].
    ///
    /// Returns:
    /// - `Some(CoalescingStorage)`: The storage.
    /// - `None`: The storage would extend outside the flash, or is not made
    ///   up of `ERASE_SIZE` regions.
    pub fn new(
        mut coalescer: UnitWriteCoalescer<P>,
        geometry: FlashGeometry,
        base: u32,
        capacity: u32,
    ) -> Option<Self> {
        if !geometry.contains_range(base, capacity) {
            warn!("Storage 0x{base:08X}+0x{capacity:X} outside flash");
            return None;
        }
        let end = base + capacity;
        let uniform = geometry.regions_overlapping(base..end).all(|region| {
            geometry
                .region_range(region)
                .is_some_and(|r| r.end - r.start == ERASE_SIZE as u32 && r.start >= base && r.end <= end)
        });
        if !uniform {
            warn!("Storage 0x{base:08X}+0x{capacity:X} not made of {ERASE_SIZE} byte regions");
            return None;
        }

        coalescer.set_guard(ProgramGuard::ClearOnly);
        Some(Self {
            coalescer,
            geometry,
            base,
            capacity,
        })
    }

    pub fn coalescer(&self) -> &UnitWriteCoalescer<P> {
        &self.coalescer
    }

    pub fn into_inner(self) -> UnitWriteCoalescer<P> {
        self.coalescer
    }

    /// Writes one byte, failing if its unit could not be programmed over the
    /// current contents.
    fn write_one(&mut self, addr: u32, byte: u8) -> Result<(), StorageError> {
        if self.coalescer.write_byte(addr, byte)? == WriteOutcome::Deferred {
            self.coalescer.discard();
            return Err(StorageError::NotErased(addr & !1));
        }
        Ok(())
    }

    /// Writes the byte currently in the flash at `addr`.
    fn write_unchanged(&mut self, addr: u32) -> Result<(), StorageError> {
        let byte = self.coalescer.primitive().read_byte_physical(addr);
        trace!("Padding 0x{addr:08X} with 0x{byte:02X}");
        self.write_one(addr, byte)
    }

    /// Flushes, failing if the pending unit could not be programmed.
    fn flush_pending(&mut self) -> Result<(), StorageError> {
        let pending = self.coalescer.pending();
        match self.coalescer.launch_write()? {
            WriteOutcome::Deferred => {
                self.coalescer.discard();
                let addr = pending.map(|unit| unit.address().raw()).unwrap_or(self.base);
                Err(StorageError::NotErased(addr))
            }
            _ => Ok(()),
        }
    }
}

impl<P, const ERASE_SIZE: usize> ErrorType for CoalescingStorage<P, ERASE_SIZE> {
    type Error = StorageError;
}

impl<P: ProgrammingUnitPrimitive, const ERASE_SIZE: usize> ReadNorFlash
    for CoalescingStorage<P, ERASE_SIZE>
{
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(&*self, offset, bytes.len())?;
        self.coalescer.read(self.base + offset, bytes);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.capacity as usize
    }
}

impl<P: ProgrammingUnitPrimitive, const ERASE_SIZE: usize> NorFlash
    for CoalescingStorage<P, ERASE_SIZE>
{
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = ERASE_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(&*self, from, to)?;
        self.flush_pending()?;

        let range = self.base + from..self.base + to;
        for region in self.geometry.regions_overlapping(range) {
            debug!("Storage erasing {region}");
            self.coalescer.primitive_mut().erase(region)?;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(&*self, offset, bytes.len())?;
        if bytes.is_empty() {
            return Ok(());
        }

        // base is region aligned, so the padding stays inside the storage
        let start = self.base + offset;
        let end = start + bytes.len() as u32;
        if Lane::of(start) == Lane::High {
            self.write_unchanged(start - 1)?;
        }
        for (addr, byte) in (start..).zip(bytes.iter()) {
            self.write_one(addr, *byte)?;
        }
        if Lane::of(end - 1) == Lane::Low {
            self.write_unchanged(end)?;
        }
        self.flush_pending()
    }
}
