// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! flashbyte-prog - Simulated flash
//!
//! In-memory stand ins for a target's flash, so the coalescer and the
//! controller can be exercised without hardware:
//!
//! * [`FlashArray`] holds the flash contents and enforces the family's
//!   programming rules.
//! * [`SimFlash`] implements [`ProgrammingUnitPrimitive`] directly over a
//!   [`FlashArray`], logging every operation.
//! * [`SimBus`] implements [`MemoryBus`], emulating the flash peripheral's
//!   registers around a [`FlashArray`], for use with
//!   [`crate::FlashController`].

use alloc::vec;
use alloc::vec::Vec;
use core::cell::Cell;
use core::fmt;
use core::ops::Range;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use static_assertions::const_assert_eq;

use flashbyte_core::Board;
use flashbyte_core::flash::{EraseRegion, FlashGeometry};
use flashbyte_core::stm::{
    Stm32F3FlashAr, Stm32F3FlashCr, Stm32F3FlashKeyr, Stm32F3FlashSr, Stm32F4FlashCr,
    Stm32F4FlashKeyr, Stm32F4FlashSr, StmFamily,
};
use flashbyte_core::unit::{
    ByteAddress, ERASED_BYTE, ERASED_UNIT, ProgrammingUnit, UNIT_BYTES, UnitAddress, UnitWord,
    clears_only,
};

use crate::bus::MemoryBus;
use crate::primitive::ProgrammingUnitPrimitive;
use crate::{EraseError, ProgramError};

/// Reasons a [`FlashArray`] refuses to program a half-word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramFault {
    /// Address not half-word aligned.
    Misaligned,

    /// Address outside the flash.
    OutOfRange,

    /// STM32F3: the half-word is neither erased nor being programmed to 0.
    NotErased,

    /// STM32F4/F7: a bit would go from 0 to 1.
    BitSet,
}

impl ProgramFault {
    /// The FLASH_SR error bits the peripheral would set for this fault.
    pub fn status_bits(&self, family: StmFamily) -> u32 {
        match (family, self) {
            (StmFamily::F3, _) => 1 << Stm32F3FlashSr::PGERR_BIT,
            (_, ProgramFault::Misaligned) => 1 << Stm32F4FlashSr::PGAERR_BIT,
            (_, ProgramFault::OutOfRange) => 1 << Stm32F4FlashSr::OPERR_BIT,
            (_, ProgramFault::NotErased | ProgramFault::BitSet) => 1 << Stm32F4FlashSr::PGPERR_BIT,
        }
    }

    /// The HAL error code reported for this fault.
    pub fn hal_error_code(&self, family: StmFamily) -> u32 {
        let bits = self.status_bits(family);
        match family {
            StmFamily::F3 => Stm32F3FlashSr::from(bits).hal_error_code(),
            StmFamily::F4 | StmFamily::F7 => Stm32F4FlashSr::from(bits).hal_error_code(),
        }
    }
}

impl fmt::Display for ProgramFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramFault::Misaligned => write!(f, "misaligned"),
            ProgramFault::OutOfRange => write!(f, "out of range"),
            ProgramFault::NotErased => write!(f, "not erased"),
            ProgramFault::BitSet => write!(f, "bit set"),
        }
    }
}

/// The contents of a target's flash.  Erased on creation.
#[derive(Debug, Clone)]
pub struct FlashArray {
    family: StmFamily,
    geometry: FlashGeometry,
    data: Vec<u8>,
}

impl FlashArray {
    pub fn new(family: StmFamily, geometry: FlashGeometry) -> Self {
        Self {
            family,
            geometry,
            data: vec![ERASED_BYTE; geometry.size() as usize],
        }
    }

    pub fn for_board(board: Board) -> Self {
        Self::new(board.family(), board.geometry())
    }

    pub fn family(&self) -> StmFamily {
        self.family
    }

    pub fn geometry(&self) -> &FlashGeometry {
        &self.geometry
    }

    fn offset(&self, addr: u32) -> Option<usize> {
        self.geometry
            .contains(addr)
            .then(|| (addr - self.geometry.base()) as usize)
    }

    /// Reads a byte.  Addresses outside the flash read as erased.
    pub fn read_u8(&self, addr: u32) -> u8 {
        match self.offset(addr) {
            Some(offset) => self.data[offset],
            None => {
                trace!("Read outside flash 0x{addr:08X}");
                ERASED_BYTE
            }
        }
    }

    /// Reads a little endian half-word.
    pub fn read_u16(&self, addr: u32) -> u16 {
        u16::from_le_bytes([self.read_u8(addr), self.read_u8(addr.wrapping_add(1))])
    }

    /// Programs a half-word, applying the family's rules.
    ///
    /// - STM32F3: the half-word must be erased, or `value` must be 0.
    /// - STM32F4/F7: no bit may go from 0 to 1.
    pub fn program(&mut self, addr: u32, value: u16) -> Result<(), ProgramFault> {
        if addr % UNIT_BYTES != 0 {
            return Err(ProgramFault::Misaligned);
        }
        if !self.geometry.contains_range(addr, UNIT_BYTES) {
            return Err(ProgramFault::OutOfRange);
        }

        let current = self.read_u16(addr);
        let fault = match self.family {
            StmFamily::F3 => (current != ERASED_UNIT && value != 0).then_some(ProgramFault::NotErased),
            StmFamily::F4 | StmFamily::F7 => (!clears_only(current, value)).then_some(ProgramFault::BitSet),
        };
        if let Some(fault) = fault {
            debug!("Refusing to program 0x{addr:08X}: 0x{value:04X} over 0x{current:04X}");
            return Err(fault);
        }

        let offset = (addr - self.geometry.base()) as usize;
        self.data[offset..offset + UNIT_BYTES as usize].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Erases a region.
    ///
    /// Returns:
    /// - `Some(Range<u32>)`: The addresses erased.
    /// - `None`: The region does not exist in this geometry.
    pub fn erase(&mut self, region: EraseRegion) -> Option<Range<u32>> {
        let range = self.geometry.region_range(region)?;
        let base = self.geometry.base();
        let start = (range.start - base) as usize;
        let end = (range.end - base) as usize;
        self.data[start..end].fill(ERASED_BYTE);
        Some(range)
    }

    /// Writes bytes directly, bypassing the programming rules.
    pub fn preload(&mut self, addr: u32, bytes: &[u8]) {
        for (addr, byte) in (addr..).zip(bytes.iter()) {
            match self.offset(addr) {
                Some(offset) => self.data[offset] = *byte,
                None => warn!("Preload outside flash 0x{addr:08X} ignored"),
            }
        }
    }
}

/// An in-memory [`ProgrammingUnitPrimitive`].
///
/// Every program and erase call is logged, including failed ones, and a
/// device error can be injected into the next program call.
#[derive(Debug, Clone)]
pub struct SimFlash {
    array: FlashArray,
    programs: Vec<ProgrammingUnit>,
    erases: Vec<EraseRegion>,
    fail_next: Option<u32>,
}

impl SimFlash {
    pub fn new(array: FlashArray) -> Self {
        Self {
            array,
            programs: Vec::new(),
            erases: Vec::new(),
            fail_next: None,
        }
    }

    /// Creates an erased flash with the geometry and rules of `board`.
    pub fn for_board(board: Board) -> Self {
        Self::new(FlashArray::for_board(board))
    }

    pub fn array(&self) -> &FlashArray {
        &self.array
    }

    /// Every program call made, in order.
    pub fn program_log(&self) -> &[ProgrammingUnit] {
        &self.programs
    }

    /// Every erase call made, in order.
    pub fn erase_log(&self) -> &[EraseRegion] {
        &self.erases
    }

    pub fn clear_logs(&mut self) {
        self.programs.clear();
        self.erases.clear();
    }

    /// Makes the next program call fail with `ProgramError::Device(code)`,
    /// without changing the flash.
    pub fn fail_next_program(&mut self, code: u32) {
        self.fail_next = Some(code);
    }

    /// Writes bytes directly, bypassing the programming rules.
    pub fn preload(&mut self, addr: u32, bytes: &[u8]) {
        self.array.preload(addr, bytes);
    }
}

impl ProgrammingUnitPrimitive for SimFlash {
    fn read_unit(&self, unit: UnitAddress) -> UnitWord {
        self.array.read_u16(unit.raw())
    }

    fn read_byte_physical(&self, addr: ByteAddress) -> u8 {
        self.array.read_u8(addr)
    }

    fn program_unit(&mut self, unit: UnitAddress, value: UnitWord) -> Result<(), ProgramError> {
        self.programs.push(ProgrammingUnit::new(unit, value));

        if let Some(code) = self.fail_next.take() {
            debug!("Injected failure programming {unit}: 0x{code:02X}");
            return Err(ProgramError::Device(code));
        }

        let addr = unit.raw();
        let family = self.array.family();
        self.array.program(addr, value).map_err(|fault| match fault {
            ProgramFault::Misaligned => ProgramError::Misaligned(addr),
            ProgramFault::OutOfRange => ProgramError::OutOfRange(addr),
            _ => ProgramError::Device(fault.hal_error_code(family)),
        })
    }

    fn erase(&mut self, region: EraseRegion) -> Result<(), EraseError> {
        self.erases.push(region);
        self.array
            .erase(region)
            .map(|_| ())
            .ok_or(EraseError::InvalidRegion)
    }
}

/// A write made to a [`SimBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusWrite {
    pub addr: u32,
    pub value: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyState {
    Idle,
    Key1,
    // A wrong key locks FLASH_CR until reset
    Blocked,
}

/// A [`MemoryBus`] emulating an STM32 flash peripheral.
///
/// Emulates FLASH_KEYR, FLASH_CR, FLASH_SR and (on the F3) FLASH_AR, and
/// half-word writes to the flash itself.  Operations complete after a
/// configurable number of FLASH_SR reads with BSY set.
///
/// Every register write is logged.  Writes to flash are logged as
/// half-words.
#[derive(Debug)]
pub struct SimBus {
    array: FlashArray,
    keys: KeyState,
    cr: u32,
    sr: u32,
    ar: u32,
    busy_reads: u32,
    busy_remaining: Cell<u32>,
    writes: Vec<BusWrite>,
}

impl SimBus {
    pub fn new(array: FlashArray) -> Self {
        let cr = array.family().lock_mask();
        Self {
            array,
            keys: KeyState::Idle,
            cr,
            sr: 0,
            ar: 0,
            busy_reads: 1,
            busy_remaining: Cell::new(0),
            writes: Vec::new(),
        }
    }

    /// Creates a bus for an erased flash with the geometry and rules of
    /// `board`.
    pub fn for_board(board: Board) -> Self {
        Self::new(FlashArray::for_board(board))
    }

    /// Sets how many FLASH_SR reads report BSY after an operation starts.
    pub fn set_busy_reads(&mut self, reads: u32) {
        self.busy_reads = reads;
    }

    pub fn array(&self) -> &FlashArray {
        &self.array
    }

    pub fn array_mut(&mut self) -> &mut FlashArray {
        &mut self.array
    }

    /// Every write made, in order.
    pub fn writes(&self) -> &[BusWrite] {
        &self.writes
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }

    /// Raw FLASH_SR value, ignoring BSY.
    pub fn status(&self) -> u32 {
        self.sr
    }

    pub fn control(&self) -> u32 {
        self.cr
    }

    fn family(&self) -> StmFamily {
        self.array.family()
    }

    fn locked(&self) -> bool {
        self.cr & self.family().lock_mask() != 0
    }

    fn bits(&self) -> Bits {
        match self.family() {
            StmFamily::F3 => Bits {
                pg: 1 << Stm32F3FlashCr::PG_BIT,
                erase_page: 1 << Stm32F3FlashCr::PER_BIT,
                mass: 1 << Stm32F3FlashCr::MER_BIT,
                strt: 1 << Stm32F3FlashCr::STRT_BIT,
                bsy: 1 << Stm32F3FlashSr::BSY_BIT,
                eop: 1 << Stm32F3FlashSr::EOP_BIT,
                errors: Stm32F3FlashSr::ERROR_MASK,
                sequence: 1 << Stm32F3FlashSr::PGERR_BIT,
            },
            StmFamily::F4 | StmFamily::F7 => Bits {
                pg: 1 << Stm32F4FlashCr::PG_BIT,
                erase_page: 1 << Stm32F4FlashCr::SER_BIT,
                mass: 1 << Stm32F4FlashCr::MER_BIT,
                strt: 1 << Stm32F4FlashCr::STRT_BIT,
                bsy: 1 << Stm32F4FlashSr::BSY_BIT,
                eop: 1 << Stm32F4FlashSr::EOP_BIT,
                errors: Stm32F4FlashSr::ERROR_MASK,
                sequence: 1 << Stm32F4FlashSr::PGSERR_BIT,
            },
        }
    }

    fn start_operation(&mut self, errors: u32) {
        self.sr |= errors;
        if errors == 0 {
            self.sr |= self.bits().eop;
        }
        self.busy_remaining.set(self.busy_reads);
    }

    fn write_keyr(&mut self, value: u32) {
        self.keys = match (self.keys, value) {
            (KeyState::Blocked, _) => KeyState::Blocked,
            (KeyState::Idle, Stm32F4FlashKeyr::KEY1) => KeyState::Key1,
            (KeyState::Key1, Stm32F4FlashKeyr::KEY2) => {
                self.cr &= !self.family().lock_mask();
                debug!("Sim flash unlocked");
                KeyState::Idle
            }
            _ => {
                warn!("Sim flash blocked by bad key 0x{value:08X}");
                KeyState::Blocked
            }
        };
    }

    fn write_cr(&mut self, value: u32) {
        let lock = self.family().lock_mask();
        if self.locked() {
            trace!("FLASH_CR write 0x{value:08X} ignored, locked");
            return;
        }
        if self.keys == KeyState::Blocked {
            return;
        }

        let bits = self.bits();
        self.cr = value & !bits.strt;
        if value & lock != 0 {
            return;
        }
        if value & bits.strt == 0 {
            return;
        }

        let region = if value & bits.mass != 0 {
            Some(EraseRegion::Mass)
        } else if value & bits.erase_page != 0 {
            self.selected_region()
        } else {
            None
        };

        match region.and_then(|region| self.array.erase(region).map(|range| (region, range))) {
            Some((region, range)) => {
                debug!("Sim erased {region} 0x{:08X}-0x{:08X}", range.start, range.end);
                self.start_operation(0);
            }
            None => {
                warn!("Sim erase started with nothing valid selected");
                self.start_operation(bits.sequence);
            }
        }
    }

    fn selected_region(&self) -> Option<EraseRegion> {
        match self.family() {
            StmFamily::F3 => self.array.geometry().region_of(self.ar),
            StmFamily::F4 | StmFamily::F7 => {
                let snb = (self.cr >> Stm32F4FlashCr::SNB_SHIFT) & Stm32F4FlashCr::SNB_MASK;
                Some(EraseRegion::Sector(snb as u8))
            }
        }
    }

    fn write_sr(&mut self, value: u32) {
        let bits = self.bits();
        self.sr &= !(value & (bits.errors | bits.eop));
    }

    fn write_flash(&mut self, addr: u32, value: u16) {
        let bits = self.bits();
        if self.locked() || self.cr & bits.pg == 0 {
            warn!("Sim flash write 0x{addr:08X} without PG set");
            self.start_operation(bits.sequence);
            return;
        }

        if self.family() != StmFamily::F3 {
            let psize = (self.cr >> Stm32F4FlashCr::PSIZE_SHIFT) & Stm32F4FlashCr::PSIZE_MASK;
            if psize != Stm32F4FlashCr::PSIZE_X16 {
                warn!("Sim flash half-word write with PSIZE {psize}");
                self.start_operation(1 << Stm32F4FlashSr::PGPERR_BIT);
                return;
            }
        }

        let errors = match self.array.program(addr, value) {
            Ok(()) => 0,
            Err(fault) => fault.status_bits(self.family()),
        };
        self.start_operation(errors);
    }

    fn register(&self, addr: u32) -> Option<Register> {
        let family = self.family();
        if addr == family.keyr_address() {
            Some(Register::Keyr)
        } else if addr == family.cr_address() {
            Some(Register::Cr)
        } else if addr == family.sr_address() {
            Some(Register::Sr)
        } else if family == StmFamily::F3 && addr == Stm32F3FlashAr::ADDRESS {
            Some(Register::Ar)
        } else {
            None
        }
    }
}

struct Bits {
    pg: u32,
    erase_page: u32,
    mass: u32,
    strt: u32,
    bsy: u32,
    eop: u32,
    errors: u32,
    sequence: u32,
}

enum Register {
    Keyr,
    Cr,
    Sr,
    Ar,
}

// write_keyr() matches on the F4 keys for all families
const_assert_eq!(Stm32F3FlashKeyr::KEY1, Stm32F4FlashKeyr::KEY1);
const_assert_eq!(Stm32F3FlashKeyr::KEY2, Stm32F4FlashKeyr::KEY2);

impl MemoryBus for SimBus {
    fn read_u8(&self, addr: u32) -> u8 {
        self.array.read_u8(addr)
    }

    fn read_u16(&self, addr: u32) -> u16 {
        self.array.read_u16(addr)
    }

    fn read_u32(&self, addr: u32) -> u32 {
        match self.register(addr) {
            Some(Register::Cr) => self.cr,
            Some(Register::Sr) => {
                let remaining = self.busy_remaining.get();
                if remaining > 0 {
                    self.busy_remaining.set(remaining - 1);
                    self.sr | self.bits().bsy
                } else {
                    self.sr
                }
            }
            Some(Register::Keyr) | Some(Register::Ar) => 0,
            None => {
                let low = self.array.read_u16(addr) as u32;
                let high = self.array.read_u16(addr.wrapping_add(2)) as u32;
                low | (high << 16)
            }
        }
    }

    fn write_u16(&mut self, addr: u32, value: u16) {
        self.writes.push(BusWrite {
            addr,
            value: value as u32,
        });
        if self.array.geometry().contains(addr) {
            self.write_flash(addr, value);
        } else {
            warn!("Sim half-word write to 0x{addr:08X} ignored");
        }
    }

    fn write_u32(&mut self, addr: u32, value: u32) {
        self.writes.push(BusWrite { addr, value });
        match self.register(addr) {
            Some(Register::Keyr) => self.write_keyr(value),
            Some(Register::Cr) => self.write_cr(value),
            Some(Register::Sr) => self.write_sr(value),
            Some(Register::Ar) => self.ar = value,
            None if self.array.geometry().contains(addr) => {
                warn!("Sim word write to flash 0x{addr:08X} unsupported");
                let bits = self.bits();
                self.start_operation(bits.sequence);
            }
            None => warn!("Sim write to 0x{addr:08X} ignored"),
        }
    }
}
