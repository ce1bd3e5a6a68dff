// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! flashbyte-prog - STM32 flash controller
//!
//! Drives the STM32F3/F4/F7 embedded flash peripheral through its
//! registers, to unlock, lock, program and erase the flash.

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use flashbyte_core::Board;
use flashbyte_core::flash::{EraseRegion, FlashGeometry};
use flashbyte_core::stm::{
    HAL_F4_ERROR_RD, Stm32F3FlashAr, Stm32F3FlashCr, Stm32F3FlashKeyr, Stm32F3FlashSr,
    Stm32F4FlashCr, Stm32F4FlashKeyr, Stm32F4FlashSr, StmFamily,
};
use flashbyte_core::unit::{ByteAddress, UNIT_BYTES, UnitAddress, UnitWord};

use crate::bus::MemoryBus;
use crate::primitive::ProgrammingUnitPrimitive;
use crate::{EraseError, ProgramError};

/// Default number of FLASH_SR reads before an operation is considered to
/// have timed out.  A sector erase can take seconds.
pub const POLL_LIMIT: u32 = 10_000_000;

// Ways an operation can fail once started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Device(u32),
    Timeout,
}

impl From<Failure> for ProgramError {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Device(code) => ProgramError::Device(code),
            Failure::Timeout => ProgramError::Timeout,
        }
    }
}

impl From<Failure> for EraseError {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Device(code) => EraseError::Device(code),
            Failure::Timeout => EraseError::Timeout,
        }
    }
}

/// Register level driver for an STM32 flash peripheral.
///
/// The flash must be unlocked with [`Self::unlock()`] before programming or
/// erasing.  Half-words are always programmed with a 16-bit parallelism on
/// the F4/F7, and regions erased with a 32-bit parallelism, as for a 2.7V
/// to 3.6V supply.
#[derive(Debug)]
pub struct FlashController<B> {
    bus: B,
    family: StmFamily,
    geometry: FlashGeometry,
    poll_limit: u32,
}

impl<B: MemoryBus> FlashController<B> {
    pub fn new(bus: B, family: StmFamily, geometry: FlashGeometry) -> Self {
        Self {
            bus,
            family,
            geometry,
            poll_limit: POLL_LIMIT,
        }
    }

    /// Creates a controller for the given board's MCU.
    pub fn for_board(bus: B, board: Board) -> Self {
        Self::new(bus, board.family(), board.geometry())
    }

    /// Sets the number of FLASH_SR reads after which an operation times out.
    pub fn with_poll_limit(mut self, limit: u32) -> Self {
        self.poll_limit = limit;
        self
    }

    pub fn family(&self) -> StmFamily {
        self.family
    }

    pub fn geometry(&self) -> &FlashGeometry {
        &self.geometry
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn into_bus(self) -> B {
        self.bus
    }

    /// Whether FLASH_CR is locked.
    pub fn is_locked(&self) -> bool {
        self.read_cr() & self.family.lock_mask() != 0
    }

    /// Unlocks the flash for programming and erasing.
    ///
    /// Writes the two keys to FLASH_KEYR.  Does nothing if the flash is
    /// already unlocked, as writing the keys again would lock FLASH_CR
    /// until the next reset.
    ///
    /// Returns:
    /// - `Ok(())`: The flash is unlocked.
    /// - `Err(ProgramError::Locked)`: The flash is still locked after
    ///   writing the keys.  This happens if a bad key has been written since
    ///   reset.
    pub fn unlock(&mut self) -> Result<(), ProgramError> {
        if !self.is_locked() {
            debug!("{} flash already unlocked", self.family);
            return Ok(());
        }

        debug!("Unlocking {} flash", self.family);
        let (key1, key2) = match self.family {
            StmFamily::F3 => (Stm32F3FlashKeyr::KEY1, Stm32F3FlashKeyr::KEY2),
            StmFamily::F4 | StmFamily::F7 => (Stm32F4FlashKeyr::KEY1, Stm32F4FlashKeyr::KEY2),
        };
        let keyr = self.family.keyr_address();
        self.bus.write_u32(keyr, key1);
        self.bus.write_u32(keyr, key2);

        if self.is_locked() {
            warn!("{} flash still locked after writing keys", self.family);
            return Err(ProgramError::Locked);
        }
        Ok(())
    }

    /// Locks the flash, by setting the LOCK bit in FLASH_CR.
    pub fn lock(&mut self) {
        debug!("Locking {} flash", self.family);
        let flash_cr = self.read_cr() | self.family.lock_mask();
        self.write_cr(flash_cr);
    }

    /// Programs a half-word.
    ///
    /// Arguments:
    /// - `addr`: The address to program.  Must be half-word aligned, and
    ///   within the flash.
    /// - `value`: The half-word to program.
    ///
    /// Returns:
    /// - `Ok(())`: The half-word was programmed.
    /// - `Err(ProgramError)`: The address was invalid, the flash was locked,
    ///   or the peripheral reported an error or did not complete.
    pub fn program_half_word(&mut self, addr: u32, value: u16) -> Result<(), ProgramError> {
        if addr % UNIT_BYTES != 0 {
            warn!("Address 0x{addr:08X} is not half-word aligned");
            return Err(ProgramError::Misaligned(addr));
        }
        if !self.geometry.contains_range(addr, UNIT_BYTES) {
            warn!("Address 0x{addr:08X} is outside flash");
            return Err(ProgramError::OutOfRange(addr));
        }
        if self.is_locked() {
            warn!("Programming 0x{addr:08X} with flash locked");
            return Err(ProgramError::Locked);
        }
        self.wait_idle()?;

        let mut flash_cr = self.read_cr();
        let pg = match self.family {
            StmFamily::F3 => 1 << Stm32F3FlashCr::PG_BIT,
            StmFamily::F4 | StmFamily::F7 => {
                flash_cr &= !(Stm32F4FlashCr::PSIZE_MASK << Stm32F4FlashCr::PSIZE_SHIFT);
                flash_cr |= Stm32F4FlashCr::PSIZE_X16 << Stm32F4FlashCr::PSIZE_SHIFT;
                1 << Stm32F4FlashCr::PG_BIT
            }
        };
        self.write_cr(flash_cr | pg);

        trace!("Programming 0x{addr:08X}: 0x{value:04X}");
        self.bus.write_u16(addr, value);
        let result = self.wait_complete();

        let flash_cr = self.read_cr() & !pg;
        self.write_cr(flash_cr);

        result.map_err(|failure| {
            warn!("Flash program 0x{addr:08X} failed: {failure:?}");
            failure.into()
        })
    }

    /// Erases a page (F3), a sector (F4/F7) or the entire flash.
    ///
    /// Erasing the flash the running firmware is executing from is fatal.
    /// It is the caller's responsibility to choose a safe region.
    ///
    /// Returns:
    /// - `Ok(())`: The region was erased.
    /// - `Err(EraseError::InvalidRegion)`: The region does not exist on this
    ///   MCU.
    /// - `Err(EraseError)`: The flash was locked, or the peripheral reported
    ///   an error or did not complete.
    pub fn erase_region(&mut self, region: EraseRegion) -> Result<(), EraseError> {
        if self.geometry.region_range(region).is_none() {
            warn!("{region} does not exist on {}", self.family);
            return Err(EraseError::InvalidRegion);
        }
        if self.is_locked() {
            warn!("Erasing {region} with flash locked");
            return Err(EraseError::Locked);
        }
        self.wait_idle()?;

        debug!("Erasing {region}");
        let (flash_cr, strt, clear) = match (self.family, region) {
            (StmFamily::F3, EraseRegion::Page(_)) => {
                let per = 1 << Stm32F3FlashCr::PER_BIT;
                let flash_cr = self.read_cr() | per;
                self.write_cr(flash_cr);
                let page_addr = self
                    .geometry
                    .region_range(region)
                    .map(|range| range.start)
                    .ok_or(EraseError::InvalidRegion)?;
                self.bus.write_u32(Stm32F3FlashAr::ADDRESS, page_addr);
                (flash_cr, 1 << Stm32F3FlashCr::STRT_BIT, per)
            }
            (StmFamily::F3, EraseRegion::Mass) => {
                let mer = 1 << Stm32F3FlashCr::MER_BIT;
                let flash_cr = self.read_cr() | mer;
                self.write_cr(flash_cr);
                (flash_cr, 1 << Stm32F3FlashCr::STRT_BIT, mer)
            }
            (StmFamily::F4 | StmFamily::F7, EraseRegion::Sector(sector)) => {
                let mut flash_cr = self.read_cr();
                flash_cr &= !(Stm32F4FlashCr::SNB_MASK << Stm32F4FlashCr::SNB_SHIFT);
                flash_cr &= !(Stm32F4FlashCr::PSIZE_MASK << Stm32F4FlashCr::PSIZE_SHIFT);
                flash_cr |= 1 << Stm32F4FlashCr::SER_BIT;
                flash_cr |= (sector as u32 & Stm32F4FlashCr::SNB_MASK) << Stm32F4FlashCr::SNB_SHIFT;
                flash_cr |= Stm32F4FlashCr::PSIZE_X32 << Stm32F4FlashCr::PSIZE_SHIFT;
                let clear = (1 << Stm32F4FlashCr::SER_BIT)
                    | (Stm32F4FlashCr::SNB_MASK << Stm32F4FlashCr::SNB_SHIFT);
                (flash_cr, 1 << Stm32F4FlashCr::STRT_BIT, clear)
            }
            (StmFamily::F4 | StmFamily::F7, EraseRegion::Mass) => {
                let mut flash_cr = self.read_cr();
                flash_cr &= !(Stm32F4FlashCr::PSIZE_MASK << Stm32F4FlashCr::PSIZE_SHIFT);
                flash_cr |= 1 << Stm32F4FlashCr::MER_BIT;
                flash_cr |= Stm32F4FlashCr::PSIZE_X32 << Stm32F4FlashCr::PSIZE_SHIFT;
                (flash_cr, 1 << Stm32F4FlashCr::STRT_BIT, 1 << Stm32F4FlashCr::MER_BIT)
            }
            _ => return Err(EraseError::InvalidRegion),
        };

        // Start the operation
        self.write_cr(flash_cr | strt);
        let result = self.wait_complete();

        let flash_cr = self.read_cr() & !clear;
        self.write_cr(flash_cr);

        match result {
            Ok(()) => {
                debug!("Erased {region}");
                Ok(())
            }
            Err(failure) => {
                warn!("Flash erase {region} failed: {failure:?}");
                Err(failure.into())
            }
        }
    }

    fn read_cr(&self) -> u32 {
        self.bus.read_u32(self.family.cr_address())
    }

    fn write_cr(&mut self, value: u32) {
        self.bus.write_u32(self.family.cr_address(), value);
    }

    // Returns (busy, HAL error code, raw error and EOP bits to clear)
    fn status(&self) -> (bool, u32, u32) {
        let raw = self.bus.read_u32(self.family.sr_address());
        match self.family {
            StmFamily::F3 => {
                let flash_sr = Stm32F3FlashSr::from(raw);
                let clear =
                    raw & (Stm32F3FlashSr::ERROR_MASK | (1 << Stm32F3FlashSr::EOP_BIT));
                (flash_sr.busy(), flash_sr.hal_error_code(), clear)
            }
            StmFamily::F4 | StmFamily::F7 => {
                let flash_sr = Stm32F4FlashSr::from(raw);
                let clear =
                    raw & (Stm32F4FlashSr::ERROR_MASK | (1 << Stm32F4FlashSr::EOP_BIT));
                let mut code = flash_sr.hal_error_code();
                if self.family == StmFamily::F7 {
                    // No read protection error on the F7
                    code &= !HAL_F4_ERROR_RD;
                }
                (flash_sr.busy(), code, clear)
            }
        }
    }

    fn wait_idle(&self) -> Result<(), Failure> {
        for _ in 0..self.poll_limit {
            let (busy, _, _) = self.status();
            if !busy {
                return Ok(());
            }
        }
        warn!("{} flash still busy", self.family);
        Err(Failure::Timeout)
    }

    // Polls FLASH_SR until the operation completes, then clears its flags.
    fn wait_complete(&mut self) -> Result<(), Failure> {
        for count in 0..self.poll_limit {
            let (busy, code, clear) = self.status();
            if busy {
                if count > 0 && count % 1_000_000 == 0 {
                    debug!("... waiting for flash operation to complete");
                }
                continue;
            }

            if clear != 0 {
                self.bus.write_u32(self.family.sr_address(), clear);
            }
            return match code {
                0 => Ok(()),
                code => Err(Failure::Device(code)),
            };
        }
        warn!("{} flash operation timed out", self.family);
        Err(Failure::Timeout)
    }
}

impl<B: MemoryBus> ProgrammingUnitPrimitive for FlashController<B> {
    fn read_unit(&self, unit: UnitAddress) -> UnitWord {
        self.bus.read_u16(unit.raw())
    }

    fn read_byte_physical(&self, addr: ByteAddress) -> u8 {
        self.bus.read_u8(addr)
    }

    fn program_unit(&mut self, unit: UnitAddress, value: UnitWord) -> Result<(), ProgramError> {
        self.program_half_word(unit.raw(), value)
    }

    fn erase(&mut self, region: EraseRegion) -> Result<(), EraseError> {
        self.erase_region(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{BusWrite, SimBus};
    use pretty_assertions::assert_eq;

    fn controller(board: Board) -> FlashController<SimBus> {
        FlashController::for_board(SimBus::for_board(board), board)
    }

    #[test]
    fn unlock_writes_keys_once() {
        let mut flash = controller(Board::NucleoF303re);
        assert!(flash.is_locked());
        assert_eq!(flash.unlock(), Ok(()));
        assert!(!flash.is_locked());
        assert_eq!(flash.unlock(), Ok(()));

        let keyr = StmFamily::F3.keyr_address();
        let keys: alloc::vec::Vec<_> = flash
            .bus()
            .writes()
            .iter()
            .filter(|write| write.addr == keyr)
            .map(|write| write.value)
            .collect();
        assert_eq!(keys, [0x4567_0123, 0xCDEF_89AB]);

        flash.lock();
        assert!(flash.is_locked());
    }

    #[test]
    fn unlock_fails_after_bad_key() {
        let mut flash = controller(Board::NucleoF401re);
        flash.bus_mut().write_u32(Stm32F4FlashKeyr::ADDRESS, 0);
        assert_eq!(flash.unlock(), Err(ProgramError::Locked));
    }

    #[test]
    fn locked_operations_refused() {
        let mut flash = controller(Board::NucleoF756zg);
        let addr = Board::NucleoF756zg.test_address();
        assert_eq!(flash.program_half_word(addr, 0), Err(ProgramError::Locked));
        assert_eq!(flash.erase_region(EraseRegion::Sector(4)), Err(EraseError::Locked));
    }

    #[test]
    fn f3_program_sequence() {
        let board = Board::NucleoF303re;
        let mut flash = controller(board);
        flash.unlock().unwrap();
        flash.bus_mut().clear_writes();

        let addr = board.test_address();
        assert_eq!(flash.program_half_word(addr, 0xFFFE), Ok(()));
        assert_eq!(flash.read_unit(UnitAddress::containing(addr)), 0xFFFE);

        let cr = Stm32F3FlashCr::ADDRESS;
        let sr = Stm32F3FlashSr::ADDRESS;
        assert_eq!(
            flash.bus().writes(),
            [
                BusWrite { addr: cr, value: 1 << Stm32F3FlashCr::PG_BIT },
                BusWrite { addr, value: 0xFFFE },
                BusWrite { addr: sr, value: 1 << Stm32F3FlashSr::EOP_BIT },
                BusWrite { addr: cr, value: 0 },
            ]
        );
    }

    #[test]
    fn f3_reprogram_fails_with_prog_error() {
        let board = Board::NucleoF303re;
        let mut flash = controller(board);
        flash.unlock().unwrap();
        let addr = board.test_address();
        flash.program_half_word(addr, 0xFFFE).unwrap();
        assert_eq!(flash.program_half_word(addr, 0xFFFC), Err(ProgramError::Device(0x01)));

        // Flags cleared, and zero still allowed
        assert_eq!(flash.bus().status() & Stm32F3FlashSr::ERROR_MASK, 0);
        assert_eq!(flash.program_half_word(addr, 0x0000), Ok(()));
    }

    #[test]
    fn f4_program_uses_x16() {
        let board = Board::NucleoF401re;
        let mut flash = controller(board);
        flash.unlock().unwrap();
        flash.bus_mut().clear_writes();

        let addr = board.test_address();
        flash.program_half_word(addr, 0xFFFE).unwrap();
        flash.program_half_word(addr, 0xFFFC).unwrap();
        assert_eq!(flash.read_unit(UnitAddress::containing(addr)), 0xFFFC);
        assert_eq!(flash.program_half_word(addr, 0xFFFD), Err(ProgramError::Device(0x04)));

        let first = flash.bus().writes()[0];
        assert_eq!(first.addr, Stm32F4FlashCr::ADDRESS);
        assert_eq!(
            first.value,
            (Stm32F4FlashCr::PSIZE_X16 << Stm32F4FlashCr::PSIZE_SHIFT)
                | (1 << Stm32F4FlashCr::PG_BIT)
        );
    }

    #[test]
    fn program_address_checks() {
        let board = Board::NucleoF756zg;
        let mut flash = controller(board);
        flash.unlock().unwrap();
        let addr = board.test_address();
        assert_eq!(flash.program_half_word(addr + 1, 0), Err(ProgramError::Misaligned(addr + 1)));
        assert_eq!(
            flash.program_half_word(0x0810_0000, 0),
            Err(ProgramError::OutOfRange(0x0810_0000))
        );
    }

    #[test]
    fn f3_page_erase() {
        let board = Board::NucleoF303re;
        let mut flash = controller(board);
        flash.unlock().unwrap();
        let addr = board.test_address();
        flash.program_half_word(addr, 0x1234).unwrap();
        flash.program_half_word(addr + 0x800, 0x1234).unwrap();
        flash.bus_mut().clear_writes();

        assert_eq!(flash.erase_region(EraseRegion::Page(16)), Ok(()));
        assert_eq!(flash.read_unit(UnitAddress::containing(addr)), 0xFFFF);
        assert_eq!(flash.read_unit(UnitAddress::containing(addr + 0x800)), 0x1234);

        let writes = flash.bus().writes();
        assert_eq!(writes[1], BusWrite { addr: Stm32F3FlashAr::ADDRESS, value: addr });
        assert_eq!(
            writes[2].value,
            (1 << Stm32F3FlashCr::PER_BIT) | (1 << Stm32F3FlashCr::STRT_BIT)
        );
        assert_eq!(flash.bus().control(), 0);
        assert_eq!(flash.erase_region(EraseRegion::Sector(4)), Err(EraseError::InvalidRegion));
    }

    #[test]
    fn f7_sector_erase() {
        let board = Board::NucleoF756zg;
        let mut flash = controller(board);
        flash.unlock().unwrap();
        let addr = board.test_address();
        flash.program_half_word(addr, 0x0000).unwrap();
        flash.bus_mut().clear_writes();

        assert_eq!(flash.erase_region(EraseRegion::Sector(4)), Ok(()));
        assert_eq!(flash.read_unit(UnitAddress::containing(addr)), 0xFFFF);

        let start = flash.bus().writes()[0].value;
        assert_ne!(start & (1 << Stm32F4FlashCr::STRT_BIT), 0);
        assert_ne!(start & (1 << Stm32F4FlashCr::SER_BIT), 0);
        assert_eq!((start >> Stm32F4FlashCr::SNB_SHIFT) & Stm32F4FlashCr::SNB_MASK, 4);
        assert_eq!(flash.erase_region(EraseRegion::Sector(8)), Err(EraseError::InvalidRegion));
    }

    #[test]
    fn mass_erase() {
        let board = Board::NucleoF401re;
        let mut flash = controller(board);
        flash.unlock().unwrap();
        flash.program_half_word(0x0800_0000, 0x0000).unwrap();
        assert_eq!(flash.erase_region(EraseRegion::Mass), Ok(()));
        assert_eq!(flash.read_unit(UnitAddress::containing(0x0800_0000)), 0xFFFF);
    }

    #[test]
    fn busy_polling_and_timeout() {
        let board = Board::NucleoF401re;
        let mut bus = SimBus::for_board(board);
        bus.set_busy_reads(50);
        let mut flash = FlashController::for_board(bus, board).with_poll_limit(100);
        flash.unlock().unwrap();
        let addr = board.test_address();
        assert_eq!(flash.program_half_word(addr, 0xFFFE), Ok(()));

        flash.bus_mut().set_busy_reads(1000);
        assert_eq!(flash.program_half_word(addr + 2, 0xFFFE), Err(ProgramError::Timeout));
    }
}
