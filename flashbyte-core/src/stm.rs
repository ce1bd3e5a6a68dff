// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! flashbyte-core - STM32 specific objects
//!
//! Register maps for the embedded flash interface of the STM32F3, STM32F4
//! and STM32F7 families, plus the HAL style error codes reported when an
//! operation fails.
//!
//! The F4 and F7 families share a register layout.  The F3 family uses a
//! simpler page based peripheral, at a different address.

use core::fmt;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

// Flash memory base address, common to all supported families
const STM32_FLASH_BASE: u32 = 0x0800_0000;

// FLASH register block base addresses
const STM32F3_FLASH_REG_BASE: u32 = 0x4002_2000;
const STM32F4_FLASH_REG_BASE: u32 = 0x4002_3C00;

/// FLASH_KEYR keys used to unlock the flash memory.  The same on all
/// supported families.
pub const FLASH_KEY1: u32 = 0x4567_0123;
pub const FLASH_KEY2: u32 = 0xCDEF_89AB;

/// HAL style flash error codes, as returned by `HAL_FLASH_GetError()`.
///
/// The F3 family only reports [`HAL_F3_ERROR_PROG`] and [`HAL_F3_ERROR_WRP`].
pub const HAL_F3_ERROR_PROG: u32 = 0x01;
pub const HAL_F3_ERROR_WRP: u32 = 0x02;
pub const HAL_F4_ERROR_RD: u32 = 0x01;
pub const HAL_F4_ERROR_PGS: u32 = 0x02;
pub const HAL_F7_ERROR_ERS: u32 = 0x02;
pub const HAL_F4_ERROR_PGP: u32 = 0x04;
pub const HAL_F4_ERROR_PGA: u32 = 0x08;
pub const HAL_F4_ERROR_WRP: u32 = 0x10;
pub const HAL_F4_ERROR_OPERATION: u32 = 0x20;

/// STM32F3 FLASH_KEYR register
///
/// Used to unlock the flash memory for programming and erasing operations.
pub struct Stm32F3FlashKeyr;

impl Stm32F3FlashKeyr {
    /// STM32F3 memory address of this register
    pub const ADDRESS: u32 = STM32F3_FLASH_REG_BASE + 0x04;

    /// Keys, written in order, to unlock FLASH_CR
    pub const KEY1: u32 = FLASH_KEY1;
    pub const KEY2: u32 = FLASH_KEY2;
}

/// STM32F3 FLASH_SR register
///
/// Used to check the status of flash operations, including errors and busy
/// state.  Error and EOP flags are cleared by writing 1 to them.
pub struct Stm32F3FlashSr(u32);

impl Stm32F3FlashSr {
    /// STM32F3 memory address of this register
    pub const ADDRESS: u32 = STM32F3_FLASH_REG_BASE + 0x0C;

    /// STM32F3 FLASH_SR register bit positions
    pub const BSY_BIT: u32 = 0;
    pub const PGERR_BIT: u32 = 2;
    pub const WRPRTERR_BIT: u32 = 4;
    pub const EOP_BIT: u32 = 5;

    /// All error flags
    pub const ERROR_MASK: u32 = (1 << Self::PGERR_BIT) | (1 << Self::WRPRTERR_BIT);

    /// Whether a flash operation is in progress.
    pub fn busy(&self) -> bool {
        (self.0 >> Self::BSY_BIT) & 1 != 0
    }

    /// Whether there are any errors in the flash status register.
    pub fn errors(&self) -> bool {
        self.0 & Self::ERROR_MASK != 0
    }

    /// Whether the last operation completed.
    pub fn end_of_operation(&self) -> bool {
        (self.0 >> Self::EOP_BIT) & 1 != 0
    }

    /// Returns the HAL error code for the errors flagged in this register.
    pub fn hal_error_code(&self) -> u32 {
        let mut code = 0;
        if self.0 & (1 << Self::PGERR_BIT) != 0 {
            code |= HAL_F3_ERROR_PROG;
        }
        if self.0 & (1 << Self::WRPRTERR_BIT) != 0 {
            code |= HAL_F3_ERROR_WRP;
        }
        code
    }
}

/// STM32F3 FLASH_CR register
///
/// Used to control flash erasing and programming operations.
pub struct Stm32F3FlashCr;

impl Stm32F3FlashCr {
    /// STM32F3 memory address of this register
    pub const ADDRESS: u32 = STM32F3_FLASH_REG_BASE + 0x10;

    /// STM32F3 FLASH_CR register bit positions
    pub const PG_BIT: u32 = 0;
    pub const PER_BIT: u32 = 1;
    pub const MER_BIT: u32 = 2;
    pub const STRT_BIT: u32 = 6;
    pub const LOCK_BIT: u32 = 7;
    pub const ERRIE_BIT: u32 = 10;
    pub const EOPIE_BIT: u32 = 12;
}

/// STM32F3 FLASH_AR register
///
/// Holds the address of the page to erase when FLASH_CR PER is set.
pub struct Stm32F3FlashAr;

impl Stm32F3FlashAr {
    /// STM32F3 memory address of this register
    pub const ADDRESS: u32 = STM32F3_FLASH_REG_BASE + 0x14;
}

/// STM32F4/F7 FLASH_CR register
///
/// Used to control flash erasing and programming operations.
pub struct Stm32F4FlashCr;

impl Stm32F4FlashCr {
    /// STM32F4 memory address of this register
    pub const ADDRESS: u32 = STM32F4_FLASH_REG_BASE + 0x10;

    /// STM32F4 FLASH_CR register bit positions
    pub const LOCK_BIT: u32 = 31;
    pub const ERRIE_BIT: u32 = 25;
    pub const EOPIE_BIT: u32 = 24;
    pub const STRT_BIT: u32 = 16;
    pub const MER_BIT: u32 = 2;
    pub const SER_BIT: u32 = 1;
    pub const PG_BIT: u32 = 0;

    /// STM32F4 FLASH_CR register shift values
    pub const SNB_SHIFT: u32 = 3;
    pub const PSIZE_SHIFT: u32 = 8;

    /// STM32F4 FLASH_CR register masks
    pub const SNB_MASK: u32 = 0b1111;
    pub const PSIZE_MASK: u32 = 0b11;

    /// STM32F4 FLASH_CR PSIZE values.  flashbyte always programs half-words,
    /// so uses `PSIZE_X16`.
    pub const PSIZE_X8: u32 = 0b00;
    pub const PSIZE_X16: u32 = 0b01;
    pub const PSIZE_X32: u32 = 0b10;
    pub const PSIZE_X64: u32 = 0b11;
}

/// STM32F4/F7 FLASH_SR register
///
/// Used to check the status of flash operations, including errors and busy
/// state.  Bit 7 is PGSERR on the F4 and ERSERR on the F7.  Both map to the
/// same HAL error code.
pub struct Stm32F4FlashSr(u32);

impl Stm32F4FlashSr {
    /// STM32F4 memory address of this register
    pub const ADDRESS: u32 = STM32F4_FLASH_REG_BASE + 0x0C;

    /// STM32F4 FLASH_SR register bit positions
    pub const EOP_BIT: u32 = 0;
    pub const OPERR_BIT: u32 = 1;
    pub const WRPERR_BIT: u32 = 4;
    pub const PGAERR_BIT: u32 = 5;
    pub const PGPERR_BIT: u32 = 6;
    pub const PGSERR_BIT: u32 = 7;
    pub const RDERR_BIT: u32 = 8;
    pub const BSY_BIT: u32 = 16;

    /// All error flags
    pub const ERROR_MASK: u32 = (1 << Self::OPERR_BIT)
        | (1 << Self::WRPERR_BIT)
        | (1 << Self::PGAERR_BIT)
        | (1 << Self::PGPERR_BIT)
        | (1 << Self::PGSERR_BIT)
        | (1 << Self::RDERR_BIT);

    /// Whether a flash operation is in progress.
    pub fn busy(&self) -> bool {
        (self.0 >> Self::BSY_BIT) & 1 != 0
    }

    /// Whether there are any errors in the flash status register.
    pub fn errors(&self) -> bool {
        self.0 & Self::ERROR_MASK != 0
    }

    /// Whether the last operation completed.
    pub fn end_of_operation(&self) -> bool {
        (self.0 >> Self::EOP_BIT) & 1 != 0
    }

    /// Returns the HAL error code for the errors flagged in this register.
    pub fn hal_error_code(&self) -> u32 {
        const MAP: [(u32, u32); 6] = [
            (Stm32F4FlashSr::RDERR_BIT, HAL_F4_ERROR_RD),
            (Stm32F4FlashSr::PGSERR_BIT, HAL_F4_ERROR_PGS),
            (Stm32F4FlashSr::PGPERR_BIT, HAL_F4_ERROR_PGP),
            (Stm32F4FlashSr::PGAERR_BIT, HAL_F4_ERROR_PGA),
            (Stm32F4FlashSr::WRPERR_BIT, HAL_F4_ERROR_WRP),
            (Stm32F4FlashSr::OPERR_BIT, HAL_F4_ERROR_OPERATION),
        ];
        MAP.iter()
            .filter(|(bit, _)| self.0 & (1 << bit) != 0)
            .fold(0, |code, (_, hal)| code | hal)
    }
}

const_assert_eq!(HAL_F4_ERROR_PGS, HAL_F7_ERROR_ERS);

/// STM32F4/F7 FLASH_KEYR register
///
/// Used to unlock the flash memory for programming and erasing operations.
pub struct Stm32F4FlashKeyr;

impl Stm32F4FlashKeyr {
    /// STM32F4 memory address of this register
    pub const ADDRESS: u32 = STM32F4_FLASH_REG_BASE + 0x04;

    /// Keys, written in order, to unlock FLASH_CR
    pub const KEY1: u32 = FLASH_KEY1;
    pub const KEY2: u32 = FLASH_KEY2;
}

macro_rules! status_register {
    ($name:ident) => {
        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u32 {
            fn from(sr: $name) -> Self {
                sr.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{:08X}", self.0)
            }
        }
    };
}

status_register!(Stm32F3FlashSr);
status_register!(Stm32F4FlashSr);

/// STM32 product family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StmFamily {
    /// STM32F3 family - page erase, half-word programming only
    F3,

    /// STM32F4 family - sector erase, selectable programming width
    F4,

    /// STM32F7 family - sector erase, selectable programming width
    F7,
}

impl StmFamily {
    /// Flash memory base address
    pub fn flash_base(&self) -> u32 {
        STM32_FLASH_BASE
    }

    /// Address of the FLASH_KEYR register
    pub fn keyr_address(&self) -> u32 {
        match self {
            StmFamily::F3 => Stm32F3FlashKeyr::ADDRESS,
            StmFamily::F4 | StmFamily::F7 => Stm32F4FlashKeyr::ADDRESS,
        }
    }

    /// Address of the FLASH_SR register
    pub fn sr_address(&self) -> u32 {
        match self {
            StmFamily::F3 => Stm32F3FlashSr::ADDRESS,
            StmFamily::F4 | StmFamily::F7 => Stm32F4FlashSr::ADDRESS,
        }
    }

    /// Address of the FLASH_CR register
    pub fn cr_address(&self) -> u32 {
        match self {
            StmFamily::F3 => Stm32F3FlashCr::ADDRESS,
            StmFamily::F4 | StmFamily::F7 => Stm32F4FlashCr::ADDRESS,
        }
    }

    /// FLASH_CR LOCK bit mask
    pub fn lock_mask(&self) -> u32 {
        match self {
            StmFamily::F3 => 1 << Stm32F3FlashCr::LOCK_BIT,
            StmFamily::F4 | StmFamily::F7 => 1 << Stm32F4FlashCr::LOCK_BIT,
        }
    }

    /// Whether this family erases by page (rather than sector).
    pub fn erases_pages(&self) -> bool {
        matches!(self, StmFamily::F3)
    }
}

impl fmt::Display for StmFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StmFamily::F3 => write!(f, "STM32F3"),
            StmFamily::F4 => write!(f, "STM32F4"),
            StmFamily::F7 => write!(f, "STM32F7"),
        }
    }
}

/// STM32F303xE page size in bytes.
pub const STM32F303_PAGE_SIZE_BYTES: u32 = 2 * 1024;

/// STM32F401xE sector sizes in bytes.
pub const STM32F401_SECTOR_SIZES_BYTES: [u32; 8] = [
    16 * 1024,  // Sector 0
    16 * 1024,  // Sector 1
    16 * 1024,  // Sector 2
    16 * 1024,  // Sector 3
    64 * 1024,  // Sector 4
    128 * 1024, // Sector 5
    128 * 1024, // Sector 6
    128 * 1024, // Sector 7
];

/// STM32F756xG sector sizes in bytes.
pub const STM32F756_SECTOR_SIZES_BYTES: [u32; 8] = [
    32 * 1024,  // Sector 0
    32 * 1024,  // Sector 1
    32 * 1024,  // Sector 2
    32 * 1024,  // Sector 3
    128 * 1024, // Sector 4
    256 * 1024, // Sector 5
    256 * 1024, // Sector 6
    256 * 1024, // Sector 7
];

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn f3_status_decoding() {
        let sr = Stm32F3FlashSr::from(1 << Stm32F3FlashSr::BSY_BIT);
        assert!(sr.busy());
        assert!(!sr.errors());

        let sr = Stm32F3FlashSr::from((1 << Stm32F3FlashSr::PGERR_BIT) | (1 << Stm32F3FlashSr::EOP_BIT));
        assert!(!sr.busy());
        assert!(sr.errors());
        assert!(sr.end_of_operation());
        assert_eq!(sr.hal_error_code(), HAL_F3_ERROR_PROG);

        let sr = Stm32F3FlashSr::from(Stm32F3FlashSr::ERROR_MASK);
        assert_eq!(sr.hal_error_code(), HAL_F3_ERROR_PROG | HAL_F3_ERROR_WRP);
    }

    #[test]
    fn f4_status_decoding() {
        let sr = Stm32F4FlashSr::from(1 << Stm32F4FlashSr::BSY_BIT);
        assert!(sr.busy());
        assert!(!sr.errors());
        assert_eq!(sr.hal_error_code(), 0);

        let sr = Stm32F4FlashSr::from(
            (1 << Stm32F4FlashSr::PGPERR_BIT) | (1 << Stm32F4FlashSr::PGAERR_BIT),
        );
        assert!(sr.errors());
        assert_eq!(sr.hal_error_code(), HAL_F4_ERROR_PGP | HAL_F4_ERROR_PGA);

        let sr = Stm32F4FlashSr::from(1 << Stm32F4FlashSr::WRPERR_BIT);
        assert_eq!(sr.hal_error_code(), HAL_F4_ERROR_WRP);
        assert_eq!(u32::from(sr), 0x10);
    }

    #[test]
    fn family_register_addresses() {
        assert_eq!(StmFamily::F3.cr_address(), 0x4002_2010);
        assert_eq!(StmFamily::F3.sr_address(), 0x4002_200C);
        assert_eq!(StmFamily::F4.keyr_address(), 0x4002_3C04);
        assert_eq!(StmFamily::F7.cr_address(), 0x4002_3C10);
        assert_eq!(StmFamily::F7.lock_mask(), 0x8000_0000);
        assert!(StmFamily::F3.erases_pages());
        assert!(!StmFamily::F4.erases_pages());
    }

    #[test]
    fn sector_tables_cover_flash() {
        let f401: u32 = STM32F401_SECTOR_SIZES_BYTES.iter().sum();
        assert_eq!(f401, 512 * 1024);
        let f756: u32 = STM32F756_SECTOR_SIZES_BYTES.iter().sum();
        assert_eq!(f756, 1024 * 1024);
    }
}
