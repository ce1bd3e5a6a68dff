// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! flashbyte exercises the embedded flash of STM32 microcontrollers, one
//! byte at a time.
//!
//! flashbyte-core - Core flash and board concepts used by flashbyte.
//!
//! Contains the programming unit types, the STM32 flash register maps, flash
//! geometry and the table of supported validation boards.  Designed to be
//! used in conjunction with the `flashbyte-prog` library, which performs the
//! actual programming.
//!
//! This library is `no_std` compatible and does not require `alloc`.

#![no_std]

pub mod flash;
pub mod stm;
pub mod unit;

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

use crate::flash::{EraseLayout, EraseRegion, FlashGeometry};
use crate::stm::{
    STM32F303_PAGE_SIZE_BYTES, STM32F401_SECTOR_SIZES_BYTES, STM32F756_SECTOR_SIZES_BYTES,
    StmFamily,
};

/// The validation routine a board runs by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestKind {
    /// Programs half-words directly.
    HalfWord,

    /// Programs single bytes through the write coalescer.
    Byte,
}

/// A supported validation board.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumIter, IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Board {
    /// NUCLEO-F303RE, STM32F303RET6
    #[default]
    NucleoF303re,

    /// NUCLEO-F401RE, STM32F401RET6
    NucleoF401re,

    /// NUCLEO-F756ZG, STM32F756ZGT6
    NucleoF756zg,
}

impl Board {
    /// Short name, as used on the command line and in configuration files.
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Product name, as printed on the board.
    pub fn product(&self) -> &'static str {
        match self {
            Board::NucleoF303re => "NUCLEO-F303RE",
            Board::NucleoF401re => "NUCLEO-F401RE",
            Board::NucleoF756zg => "NUCLEO-F756ZG",
        }
    }

    pub fn family(&self) -> StmFamily {
        match self {
            Board::NucleoF303re => StmFamily::F3,
            Board::NucleoF401re => StmFamily::F4,
            Board::NucleoF756zg => StmFamily::F7,
        }
    }

    /// Flash geometry of the board's MCU.
    pub fn geometry(&self) -> FlashGeometry {
        let base = self.family().flash_base();
        match self {
            Board::NucleoF303re => FlashGeometry::new(
                base,
                512 * 1024,
                EraseLayout::Pages {
                    page_size: STM32F303_PAGE_SIZE_BYTES,
                },
            ),
            Board::NucleoF401re => FlashGeometry::new(
                base,
                512 * 1024,
                EraseLayout::Sectors(&STM32F401_SECTOR_SIZES_BYTES),
            ),
            Board::NucleoF756zg => FlashGeometry::new(
                base,
                1024 * 1024,
                EraseLayout::Sectors(&STM32F756_SECTOR_SIZES_BYTES),
            ),
        }
    }

    /// The region erased and programmed by the validation routines.  Chosen
    /// to be well clear of the firmware image.
    pub fn test_region(&self) -> EraseRegion {
        match self {
            Board::NucleoF303re => EraseRegion::Page(16),
            Board::NucleoF401re | Board::NucleoF756zg => EraseRegion::Sector(4),
        }
    }

    /// The test region as named in the board's console messages.  The F303
    /// firmware calls its flash pages sectors.
    pub fn test_region_label(&self) -> &'static str {
        match self {
            Board::NucleoF303re => "sector 16",
            Board::NucleoF401re | Board::NucleoF756zg => "sector 4",
        }
    }

    /// First address of the test region.
    pub fn test_address(&self) -> u32 {
        match self {
            Board::NucleoF303re => 0x0800_8000,
            Board::NucleoF401re => 0x0801_0000,
            Board::NucleoF756zg => 0x0802_0000,
        }
    }

    /// Console baud rate.
    pub fn console_baud(&self) -> u32 {
        match self {
            Board::NucleoF303re => 38_400,
            Board::NucleoF401re | Board::NucleoF756zg => 115_200,
        }
    }

    /// The USART wired to the ST-LINK virtual COM port.
    pub fn console_uart(&self) -> &'static str {
        match self {
            Board::NucleoF303re | Board::NucleoF401re => "USART2",
            Board::NucleoF756zg => "USART3",
        }
    }

    /// The routine run by the `t` console command.
    pub fn default_test(&self) -> TestKind {
        match self {
            Board::NucleoF303re => TestKind::Byte,
            Board::NucleoF401re | Board::NucleoF756zg => TestKind::HalfWord,
        }
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.product())
    }
}

/// Error returned when parsing an unknown board name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownBoard;

impl fmt::Display for UnknownBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown board")
    }
}

impl core::error::Error for UnknownBoard {}

impl FromStr for Board {
    type Err = UnknownBoard;

    /// Accepts either the short name (`nucleo-f401re`) or the product name
    /// (`NUCLEO-F401RE`), case insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Board::iter()
            .find(|board| board.name().eq_ignore_ascii_case(s) || board.product().eq_ignore_ascii_case(s))
            .ok_or(UnknownBoard)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use pretty_assertions::assert_eq;
    use std::format;

    #[test]
    fn test_regions_are_in_flash() {
        for board in Board::iter() {
            let geometry = board.geometry();
            let range = geometry
                .region_range(board.test_region())
                .expect("test region exists");
            assert_eq!(range.start, board.test_address(), "{board}");
            assert_eq!(geometry.region_of(board.test_address()), Some(board.test_region()));
            assert_eq!(geometry.range().end - geometry.base(), geometry.size());
        }
    }

    #[test]
    fn board_names() {
        assert_eq!(Board::NucleoF303re.name(), "nucleo-f303re");
        assert_eq!("nucleo-f401re".parse(), Ok(Board::NucleoF401re));
        assert_eq!("NUCLEO-F756ZG".parse(), Ok(Board::NucleoF756zg));
        assert_eq!("nucleo-f103rb".parse::<Board>(), Err(UnknownBoard));
        assert_eq!(format!("{}", Board::NucleoF401re), "NUCLEO-F401RE");
    }

    #[test]
    fn board_settings() {
        assert_eq!(Board::NucleoF303re.console_baud(), 38_400);
        assert_eq!(Board::NucleoF756zg.console_uart(), "USART3");
        assert_eq!(Board::NucleoF303re.default_test(), TestKind::Byte);
        assert_eq!(Board::NucleoF401re.default_test(), TestKind::HalfWord);
        assert_eq!(Board::NucleoF756zg.family(), StmFamily::F7);
        assert_eq!(Board::NucleoF303re.test_region(), EraseRegion::Page(16));
        assert_eq!(Board::NucleoF303re.test_region_label(), "sector 16");
        assert_eq!(Board::NucleoF401re.test_region_label(), "sector 4");
        assert_eq!(Board::default(), Board::NucleoF303re);
    }
}
