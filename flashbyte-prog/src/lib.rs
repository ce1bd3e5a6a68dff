// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! flashbyte-prog library
//!
//! Byte granular programming of STM32 embedded flash, which can only be
//! programmed a half-word at a time, and only from the erased state.
//!
//! It is `no_std` and requires an `alloc` implementation.  The `cli`
//! feature, which needs `std`, adds `clap` support to [`ProgramGuard`].
//!
//! The following diagram shows the key `flashbyte-prog` concepts.
//!
//! ```text
//!      Application         |  CoalescingStorage (embedded-storage NorFlash)
//! ----------------------   |
//!   UnitWriteCoalescer    /
//! ----------------------                 ProgramError / EraseError
//! ProgrammingUnitPrimitive  ---------------------------------------
//! ----------------------       |                          |
//!    FlashController        SimFlash                   (other)
//! ----------------------       |
//!  MemoryBus (MmioBus |     FlashArray
//!            SimBus)
//! ```
//!
//! * [`UnitWriteCoalescer`] accepts single byte writes at arbitrary
//!   addresses, and assembles them into half-words before programming.
//! * [`ProgrammingUnitPrimitive`] is the physical programming interface the
//!   coalescer is built on.
//! * [`FlashController`] implements the primitive by driving the STM32 flash
//!   peripheral's registers over a [`MemoryBus`].
//! * [`sim::SimFlash`] implements the primitive over an in-memory flash,
//!   and [`sim::SimBus`] emulates the flash peripheral's registers, so both
//!   layers can be used without hardware.

#![no_std]

pub mod bus;
pub mod coalescer;
pub mod controller;
pub mod primitive;
pub mod sim;
pub mod storage;

#[doc(inline)]
pub use crate::bus::{MemoryBus, MmioBus};
#[doc(inline)]
pub use crate::coalescer::{ProgramGuard, UnitWriteCoalescer, WriteOutcome};
#[doc(inline)]
pub use crate::controller::FlashController;
#[doc(inline)]
pub use crate::primitive::ProgrammingUnitPrimitive;
#[doc(inline)]
pub use crate::storage::{CoalescingStorage, StorageError};

extern crate alloc;
#[cfg(feature = "cli")]
extern crate std;
use alloc::format;
use alloc::string::String;
use core::fmt;
use serde::Serialize;

/// Error returned when programming a unit fails.
///
/// Device reported failures carry the HAL style error code for the target's
/// family, unchanged.  See [`flashbyte_core::stm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramError {
    /// The flash peripheral reported an error.  Contains the HAL error code.
    Device(u32),

    /// The address is not aligned to a programming unit.
    Misaligned(u32),

    /// The address is outside the target's flash.
    OutOfRange(u32),

    /// The flash is locked, and could not be unlocked.
    Locked,

    /// The flash peripheral stayed busy for too long.
    Timeout,
}

impl ProgramError {
    /// Returns a string representation of the error.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgramError::Device(_) => "Device Error",
            ProgramError::Misaligned(_) => "Misaligned Address",
            ProgramError::OutOfRange(_) => "Address Out Of Range",
            ProgramError::Locked => "Flash Locked",
            ProgramError::Timeout => "Timeout",
        }
    }

    /// Returns the numeric code reported for this error.  Device errors
    /// report the device's code.
    pub fn code(&self) -> u32 {
        match self {
            ProgramError::Device(code) => *code,
            ProgramError::Misaligned(_) => 0x100,
            ProgramError::OutOfRange(_) => 0x101,
            ProgramError::Locked => 0x102,
            ProgramError::Timeout => 0x103,
        }
    }
}

impl Serialize for ProgramError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("ProgramError", 2)?;

        let kind = match self {
            ProgramError::Device(_) => "device",
            ProgramError::Misaligned(_) => "misaligned",
            ProgramError::OutOfRange(_) => "out of range",
            ProgramError::Locked => "locked",
            ProgramError::Timeout => "timeout",
        };
        state.serialize_field("kind", kind)?;

        let detail = match self {
            ProgramError::Device(code) => format!("0x{code:02X}"),
            ProgramError::Misaligned(addr) | ProgramError::OutOfRange(addr) => {
                format!("0x{addr:08X}")
            }
            _ => String::new(),
        };
        state.serialize_field("detail", &detail)?;
        state.end()
    }
}

impl fmt::Display for ProgramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramError::Device(code) => write!(f, "{}: 0x{code:02X}", self.as_str()),
            ProgramError::Misaligned(addr) | ProgramError::OutOfRange(addr) => {
                write!(f, "{}: 0x{addr:08X}", self.as_str())
            }
            _ => write!(f, "{}", self.as_str()),
        }
    }
}

/// Error returned when erasing a region fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseError {
    /// The flash peripheral reported an error.  Contains the HAL error code.
    Device(u32),

    /// The region does not exist on this target, or is the wrong kind of
    /// region (a page on a sector erase part, for example).
    InvalidRegion,

    /// The flash is locked, and could not be unlocked.
    Locked,

    /// The flash peripheral stayed busy for too long.
    Timeout,
}

impl EraseError {
    /// Returns a string representation of the error.
    pub fn as_str(&self) -> &'static str {
        match self {
            EraseError::Device(_) => "Device Error",
            EraseError::InvalidRegion => "Invalid Region",
            EraseError::Locked => "Flash Locked",
            EraseError::Timeout => "Timeout",
        }
    }

    /// Returns the numeric code reported for this error.  Device errors
    /// report the device's code.
    pub fn code(&self) -> u32 {
        match self {
            EraseError::Device(code) => *code,
            EraseError::InvalidRegion => 0x200,
            EraseError::Locked => 0x202,
            EraseError::Timeout => 0x203,
        }
    }
}

impl Serialize for EraseError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("EraseError", 2)?;

        let kind = match self {
            EraseError::Device(_) => "device",
            EraseError::InvalidRegion => "invalid region",
            EraseError::Locked => "locked",
            EraseError::Timeout => "timeout",
        };
        state.serialize_field("kind", kind)?;

        let detail = match self {
            EraseError::Device(code) => format!("0x{code:02X}"),
            _ => String::new(),
        };
        state.serialize_field("detail", &detail)?;
        state.end()
    }
}

impl fmt::Display for EraseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EraseError::Device(code) => write!(f, "{}: 0x{code:02X}", self.as_str()),
            _ => write!(f, "{}", self.as_str()),
        }
    }
}

// Used when an erase is preceded by an unlock.
impl From<ProgramError> for EraseError {
    fn from(error: ProgramError) -> Self {
        match error {
            ProgramError::Device(code) => EraseError::Device(code),
            ProgramError::Locked => EraseError::Locked,
            ProgramError::Timeout => EraseError::Timeout,
            ProgramError::Misaligned(_) | ProgramError::OutOfRange(_) => {
                EraseError::InvalidRegion
            }
        }
    }
}
