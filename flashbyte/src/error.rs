// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! flashbyte - Error types

use core::fmt;
use serde::Serialize;

use flashbyte_cmd::VERIFY_MISMATCH_CODE;
use flashbyte_prog::{EraseError, ProgramError};

/// flashbyte application error type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FlashbyteError {
    #[serde(rename = "program")]
    Program(ProgramError),
    #[serde(rename = "erase")]
    Erase(EraseError),
    #[serde(rename = "verify")]
    Verify(VerificationMismatch),
    #[serde(rename = "flashbyte")]
    Flashbyte(ErrorKind),
}

impl fmt::Display for FlashbyteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashbyteError::Program(e) => write!(f, "{e}"),
            FlashbyteError::Erase(e) => write!(f, "{e}"),
            FlashbyteError::Verify(mismatch) => write!(f, "{mismatch}"),
            FlashbyteError::Flashbyte(kind) => write!(f, "{kind}"),
        }
    }
}

impl std::error::Error for FlashbyteError {}

impl FlashbyteError {
    /// The code reported on the console for this error.  Flash errors
    /// report the device's HAL error code.
    pub fn code(&self) -> u32 {
        match self {
            FlashbyteError::Program(e) => e.code(),
            FlashbyteError::Erase(e) => e.code(),
            FlashbyteError::Verify(_) => VERIFY_MISMATCH_CODE,
            FlashbyteError::Flashbyte(kind) => kind.code(),
        }
    }

    pub fn serial() -> Self {
        FlashbyteError::Flashbyte(ErrorKind::Serial)
    }

    /// Whether the console link failed, which ends the session.
    pub fn is_serial(&self) -> bool {
        matches!(self, FlashbyteError::Flashbyte(ErrorKind::Serial))
    }
}

/// A value read back from flash differs from the value written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerificationMismatch {
    pub address: u32,
    pub expected: u16,
    pub actual: u16,
}

impl fmt::Display for VerificationMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Verification Mismatch at 0x{:08X}: expected 0x{:04X}, read 0x{:04X}",
            self.address, self.expected, self.actual
        )
    }
}

/// FlashbyteError::Flashbyte error kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Serial,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Serial => write!(f, "Serial error"),
            ErrorKind::Config => write!(f, "Invalid configuration"),
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("ErrorKind", 2)?;

        let kind = match self {
            ErrorKind::Serial => "serial",
            ErrorKind::Config => "config",
        };

        state.serialize_field("kind", kind)?;
        state.serialize_field("detail", "")?;
        state.end()
    }
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            ErrorKind::Serial => 0x300,
            ErrorKind::Config => 0x301,
        }
    }
}

impl From<ProgramError> for FlashbyteError {
    fn from(error: ProgramError) -> Self {
        FlashbyteError::Program(error)
    }
}

impl From<EraseError> for FlashbyteError {
    fn from(error: EraseError) -> Self {
        FlashbyteError::Erase(error)
    }
}

impl From<VerificationMismatch> for FlashbyteError {
    fn from(mismatch: VerificationMismatch) -> Self {
        FlashbyteError::Verify(mismatch)
    }
}

impl From<ErrorKind> for FlashbyteError {
    fn from(kind: ErrorKind) -> Self {
        FlashbyteError::Flashbyte(kind)
    }
}
