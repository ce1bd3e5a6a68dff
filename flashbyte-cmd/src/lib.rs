// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! flashbyte exercises the embedded flash of STM32 microcontrollers, one
//! byte at a time.
//!
//! flashbyte-cmd - flashbyte's serial console commands and messages
//!
//! The console is driven by single byte commands, each of which is echoed
//! back before it is run.  Progress is reported with the messages and
//! formatters in this crate.
//!
//! This crate is `no_std` and platform agnostic.

#![no_std]

use core::fmt::{self, Write};
use heapless::String;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use serde::Serialize;
use strum::{EnumIter, IntoEnumIterator};

/// Maximum length of a single console message.
pub const LINE_LEN: usize = 100;

/// A single console message.
pub type Line = String<LINE_LEN>;

/// Sent when the console starts.
pub const BANNER: &str = "Write t to start the flash test\r\n";

/// Fixed progress messages
pub const MSG_UNLOCKING: &str = "Unlocking Flash...\n";
pub const MSG_SUCCESS: &str = "Success!\n";

/// Error code reported when a value read back does not match the value
/// written.
pub const VERIFY_MISMATCH_CODE: u32 = 10;

/// Console command bytes
pub const CMD_TEST: u8 = b't';
pub const CMD_HALF_WORD_TEST: u8 = b'h';
pub const CMD_BYTE_TEST: u8 = b'b';
pub const CMD_ERASE: u8 = b'e';
pub const CMD_DUMP: u8 = b'd';
pub const CMD_HELP: u8 = b'?';

/// Number of bytes shown by [`Command::Dump`].
pub const DUMP_LEN: usize = 16;

/// Console single byte commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, EnumIter)]
#[repr(u8)]
pub enum Command {
    /// Run the board's default test
    Test = CMD_TEST,

    /// Run the half-word programming test
    HalfWordTest = CMD_HALF_WORD_TEST,

    /// Run the byte programming test
    ByteTest = CMD_BYTE_TEST,

    /// Erase the test region
    Erase = CMD_ERASE,

    /// Show the start of the test region
    Dump = CMD_DUMP,

    /// List the commands
    Help = CMD_HELP,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Test => write!(f, "Test"),
            Command::HalfWordTest => write!(f, "Half-Word Test"),
            Command::ByteTest => write!(f, "Byte Test"),
            Command::Erase => write!(f, "Erase"),
            Command::Dump => write!(f, "Dump"),
            Command::Help => write!(f, "Help"),
        }
    }
}

impl Command {
    /// Converts a Command to its byte representation
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Convert a command byte to a `Command` enum variant
    ///
    /// Arguments:
    /// - `cmd`: The command byte to convert.
    ///
    /// Returns:
    /// - `Ok(Command)`: If the command byte is recognized.
    /// - `Err(ProtocolError::Command)`: If the command byte is not
    ///   recognized.
    pub fn from_byte(cmd: u8) -> Result<Self, ProtocolError> {
        match cmd {
            CMD_TEST => Ok(Self::Test),
            CMD_HALF_WORD_TEST => Ok(Self::HalfWordTest),
            CMD_BYTE_TEST => Ok(Self::ByteTest),
            CMD_ERASE => Ok(Self::Erase),
            CMD_DUMP => Ok(Self::Dump),
            CMD_HELP => Ok(Self::Help),
            _ => Err(ProtocolError::Command(cmd)),
        }
    }

    /// One line description, for the help text
    pub fn description(&self) -> &'static str {
        match self {
            Command::Test => "run the default flash test",
            Command::HalfWordTest => "program half-words directly",
            Command::ByteTest => "program single bytes",
            Command::Erase => "erase the test region",
            Command::Dump => "show the first 16 bytes of the test region",
            Command::Help => "show this help",
        }
    }

    /// Whether the command modifies the flash.
    pub fn modifies_flash(&self) -> bool {
        matches!(
            self,
            Command::Test | Command::HalfWordTest | Command::ByteTest | Command::Erase
        )
    }
}

/// Type used to represent errors that can occur in receiving commands over
/// the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Invalid command byte received
    Command(u8),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Command(cmd) => write!(f, "Unknown command: 0x{cmd:02X}"),
        }
    }
}

/// Formats a message into a [`Line`].  Messages longer than [`LINE_LEN`]
/// are cut short.
pub fn line(args: fmt::Arguments<'_>) -> Line {
    let mut line = Line::new();
    if line.write_fmt(args).is_err() {
        warn!("Console message truncated");
    }
    line
}

/// "Erasing sector 16..."
pub fn erasing(region: impl fmt::Display) -> Line {
    line(format_args!("Erasing {region}..."))
}

/// "Programming half word 0..."
pub fn programming(label: impl fmt::Display) -> Line {
    line(format_args!("Programming {label}..."))
}

/// Time taken by an erase.
pub fn elapsed(ms: u64) -> Line {
    line(format_args!("{ms} ms\n"))
}

/// Time taken by a verified program operation.
pub fn ok(ms: u64) -> Line {
    line(format_args!("ok! ({ms} ms)\n"))
}

/// A failed test.
pub fn failed(error: impl fmt::Display, code: u32) -> Line {
    line(format_args!("Failed: {error} (code {code})\n"))
}

/// One line of a hex dump: the address, then the bytes.
pub fn dump(addr: u32, bytes: &[u8]) -> Line {
    let mut out = line(format_args!("0x{addr:08X}:"));
    for byte in bytes {
        if write!(out, " {byte:02X}").is_err() {
            warn!("Dump truncated");
            break;
        }
    }
    if out.push('\n').is_err() {
        warn!("Dump truncated");
    }
    out
}

/// Returns an iterator over the help text, one line per command.
pub fn help() -> impl Iterator<Item = Line> {
    Command::iter().map(|cmd| {
        line(format_args!(
            "{} - {}\n",
            cmd.to_byte() as char,
            cmd.description()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn command_bytes() {
        for cmd in Command::iter() {
            assert_eq!(Command::from_byte(cmd.to_byte()), Ok(cmd));
        }
        assert_eq!(Command::from_byte(b't'), Ok(Command::Test));
        assert_eq!(Command::from_byte(b'x'), Err(ProtocolError::Command(b'x')));
        assert_eq!(Command::from_byte(b'T'), Err(ProtocolError::Command(b'T')));
        assert!(Command::Erase.modifies_flash());
        assert!(!Command::Dump.modifies_flash());
    }

    #[test]
    fn progress_messages() {
        assert_eq!(erasing("sector 16").as_str(), "Erasing sector 16...");
        assert_eq!(elapsed(21).as_str(), "21 ms\n");
        assert_eq!(programming("bit 0").as_str(), "Programming bit 0...");
        assert_eq!(ok(0).as_str(), "ok! (0 ms)\n");
        assert_eq!(
            failed("Verification Mismatch", VERIFY_MISMATCH_CODE).as_str(),
            "Failed: Verification Mismatch (code 10)\n"
        );
    }

    #[test]
    fn dump_line() {
        let out = dump(0x0800_8000, &[0xFE, 0xFF, 0x00]);
        assert_eq!(out.as_str(), "0x08008000: FE FF 00\n");
    }

    #[test]
    fn long_lines_are_truncated() {
        let long = [b'a'; 200];
        let text = core::str::from_utf8(&long).unwrap();
        let out = programming(text);
        assert!(out.len() <= LINE_LEN);
        assert!(out.starts_with("Programming "));
    }

    #[test]
    fn help_lists_every_command() {
        let mut lines = help();
        assert_eq!(
            lines.next().map(|l| l.as_str() == "t - run the default flash test\n"),
            Some(true)
        );
        assert_eq!(help().count(), 6);
    }
}
