// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! flashbyte - Serial console
//!
//! Reads single byte commands, echoes each one back, and runs it.  Unknown
//! bytes are echoed and otherwise ignored.

use embedded_io::{Read, Write};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use flashbyte_cmd::{BANNER, Command, failed, help};
use flashbyte_core::{Board, TestKind};
use flashbyte_prog::ProgramGuard;

use crate::config::Config;
use crate::device::Ticks;
use crate::error::FlashbyteError;
use crate::routine::{Routine, TestFlash, send};

/// The console, reading commands from `input` and reporting to `out`.
pub struct Console<R, W, F, T> {
    input: R,
    out: W,
    flash: F,
    ticks: T,
    board: Board,
    guard: ProgramGuard,
    echo: bool,
}

impl<R: Read, W: Write, F: TestFlash, T: Ticks> Console<R, W, F, T> {
    pub fn new(input: R, out: W, flash: F, ticks: T, config: &Config) -> Self {
        Self {
            input,
            out,
            flash,
            ticks,
            board: config.board,
            guard: config.guard,
            echo: config.echo,
        }
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn into_parts(self) -> (R, W, F) {
        (self.input, self.out, self.flash)
    }

    /// Sends the banner, then runs commands until the input ends.
    ///
    /// Returns:
    /// - `Ok(())`: The input ended.
    /// - `Err(FlashbyteError)`: The console could not be read or written.
    ///   Flash test failures are reported on the console, and do not end
    ///   the session.
    pub fn run(&mut self) -> Result<(), FlashbyteError> {
        send(&mut self.out, BANNER)?;
        self.flush()?;

        let mut byte = [0u8; 1];
        loop {
            let read = self.input.read(&mut byte).map_err(|e| {
                warn!("Console read failed: {e:?}");
                FlashbyteError::serial()
            })?;
            if read == 0 {
                info!("Console input closed");
                break;
            }

            if self.echo {
                self.out.write_all(&byte).map_err(|e| {
                    warn!("Console write failed: {e:?}");
                    FlashbyteError::serial()
                })?;
            }

            match Command::from_byte(byte[0]) {
                Ok(cmd) => self.dispatch(cmd)?,
                Err(e) => trace!("{e}"),
            }
            self.flush()?;
        }
        Ok(())
    }

    /// Runs a single command.
    ///
    /// Returns:
    /// - `Ok(())`: The command ran, successfully or not.
    /// - `Err(FlashbyteError)`: The console could not be written.
    pub fn dispatch(&mut self, cmd: Command) -> Result<(), FlashbyteError> {
        debug!("Command: {cmd}");
        if cmd == Command::Help {
            for line in help() {
                send(&mut self.out, &line)?;
            }
            return Ok(());
        }

        let guard = self.guard;
        let test = self.board.default_test();
        let mut routine = Routine::new(self.board, &mut self.flash, &mut self.out, &self.ticks);
        let result = match cmd {
            Command::Test => match test {
                TestKind::HalfWord => routine.half_word_test(),
                TestKind::Byte => routine.byte_test(guard),
            },
            Command::HalfWordTest => routine.half_word_test(),
            Command::ByteTest => routine.byte_test(guard),
            Command::Erase => routine.erase(),
            Command::Dump => routine.dump(),
            Command::Help => Ok(()),
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_serial() => Err(e),
            Err(e) => {
                error!("{cmd} failed: {e}");
                send(&mut self.out, &failed(&e, e.code()))
            }
        }
    }

    fn flush(&mut self) -> Result<(), FlashbyteError> {
        self.out.flush().map_err(|e| {
            warn!("Console flush failed: {e:?}");
            FlashbyteError::serial()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routine::tests::Frozen;
    use flashbyte_core::unit::UnitAddress;
    use flashbyte_prog::sim::{SimBus, SimFlash};
    use flashbyte_prog::{FlashController, MemoryBus, ProgrammingUnitPrimitive};
    use pretty_assertions::assert_eq;

    fn session<F: TestFlash>(input: &[u8], flash: F, config: &Config) -> (String, F) {
        let mut console = Console::new(input, Vec::new(), flash, Frozen, config);
        console.run().unwrap();
        let (_, out, flash) = console.into_parts();
        (String::from_utf8(out).unwrap(), flash)
    }

    #[test]
    fn f303_session() {
        let config = Config::default();
        let (out, flash) = session(b"t", SimFlash::for_board(config.board), &config);
        assert_eq!(
            out,
            "Write t to start the flash test\r\n\
             t\
             Unlocking Flash...\n\
             Erasing sector 16...0 ms\n\
             Programming byte 0...ok! (0 ms)\n\
             Programming byte 1...ok! (0 ms)\n\
             Success!\n"
        );
        let unit = UnitAddress::containing(config.board.test_address());
        assert_eq!(flash.read_unit(unit), 0xFEFE);
    }

    #[test]
    fn f756_default_test_is_half_words() {
        let config = Config {
            board: Board::NucleoF756zg,
            echo: false,
            ..Config::default()
        };
        let board = config.board;
        let flash = FlashController::for_board(SimBus::for_board(board), board);
        let (out, flash) = session(b"t", flash, &config);
        assert!(out.starts_with("Write t to start the flash test\r\nUnlocking"));
        assert!(out.contains("Programming bit 2...ok! (0 ms)\n"));
        assert!(out.ends_with("Programming half word 1...ok! (0 ms)\nSuccess!\n"));
        assert!(flash.is_locked());
    }

    #[test]
    fn unknown_bytes_are_echoed_and_ignored() {
        let config = Config::default();
        let (out, flash) = session(b"xyz\n", SimFlash::for_board(config.board), &config);
        assert_eq!(out, "Write t to start the flash test\r\nxyz\n");
        assert!(flash.erase_log().is_empty());
    }

    #[test]
    fn failure_reported_and_session_continues() {
        let board = Board::NucleoF401re;
        let config = Config {
            board,
            echo: false,
            ..Config::default()
        };
        let mut bus = SimBus::for_board(board);
        bus.write_u32(board.family().keyr_address(), 0);
        let flash = FlashController::for_board(bus, board);

        let (out, _) = session(b"td", flash, &config);
        assert_eq!(
            out,
            "Write t to start the flash test\r\n\
             Unlocking Flash...\n\
             Failed: Flash Locked (code 258)\n\
             0x08010000: FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF\n"
        );
    }

    #[test]
    fn device_error_code_reported() {
        let config = Config {
            echo: false,
            ..Config::default()
        };
        let mut flash = SimFlash::for_board(config.board);
        flash.fail_next_program(0x02);
        let (out, _) = session(b"b", flash, &config);
        assert!(out.ends_with("Programming byte 1...Failed: Device Error: 0x02 (code 2)\n"));
    }

    #[test]
    fn tests_can_be_repeated() {
        let config = Config {
            echo: false,
            ..Config::default()
        };
        let (out, _) = session(b"tbt", SimFlash::for_board(config.board), &config);
        assert_eq!(out.matches("Success!\n").count(), 3);
    }

    #[test]
    fn help_lists_commands() {
        let config = Config {
            echo: false,
            ..Config::default()
        };
        let (out, _) = session(b"?", SimFlash::for_board(config.board), &config);
        assert!(out.contains("t - run the default flash test\n"));
        assert!(out.contains("? - show this help\n"));
    }
}
