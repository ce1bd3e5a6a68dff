// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! flashbyte - Contains a Device struct, with information about the board
//! under test.

use std::fmt;
use std::time::Instant;

use flashbyte_core::Board;

/// A millisecond clock, used to time flash operations.
pub trait Ticks {
    fn now_ms(&self) -> u64;
}

impl<T: Ticks + ?Sized> Ticks for &T {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

/// Contains information about the board being exercised.
#[derive(Debug, Clone)]
pub struct Device {
    board: Board,
    started: Instant,
}

impl Device {
    pub fn new(board: Board) -> Self {
        Self {
            board,
            started: Instant::now(),
        }
    }

    pub fn board(&self) -> Board {
        self.board
    }

    pub fn flash_size_bytes(&self) -> u32 {
        self.board.geometry().size()
    }

    pub fn uptime_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.uptime_ms() / 1000
    }
}

impl Ticks for Device {
    fn now_ms(&self) -> u64 {
        self.uptime_ms()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {} KB flash, console {} at {} baud)",
            self.board,
            self.board.family(),
            self.flash_size_bytes() / 1024,
            self.board.console_uart(),
            self.board.console_baud()
        )
    }
}
