// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! flashbyte - Flash test routines
//!
//! Each routine unlocks the flash, erases the board's test region, programs
//! it and reads it back, reporting progress on the console as it goes.  The
//! flash is locked again afterwards, whether or not the routine succeeded.

use embedded_io::Write;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use flashbyte_cmd::{
    DUMP_LEN, MSG_SUCCESS, MSG_UNLOCKING, dump, elapsed, erasing, ok, programming,
};
use flashbyte_core::Board;
use flashbyte_core::unit::{ERASED_UNIT, UnitAddress, UnitWord};
use flashbyte_prog::sim::SimFlash;
use flashbyte_prog::{
    FlashController, MemoryBus, ProgramError, ProgramGuard, ProgrammingUnitPrimitive,
    UnitWriteCoalescer,
};

use crate::device::Ticks;
use crate::error::{FlashbyteError, VerificationMismatch};

/// The byte programmed by the byte test.
pub const BYTE_TEST_VALUE: u8 = 0xFE;

/// A flash the routines can run against.
pub trait TestFlash: ProgrammingUnitPrimitive {
    fn unlock(&mut self) -> Result<(), ProgramError>;
    fn lock(&mut self);
}

impl<B: MemoryBus> TestFlash for FlashController<B> {
    fn unlock(&mut self) -> Result<(), ProgramError> {
        FlashController::unlock(self)
    }

    fn lock(&mut self) {
        FlashController::lock(self)
    }
}

// No lock to manage
impl TestFlash for SimFlash {
    fn unlock(&mut self) -> Result<(), ProgramError> {
        Ok(())
    }

    fn lock(&mut self) {}
}

/// One step of the half-word test.  Offsets are from the start of the
/// board's test region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Program `value`, then read it back.
    Program {
        offset: u32,
        value: UnitWord,
        label: &'static str,
    },

    /// Check a half-word is still erased.  Reports nothing unless it is not.
    CheckErased { offset: u32 },
}

const F303_STEPS: [Step; 2] = [
    Step::Program {
        offset: 0,
        value: 0xFFFE,
        label: "half word 0",
    },
    Step::Program {
        offset: 2,
        value: 0xFFFD,
        label: "half word 1",
    },
];

// Clears one more bit of the same half-word each time, then zeroes the next
const F401_STEPS: [Step; 5] = [
    Step::Program {
        offset: 0,
        value: 0xFFFE,
        label: "bit 0",
    },
    Step::Program {
        offset: 0,
        value: 0xFFFC,
        label: "bit 1",
    },
    Step::Program {
        offset: 0,
        value: 0xFFF8,
        label: "bit 2",
    },
    Step::CheckErased { offset: 2 },
    Step::Program {
        offset: 2,
        value: 0x0000,
        label: "half word 1",
    },
];

const F756_STEPS: [Step; 4] = [
    Step::Program {
        offset: 0,
        value: 0xFFFE,
        label: "bit 0",
    },
    Step::Program {
        offset: 0,
        value: 0xFFFC,
        label: "bit 1",
    },
    Step::Program {
        offset: 0,
        value: 0xFFF8,
        label: "bit 2",
    },
    Step::Program {
        offset: 2,
        value: 0x0000,
        label: "half word 1",
    },
];

/// The half-word test for a board.  The F3 refuses to program a half-word
/// twice, unless to zero, so only programs each half-word once.
pub fn half_word_steps(board: Board) -> &'static [Step] {
    match board {
        Board::NucleoF303re => &F303_STEPS,
        Board::NucleoF401re => &F401_STEPS,
        Board::NucleoF756zg => &F756_STEPS,
    }
}

/// Writes a message to the console.
pub fn send<W: Write>(out: &mut W, msg: &str) -> Result<(), FlashbyteError> {
    out.write_all(msg.as_bytes()).map_err(|e| {
        warn!("Console write failed: {e:?}");
        FlashbyteError::serial()
    })
}

fn verify(address: u32, expected: UnitWord, actual: UnitWord) -> Result<(), FlashbyteError> {
    if expected == actual {
        Ok(())
    } else {
        let mismatch = VerificationMismatch {
            address,
            expected,
            actual,
        };
        warn!("{mismatch}");
        Err(mismatch.into())
    }
}

/// Runs flash tests against a board, reporting to the console.
pub struct Routine<'a, F, W, T> {
    board: Board,
    flash: &'a mut F,
    out: &'a mut W,
    ticks: &'a T,
}

impl<'a, F: TestFlash, W: Write, T: Ticks> Routine<'a, F, W, T> {
    pub fn new(board: Board, flash: &'a mut F, out: &'a mut W, ticks: &'a T) -> Self {
        Self {
            board,
            flash,
            out,
            ticks,
        }
    }

    fn since(&self, start: u64) -> u64 {
        self.ticks.now_ms().saturating_sub(start)
    }

    /// Unlocks the flash and erases the test region.
    fn unlock_and_erase(&mut self) -> Result<(), FlashbyteError> {
        send(self.out, MSG_UNLOCKING)?;
        self.flash.unlock()?;

        let region = self.board.test_region();
        send(self.out, &erasing(self.board.test_region_label()))?;
        let start = self.ticks.now_ms();
        self.flash.erase(region)?;
        let ms = self.since(start);
        debug!("Erased {region} in {ms} ms");
        send(self.out, &elapsed(ms))
    }

    /// Runs `steps` with the flash unlocked, then locks it.
    fn unlocked<R>(&mut self, steps: R) -> Result<(), FlashbyteError>
    where
        R: FnOnce(&mut Self) -> Result<(), FlashbyteError>,
    {
        let result = self.unlock_and_erase().and_then(|()| steps(self));
        self.flash.lock();
        result?;
        send(self.out, MSG_SUCCESS)
    }

    /// Programs half-words directly, checking each one reads back.
    ///
    /// Returns:
    /// - `Ok(())`: Every step passed.
    /// - `Err(FlashbyteError)`: The first failure.  Later steps are not run.
    pub fn half_word_test(&mut self) -> Result<(), FlashbyteError> {
        info!("Running half-word test on {}", self.board);
        self.unlocked(Self::program_half_words)
    }

    fn program_half_words(&mut self) -> Result<(), FlashbyteError> {
        let base = self.board.test_address();
        for step in half_word_steps(self.board) {
            match *step {
                Step::Program {
                    offset,
                    value,
                    label,
                } => {
                    let unit = UnitAddress::containing(base + offset);
                    send(self.out, &programming(label))?;
                    let start = self.ticks.now_ms();
                    self.flash.program_unit(unit, value)?;
                    let ms = self.since(start);
                    verify(unit.raw(), value, self.flash.read_unit(unit))?;
                    send(self.out, &ok(ms))?;
                }
                Step::CheckErased { offset } => {
                    let unit = UnitAddress::containing(base + offset);
                    verify(unit.raw(), ERASED_UNIT, self.flash.read_unit(unit))?;
                }
            }
        }
        Ok(())
    }

    /// Programs the first two bytes of the test region one at a time,
    /// through a [`UnitWriteCoalescer`].
    ///
    /// After the first byte the flash must still be erased, with the byte
    /// readable through the coalescer.  After the second both bytes must be
    /// in the flash.
    pub fn byte_test(&mut self, guard: ProgramGuard) -> Result<(), FlashbyteError> {
        info!("Running byte test on {} with {guard:?}", self.board);
        self.unlocked(|routine| routine.byte_steps(guard))
    }

    fn byte_steps(&mut self, guard: ProgramGuard) -> Result<(), FlashbyteError> {
        let base = self.board.test_address();
        let unit = UnitAddress::containing(base);
        let value = BYTE_TEST_VALUE as UnitWord;
        let physical = [ERASED_UNIT, (value << 8) | value];

        let mut coalescer = UnitWriteCoalescer::with_guard(&mut *self.flash, guard);
        for (index, expected) in physical.into_iter().enumerate() {
            let addr = base + index as u32;
            send(self.out, &programming(format_args!("byte {index}")))?;
            let start = self.ticks.now_ms();
            let outcome = coalescer.write_byte(addr, BYTE_TEST_VALUE)?;
            let ms = self.ticks.now_ms().saturating_sub(start);
            trace!("Byte {index}: {outcome:?}");

            verify(addr, value, coalescer.read_byte(addr) as UnitWord)?;
            verify(unit.raw(), expected, coalescer.primitive().read_unit(unit))?;
            send(self.out, &ok(ms))?;
        }
        coalescer.flush()?;
        Ok(())
    }

    /// Erases the test region.
    pub fn erase(&mut self) -> Result<(), FlashbyteError> {
        info!("Erasing test region on {}", self.board);
        self.unlocked(|_| Ok(()))
    }

    /// Shows the first bytes of the test region, as stored in the flash.
    pub fn dump(&mut self) -> Result<(), FlashbyteError> {
        let base = self.board.test_address();
        let mut bytes = [0u8; DUMP_LEN];
        for (addr, byte) in (base..).zip(bytes.iter_mut()) {
            *byte = self.flash.read_byte_physical(addr);
        }
        send(self.out, &dump(base, &bytes))
    }
}
