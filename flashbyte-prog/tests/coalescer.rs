// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Byte write coalescing against a simulated flash.

use flashbyte_core::Board;
use flashbyte_core::flash::EraseRegion;
use flashbyte_core::unit::UnitAddress;
use flashbyte_prog::sim::SimFlash;
use flashbyte_prog::{
    FlashController, ProgramError, ProgramGuard, ProgrammingUnitPrimitive, UnitWriteCoalescer,
    WriteOutcome, sim::SimBus,
};
use pretty_assertions::assert_eq;

const BOARD: Board = Board::NucleoF303re;
const BASE: u32 = 0x0800_8000;

fn coalescer() -> UnitWriteCoalescer<SimFlash> {
    UnitWriteCoalescer::new(SimFlash::for_board(BOARD))
}

fn programs(c: &UnitWriteCoalescer<SimFlash>) -> Vec<(u32, u16)> {
    c.primitive()
        .program_log()
        .iter()
        .map(|unit| (unit.address().raw(), unit.value()))
        .collect()
}

fn unit(addr: u32) -> UnitAddress {
    UnitAddress::containing(addr)
}

#[test]
fn low_then_high_programs_once() {
    for (b0, b1) in [(0x12, 0x34), (0x00, 0xFF), (0xFF, 0x00), (0xA5, 0x5A)] {
        let mut c = coalescer();
        assert_eq!(c.write_byte(BASE, b0), Ok(WriteOutcome::Buffered));
        assert_eq!(c.write_byte(BASE + 1, b1), Ok(WriteOutcome::Programmed));
        assert_eq!(programs(&c), [(BASE, ((b1 as u16) << 8) | b0 as u16)]);
        assert_eq!(c.read_byte(BASE), b0);
        assert_eq!(c.read_byte(BASE + 1), b1);
    }
}

#[test]
fn low_byte_alone_never_programs() {
    let mut c = coalescer();
    c.primitive_mut().preload(BASE + 1, &[0x5C]);
    assert_eq!(c.write_byte(BASE, 0x42), Ok(WriteOutcome::Buffered));

    assert!(programs(&c).is_empty());
    assert_eq!(c.primitive().read_unit(unit(BASE)), 0x5CFF);
    assert_eq!(c.read_byte(BASE), 0x42);
    assert_eq!(c.read_byte(BASE + 1), 0x5C);
}

#[test]
fn switching_unit_flushes_low_lane_only() {
    let mut c = coalescer();
    c.write_byte(BASE, 0x42).unwrap();
    assert_eq!(c.write_byte(BASE + 0x10, 0x99), Ok(WriteOutcome::Buffered));

    // High lane never written, so programmed as 0x00
    assert_eq!(programs(&c), [(BASE, 0x0042)]);
    assert_eq!(c.pending().map(|u| u.address().raw()), Some(BASE + 0x10));
    assert_eq!(c.read_byte(BASE), 0x42);
    assert_eq!(c.read_byte(BASE + 1), 0x00);
}

#[test]
fn switching_unit_by_high_lane() {
    let mut c = coalescer();
    c.write_byte(BASE + 2, 0x11).unwrap();
    assert_eq!(c.write_byte(BASE + 1, 0x22), Ok(WriteOutcome::Programmed));
    assert_eq!(programs(&c), [(BASE + 2, 0x0011), (BASE, 0x2200)]);
    assert!(!c.has_pending_write());
}

#[test]
fn pending_flag_lifecycle() {
    let mut c = coalescer();
    assert!(!c.has_pending_write());
    c.write_byte(BASE, 0x01).unwrap();
    assert!(c.has_pending_write());
    c.write_byte(BASE + 1, 0x02).unwrap();
    assert!(!c.has_pending_write());
}

#[test]
fn flush_with_nothing_pending() {
    let mut c = coalescer();
    assert_eq!(c.flush(), Ok(()));
    assert_eq!(c.flush(), Ok(()));
    assert!(programs(&c).is_empty());
    assert!(!c.has_pending_write());
}

#[test]
fn explicit_flush_programs_pending_low_lane() {
    let mut c = coalescer();
    c.write_byte(BASE + 4, 0x7E).unwrap();
    assert_eq!(c.flush(), Ok(()));
    assert_eq!(programs(&c), [(BASE + 4, 0x007E)]);
    assert!(!c.has_pending_write());
    assert_eq!(c.read_byte(BASE + 4), 0x7E);
}

#[test]
fn round_trip_every_value() {
    for v in 0..=u8::MAX {
        // Low lane, high lane not yet written
        let mut c = coalescer();
        c.write_byte(BASE, v).unwrap();
        assert_eq!(c.read_byte(BASE), v);

        // High lane, low lane not written
        let mut c = coalescer();
        c.write_byte(BASE + 1, v).unwrap();
        assert_eq!(c.read_byte(BASE + 1), v);

        // High lane after low lane
        let mut c = coalescer();
        c.write_byte(BASE, !v).unwrap();
        c.write_byte(BASE + 1, v).unwrap();
        assert_eq!(c.read_byte(BASE + 1), v);
        assert_eq!(c.read_byte(BASE), !v);

        // Low lane after high lane was programmed
        let mut c = coalescer();
        c.write_byte(BASE + 1, !v).unwrap();
        c.write_byte(BASE, v).unwrap();
        assert_eq!(c.read_byte(BASE), v);
    }
}

#[test]
fn zero_unit_scenario() {
    let mut c = coalescer();
    assert_eq!(c.primitive().read_unit(unit(BASE)), 0xFFFF);

    assert_eq!(c.write_byte(BASE, 0x00), Ok(WriteOutcome::Buffered));
    assert!(c.has_pending_write());
    assert!(programs(&c).is_empty());

    assert_eq!(c.write_byte(BASE + 1, 0x00), Ok(WriteOutcome::Programmed));
    assert_eq!(programs(&c), [(BASE, 0x0000)]);
    assert!(!c.has_pending_write());
    assert_eq!(c.read_byte(BASE), 0x00);
    assert_eq!(c.read_byte(BASE + 1), 0x00);
}

// The high lane of a pending unit is read from the flash.  Only the low lane
// is overlaid.
#[test]
fn pending_high_lane_is_not_overlaid() {
    let mut c = coalescer();
    c.write_byte(BASE, 0x12).unwrap();
    c.write_byte(BASE + 1, 0x34).unwrap();

    // Unit now programmed, so the guard defers a re-write
    assert_eq!(c.write_byte(BASE + 1, 0x80), Ok(WriteOutcome::Deferred));
    assert!(c.has_pending_write());
    assert_eq!(c.pending().map(|u| u.value()), Some(0x8000));
    assert_eq!(c.read_byte(BASE + 1), 0x34);
    assert_eq!(c.read_byte(BASE), 0x00);
}

#[test]
fn deferred_keeps_pending_until_unit_switch() {
    let mut c = coalescer();
    c.write(BASE, &[0x12, 0x34]).unwrap();

    assert_eq!(c.write_byte(BASE, 0x56), Ok(WriteOutcome::Buffered));
    assert_eq!(c.write_byte(BASE + 1, 0x78), Ok(WriteOutcome::Deferred));
    assert_eq!(c.flush(), Ok(()));
    assert_eq!(c.launch_write(), Ok(WriteOutcome::Deferred));
    assert!(c.has_pending_write());

    // The deferred unit is dropped, and does not leak into the next one
    assert_eq!(c.write_byte(BASE + 2, 0x01), Ok(WriteOutcome::Buffered));
    assert_eq!(c.pending().map(|u| u.value()), Some(0x0001));
    assert_eq!(programs(&c), [(BASE, 0x3412)]);
    assert_eq!(c.primitive().read_unit(unit(BASE)), 0x3412);
}

#[test]
fn zero_overwrite_permitted() {
    let mut c = coalescer();
    c.write(BASE, &[0x12, 0x34]).unwrap();
    assert_eq!(c.write_byte(BASE, 0x00), Ok(WriteOutcome::Buffered));
    assert_eq!(c.write_byte(BASE + 1, 0x00), Ok(WriteOutcome::Programmed));
    assert_eq!(c.primitive().read_unit(unit(BASE)), 0x0000);
}

#[test]
fn clear_only_guard_allows_clearing_bits() {
    let board = Board::NucleoF401re;
    let base = board.test_address();
    let mut c = UnitWriteCoalescer::with_guard(SimFlash::for_board(board), ProgramGuard::ClearOnly);

    c.write(base, &[0xFE, 0xFF]).unwrap();
    assert_eq!(c.write_byte(base, 0xFC), Ok(WriteOutcome::Buffered));
    assert_eq!(c.write_byte(base + 1, 0xFF), Ok(WriteOutcome::Programmed));
    assert_eq!(c.primitive().read_unit(unit(base)), 0xFFFC);

    // Would set bit 1
    c.write_byte(base, 0xFE).unwrap();
    assert_eq!(c.write_byte(base + 1, 0xFF), Ok(WriteOutcome::Deferred));

    // The default guard refuses the same clear
    c.discard();
    c.set_guard(ProgramGuard::ErasedOrZero);
    c.write_byte(base, 0xF8).unwrap();
    assert_eq!(c.write_byte(base + 1, 0xFF), Ok(WriteOutcome::Deferred));
    assert_eq!(c.guard(), ProgramGuard::ErasedOrZero);
}

#[test]
fn program_failure_propagates_and_clears_pending() {
    let mut c = coalescer();
    c.primitive_mut().fail_next_program(0x02);
    c.write_byte(BASE, 0x01).unwrap();
    assert_eq!(c.write_byte(BASE + 1, 0x02), Err(ProgramError::Device(0x02)));
    assert!(!c.has_pending_write());

    // No retry on the next operation
    assert_eq!(c.flush(), Ok(()));
    assert_eq!(programs(&c), [(BASE, 0x0201)]);
    assert_eq!(c.read_byte(BASE), 0xFF);
}

#[test]
fn failed_flush_on_unit_switch_propagates() {
    let mut c = coalescer();
    c.write_byte(BASE, 0x01).unwrap();
    c.primitive_mut().fail_next_program(0x01);
    assert_eq!(c.write_byte(BASE + 8, 0x02), Err(ProgramError::Device(0x01)));
    assert!(!c.has_pending_write());
    assert!(c.primitive().read_unit(unit(BASE + 8)) == 0xFFFF);
}

#[test]
fn device_rejection_is_reported_unchanged() {
    // A partly programmed F3 unit, written through ClearOnly, is refused by
    // the flash
    let mut c = UnitWriteCoalescer::with_guard(SimFlash::for_board(BOARD), ProgramGuard::ClearOnly);
    c.write(BASE, &[0xFE, 0xFF]).unwrap();
    c.write_byte(BASE, 0xFC).unwrap();
    assert_eq!(c.write_byte(BASE + 1, 0xFF), Err(ProgramError::Device(0x01)));
    assert!(!c.has_pending_write());
}

#[test]
fn works_over_borrowed_primitive() {
    let mut flash = SimFlash::for_board(BOARD);
    flash.erase(EraseRegion::Page(16)).unwrap();
    {
        let mut c = UnitWriteCoalescer::new(&mut flash);
        c.write(BASE, &[0xDE, 0xAD, 0xBE]).unwrap();
        c.flush().unwrap();
    }
    assert_eq!(flash.read_unit(unit(BASE)), 0xADDE);
    assert_eq!(flash.read_unit(unit(BASE + 2)), 0x00BE);
}

#[test]
fn works_over_flash_controller() {
    let board = Board::NucleoF756zg;
    let base = board.test_address();
    let mut controller = FlashController::for_board(SimBus::for_board(board), board);
    controller.unlock().unwrap();
    controller.erase(board.test_region()).unwrap();

    let mut c = UnitWriteCoalescer::new(controller);
    c.write_byte(base, 0xFE).unwrap();
    assert_eq!(c.read_byte(base), 0xFE);
    assert_eq!(c.primitive().read_unit(unit(base)), 0xFFFF);
    assert_eq!(c.write_byte(base + 1, 0xFE), Ok(WriteOutcome::Programmed));
    assert_eq!(c.primitive().read_unit(unit(base)), 0xFEFE);

    let controller = c.into_inner();
    assert!(!controller.is_locked());
}
