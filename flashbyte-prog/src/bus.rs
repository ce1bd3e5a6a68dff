// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! flashbyte-prog - Memory bus access
//!
//! [`crate::FlashController`] accesses the flash peripheral's registers, and
//! the flash itself, through a [`MemoryBus`].  On target this is
//! [`MmioBus`].  Off target [`crate::sim::SimBus`] emulates the peripheral.

/// Access to a target's memory map.
///
/// Reads are assumed to be side effect free, other than reads of status
/// registers reflecting the passing of time.
pub trait MemoryBus {
    fn read_u8(&self, addr: u32) -> u8;
    fn read_u16(&self, addr: u32) -> u16;
    fn read_u32(&self, addr: u32) -> u32;
    fn write_u16(&mut self, addr: u32, value: u16);
    fn write_u32(&mut self, addr: u32, value: u32);
}

impl<B: MemoryBus + ?Sized> MemoryBus for &mut B {
    fn read_u8(&self, addr: u32) -> u8 {
        (**self).read_u8(addr)
    }

    fn read_u16(&self, addr: u32) -> u16 {
        (**self).read_u16(addr)
    }

    fn read_u32(&self, addr: u32) -> u32 {
        (**self).read_u32(addr)
    }

    fn write_u16(&mut self, addr: u32, value: u16) {
        (**self).write_u16(addr, value)
    }

    fn write_u32(&mut self, addr: u32, value: u32) {
        (**self).write_u32(addr, value)
    }
}

/// Volatile access to the memory map of the MCU this code is running on.
#[derive(Debug)]
pub struct MmioBus {
    _private: (),
}

impl MmioBus {
    /// Creates the bus.
    ///
    /// # Safety
    ///
    /// The caller must be running on an STM32 whose flash peripheral is
    /// at the addresses in [`flashbyte_core::stm`], and must not create
    /// more than one `MmioBus`, or otherwise access the flash peripheral
    /// while it exists.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl MemoryBus for MmioBus {
    fn read_u8(&self, addr: u32) -> u8 {
        // SAFETY: MmioBus::new() requires addresses to be valid
        unsafe { core::ptr::read_volatile(addr as usize as *const u8) }
    }

    fn read_u16(&self, addr: u32) -> u16 {
        // SAFETY: as above
        unsafe { core::ptr::read_volatile(addr as usize as *const u16) }
    }

    fn read_u32(&self, addr: u32) -> u32 {
        // SAFETY: as above
        unsafe { core::ptr::read_volatile(addr as usize as *const u32) }
    }

    fn write_u16(&mut self, addr: u32, value: u16) {
        // SAFETY: as above
        unsafe { core::ptr::write_volatile(addr as usize as *mut u16, value) }
    }

    fn write_u32(&mut self, addr: u32, value: u32) {
        // SAFETY: as above
        unsafe { core::ptr::write_volatile(addr as usize as *mut u32, value) }
    }
}
