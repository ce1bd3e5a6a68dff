// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! flashbyte-core - Flash geometry
//!
//! Describes how a target's flash is laid out for erasing: either as
//! uniform pages (STM32F3) or as a table of variably sized sectors
//! (STM32F4/F7).

use core::fmt;
use core::ops::Range;
use serde::Serialize;

/// A region of flash that can be erased in a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EraseRegion {
    /// A page, by number, on page erase parts.
    Page(u16),

    /// A sector, by number, on sector erase parts.
    Sector(u8),

    /// The entire flash.
    Mass,
}

impl fmt::Display for EraseRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EraseRegion::Page(n) => write!(f, "page {n}"),
            EraseRegion::Sector(n) => write!(f, "sector {n}"),
            EraseRegion::Mass => write!(f, "mass"),
        }
    }
}

/// How a flash is divided into erasable regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseLayout {
    /// Uniform pages of `page_size` bytes.
    Pages { page_size: u32 },

    /// Sectors, with sizes in bytes given in order from the flash base.
    Sectors(&'static [u32]),
}

/// A target's flash geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashGeometry {
    base: u32,
    size: u32,
    layout: EraseLayout,
}

impl FlashGeometry {
    pub const fn new(base: u32, size: u32, layout: EraseLayout) -> Self {
        Self { base, size, layout }
    }

    /// Flash base address
    pub const fn base(&self) -> u32 {
        self.base
    }

    /// Flash size in bytes
    pub const fn size(&self) -> u32 {
        self.size
    }

    pub const fn layout(&self) -> EraseLayout {
        self.layout
    }

    /// Address range covered by the flash
    pub const fn range(&self) -> Range<u32> {
        self.base..self.base + self.size
    }

    /// Whether `addr` is within the flash.
    pub const fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr - self.base < self.size
    }

    /// Whether the `len` bytes starting at `addr` are all within the flash.
    pub fn contains_range(&self, addr: u32, len: u32) -> bool {
        if len == 0 {
            return self.contains(addr) || addr == self.base + self.size;
        }
        match addr.checked_add(len - 1) {
            Some(last) => self.contains(addr) && self.contains(last),
            None => false,
        }
    }

    /// Number of erasable regions, excluding [`EraseRegion::Mass`].
    pub fn region_count(&self) -> usize {
        match self.layout {
            EraseLayout::Pages { page_size } => (self.size / page_size) as usize,
            EraseLayout::Sectors(sizes) => sizes.len(),
        }
    }

    /// Returns the nth region, in the form appropriate to this layout.
    pub fn region(&self, index: usize) -> Option<EraseRegion> {
        if index >= self.region_count() {
            return None;
        }
        match self.layout {
            EraseLayout::Pages { .. } => u16::try_from(index).ok().map(EraseRegion::Page),
            EraseLayout::Sectors(_) => u8::try_from(index).ok().map(EraseRegion::Sector),
        }
    }

    /// Returns the address range covered by an erase region.
    ///
    /// Arguments:
    /// - `region`: The region to look up.
    ///
    /// Returns:
    /// - `Some(Range<u32>)`: The absolute addresses covered by the region.
    /// - `None`: If the region does not exist, or is of the wrong kind for
    ///   this layout (a sector on a page erase part, for example).
    pub fn region_range(&self, region: EraseRegion) -> Option<Range<u32>> {
        match (region, self.layout) {
            (EraseRegion::Mass, _) => Some(self.range()),
            (EraseRegion::Page(n), EraseLayout::Pages { page_size }) => {
                let n = n as usize;
                if n >= self.region_count() {
                    return None;
                }
                let start = self.base + n as u32 * page_size;
                Some(start..start + page_size)
            }
            (EraseRegion::Sector(n), EraseLayout::Sectors(sizes)) => {
                let n = n as usize;
                let size = *sizes.get(n)?;
                let start = self.base + sizes[..n].iter().sum::<u32>();
                Some(start..start + size)
            }
            _ => None,
        }
    }

    /// Size in bytes of an erase region, if it exists.
    pub fn region_size(&self, region: EraseRegion) -> Option<u32> {
        self.region_range(region).map(|r| r.end - r.start)
    }

    /// Returns the region containing `addr`.
    pub fn region_of(&self, addr: u32) -> Option<EraseRegion> {
        if !self.contains(addr) {
            return None;
        }
        let offset = addr - self.base;
        match self.layout {
            EraseLayout::Pages { page_size } => {
                u16::try_from(offset / page_size).ok().map(EraseRegion::Page)
            }
            EraseLayout::Sectors(sizes) => {
                let mut start = 0;
                for (n, size) in sizes.iter().enumerate() {
                    if offset < start + size {
                        return u8::try_from(n).ok().map(EraseRegion::Sector);
                    }
                    start += size;
                }
                None
            }
        }
    }

    /// Returns an iterator over the regions overlapping `range`, in address
    /// order.  Addresses outside the flash are ignored.
    pub fn regions_overlapping(&self, range: Range<u32>) -> impl Iterator<Item = EraseRegion> + '_ {
        (0..self.region_count())
            .filter_map(move |index| self.region(index))
            .filter(move |region| match self.region_range(*region) {
                Some(r) => r.start < range.end && range.start < r.end,
                None => false,
            })
    }
}
