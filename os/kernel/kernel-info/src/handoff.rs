//! # Loader → Kernel Memory Hand-off
//!
//! What the bootstrap memory manager passes on once the kernel's own
//! allocators take over: the top-level table it built, and the physical memory
//! it has not consumed.

use core::fmt;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// A contiguous run of free physical memory, `[address, address + length)`.
#[derive(Copy, Clone, Default, Eq, PartialEq)]
pub struct FreeMemoryRegion {
    pub address: PhysicalAddress,
    pub length: u64,
}

impl FreeMemoryRegion {
    pub const EMPTY: Self = Self::new(PhysicalAddress::zero(), 0);

    #[must_use]
    pub const fn new(address: PhysicalAddress, length: u64) -> Self {
        Self { address, length }
    }

    /// Exclusive end address.
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.address.as_u64() + self.length)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Whether `[start, end)` shares at least one byte with this region.
    #[must_use]
    pub const fn overlaps(&self, start: PhysicalAddress, end: PhysicalAddress) -> bool {
        start.as_u64() < self.end().as_u64() && self.address.as_u64() < end.as_u64()
    }

    /// Drop `bytes` from the low end of the region and return the old start.
    ///
    /// # Panics
    /// If `bytes` exceeds the region length.
    pub const fn consume_front(&mut self, bytes: u64) -> PhysicalAddress {
        assert!(bytes <= self.length, "consuming past the end of a free region");
        let start = self.address;
        self.address = PhysicalAddress::new(start.as_u64() + bytes);
        self.length -= bytes;
        start
    }
}

impl fmt::Debug for FreeMemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.address.as_u64(), self.end().as_u64())
    }
}

/// Memory state at the moment the kernel takes over from the loader.
#[derive(Debug, Copy, Clone)]
pub struct BootHandoff<'a> {
    /// Top-level page table built during bootstrap (the CR3 value).
    pub root_table: PhysicalPage<Size4K>,
    /// Physical memory still free, sorted by descending address.
    pub free_regions: &'a [FreeMemoryRegion],
    /// Exclusive end of the highest available RAM ever reported.
    pub memory_end: PhysicalAddress,
}

impl BootHandoff<'_> {
    /// Number of 4 KiB frames needed to describe all RAM up to `memory_end`.
    #[must_use]
    pub const fn total_frames(&self) -> u64 {
        kernel_memory_addresses::align_up(self.memory_end.as_u64(), 4096) / 4096
    }

    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.free_regions.iter().map(|r| r.length).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_front_moves_start() {
        let mut r = FreeMemoryRegion::new(PhysicalAddress::new(0x1000), 0x3000);
        assert_eq!(r.consume_front(0x1000), PhysicalAddress::new(0x1000));
        assert_eq!(r.address, PhysicalAddress::new(0x2000));
        assert_eq!(r.length, 0x2000);
        assert_eq!(r.end(), PhysicalAddress::new(0x4000));
    }

    #[test]
    fn overlap_is_half_open() {
        let r = FreeMemoryRegion::new(PhysicalAddress::new(0x1000), 0x1000);
        assert!(!r.overlaps(PhysicalAddress::new(0x2000), PhysicalAddress::new(0x3000)));
        assert!(!r.overlaps(PhysicalAddress::new(0x0), PhysicalAddress::new(0x1000)));
        assert!(r.overlaps(PhysicalAddress::new(0x1FFF), PhysicalAddress::new(0x3000)));
    }

    #[test]
    fn total_frames_rounds_up() {
        let regions = [FreeMemoryRegion::new(PhysicalAddress::new(0), 0x2800)];
        let handoff = BootHandoff {
            root_table: PhysicalPage::from_frame_number(0),
            free_regions: &regions,
            memory_end: PhysicalAddress::new(0x2800),
        };
        assert_eq!(handoff.total_frames(), 3);
        assert_eq!(handoff.free_bytes(), 0x2800);
    }
}
